// In-memory backend — answers every page message without persisting anything.
//
// This is the background side of the contract for the CLI and the tests:
// classification goes to a boxed ToxicityScorer, counters and evidence live in
// memory, and the parental PIN is kept only as a salted SHA-256 digest.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::messages::{AnalyzeReply, DetectionEvent, EvidenceRecord, Request, Response};
use super::traits::ExtensionBridge;
use crate::config::validate_pin;
use crate::settings::Settings;
use crate::toxicity::traits::{MissingApiKey, RateLimited, ToxicityScorer};

/// Aggregate counters, as the dashboard would show them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    pub scanned: u64,
    pub detections: u64,
    pub by_category: BTreeMap<String, u64>,
    pub recent: Vec<DetectionEvent>,
}

/// Keep this many detections in `Stats::recent`.
const RECENT_DETECTIONS: usize = 50;

struct PinDigest {
    salt: [u8; 16],
    digest: [u8; 32],
}

impl PinDigest {
    fn new(pin: &str) -> Self {
        let salt: [u8; 16] = rand::random();
        let digest = hash_pin(&salt, pin);
        Self { salt, digest }
    }

    fn matches(&self, candidate: &str) -> bool {
        constant_time_eq(&hash_pin(&self.salt, candidate), &self.digest)
    }
}

fn hash_pin(salt: &[u8], pin: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(pin.as_bytes());
    hasher.finalize().into()
}

/// Constant-time byte comparison so a wrong PIN can't be timed.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub struct InMemoryBackend {
    scorer: Box<dyn ToxicityScorer>,
    settings: RwLock<Settings>,
    stats: Mutex<Stats>,
    evidence: Mutex<Vec<EvidenceRecord>>,
    pin: RwLock<Option<PinDigest>>,
    verify_calls: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new(scorer: Box<dyn ToxicityScorer>, settings: Settings) -> Self {
        Self {
            scorer,
            settings: RwLock::new(settings),
            stats: Mutex::new(Stats::default()),
            evidence: Mutex::new(Vec::new()),
            pin: RwLock::new(None),
            verify_calls: AtomicUsize::new(0),
        }
    }

    /// Store a new parental PIN (4 digits).
    pub async fn set_pin(&self, pin: &str) -> Result<()> {
        validate_pin(pin, 4)?;
        *self.pin.write().await = Some(PinDigest::new(pin));
        info!("Parental PIN updated");
        Ok(())
    }

    /// Replace the stored settings. The caller pushes SETTINGS_UPDATED to
    /// open pages.
    pub async fn update_settings(&self, settings: Settings) {
        *self.settings.write().await = settings;
    }

    pub async fn stats(&self) -> Stats {
        self.stats.lock().await.clone()
    }

    pub async fn evidence(&self) -> Vec<EvidenceRecord> {
        self.evidence.lock().await.clone()
    }

    /// How many PARENTAL_VERIFY_PIN requests reached the verifier.
    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    async fn analyze(&self, texts: Vec<String>) -> Result<Response> {
        if texts.is_empty() {
            return Ok(Response::Analysis(AnalyzeReply::Skipped));
        }
        match self.scorer.score_batch(&texts).await {
            Ok(results) => Ok(Response::Analysis(AnalyzeReply::Results(results))),
            Err(e) if e.downcast_ref::<MissingApiKey>().is_some() => {
                warn!("Classifier has no API key, rejecting batch");
                Ok(Response::Analysis(AnalyzeReply::NoApiKey))
            }
            Err(e) if e.downcast_ref::<RateLimited>().is_some() => {
                warn!(texts = texts.len(), "Classifier rate limited, batch not scored");
                Ok(Response::Analysis(AnalyzeReply::RateLimited))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ExtensionBridge for InMemoryBackend {
    async fn send(&self, request: Request) -> Result<Response> {
        debug!(kind = request.kind(), "Handling page message");
        match request {
            Request::AnalyzeText { texts } => self.analyze(texts).await,
            Request::GetSettings => Ok(Response::Settings(self.settings.read().await.clone())),
            Request::RecordScanned { count } => {
                self.stats.lock().await.scanned += count as u64;
                Ok(Response::Ack)
            }
            Request::RecordDetection(event) => {
                let mut stats = self.stats.lock().await;
                stats.detections += 1;
                *stats.by_category.entry(event.category.clone()).or_insert(0) += 1;
                stats.recent.push(event);
                if stats.recent.len() > RECENT_DETECTIONS {
                    stats.recent.remove(0);
                }
                Ok(Response::Ack)
            }
            Request::CaptureEvidence(record) => {
                info!(url = %record.url, "Evidence captured");
                self.evidence.lock().await.push(record);
                Ok(Response::Ack)
            }
            Request::ParentalVerifyPin { pin } => {
                self.verify_calls.fetch_add(1, Ordering::SeqCst);
                let success = match self.pin.read().await.as_ref() {
                    Some(stored) => stored.matches(&pin),
                    None => {
                        warn!("PIN verification requested but no parental PIN is set");
                        false
                    }
                };
                Ok(Response::PinVerdict { success })
            }
        }
    }
}
