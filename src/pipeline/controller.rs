// Moderator — the per-page controller that owns the whole pipeline.
//
// Everything a page needs lives here: the settings snapshot, the processed
// set, the queue, the overlays, the PIN gate and the toasts. The controller
// is synchronous; it is handed the current time and returns work for the
// async runtime (batches to classify, PINs to verify, records to send).

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::dispatcher::Dispatcher;
use super::gate::{GateOutcome, PinSubmission, RevealGate};
use super::overlay::{OverlayManager, RedactionState};
use super::registry::NodeRegistry;
use super::scanner::{BatchItem, Scanner};
use super::toast::{Notifier, Toast, ToastKind};
use super::watcher::MutationWatcher;
use crate::bridge::{AnalyzeReply, Request};
use crate::config::PipelineTuning;
use crate::dom::{ContentSurface, NodeId};
use crate::settings::Settings;

const NO_API_KEY_TOAST: &str = "no-api-key";
const RATE_LIMITED_TOAST: &str = "rate-limited";

/// Where on an overlay the user clicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickTarget {
    /// The blurred content itself.
    BlurLayer,
    /// The Show/Hide button.
    RevealControl,
}

/// A batch handed to the classifier, tagged with the controller generation
/// it was dispatched under.
#[derive(Debug, Clone)]
pub struct PendingBatch {
    pub generation: u64,
    pub items: Vec<BatchItem>,
}

impl PendingBatch {
    pub fn texts(&self) -> Vec<String> {
        self.items.iter().map(|item| item.text.clone()).collect()
    }
}

pub struct Moderator<S> {
    surface: S,
    settings: Settings,
    /// Bumped whenever protection is switched off; older batches are stale.
    generation: u64,
    registry: NodeRegistry,
    scanner: Scanner,
    watcher: MutationWatcher,
    dispatcher: Dispatcher,
    overlays: OverlayManager,
    gate: RevealGate,
    toasts: Notifier,
    outbox: Vec<Request>,
}

impl<S: ContentSurface> Moderator<S> {
    pub fn new(surface: S, settings: Settings, tuning: PipelineTuning) -> Self {
        Self {
            surface,
            settings,
            generation: 0,
            registry: NodeRegistry::new(),
            scanner: Scanner::new(&tuning),
            watcher: MutationWatcher::new(),
            dispatcher: Dispatcher::new(&tuning),
            overlays: OverlayManager::new(),
            gate: RevealGate::new(&tuning),
            toasts: Notifier::new(tuning.toast_ttl),
            outbox: Vec::new(),
        }
    }

    // --- Discovery ---

    /// Initial scan of the whole document.
    pub fn start(&mut self, now: Instant) {
        if !self.settings.enabled {
            info!("Protection disabled, not scanning");
            self.watcher.discard(&mut self.surface);
            return;
        }
        self.scan_all(now);
    }

    /// Forget every processed mark and scan the whole document again.
    pub fn rescan(&mut self, now: Instant) {
        if !self.settings.enabled {
            return;
        }
        self.registry.clear();
        self.scan_all(now);
    }

    fn scan_all(&mut self, now: Instant) {
        let root = self.surface.root();
        let items = self
            .scanner
            .discover(&self.surface, root, &mut self.registry);
        // The full scan covers anything the log recorded so far.
        self.watcher.discard(&mut self.surface);
        info!(candidates = items.len(), "Document scanned");
        self.dispatcher.enqueue(items);
        self.dispatcher.schedule(now);
    }

    /// Let the caller change the document, then pick up what changed.
    pub fn mutate<F: FnOnce(&mut S)>(&mut self, edit: F, now: Instant) {
        edit(&mut self.surface);
        self.on_dom_changed(now);
    }

    /// Drain the mutation log and queue anything new.
    pub fn on_dom_changed(&mut self, now: Instant) {
        if !self.settings.enabled {
            self.watcher.discard(&mut self.surface);
            return;
        }
        let report = self
            .watcher
            .collect(&mut self.surface, &self.scanner, &mut self.registry);
        if report.records > 0 {
            self.dispatcher.enqueue(report.items);
            self.dispatcher.schedule(now);
        }

        // The page may have removed content someone asked to reveal.
        let gone: Vec<NodeId> = self
            .gate
            .target()
            .into_iter()
            .chain(self.gate.waiting().copied())
            .filter(|node| !self.surface.is_attached(*node))
            .collect();
        for node in gone {
            self.gate.forget(node, now);
        }
        self.overlays.prune_detached(&self.surface);
    }

    // --- Dispatch ---

    /// Take the next batch if its flush is due. Records the scanned count
    /// at dispatch time, whatever the classifier later says.
    pub fn poll_flush(&mut self, now: Instant) -> Option<PendingBatch> {
        if !self.settings.enabled {
            return None;
        }
        let items = self.dispatcher.take_due(now)?;
        debug!(
            items = items.len(),
            remaining = self.dispatcher.pending(),
            "Dispatching batch"
        );
        self.outbox.push(Request::RecordScanned { count: items.len() });
        Some(PendingBatch {
            generation: self.generation,
            items,
        })
    }

    /// Route classifier results back to their nodes. Returns how many
    /// redactions were applied.
    pub fn complete_batch(
        &mut self,
        batch: PendingBatch,
        outcome: Result<AnalyzeReply>,
        now: Instant,
    ) -> usize {
        if batch.generation != self.generation || !self.settings.enabled {
            debug!(
                items = batch.items.len(),
                "Dropping classification results from before protection was disabled"
            );
            return 0;
        }

        let results = match outcome {
            Ok(AnalyzeReply::Results(results)) => results,
            Ok(AnalyzeReply::NoApiKey) => {
                self.toasts.push_once(
                    NO_API_KEY_TOAST,
                    ToastKind::Info,
                    "Add a Perspective API key in settings to turn on protection.",
                    now,
                );
                return 0;
            }
            Ok(AnalyzeReply::RateLimited) => {
                // Fail open, like any other classifier error.
                self.toasts.push_once(
                    RATE_LIMITED_TOAST,
                    ToastKind::Warning,
                    "The classifier is rate limited. Some content was not checked.",
                    now,
                );
                return 0;
            }
            Ok(AnalyzeReply::Skipped) => return 0,
            Err(e) => {
                // Fail open: nothing in this batch gets redacted.
                warn!(error = %e, items = batch.items.len(), "Classification failed");
                return 0;
            }
        };

        if results.len() != batch.items.len() {
            warn!(
                expected = batch.items.len(),
                received = results.len(),
                "Classifier returned a different number of results"
            );
        }

        let mut redacted = 0;
        for (item, classification) in batch.items.iter().zip(&results) {
            let Some(result) = classification.as_scored() else {
                continue;
            };
            match self
                .overlays
                .apply(&mut self.surface, item, result, &self.settings)
            {
                Ok(Some(event)) => {
                    redacted += 1;
                    if self.settings.notifications_enabled {
                        let label = result
                            .dominant_category
                            .map(|c| c.label())
                            .unwrap_or("Toxicity");
                        self.toasts.push(
                            ToastKind::Detection,
                            format!("Hid content flagged for {label} ({}%)", event.score),
                            now,
                        );
                    }
                    self.outbox.push(Request::RecordDetection(event));
                }
                Ok(None) => {}
                Err(e) => warn!(node = %item.node, error = %e, "Failed to apply redaction"),
            }
        }
        redacted
    }

    // --- User interaction ---

    pub fn click(&mut self, node: NodeId, target: ClickTarget, now: Instant) {
        match (self.overlays.state(node), target) {
            (RedactionState::Blurred, _) => self.request_reveal(node, now),
            (RedactionState::Revealed, ClickTarget::RevealControl) => {
                if let Err(e) = self.overlays.hide(&mut self.surface, node) {
                    warn!(node = %node, error = %e, "Failed to hide content");
                }
            }
            _ => {}
        }
    }

    fn request_reveal(&mut self, node: NodeId, now: Instant) {
        if self.settings.parental_lock {
            self.gate.request(node, now);
            return;
        }
        self.reveal(node);
    }

    fn reveal(&mut self, node: NodeId) {
        if let Err(e) = self.overlays.reveal(&mut self.surface, node) {
            warn!(node = %node, error = %e, "Failed to reveal content");
        }
    }

    /// A key was pressed in the PIN prompt. Returns a PIN to verify.
    pub fn press_pin_key(&mut self, key: char, now: Instant) -> Option<PinSubmission> {
        self.gate.press(key, now)
    }

    pub fn pin_backspace(&mut self) {
        self.gate.backspace();
    }

    pub fn cancel_pin(&mut self) {
        self.gate.cancel();
    }

    /// Feed the verifier's answer (or its failure) for `submission` back
    /// into the gate.
    pub fn pin_verdict(
        &mut self,
        submission: u64,
        verdict: Result<bool>,
        now: Instant,
    ) -> GateOutcome {
        match verdict {
            Ok(success) => {
                let outcome = self.gate.verdict(submission, success, now);
                if let GateOutcome::Granted(node) = outcome {
                    self.reveal(node);
                }
                outcome
            }
            Err(e) => {
                warn!(error = %e, "PIN verification unavailable");
                self.gate.verification_failed(submission);
                GateOutcome::Ignored
            }
        }
    }

    /// Save evidence for `node`. Returns false when there was nothing to capture.
    pub fn capture_evidence(&mut self, node: NodeId, at: DateTime<Utc>) -> bool {
        match self
            .overlays
            .capture_evidence(&mut self.surface, node, at)
        {
            Ok(Some(record)) => {
                self.outbox.push(Request::CaptureEvidence(record));
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(node = %node, error = %e, "Failed to capture evidence");
                false
            }
        }
    }

    pub fn dismiss_toast(&mut self, id: u64) {
        self.toasts.dismiss(id);
    }

    // --- Settings ---

    /// Replace the settings snapshot (SETTINGS_UPDATED).
    pub fn apply_settings(&mut self, settings: Settings, now: Instant) {
        let previous = std::mem::replace(&mut self.settings, settings);

        if previous.enabled && !self.settings.enabled {
            self.generation += 1;
            let reverted = self.overlays.revert_all(&mut self.surface);
            self.dispatcher.clear();
            self.gate.cancel();
            self.watcher.discard(&mut self.surface);
            info!(reverted, "Protection disabled");
            return;
        }
        if !previous.enabled && self.settings.enabled {
            info!("Protection enabled");
            self.rescan(now);
            return;
        }
        if !self.settings.enabled {
            return;
        }

        if previous.blur_strength != self.settings.blur_strength {
            if let Err(e) = self
                .overlays
                .restyle(&mut self.surface, self.settings.blur_strength)
            {
                warn!(error = %e, "Failed to restyle overlays");
            }
        }
        if previous.parental_lock && !self.settings.parental_lock {
            self.gate.cancel();
        }
    }

    // --- Timers ---

    /// Advance lockout countdown and toast expiry.
    pub fn tick(&mut self, now: Instant) {
        self.gate.tick(now);
        self.toasts.expire(now);
    }

    /// Earliest instant at which `poll_flush` or `tick` has work.
    pub fn next_deadline(&self, now: Instant) -> Option<Instant> {
        [
            self.dispatcher.deadline(),
            self.gate.next_tick(now),
            self.toasts.next_expiry(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// True when nothing is queued or scheduled for classification.
    pub fn is_idle(&self) -> bool {
        self.dispatcher.is_idle() && self.outbox.is_empty()
    }

    /// Records waiting to be sent to the stats/evidence collaborators.
    pub fn drain_outbox(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.outbox)
    }

    // --- Accessors ---

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn redaction_state(&self, node: NodeId) -> RedactionState {
        self.overlays.state(node)
    }

    pub fn overlays(&self) -> &OverlayManager {
        &self.overlays
    }

    pub fn gate(&self) -> &RevealGate {
        &self.gate
    }

    pub fn toasts(&self) -> &[Toast] {
        self.toasts.active()
    }

    pub fn pending(&self) -> usize {
        self.dispatcher.pending()
    }

    pub fn is_processed(&self, node: NodeId) -> bool {
        self.registry.is_processed(node)
    }

    /// Nodes queued for classification since the last full scan.
    pub fn processed_count(&self) -> usize {
        self.registry.processed_count()
    }

    /// Mutation batches that brought in new content.
    pub fn mutation_batches(&self) -> u64 {
        self.watcher.observed()
    }
}
