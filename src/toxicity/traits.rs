// Toxicity scorer trait — the swap-ready abstraction.
//
// The pipeline never talks to a classifier directly. It sends ANALYZE_TEXT
// through the bridge, and the backend answering that message holds a
// `ToxicityScorer`. Perspective is the shipped implementation; tests plug in
// scripted scorers.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Texts shorter than this are never submitted to a classifier.
pub const CLASSIFIER_MIN_CHARS: usize = 10;

/// The categories requested from every classifier call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Toxicity,
    SevereToxicity,
    IdentityAttack,
    Insult,
    Profanity,
    Threat,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Toxicity,
        Category::SevereToxicity,
        Category::IdentityAttack,
        Category::Insult,
        Category::Profanity,
        Category::Threat,
    ];

    /// Wire identifier, used in detection events and evidence records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Toxicity => "toxicity",
            Category::SevereToxicity => "severe_toxicity",
            Category::IdentityAttack => "identity_attack",
            Category::Insult => "insult",
            Category::Profanity => "profanity",
            Category::Threat => "threat",
        }
    }

    /// Human-readable label shown on the redaction badge.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Toxicity => "Toxicity",
            Category::SevereToxicity => "Severe toxicity",
            Category::IdentityAttack => "Identity attack",
            Category::Insult => "Insult",
            Category::Profanity => "Profanity",
            Category::Threat => "Threat",
        }
    }

    /// Perspective API attribute name.
    pub fn attribute(&self) -> &'static str {
        match self {
            Category::Toxicity => "TOXICITY",
            Category::SevereToxicity => "SEVERE_TOXICITY",
            Category::IdentityAttack => "IDENTITY_ATTACK",
            Category::Insult => "INSULT",
            Category::Profanity => "PROFANITY",
            Category::Threat => "THREAT",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Scores for a single text. All values are in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub scores: BTreeMap<Category, f64>,
    pub max_score: f64,
    /// Highest-scoring category, or None when nothing scored above zero.
    pub dominant_category: Option<Category>,
}

impl ClassificationResult {
    /// Build a result from raw per-category scores.
    ///
    /// Scores are clamped to [0, 1] and NaN is treated as 0, so a malformed
    /// provider response can never push a node over the threshold on its own.
    pub fn from_scores(raw: impl IntoIterator<Item = (Category, f64)>) -> Self {
        let scores: BTreeMap<Category, f64> = raw
            .into_iter()
            .map(|(category, score)| {
                let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
                (category, score)
            })
            .collect();

        let mut max_score = 0.0;
        let mut dominant_category = None;
        for (category, score) in &scores {
            if *score > max_score {
                max_score = *score;
                dominant_category = Some(*category);
            }
        }

        Self {
            scores,
            max_score,
            dominant_category,
        }
    }

    /// Score for one category; missing categories count as zero.
    pub fn score(&self, category: Category) -> f64 {
        self.scores.get(&category).copied().unwrap_or(0.0)
    }

    /// True when this result should be redacted at the given threshold.
    pub fn exceeds(&self, threshold: f64) -> bool {
        self.max_score >= threshold
    }

    /// Max score as an integer percentage (0..=100), as shown to the user.
    pub fn confidence_percent(&self) -> u32 {
        (self.max_score * 100.0).round() as u32
    }

    pub fn severity(&self) -> Severity {
        Severity::from_score(self.max_score)
    }
}

/// Severity tier shown on the redaction badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Determine the tier from a max score (0.0 to 1.0).
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 0.8 => Severity::High,
            s if s >= 0.6 => Severity::Medium,
            _ => Severity::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of classifying one text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Classification {
    Scored(ClassificationResult),
    /// The text was too short to be worth a classifier call.
    Skipped { skipped: bool },
    /// The classifier failed on this text only.
    Failed { error: String },
}

impl Classification {
    pub fn skipped() -> Self {
        Classification::Skipped { skipped: true }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Classification::Failed {
            error: error.into(),
        }
    }

    pub fn as_scored(&self) -> Option<&ClassificationResult> {
        match self {
            Classification::Scored(result) => Some(result),
            _ => None,
        }
    }
}

/// Raised by scorers that need a credential nobody configured.
///
/// Backends recover it with `anyhow::Error::downcast_ref` and answer
/// ANALYZE_TEXT with `NoApiKey` instead of a generic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingApiKey;

impl fmt::Display for MissingApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "classifier API key is not configured")
    }
}

impl std::error::Error for MissingApiKey {}

/// Raised when the classifier turns a call away for exceeding its quota.
/// Backends answer ANALYZE_TEXT with `RateLimited` so the page can warn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited;

impl fmt::Display for RateLimited {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "classifier rate limit exceeded")
    }
}

impl std::error::Error for RateLimited {}

/// Trait for scoring text toxicity. Implementations must be async because
/// most providers require HTTP API calls.
#[async_trait]
pub trait ToxicityScorer: Send + Sync {
    /// Score a single text.
    async fn score_text(&self, text: &str) -> Result<Classification>;

    /// Score multiple texts, returning results in the same order.
    /// Default implementation calls score_text sequentially and stops at the
    /// first error, so a batch either fully succeeds or fails as a unit.
    /// Problems confined to one text come back as `Classification::Failed`
    /// and don't stop the batch.
    async fn score_batch(&self, texts: &[String]) -> Result<Vec<Classification>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.score_text(text).await?);
        }
        Ok(results)
    }
}
