use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::settings::{BlurStrength, Settings};
use crate::toxicity::perspective::DEFAULT_PERSPECTIVE_URL;

/// Timing and size constants for the moderation pipeline.
///
/// The defaults are what a page runs with. Tests shrink or stretch them to
/// exercise edge cases without waiting on real clocks.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineTuning {
    /// Quiet period after the last discovery before a flush fires.
    pub debounce: Duration,
    /// Minimum gap between consecutive flushes while items remain queued.
    pub pacing: Duration,
    /// Most items submitted in a single ANALYZE_TEXT call.
    pub batch_size: usize,
    /// Candidate text shorter than this (in chars) is never queued.
    pub min_text_chars: usize,
    /// Candidate text is truncated to this many chars before submission.
    pub max_text_chars: usize,
    /// Digits in the parental PIN.
    pub pin_length: usize,
    /// Wrong PINs allowed before lockout.
    pub max_pin_attempts: u32,
    pub lockout: Duration,
    /// How long a toast stays on screen.
    pub toast_ttl: Duration,
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            pacing: Duration::from_millis(1000),
            batch_size: 10,
            min_text_chars: 15,
            max_text_chars: 3000,
            pin_length: 4,
            max_pin_attempts: 3,
            lockout: Duration::from_secs(30),
            toast_ttl: Duration::from_secs(4),
        }
    }
}

/// Central configuration loaded from environment variables.
///
/// All secrets come from env vars (never hardcoded). The .env file
/// is loaded automatically at startup via dotenvy.
pub struct Config {
    pub perspective_api_key: String,
    /// Perspective endpoint (overridable for proxies and local fakes).
    pub perspective_url: String,
    /// Classifier calls per second (default 1.0, Perspective's free tier).
    pub classifier_qps: f64,
    /// Parental PIN for the in-memory backend; parental lock needs it.
    pub parental_pin: Option<String>,
    /// Settings the in-memory backend starts with.
    pub initial_settings: Settings,
    pub tuning: PipelineTuning,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Everything has a default; malformed numeric values are an error
    /// rather than being silently ignored.
    pub fn load() -> Result<Self> {
        let classifier_qps = match env::var("SHROUD_CLASSIFIER_QPS") {
            Ok(raw) => raw
                .parse::<f64>()
                .with_context(|| format!("SHROUD_CLASSIFIER_QPS is not a number: {raw}"))?,
            Err(_) => 1.0,
        };

        let mut initial_settings = Settings::default();
        if let Ok(raw) = env::var("SHROUD_THRESHOLD") {
            let threshold = raw
                .parse::<f64>()
                .with_context(|| format!("SHROUD_THRESHOLD is not a number: {raw}"))?;
            if !(0.0..=1.0).contains(&threshold) {
                anyhow::bail!("SHROUD_THRESHOLD must be between 0 and 1, got {threshold}");
            }
            initial_settings.sensitivity_threshold = threshold;
        }
        if let Ok(raw) = env::var("SHROUD_BLUR") {
            initial_settings.blur_strength = BlurStrength::parse(&raw).ok_or_else(|| {
                anyhow::anyhow!("SHROUD_BLUR must be light, medium or heavy, got {raw}")
            })?;
        }

        let parental_pin = env::var("SHROUD_PARENTAL_PIN")
            .ok()
            .filter(|pin| !pin.is_empty());
        if let Some(pin) = &parental_pin {
            validate_pin(pin, PipelineTuning::default().pin_length)?;
        }

        Ok(Self {
            perspective_api_key: env::var("PERSPECTIVE_API_KEY").unwrap_or_default(),
            perspective_url: env::var("PERSPECTIVE_API_URL")
                .unwrap_or_else(|_| DEFAULT_PERSPECTIVE_URL.to_string()),
            classifier_qps,
            parental_pin,
            initial_settings,
            tuning: PipelineTuning::default(),
        })
    }

    /// Check that the Perspective API key is configured.
    /// Call this before any operation that can't degrade to the
    /// "no API key" notice (e.g. one-off classification from the CLI).
    pub fn require_perspective(&self) -> Result<()> {
        if self.perspective_api_key.is_empty() {
            anyhow::bail!(
                "PERSPECTIVE_API_KEY not set. Add it to your .env file.\n\
                 See .env.example for the required variables."
            );
        }
        Ok(())
    }
}

/// A parental PIN is exactly `length` ASCII digits.
pub fn validate_pin(pin: &str, length: usize) -> Result<()> {
    if pin.len() != length || !pin.chars().all(|c| c.is_ascii_digit()) {
        anyhow::bail!("Parental PIN must be exactly {length} digits");
    }
    Ok(())
}
