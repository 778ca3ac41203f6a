// Settings snapshot — the user's protection preferences.
//
// The settings store lives outside the page. The pipeline fetches one
// snapshot at startup and replaces it wholesale on every SETTINGS_UPDATED
// push; nothing mutates a snapshot in place.

use serde::{Deserialize, Serialize};

/// How heavily redacted content is blurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlurStrength {
    Light,
    #[default]
    Medium,
    Heavy,
}

impl BlurStrength {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlurStrength::Light => "light",
            BlurStrength::Medium => "medium",
            BlurStrength::Heavy => "heavy",
        }
    }

    /// Blur radius applied by the overlay stylesheet.
    pub fn radius_px(&self) -> u32 {
        match self {
            BlurStrength::Light => 4,
            BlurStrength::Medium => 8,
            BlurStrength::Heavy => 14,
        }
    }

    /// CSS class carried by the blur layer.
    pub fn css_class(&self) -> String {
        format!("shroud-blur-{}", self.as_str())
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "light" => Some(BlurStrength::Light),
            "medium" => Some(BlurStrength::Medium),
            "heavy" => Some(BlurStrength::Heavy),
            _ => None,
        }
    }
}

/// A read-only view of the user's settings for one operation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Master switch. Turning it off reverts every redaction on the page.
    pub enabled: bool,
    /// Minimum max-score (0.0 to 1.0) at which content is redacted.
    pub sensitivity_threshold: f64,
    pub blur_strength: BlurStrength,
    /// Offer a "save evidence" control on new redactions.
    pub evidence_mode: bool,
    /// Show a toast for each new detection.
    pub notifications_enabled: bool,
    /// Require the parental PIN before revealing redacted content.
    pub parental_lock: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            sensitivity_threshold: 0.7,
            blur_strength: BlurStrength::Medium,
            evidence_mode: false,
            notifications_enabled: true,
            parental_lock: false,
        }
    }
}

impl Settings {
    /// The threshold clamped into [0, 1]. A NaN threshold from a corrupted
    /// store falls back to the default rather than disabling redaction.
    pub fn threshold(&self) -> f64 {
        if self.sensitivity_threshold.is_nan() {
            Settings::default().sensitivity_threshold
        } else {
            self.sensitivity_threshold.clamp(0.0, 1.0)
        }
    }
}
