// Message contract between the page pipeline and its collaborators.
//
// Requests are a closed enum so every handler matches exhaustively; adding a
// new interaction is a compile error until each backend handles it. The serde
// shape matches the extension's runtime messages: `{"type": "ANALYZE_TEXT", ...}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::settings::Settings;
use crate::toxicity::traits::{Category, Classification};

/// Aggregate statistics event for one newly applied redaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Wire id of the dominant category (e.g. "threat").
    pub category: String,
    /// Max score as an integer percentage.
    pub score: u32,
    pub url: String,
}

/// User-captured evidence for later reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub text: String,
    pub scores: BTreeMap<Category, f64>,
    pub url: String,
    /// RFC 3339 capture time.
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    AnalyzeText { texts: Vec<String> },
    GetSettings,
    RecordScanned { count: usize },
    RecordDetection(DetectionEvent),
    CaptureEvidence(EvidenceRecord),
    ParentalVerifyPin { pin: String },
}

impl Request {
    /// Message type, for logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::AnalyzeText { .. } => "ANALYZE_TEXT",
            Request::GetSettings => "GET_SETTINGS",
            Request::RecordScanned { .. } => "RECORD_SCANNED",
            Request::RecordDetection(_) => "RECORD_DETECTION",
            Request::CaptureEvidence(_) => "CAPTURE_EVIDENCE",
            Request::ParentalVerifyPin { .. } => "PARENTAL_VERIFY_PIN",
        }
    }
}

/// Pushed to the page by the settings store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PushMessage {
    SettingsUpdated { settings: Settings },
}

/// Answer to ANALYZE_TEXT.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzeReply {
    /// One entry per submitted text, in submission order.
    Results(Vec<Classification>),
    /// The classifier has no credential configured.
    NoApiKey,
    /// The classifier refused the batch for exceeding its quota.
    RateLimited,
    /// Nothing was worth submitting.
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Analysis(AnalyzeReply),
    Settings(Settings),
    PinVerdict { success: bool },
    Ack,
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Analysis(_) => "analysis",
            Response::Settings(_) => "settings",
            Response::PinVerdict { .. } => "pin verdict",
            Response::Ack => "ack",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_use_screaming_type_tags() {
        let value = serde_json::to_value(Request::AnalyzeText {
            texts: vec!["hello".into()],
        })
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "type": "ANALYZE_TEXT", "texts": ["hello"] })
        );

        let value = serde_json::to_value(Request::RecordDetection(DetectionEvent {
            category: "threat".into(),
            score: 82,
            url: "https://example.test/".into(),
        }))
        .unwrap();
        assert_eq!(value["type"], "RECORD_DETECTION");
        assert_eq!(value["score"], 82);
    }

    #[test]
    fn requests_parse_from_wire() {
        let request: Request =
            serde_json::from_str(r#"{"type":"PARENTAL_VERIFY_PIN","pin":"4321"}"#).unwrap();
        assert_eq!(
            request,
            Request::ParentalVerifyPin {
                pin: "4321".into()
            }
        );
        let request: Request = serde_json::from_str(r#"{"type":"GET_SETTINGS"}"#).unwrap();
        assert_eq!(request.kind(), "GET_SETTINGS");
    }

    #[test]
    fn settings_push_parses() {
        let push: PushMessage = serde_json::from_str(
            r#"{"type":"SETTINGS_UPDATED","settings":{"enabled":false}}"#,
        )
        .unwrap();
        let PushMessage::SettingsUpdated { settings } = push;
        assert!(!settings.enabled);
        assert!((settings.sensitivity_threshold - 0.7).abs() < f64::EPSILON);
    }
}
