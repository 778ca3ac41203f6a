// Google Perspective API implementation.
//
// Perspective analyzes one comment per request and returns a summary score
// for each requested attribute. It's rate-limited to ~1 QPS on the free tier,
// so every call goes through the shared minimum-interval limiter first.
//
// Every request sets doNotStore: the text we send is other people's content
// and must not be retained by the classifier.
//
// API docs: https://developers.perspectiveapi.com/s/about-the-api-methods

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::rate_limiter::RateLimiter;
use super::traits::{
    Category, Classification, ClassificationResult, MissingApiKey, RateLimited,
    ToxicityScorer, CLASSIFIER_MIN_CHARS,
};
use crate::output::truncate_chars;

pub const DEFAULT_PERSPECTIVE_URL: &str =
    "https://commentanalyzer.googleapis.com/v1alpha1/comments:analyze";

/// Perspective API toxicity scorer.
pub struct PerspectiveScorer {
    client: Client,
    api_key: String,
    endpoint: String,
    rate_limiter: RateLimiter,
}

impl PerspectiveScorer {
    /// Create a new Perspective API scorer.
    ///
    /// An empty `api_key` is accepted here; every scoring call then fails
    /// with `MissingApiKey` so the page can tell the user once.
    pub fn new(api_key: String, endpoint: String, requests_per_second: f64) -> Self {
        Self {
            client: Client::new(),
            api_key,
            endpoint,
            rate_limiter: RateLimiter::new(requests_per_second),
        }
    }

    fn build_request(text: &str) -> PerspectiveRequest {
        PerspectiveRequest {
            comment: Comment {
                text: text.to_string(),
            },
            requested_attributes: Category::ALL
                .iter()
                .map(|c| (c.attribute().to_string(), AttributeConfig {}))
                .collect(),
            languages: vec!["en".to_string()],
            do_not_store: true,
        }
    }
}

#[async_trait]
impl ToxicityScorer for PerspectiveScorer {
    async fn score_text(&self, text: &str) -> Result<Classification> {
        if self.api_key.is_empty() {
            return Err(MissingApiKey.into());
        }

        if text.chars().count() < CLASSIFIER_MIN_CHARS {
            return Ok(Classification::skipped());
        }

        // Respect rate limits before making the call
        self.rate_limiter.acquire().await;

        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let request = Self::build_request(text);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to call Perspective API")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read Perspective API response")?;

        let classification = interpret_response(status, &body)?;
        match &classification {
            Classification::Scored(scored) => debug!(
                max_score = scored.max_score,
                dominant = ?scored.dominant_category,
                text_preview = %truncate_chars(text, 50),
                "Scored text"
            ),
            Classification::Failed { error } => warn!(
                error = %error,
                text_preview = %truncate_chars(text, 50),
                "Perspective could not score text"
            ),
            Classification::Skipped { .. } => {}
        }
        Ok(classification)
    }
}

/// Turn an HTTP answer into a classification.
///
/// 429 is a typed `RateLimited` error and other server-side failures are
/// errors for the whole batch. A 400 (e.g. unsupported language) or an
/// unreadable body only concerns this text and comes back as `Failed`.
fn interpret_response(status: StatusCode, body: &str) -> Result<Classification> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(RateLimited.into());
    }
    if status == StatusCode::BAD_REQUEST {
        return Ok(Classification::failed(format!(
            "Perspective rejected text: {}",
            truncate_chars(body, 200)
        )));
    }
    if !status.is_success() {
        anyhow::bail!("Perspective API returned {}: {}", status, body);
    }

    match serde_json::from_str::<PerspectiveResponse>(body) {
        Ok(response) => Ok(Classification::Scored(scores_from_response(&response))),
        Err(e) => Ok(Classification::failed(format!(
            "Failed to parse Perspective API response: {e}"
        ))),
    }
}

/// Convert a Perspective response into per-category scores. Attributes the
/// response omits score zero.
fn scores_from_response(response: &PerspectiveResponse) -> ClassificationResult {
    ClassificationResult::from_scores(
        Category::ALL.map(|c| (c, extract_score(response, c.attribute()).unwrap_or(0.0))),
    )
}

/// Extract a specific attribute's summary score from the API response.
fn extract_score(response: &PerspectiveResponse, attribute: &str) -> Option<f64> {
    response
        .attribute_scores
        .get(attribute)
        .and_then(|score| score.summary_score.as_ref())
        .map(|summary| summary.value)
}

// --- Perspective API request/response types ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PerspectiveRequest {
    comment: Comment,
    requested_attributes: HashMap<String, AttributeConfig>,
    languages: Vec<String>,
    do_not_store: bool,
}

#[derive(Serialize)]
struct Comment {
    text: String,
}

#[derive(Serialize)]
struct AttributeConfig {}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PerspectiveResponse {
    #[serde(default)]
    attribute_scores: HashMap<String, AttributeScore>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttributeScore {
    summary_score: Option<SummaryScore>,
}

#[derive(Deserialize)]
struct SummaryScore {
    value: f64,
}
