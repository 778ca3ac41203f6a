// Bridge trait — how the page reaches everything outside it.
//
// The classifier, the settings store, the statistics recorder, the evidence
// store and the PIN verifier all sit behind a single async `send`. Messenger
// layers typed calls on top so the pipeline never matches raw responses.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::messages::{AnalyzeReply, Request, Response};
use crate::settings::Settings;

#[async_trait]
pub trait ExtensionBridge: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response>;
}

/// Typed client over an `ExtensionBridge`. Cheap to clone.
#[derive(Clone)]
pub struct Messenger {
    bridge: Arc<dyn ExtensionBridge>,
}

impl Messenger {
    pub fn new(bridge: Arc<dyn ExtensionBridge>) -> Self {
        Self { bridge }
    }

    pub async fn analyze(&self, texts: Vec<String>) -> Result<AnalyzeReply> {
        match self.bridge.send(Request::AnalyzeText { texts }).await? {
            Response::Analysis(reply) => Ok(reply),
            other => Err(unexpected("ANALYZE_TEXT", &other)),
        }
    }

    pub async fn settings(&self) -> Result<Settings> {
        match self.bridge.send(Request::GetSettings).await? {
            Response::Settings(settings) => Ok(settings),
            other => Err(unexpected("GET_SETTINGS", &other)),
        }
    }

    pub async fn verify_pin(&self, pin: String) -> Result<bool> {
        match self
            .bridge
            .send(Request::ParentalVerifyPin { pin })
            .await?
        {
            Response::PinVerdict { success } => Ok(success),
            other => Err(unexpected("PARENTAL_VERIFY_PIN", &other)),
        }
    }

    /// Send a fire-and-forget record (scanned count, detection, evidence).
    pub async fn record(&self, request: Request) -> Result<()> {
        let kind = request.kind();
        match self.bridge.send(request).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected(kind, &other)),
        }
    }
}

fn unexpected(request: &str, response: &Response) -> anyhow::Error {
    anyhow::anyhow!(
        "Unexpected {} response to {}",
        response.kind(),
        request
    )
}
