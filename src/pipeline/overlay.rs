// Redaction overlay manager — owns every node's redaction state.
//
// Applying a redaction wraps the node in place (blur layer + badge + reveal
// control, plus an evidence control when evidence mode is on). The manager is
// the only component that touches the wrapper afterwards: reveal/hide,
// restyle, evidence capture and the bulk revert on disable all go through it.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info};

use super::scanner::BatchItem;
use crate::bridge::{DetectionEvent, EvidenceRecord};
use crate::dom::{ContentSurface, NodeId, OverlaySpec};
use crate::settings::{BlurStrength, Settings};
use crate::toxicity::traits::{Category, ClassificationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactionState {
    Unredacted,
    Blurred,
    Revealed,
}

/// One redacted node.
#[derive(Debug, Clone)]
pub struct Redaction {
    pub node: NodeId,
    pub state: RedactionState,
    pub text: String,
    pub result: ClassificationResult,
    /// Whether the evidence control was attached at redaction time.
    pub evidence_enabled: bool,
    pub evidence_captured: bool,
}

#[derive(Debug, Default)]
pub struct OverlayManager {
    redactions: HashMap<NodeId, Redaction>,
}

impl OverlayManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, node: NodeId) -> RedactionState {
        self.redactions
            .get(&node)
            .map(|r| r.state)
            .unwrap_or(RedactionState::Unredacted)
    }

    pub fn get(&self, node: NodeId) -> Option<&Redaction> {
        self.redactions.get(&node)
    }

    /// All current redactions, in node order.
    pub fn redactions(&self) -> Vec<&Redaction> {
        let mut all: Vec<&Redaction> = self.redactions.values().collect();
        all.sort_by_key(|r| r.node);
        all
    }

    pub fn len(&self) -> usize {
        self.redactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.redactions.is_empty()
    }

    /// Redact `item.node` if `result` reaches the threshold.
    ///
    /// Returns the detection event to report, or None when nothing changed
    /// (below threshold, already redacted, detached, or inside another overlay).
    pub fn apply(
        &mut self,
        surface: &mut impl ContentSurface,
        item: &BatchItem,
        result: &ClassificationResult,
        settings: &Settings,
    ) -> Result<Option<DetectionEvent>> {
        if self.redactions.contains_key(&item.node) {
            return Ok(None);
        }
        if !result.exceeds(settings.threshold()) {
            return Ok(None);
        }
        if !surface.is_attached(item.node) || surface.is_overlaid(item.node) {
            debug!(node = %item.node, "Flagged node is gone or already covered, skipping");
            return Ok(None);
        }

        let category = result.dominant_category.unwrap_or(Category::Toxicity);
        let spec = OverlaySpec {
            category_label: category.label().to_string(),
            severity: result.severity(),
            confidence_percent: result.confidence_percent(),
            blur: settings.blur_strength,
            evidence_control: settings.evidence_mode,
        };
        surface.wrap_with_overlay(item.node, &spec)?;

        self.redactions.insert(
            item.node,
            Redaction {
                node: item.node,
                state: RedactionState::Blurred,
                text: item.text.clone(),
                result: result.clone(),
                evidence_enabled: settings.evidence_mode,
                evidence_captured: false,
            },
        );

        info!(
            node = %item.node,
            category = category.as_str(),
            score = result.max_score,
            severity = %spec.severity,
            "Content redacted"
        );

        Ok(Some(DetectionEvent {
            category: category.as_str().to_string(),
            score: result.confidence_percent(),
            url: surface.page_url().to_string(),
        }))
    }

    /// Blurred -> Revealed. Returns false if the node isn't blurred.
    pub fn reveal(&mut self, surface: &mut impl ContentSurface, node: NodeId) -> Result<bool> {
        self.transition(surface, node, RedactionState::Blurred, RedactionState::Revealed)
    }

    /// Revealed -> Blurred. Returns false if the node isn't revealed.
    pub fn hide(&mut self, surface: &mut impl ContentSurface, node: NodeId) -> Result<bool> {
        self.transition(surface, node, RedactionState::Revealed, RedactionState::Blurred)
    }

    fn transition(
        &mut self,
        surface: &mut impl ContentSurface,
        node: NodeId,
        from: RedactionState,
        to: RedactionState,
    ) -> Result<bool> {
        let Some(redaction) = self.redactions.get_mut(&node) else {
            return Ok(false);
        };
        if redaction.state != from {
            return Ok(false);
        }
        surface.set_revealed(node, to == RedactionState::Revealed)?;
        redaction.state = to;
        debug!(node = %node, state = ?to, "Redaction toggled");
        Ok(true)
    }

    /// Build the evidence record for `node`, at most once per redaction.
    pub fn capture_evidence(
        &mut self,
        surface: &mut impl ContentSurface,
        node: NodeId,
        at: DateTime<Utc>,
    ) -> Result<Option<EvidenceRecord>> {
        let Some(redaction) = self.redactions.get_mut(&node) else {
            return Ok(None);
        };
        if !redaction.evidence_enabled || redaction.evidence_captured {
            return Ok(None);
        }
        redaction.evidence_captured = true;
        surface.disable_capture(node)?;

        Ok(Some(EvidenceRecord {
            text: redaction.text.clone(),
            scores: redaction.result.scores.clone(),
            url: surface.page_url().to_string(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }))
    }

    /// Apply a new blur strength to every existing overlay.
    pub fn restyle(&self, surface: &mut impl ContentSurface, blur: BlurStrength) -> Result<()> {
        for node in self.redactions.keys() {
            surface.set_blur_strength(*node, blur)?;
        }
        Ok(())
    }

    /// Forget redactions whose node the page has removed.
    pub fn prune_detached(&mut self, surface: &impl ContentSurface) -> usize {
        let before = self.redactions.len();
        self.redactions.retain(|node, _| surface.is_attached(*node));
        let pruned = before - self.redactions.len();
        if pruned > 0 {
            debug!(pruned, "Dropped redactions for removed content");
        }
        pruned
    }

    /// Unwrap every redaction and put each node back where it was.
    /// Returns how many were reverted.
    pub fn revert_all(&mut self, surface: &mut impl ContentSurface) -> usize {
        let mut reverted = 0;
        for (node, _) in self.redactions.drain() {
            match surface.unwrap_overlay(node) {
                Ok(()) => reverted += 1,
                Err(e) => debug!(node = %node, error = %e, "Overlay already gone"),
            }
        }
        reverted
    }
}
