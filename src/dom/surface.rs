// Content surface — what the pipeline needs from a rendered document.
//
// Scanner, watcher and overlay manager only ever see this trait. The
// in-crate `Document` implements it; a browser binding would implement it
// over real DOM handles.

use anyhow::Result;

use super::document::{Element, MutationRecord, NodeId};
use crate::settings::BlurStrength;
use crate::toxicity::traits::Severity;

/// Everything needed to draw the overlay around one flagged node.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlaySpec {
    pub category_label: String,
    pub severity: Severity,
    pub confidence_percent: u32,
    pub blur: BlurStrength,
    /// Attach the one-shot "save evidence" control.
    pub evidence_control: bool,
}

impl OverlaySpec {
    pub fn badge_text(&self) -> String {
        format!(
            "{} · {} · {}%",
            self.category_label, self.severity, self.confidence_percent
        )
    }
}

pub trait ContentSurface {
    fn root(&self) -> NodeId;

    /// URL of the page, reported with detections and evidence.
    fn page_url(&self) -> &str;

    /// `id` and every element below it, in document order.
    fn subtree(&self, id: NodeId) -> Vec<NodeId>;

    fn element(&self, id: NodeId) -> Option<&Element>;

    /// Visible text under `id`, unnormalised.
    fn text(&self, id: NodeId) -> String;

    /// True when the node is still reachable from the root.
    fn is_attached(&self, id: NodeId) -> bool;

    /// True when the node is overlay chrome or sits inside an overlay wrapper.
    fn is_overlaid(&self, id: NodeId) -> bool;

    /// Drain structural changes recorded since the last call.
    fn take_mutations(&mut self) -> Vec<MutationRecord>;

    /// Move `id` into a fresh blur layer inside a wrapper placed where `id` was.
    fn wrap_with_overlay(&mut self, id: NodeId, spec: &OverlaySpec) -> Result<()>;

    fn set_revealed(&mut self, id: NodeId, revealed: bool) -> Result<()>;

    fn set_blur_strength(&mut self, id: NodeId, blur: BlurStrength) -> Result<()>;

    /// Disable the evidence control after its single use.
    fn disable_capture(&mut self, id: NodeId) -> Result<()>;

    /// Put `id` back where its wrapper is and discard the wrapper.
    fn unwrap_overlay(&mut self, id: NodeId) -> Result<()>;
}
