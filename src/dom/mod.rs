// Document model — the rendering surface the pipeline moderates.
//
// `surface` defines what the pipeline needs from a document; `document` is
// the arena-backed implementation used by the CLI and the tests.

pub mod document;
pub mod surface;

pub use document::{Document, Element, MutationRecord, NodeId, NodeSpec};
pub use surface::{ContentSurface, OverlaySpec};
