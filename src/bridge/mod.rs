// Bridge — the message contract between the page and its collaborators.

pub mod memory;
pub mod messages;
pub mod traits;

pub use messages::{AnalyzeReply, DetectionEvent, EvidenceRecord, PushMessage, Request, Response};
pub use traits::{ExtensionBridge, Messenger};
