// Moderation pipeline — discovery, batching, redaction and the reveal gate.
//
// The leaf components are synchronous and take the current time as an
// argument. `controller::Moderator` ties them together for one page, and
// `runtime::PageRuntime` drives a Moderator from async events and bridge
// calls.

pub mod controller;
pub mod dispatcher;
pub mod gate;
pub mod overlay;
pub mod registry;
pub mod runtime;
pub mod scanner;
pub mod toast;
pub mod watcher;

pub use controller::{ClickTarget, Moderator, PendingBatch};
pub use gate::{GateOutcome, GateState, PinSubmission};
pub use overlay::RedactionState;
pub use runtime::{PageEvent, PageRuntime};
