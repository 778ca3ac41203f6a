// Shroud: client-side toxicity moderation for web pages
//
// This is the library root. Each module corresponds to a major subsystem
// of the moderation pipeline.

pub mod bridge;
pub mod config;
pub mod dom;
pub mod output;
pub mod pipeline;
pub mod settings;
pub mod toxicity;
