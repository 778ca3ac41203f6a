// Toxicity scoring — trait-based abstraction for swappable providers.
//
// The ToxicityScorer trait defines the interface. PerspectiveScorer implements
// it using Google's Perspective API; the rest of the pipeline only ever sees
// the ANALYZE_TEXT message contract.

pub mod traits;
pub mod perspective;
pub mod rate_limiter;
