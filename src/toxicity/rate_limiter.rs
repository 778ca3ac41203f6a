// Minimum-interval rate limiter for classifier calls.
//
// The classifier is the scarce resource in this pipeline: Perspective's free
// tier allows 1 query per second. The dispatcher already paces batches, but a
// batch of ten texts still turns into ten HTTP calls, so the scorer spaces
// them out here as well.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Enforces a minimum gap between consecutive requests.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<RateLimiterInner>>,
}

struct RateLimiterInner {
    /// Minimum time between requests (zero disables limiting)
    interval: Duration,
    /// When the last request was allowed through
    last_request: Option<Instant>,
}

impl RateLimiter {
    /// Create a rate limiter allowing `requests_per_second` requests per second.
    /// A non-positive or non-finite rate disables limiting.
    pub fn new(requests_per_second: f64) -> Self {
        let interval = if requests_per_second.is_finite() && requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            inner: Arc::new(Mutex::new(RateLimiterInner {
                interval,
                last_request: None,
            })),
        }
    }

    /// Wait until a request is allowed, then return.
    pub async fn acquire(&self) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        if let Some(last) = inner.last_request {
            let next_allowed = last + inner.interval;
            if now < next_allowed {
                // Reserve the slot before sleeping so concurrent callers
                // queue behind this one instead of racing for it.
                inner.last_request = Some(next_allowed);
                drop(inner);
                tokio::time::sleep_until(next_allowed).await;
                return;
            }
        }

        inner.last_request = Some(now);
    }
}
