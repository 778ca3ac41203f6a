// Batching dispatcher — bounds the rate and size of classifier calls.
//
// Discovery events push the flush deadline out (debounce). A flush takes at
// most `batch_size` items from the head of the queue; if anything is left,
// the next flush is paced `pacing` later. A debounce reset can delay a paced
// flush but never pull it earlier, so the call rate stays bounded no matter
// how fast content arrives.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use super::scanner::BatchItem;
use crate::config::PipelineTuning;

pub struct Dispatcher {
    queue: VecDeque<BatchItem>,
    flush_at: Option<Instant>,
    last_flush: Option<Instant>,
    debounce: Duration,
    pacing: Duration,
    batch_size: usize,
}

impl Dispatcher {
    pub fn new(tuning: &PipelineTuning) -> Self {
        Self {
            queue: VecDeque::new(),
            flush_at: None,
            last_flush: None,
            debounce: tuning.debounce,
            pacing: tuning.pacing,
            batch_size: tuning.batch_size.max(1),
        }
    }

    pub fn enqueue(&mut self, items: impl IntoIterator<Item = BatchItem>) {
        self.queue.extend(items);
    }

    /// Record a discovery event: (re)start the debounce timer.
    pub fn schedule(&mut self, now: Instant) {
        let mut at = now + self.debounce;
        if let Some(last) = self.last_flush {
            at = at.max(last + self.pacing);
        }
        self.flush_at = Some(at);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.flush_at
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// True when nothing is queued and no flush is scheduled.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.flush_at.is_none()
    }

    /// Take the next batch if the flush deadline has passed.
    ///
    /// Returns None when the timer hasn't fired yet or the queue is empty;
    /// in the latter case the timer is consumed anyway.
    pub fn take_due(&mut self, now: Instant) -> Option<Vec<BatchItem>> {
        let due = self.flush_at.is_some_and(|at| at <= now);
        if !due {
            return None;
        }
        self.flush_at = None;
        if self.queue.is_empty() {
            return None;
        }

        let count = self.batch_size.min(self.queue.len());
        let batch: Vec<BatchItem> = self.queue.drain(..count).collect();
        self.last_flush = Some(now);
        if !self.queue.is_empty() {
            self.flush_at = Some(now + self.pacing);
        }
        Some(batch)
    }

    /// Drop everything queued and cancel the timer.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.flush_at = None;
    }
}
