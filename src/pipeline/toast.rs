// Toast notifications — short-lived, non-blocking notices.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Info,
    Warning,
    Detection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub id: u64,
    pub kind: ToastKind,
    pub message: String,
    pub expires_at: Instant,
}

pub struct Notifier {
    toasts: Vec<Toast>,
    next_id: u64,
    ttl: Duration,
    /// Keys of one-time toasts already shown on this page.
    shown_once: HashSet<&'static str>,
}

impl Notifier {
    pub fn new(ttl: Duration) -> Self {
        Self {
            toasts: Vec::new(),
            next_id: 1,
            ttl,
            shown_once: HashSet::new(),
        }
    }

    pub fn push(&mut self, kind: ToastKind, message: impl Into<String>, now: Instant) -> u64 {
        let message = message.into();
        info!(kind = ?kind, message = %message, "Toast");
        let id = self.next_id;
        self.next_id += 1;
        self.toasts.push(Toast {
            id,
            kind,
            message,
            expires_at: now + self.ttl,
        });
        id
    }

    /// Show a toast at most once per page. Returns false if it was already shown.
    pub fn push_once(
        &mut self,
        key: &'static str,
        kind: ToastKind,
        message: impl Into<String>,
        now: Instant,
    ) -> bool {
        if !self.shown_once.insert(key) {
            return false;
        }
        self.push(kind, message, now);
        true
    }

    pub fn dismiss(&mut self, id: u64) {
        self.toasts.retain(|t| t.id != id);
    }

    /// Drop expired toasts; returns how many went away.
    pub fn expire(&mut self, now: Instant) -> usize {
        let before = self.toasts.len();
        self.toasts.retain(|t| t.expires_at > now);
        before - self.toasts.len()
    }

    pub fn active(&self) -> &[Toast] {
        &self.toasts
    }

    pub fn next_expiry(&self) -> Option<Instant> {
        self.toasts.iter().map(|t| t.expires_at).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toasts_auto_dismiss() {
        let mut notifier = Notifier::new(Duration::from_secs(4));
        let now = Instant::now();
        notifier.push(ToastKind::Detection, "hidden", now);
        notifier.push(ToastKind::Info, "later", now + Duration::from_secs(2));
        assert_eq!(notifier.next_expiry(), Some(now + Duration::from_secs(4)));

        assert_eq!(notifier.expire(now + Duration::from_secs(4)), 1);
        assert_eq!(notifier.active().len(), 1);
        assert_eq!(notifier.active()[0].message, "later");
    }

    #[test]
    fn one_time_toasts() {
        let mut notifier = Notifier::new(Duration::from_secs(4));
        let now = Instant::now();
        assert!(notifier.push_once("no-api-key", ToastKind::Info, "set a key", now));
        assert!(!notifier.push_once("no-api-key", ToastKind::Info, "set a key", now));
        assert_eq!(notifier.active().len(), 1);

        // Still suppressed after the first one expires.
        notifier.expire(now + Duration::from_secs(10));
        assert!(!notifier.push_once("no-api-key", ToastKind::Info, "set a key", now));
    }

    #[test]
    fn dismiss_removes_by_id() {
        let mut notifier = Notifier::new(Duration::from_secs(4));
        let id = notifier.push(ToastKind::Warning, "careful", Instant::now());
        notifier.dismiss(id);
        assert!(notifier.active().is_empty());
    }
}
