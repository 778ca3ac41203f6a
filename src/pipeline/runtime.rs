// Page runtime — drives a Moderator from async events.
//
// One task per page. It owns the Moderator, wakes on page events, finished
// bridge calls and the controller's next deadline, and keeps classifier,
// PIN and record calls in flight concurrently. Calls never block event
// handling: a slow classifier doesn't stop clicks or PIN input.

use anyhow::Result;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::controller::{ClickTarget, Moderator, PendingBatch};
use crate::bridge::{AnalyzeReply, Messenger, PushMessage};
use crate::config::PipelineTuning;
use crate::dom::{ContentSurface, NodeId};
use crate::settings::Settings;

/// Something that happened on the page.
pub enum PageEvent<S> {
    /// Edit the document; the change is observed like any other mutation.
    Mutate(Box<dyn FnOnce(&mut S) + Send>),
    /// The document changed outside a `Mutate` event.
    DomChanged,
    Rescan,
    Click { node: NodeId, target: ClickTarget },
    PinKey(char),
    PinBackspace,
    PinCancel,
    CaptureEvidence(NodeId),
    /// The user closed a toast before it expired.
    DismissToast(u64),
    /// SETTINGS_UPDATED pushed from the settings store.
    SettingsUpdated(Settings),
    Shutdown,
}

impl<S> PageEvent<S> {
    pub fn mutate<F>(edit: F) -> Self
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        PageEvent::Mutate(Box::new(edit))
    }
}

impl<S> From<PushMessage> for PageEvent<S> {
    fn from(message: PushMessage) -> Self {
        match message {
            PushMessage::SettingsUpdated { settings } => PageEvent::SettingsUpdated(settings),
        }
    }
}

enum Completion {
    Classified(PendingBatch, Result<AnalyzeReply>),
    Verified(u64, Result<bool>),
    Recorded(&'static str, Result<()>),
}

type InFlight = FuturesUnordered<BoxFuture<'static, Completion>>;

pub struct PageRuntime<S> {
    moderator: Moderator<S>,
    messenger: Messenger,
    events: mpsc::UnboundedReceiver<PageEvent<S>>,
}

impl<S: ContentSurface + Send + 'static> PageRuntime<S> {
    pub fn new(
        moderator: Moderator<S>,
        messenger: Messenger,
        events: mpsc::UnboundedReceiver<PageEvent<S>>,
    ) -> Self {
        Self {
            moderator,
            messenger,
            events,
        }
    }

    /// Fetch the settings snapshot and build the page's Moderator.
    /// An unreachable settings store falls back to defaults.
    pub async fn connect(
        surface: S,
        tuning: PipelineTuning,
        messenger: Messenger,
        events: mpsc::UnboundedReceiver<PageEvent<S>>,
    ) -> Self {
        let settings = match messenger.settings().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Could not load settings, using defaults");
                Settings::default()
            }
        };
        let moderator = Moderator::new(surface, settings, tuning);
        Self::new(moderator, messenger, events)
    }

    /// Run until `Shutdown` or until every event sender is dropped.
    pub async fn run(self) -> Moderator<S> {
        self.drive(false).await
    }

    /// Run until the queue is drained and no call is in flight.
    pub async fn run_until_idle(self) -> Moderator<S> {
        self.drive(true).await
    }

    async fn drive(mut self, until_idle: bool) -> Moderator<S> {
        let mut in_flight: InFlight = FuturesUnordered::new();
        let mut events_open = true;

        self.moderator.start(Instant::now());

        loop {
            let now = Instant::now();
            self.moderator.tick(now);
            if let Some(batch) = self.moderator.poll_flush(now) {
                let messenger = self.messenger.clone();
                let texts = batch.texts();
                in_flight.push(
                    async move {
                        let reply = messenger.analyze(texts).await;
                        Completion::Classified(batch, reply)
                    }
                    .boxed(),
                );
            }
            self.send_records(&in_flight);

            if until_idle
                && in_flight.is_empty()
                && self.moderator.is_idle()
                && self.events.is_empty()
            {
                break;
            }

            let deadline = self.moderator.next_deadline(now);
            tokio::select! {
                biased;

                event = self.events.recv(), if events_open => match event {
                    Some(PageEvent::Shutdown) => break,
                    Some(event) => self.handle(event, &in_flight),
                    None if until_idle => events_open = false,
                    None => break,
                },
                Some(done) = in_flight.next(), if !in_flight.is_empty() => {
                    self.complete(done);
                }
                _ = sleep_until(deadline.unwrap_or(now)), if deadline.is_some() => {}
                else => break,
            }
        }

        if !in_flight.is_empty() {
            debug!(pending = in_flight.len(), "Page runtime stopped with calls in flight");
        }
        self.moderator
    }

    fn handle(&mut self, event: PageEvent<S>, in_flight: &InFlight) {
        let now = Instant::now();
        match event {
            PageEvent::Mutate(edit) => self.moderator.mutate(edit, now),
            PageEvent::DomChanged => self.moderator.on_dom_changed(now),
            PageEvent::Rescan => self.moderator.rescan(now),
            PageEvent::Click { node, target } => self.moderator.click(node, target, now),
            PageEvent::PinKey(key) => {
                if let Some(submitted) = self.moderator.press_pin_key(key, now) {
                    let messenger = self.messenger.clone();
                    in_flight.push(
                        async move {
                            let verdict = messenger.verify_pin(submitted.pin).await;
                            Completion::Verified(submitted.id, verdict)
                        }
                        .boxed(),
                    );
                }
            }
            PageEvent::PinBackspace => self.moderator.pin_backspace(),
            PageEvent::PinCancel => self.moderator.cancel_pin(),
            PageEvent::CaptureEvidence(node) => {
                self.moderator.capture_evidence(node, chrono::Utc::now());
            }
            PageEvent::DismissToast(id) => self.moderator.dismiss_toast(id),
            PageEvent::SettingsUpdated(settings) => {
                info!(
                    enabled = settings.enabled,
                    threshold = settings.threshold(),
                    "Settings updated"
                );
                self.moderator.apply_settings(settings, now);
            }
            PageEvent::Shutdown => {}
        }
    }

    fn complete(&mut self, done: Completion) {
        let now = Instant::now();
        match done {
            Completion::Classified(batch, reply) => {
                self.moderator.complete_batch(batch, reply, now);
            }
            Completion::Verified(submission, verdict) => {
                let outcome = self.moderator.pin_verdict(submission, verdict, now);
                debug!(outcome = ?outcome, "PIN verdict applied");
            }
            Completion::Recorded(kind, Err(e)) => {
                warn!(kind, error = %e, "Failed to record");
            }
            Completion::Recorded(_, Ok(())) => {}
        }
    }

    fn send_records(&mut self, in_flight: &InFlight) {
        for request in self.moderator.drain_outbox() {
            let messenger = self.messenger.clone();
            in_flight.push(
                async move {
                    let kind = request.kind();
                    Completion::Recorded(kind, messenger.record(request).await)
                }
                .boxed(),
            );
        }
    }
}
