// Reveal gate — the parental PIN state machine.
//
// One modal gate per page. A reveal request opens it for a target node;
// requests for other nodes wait in FIFO order and open in turn. The 4th digit
// submits automatically. Three wrong PINs lock input for 30 seconds, during
// which nothing is sent to the verifier.
//
//   Idle -> AwaitingInput -> Verifying -> Idle            (correct PIN)
//                                      -> AwaitingInput   (wrong, attempts left)
//                                      -> LockedOut       (3rd wrong PIN)
//   LockedOut -> AwaitingInput once the lockout expires
//
// Every submitted PIN carries an id. A verdict only counts for the submission
// the gate is still waiting on; answers for a cancelled prompt are dropped.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PipelineTuning;
use crate::dom::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    AwaitingInput,
    Verifying,
    LockedOut,
}

/// What a verifier verdict did to the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Correct PIN: reveal this node.
    Granted(NodeId),
    /// Wrong PIN, input reopened.
    Retry { attempts_left: u32 },
    /// Wrong PIN, input locked until the given instant.
    LockedOut { until: Instant },
    /// No verification was in flight.
    Ignored,
}

/// A complete PIN handed to the verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinSubmission {
    pub id: u64,
    pub pin: String,
}

pub struct RevealGate {
    state: GateState,
    target: Option<NodeId>,
    /// Submission the gate is waiting on while `Verifying`.
    in_flight: Option<u64>,
    submissions: u64,
    waiting: VecDeque<NodeId>,
    input: String,
    attempts: u32,
    lockout_ends_at: Option<Instant>,
    message: Option<String>,
    pin_length: usize,
    max_attempts: u32,
    lockout: Duration,
}

impl RevealGate {
    pub fn new(tuning: &PipelineTuning) -> Self {
        Self {
            state: GateState::Idle,
            target: None,
            in_flight: None,
            submissions: 0,
            waiting: VecDeque::new(),
            input: String::new(),
            attempts: 0,
            lockout_ends_at: None,
            message: None,
            pin_length: tuning.pin_length,
            max_attempts: tuning.max_pin_attempts.max(1),
            lockout: tuning.lockout,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Node the modal is currently negotiating for.
    pub fn target(&self) -> Option<NodeId> {
        self.target
    }

    /// Nodes waiting behind the current negotiation.
    pub fn waiting(&self) -> impl Iterator<Item = &NodeId> {
        self.waiting.iter()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn lockout_ends_at(&self) -> Option<Instant> {
        self.lockout_ends_at
    }

    /// Digits typed so far (the modal shows them masked).
    pub fn input_len(&self) -> usize {
        self.input.len()
    }

    /// Status line for the modal.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Whole seconds of lockout left, rounded up.
    pub fn lockout_remaining_secs(&self, now: Instant) -> Option<u64> {
        let ends = self.lockout_ends_at?;
        if now >= ends {
            return None;
        }
        let remaining = ends - now;
        Some(remaining.as_millis().div_ceil(1000) as u64)
    }

    /// When the countdown next needs repainting, or the lockout ends.
    pub fn next_tick(&self, now: Instant) -> Option<Instant> {
        if self.state != GateState::LockedOut {
            return None;
        }
        let ends = self.lockout_ends_at?;
        Some(ends.min(now + Duration::from_secs(1)))
    }

    /// A reveal was requested for `node` while the parental lock is on.
    pub fn request(&mut self, node: NodeId, now: Instant) {
        if self.state == GateState::Idle {
            self.open(node, now);
            return;
        }
        if self.target != Some(node) && !self.waiting.contains(&node) {
            debug!(node = %node, "Reveal request queued behind active PIN prompt");
            self.waiting.push_back(node);
        }
    }

    fn open(&mut self, node: NodeId, now: Instant) {
        self.target = Some(node);
        self.input.clear();
        self.message = None;
        if self.lockout_active(now) {
            self.state = GateState::LockedOut;
            self.update_countdown(now);
        } else {
            self.lockout_ends_at = None;
            self.state = GateState::AwaitingInput;
        }
    }

    fn lockout_active(&self, now: Instant) -> bool {
        self.lockout_ends_at.is_some_and(|ends| now < ends)
    }

    /// A key was pressed. Returns the PIN to verify once enough digits are in.
    pub fn press(&mut self, key: char, now: Instant) -> Option<PinSubmission> {
        self.tick(now);
        match self.state {
            GateState::AwaitingInput => {}
            GateState::LockedOut => {
                debug!("PIN input rejected during lockout");
                return None;
            }
            GateState::Idle | GateState::Verifying => return None,
        }
        if !key.is_ascii_digit() || self.input.len() >= self.pin_length {
            return None;
        }

        self.input.push(key);
        if self.input.len() < self.pin_length {
            return None;
        }

        self.submissions += 1;
        self.state = GateState::Verifying;
        self.in_flight = Some(self.submissions);
        self.message = None;
        Some(PinSubmission {
            id: self.submissions,
            pin: std::mem::take(&mut self.input),
        })
    }

    /// Claim the in-flight submission if `id` is the one being verified.
    fn settle(&mut self, id: u64) -> bool {
        if self.state != GateState::Verifying || self.in_flight != Some(id) {
            debug!(submission = id, "Dropping verdict for a superseded PIN");
            return false;
        }
        self.in_flight = None;
        true
    }

    pub fn backspace(&mut self) {
        if self.state == GateState::AwaitingInput {
            self.input.pop();
        }
    }

    /// Apply the verifier's answer to submission `id`.
    pub fn verdict(&mut self, id: u64, success: bool, now: Instant) -> GateOutcome {
        if !self.settle(id) {
            return GateOutcome::Ignored;
        }
        let Some(target) = self.target else {
            self.state = GateState::Idle;
            return GateOutcome::Ignored;
        };

        if success {
            self.attempts = 0;
            self.message = None;
            info!(node = %target, "Parental PIN accepted");
            self.advance(now);
            return GateOutcome::Granted(target);
        }

        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            let until = now + self.lockout;
            self.attempts = 0;
            self.lockout_ends_at = Some(until);
            self.state = GateState::LockedOut;
            self.update_countdown(now);
            warn!(
                lockout_secs = self.lockout.as_secs(),
                "Too many wrong PINs, input locked"
            );
            return GateOutcome::LockedOut { until };
        }

        let attempts_left = self.max_attempts - self.attempts;
        self.state = GateState::AwaitingInput;
        self.input.clear();
        self.message = Some(format!("Incorrect PIN — {attempts_left} attempts left."));
        GateOutcome::Retry { attempts_left }
    }

    /// The verifier couldn't be reached. Reopen input without counting it.
    pub fn verification_failed(&mut self, id: u64) {
        if self.settle(id) {
            self.state = GateState::AwaitingInput;
            self.input.clear();
            self.message = Some("Could not verify PIN. Try again.".to_string());
        }
    }

    /// Advance timers: refresh the countdown, or end the lockout.
    /// Returns true when the modal needs repainting.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.state != GateState::LockedOut {
            return false;
        }
        if self.lockout_active(now) {
            return self.update_countdown(now);
        }
        self.lockout_ends_at = None;
        self.state = GateState::AwaitingInput;
        self.input.clear();
        self.message = None;
        debug!("PIN lockout expired");
        true
    }

    fn update_countdown(&mut self, now: Instant) -> bool {
        let Some(secs) = self.lockout_remaining_secs(now) else {
            return false;
        };
        let message = format!("Too many attempts. Try again in {secs}s.");
        if self.message.as_deref() == Some(message.as_str()) {
            return false;
        }
        self.message = Some(message);
        true
    }

    /// Close the modal and drop queued requests. A running lockout stays.
    pub fn cancel(&mut self) {
        self.target = None;
        self.in_flight = None;
        self.waiting.clear();
        self.input.clear();
        self.message = None;
        self.state = GateState::Idle;
    }

    /// Forget a node that is no longer redacted.
    pub fn forget(&mut self, node: NodeId, now: Instant) {
        self.waiting.retain(|n| *n != node);
        if self.target == Some(node) && self.state != GateState::Verifying {
            self.target = None;
            self.advance(now);
        }
    }

    fn advance(&mut self, now: Instant) {
        match self.waiting.pop_front() {
            Some(next) => self.open(next, now),
            None => {
                self.target = None;
                self.input.clear();
                self.state = GateState::Idle;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> RevealGate {
        RevealGate::new(&PipelineTuning::default())
    }

    fn type_pin(gate: &mut RevealGate, pin: &str, now: Instant) -> Option<PinSubmission> {
        let mut submitted = None;
        for key in pin.chars() {
            submitted = gate.press(key, now);
        }
        submitted
    }

    /// Type a full PIN and return the submission id.
    fn submit(gate: &mut RevealGate, pin: &str, now: Instant) -> u64 {
        type_pin(gate, pin, now).expect("PIN submitted").id
    }

    #[test]
    fn fourth_digit_submits() {
        let mut gate = gate();
        let now = Instant::now();
        gate.request(NodeId(1), now);
        assert_eq!(gate.state(), GateState::AwaitingInput);
        assert_eq!(gate.press('1', now), None);
        assert_eq!(gate.press('x', now), None);
        assert_eq!(gate.input_len(), 1);
        let submitted = type_pin(&mut gate, "234", now).unwrap();
        assert_eq!(submitted.pin, "1234");
        assert_eq!(gate.state(), GateState::Verifying);
        // Input ignored while verifying.
        assert_eq!(gate.press('5', now), None);
    }

    #[test]
    fn backspace_edits_input() {
        let mut gate = gate();
        let now = Instant::now();
        gate.request(NodeId(1), now);
        type_pin(&mut gate, "12", now);
        gate.backspace();
        assert_eq!(gate.input_len(), 1);
        assert_eq!(type_pin(&mut gate, "321", now).unwrap().pin, "1321");
    }

    #[test]
    fn wrong_pin_counts_down_then_locks() {
        let mut gate = gate();
        let now = Instant::now();
        gate.request(NodeId(7), now);

        let id = submit(&mut gate, "1234", now);
        assert_eq!(gate.verdict(id, false, now), GateOutcome::Retry { attempts_left: 2 });
        assert_eq!(gate.message(), Some("Incorrect PIN — 2 attempts left."));
        assert_eq!(gate.attempts(), 1);

        let id = submit(&mut gate, "1234", now);
        assert_eq!(gate.verdict(id, false, now), GateOutcome::Retry { attempts_left: 1 });

        let id = submit(&mut gate, "1234", now);
        let outcome = gate.verdict(id, false, now);
        assert_eq!(
            outcome,
            GateOutcome::LockedOut {
                until: now + Duration::from_secs(30)
            }
        );
        assert_eq!(gate.state(), GateState::LockedOut);
        assert_eq!(gate.attempts(), 0);
        assert_eq!(gate.message(), Some("Too many attempts. Try again in 30s."));

        // Locked: digits never reach the verifier.
        assert_eq!(type_pin(&mut gate, "4321", now + Duration::from_secs(5)), None);
    }

    #[test]
    fn lockout_countdown_and_expiry() {
        let mut gate = gate();
        let now = Instant::now();
        gate.request(NodeId(7), now);
        for _ in 0..3 {
            let id = submit(&mut gate, "0000", now);
            gate.verdict(id, false, now);
        }

        assert_eq!(gate.next_tick(now), Some(now + Duration::from_secs(1)));
        assert!(gate.tick(now + Duration::from_millis(1500)));
        assert_eq!(gate.message(), Some("Too many attempts. Try again in 29s."));
        assert_eq!(gate.lockout_remaining_secs(now + Duration::from_millis(29_500)), Some(1));

        let after = now + Duration::from_secs(30);
        assert!(gate.tick(after));
        assert_eq!(gate.state(), GateState::AwaitingInput);
        assert_eq!(gate.target(), Some(NodeId(7)));
        let id = submit(&mut gate, "4321", after);
        assert_eq!(gate.verdict(id, true, after), GateOutcome::Granted(NodeId(7)));
        assert_eq!(gate.state(), GateState::Idle);
    }

    #[test]
    fn success_resets_attempts() {
        let mut gate = gate();
        let now = Instant::now();
        gate.request(NodeId(1), now);
        let id = submit(&mut gate, "1111", now);
        gate.verdict(id, false, now);
        let id = submit(&mut gate, "2222", now);
        gate.verdict(id, false, now);
        let id = submit(&mut gate, "4321", now);
        assert_eq!(gate.verdict(id, true, now), GateOutcome::Granted(NodeId(1)));
        assert_eq!(gate.attempts(), 0);

        // A fresh failure streak starts from zero.
        gate.request(NodeId(2), now);
        let id = submit(&mut gate, "1111", now);
        assert_eq!(gate.verdict(id, false, now), GateOutcome::Retry { attempts_left: 2 });
    }

    #[test]
    fn second_request_queues_behind_active_prompt() {
        let mut gate = gate();
        let now = Instant::now();
        gate.request(NodeId(1), now);
        gate.request(NodeId(2), now);
        gate.request(NodeId(2), now);
        gate.request(NodeId(1), now);
        assert_eq!(gate.waiting().copied().collect::<Vec<_>>(), vec![NodeId(2)]);

        let id = submit(&mut gate, "4321", now);
        assert_eq!(gate.verdict(id, true, now), GateOutcome::Granted(NodeId(1)));
        assert_eq!(gate.state(), GateState::AwaitingInput);
        assert_eq!(gate.target(), Some(NodeId(2)));
    }

    #[test]
    fn cancel_keeps_lockout() {
        let mut gate = gate();
        let now = Instant::now();
        gate.request(NodeId(1), now);
        for _ in 0..3 {
            let id = submit(&mut gate, "0000", now);
            gate.verdict(id, false, now);
        }
        gate.cancel();
        assert_eq!(gate.state(), GateState::Idle);

        gate.request(NodeId(1), now + Duration::from_secs(10));
        assert_eq!(gate.state(), GateState::LockedOut);
        assert_eq!(gate.message(), Some("Too many attempts. Try again in 20s."));
    }

    #[test]
    fn verdict_for_a_cancelled_prompt_is_dropped() {
        let mut gate = gate();
        let now = Instant::now();
        gate.request(NodeId(1), now);
        let abandoned = submit(&mut gate, "4321", now);
        gate.cancel();

        gate.request(NodeId(2), now);
        let current = submit(&mut gate, "1234", now);
        assert_ne!(abandoned, current);

        // The old "correct" answer must not grant the new prompt.
        assert_eq!(gate.verdict(abandoned, true, now), GateOutcome::Ignored);
        assert_eq!(gate.state(), GateState::Verifying);
        assert_eq!(
            gate.verdict(current, false, now),
            GateOutcome::Retry { attempts_left: 2 }
        );
        assert_eq!(gate.target(), Some(NodeId(2)));

        // A repeated answer for a settled submission is dropped too.
        assert_eq!(gate.verdict(current, true, now), GateOutcome::Ignored);
    }

    #[test]
    fn verifier_outage_does_not_count() {
        let mut gate = gate();
        let now = Instant::now();
        gate.request(NodeId(1), now);
        let id = submit(&mut gate, "1234", now);
        gate.verification_failed(id);
        assert_eq!(gate.state(), GateState::AwaitingInput);
        assert_eq!(gate.attempts(), 0);
        assert_eq!(gate.verdict(id, false, now), GateOutcome::Ignored);
    }

    #[test]
    fn stale_outage_does_not_reopen_a_newer_submission() {
        let mut gate = gate();
        let now = Instant::now();
        gate.request(NodeId(1), now);
        let old = submit(&mut gate, "1111", now);
        gate.cancel();
        gate.request(NodeId(1), now);
        submit(&mut gate, "4321", now);

        gate.verification_failed(old);
        assert_eq!(gate.state(), GateState::Verifying);
    }

    #[test]
    fn forgetting_target_opens_next() {
        let mut gate = gate();
        let now = Instant::now();
        gate.request(NodeId(1), now);
        gate.request(NodeId(2), now);
        gate.forget(NodeId(1), now);
        assert_eq!(gate.target(), Some(NodeId(2)));
        gate.forget(NodeId(2), now);
        assert_eq!(gate.state(), GateState::Idle);
    }
}
