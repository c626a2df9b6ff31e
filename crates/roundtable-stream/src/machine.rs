//! # Stream state machine
//!
//! Pure transition table for one live channel. No I/O, no timers: the channel
//! driver feeds it [`StreamInput`]s and acts on the resulting state.
//!
//! | from | input | to |
//! |---|---|---|
//! | `Idle` | `CredentialAvailable` | `Validating` |
//! | `Validating` | `Validated` | `Connecting` |
//! | `Validating`, `Connecting` | `AuthRejected` | `AuthRequired` |
//! | `Connecting` | `Opened` | `Open` (retry counter reset) |
//! | `Connecting`, `Open` | `Failed` | `Retrying` |
//! | `Open` | `Completed` | `ClosedClean` |
//! | `Retrying` | `Retry` | `Connecting` while budget remains, else `Fallback` |
//! | `Retrying` | `GiveUp` | `Fallback` |
//!
//! `Fallback`, `ClosedClean` and `AuthRequired` are terminal.

use std::time::Duration;

use serde::Serialize;

/// Lifecycle of a live channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// Nothing started (no credential yet, or never observed).
    #[default]
    Idle,
    /// Credential probe in flight.
    Validating,
    /// Channel handshake in flight.
    Connecting,
    /// Channel established and streaming.
    Open,
    /// Waiting out a backoff delay before reconnecting.
    Retrying,
    /// Retries exhausted; persisted history takes over.
    Fallback,
    /// Server signalled completion.
    ClosedClean,
    /// Credential rejected and could not be refreshed.
    AuthRequired,
}

impl StreamState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Fallback | Self::ClosedClean | Self::AuthRequired)
    }

    /// Stable label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Retrying => "retrying",
            Self::Fallback => "fallback",
            Self::ClosedClean => "closed_clean",
            Self::AuthRequired => "auth_required",
        }
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs that drive the machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamInput {
    /// A credential is present; start validation.
    CredentialAvailable,
    /// Validation resolved (accepted, refreshed or soft-proceed).
    Validated,
    /// Credential rejected for good.
    AuthRejected,
    /// Channel handshake completed.
    Opened,
    /// Handshake failed or an open channel closed without completion.
    Failed,
    /// Completion control message received.
    Completed,
    /// Backoff delay elapsed (or there is no budget left).
    Retry,
    /// The failure cannot be fixed by reconnecting.
    GiveUp,
}

/// The transition table plus the retry counter.
#[derive(Clone, Debug)]
pub struct StreamMachine {
    state: StreamState,
    attempts: u32,
    max_retries: u32,
}

impl StreamMachine {
    /// Start in [`StreamState::Idle`] with a retry budget of `max_retries`.
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: StreamState::Idle,
            attempts: 0,
            max_retries,
        }
    }

    /// Current state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Reconnect attempts since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether another reconnect is allowed.
    pub fn has_budget(&self) -> bool {
        self.attempts < self.max_retries
    }

    /// Backoff before the next reconnect, or `None` once the budget is spent.
    pub fn next_delay(&self, schedule: &[Duration]) -> Option<Duration> {
        if !self.has_budget() {
            return None;
        }
        let idx = usize::try_from(self.attempts).unwrap_or(usize::MAX);
        schedule.get(idx).or(schedule.last()).copied()
    }

    /// Apply `input`. Returns the new state, or `None` if `input` is not valid
    /// in the current state (the machine is unchanged).
    pub fn apply(&mut self, input: StreamInput) -> Option<StreamState> {
        use StreamInput as I;
        use StreamState as S;

        let next = match (self.state, input) {
            (S::Idle, I::CredentialAvailable) => S::Validating,
            (S::Validating, I::Validated) => S::Connecting,
            (S::Validating | S::Connecting, I::AuthRejected) => S::AuthRequired,
            (S::Connecting, I::Opened) => {
                self.attempts = 0;
                S::Open
            }
            (S::Connecting | S::Open, I::Failed) => S::Retrying,
            (S::Open, I::Completed) => S::ClosedClean,
            (S::Retrying, I::Retry) => {
                if self.has_budget() {
                    self.attempts += 1;
                    S::Connecting
                } else {
                    S::Fallback
                }
            }
            (S::Retrying, I::GiveUp) => S::Fallback,
            _ => return None,
        };
        self.state = next;
        Some(next)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn schedule() -> Vec<Duration> {
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(5),
        ]
    }

    fn open_machine() -> StreamMachine {
        let mut m = StreamMachine::new(3);
        let _ = m.apply(StreamInput::CredentialAvailable);
        let _ = m.apply(StreamInput::Validated);
        let _ = m.apply(StreamInput::Opened);
        m
    }

    #[test]
    fn happy_path_to_clean_close() {
        let mut m = StreamMachine::new(3);
        assert_eq!(m.apply(StreamInput::CredentialAvailable), Some(StreamState::Validating));
        assert_eq!(m.apply(StreamInput::Validated), Some(StreamState::Connecting));
        assert_eq!(m.apply(StreamInput::Opened), Some(StreamState::Open));
        assert_eq!(m.apply(StreamInput::Completed), Some(StreamState::ClosedClean));
        assert!(m.state().is_terminal());
    }

    #[test]
    fn idle_ignores_everything_but_credential() {
        let mut m = StreamMachine::new(3);
        for input in [
            StreamInput::Validated,
            StreamInput::Opened,
            StreamInput::Failed,
            StreamInput::Completed,
            StreamInput::Retry,
            StreamInput::GiveUp,
        ] {
            assert_eq!(m.apply(input), None);
            assert_eq!(m.state(), StreamState::Idle);
        }
    }

    #[test]
    fn auth_rejection_is_terminal() {
        let mut m = StreamMachine::new(3);
        let _ = m.apply(StreamInput::CredentialAvailable);
        assert_eq!(m.apply(StreamInput::AuthRejected), Some(StreamState::AuthRequired));
        assert_eq!(m.apply(StreamInput::Validated), None);
    }

    #[test]
    fn backoff_follows_schedule_then_falls_back() {
        let mut m = open_machine();
        let schedule = schedule();
        let mut delays = Vec::new();

        loop {
            if m.state() == StreamState::Open || m.state() == StreamState::Connecting {
                assert_eq!(m.apply(StreamInput::Failed), Some(StreamState::Retrying));
            }
            match m.next_delay(&schedule) {
                Some(d) => {
                    delays.push(d);
                    assert_eq!(m.apply(StreamInput::Retry), Some(StreamState::Connecting));
                }
                None => {
                    assert_eq!(m.apply(StreamInput::Retry), Some(StreamState::Fallback));
                    break;
                }
            }
        }

        assert_eq!(delays, schedule);
        assert_eq!(m.attempts(), 3);
    }

    #[test]
    fn successful_open_resets_retry_counter() {
        let mut m = open_machine();
        let _ = m.apply(StreamInput::Failed);
        let _ = m.apply(StreamInput::Retry);
        let _ = m.apply(StreamInput::Failed);
        let _ = m.apply(StreamInput::Retry);
        assert_eq!(m.attempts(), 2);

        assert_eq!(m.apply(StreamInput::Opened), Some(StreamState::Open));
        assert_eq!(m.attempts(), 0);
        assert_eq!(m.next_delay(&schedule()), Some(Duration::from_secs(1)));
    }

    #[test]
    fn completion_only_from_open() {
        let mut m = StreamMachine::new(3);
        let _ = m.apply(StreamInput::CredentialAvailable);
        let _ = m.apply(StreamInput::Validated);
        assert_matches!(m.apply(StreamInput::Completed), None);
        assert_eq!(m.state(), StreamState::Connecting);
    }

    #[test]
    fn terminal_states_absorb_inputs() {
        let mut m = open_machine();
        let _ = m.apply(StreamInput::Completed);
        assert_eq!(m.apply(StreamInput::Failed), None);
        assert_eq!(m.apply(StreamInput::Retry), None);
        assert_eq!(m.state(), StreamState::ClosedClean);
    }

    #[test]
    fn zero_budget_falls_back_immediately() {
        let mut m = StreamMachine::new(0);
        let _ = m.apply(StreamInput::CredentialAvailable);
        let _ = m.apply(StreamInput::Validated);
        let _ = m.apply(StreamInput::Failed);
        assert_eq!(m.next_delay(&schedule()), None);
        assert_eq!(m.apply(StreamInput::Retry), Some(StreamState::Fallback));
    }

    #[test]
    fn give_up_skips_remaining_budget() {
        let mut m = open_machine();
        assert_eq!(m.apply(StreamInput::GiveUp), None);
        let _ = m.apply(StreamInput::Failed);
        assert!(m.has_budget());
        assert_eq!(m.apply(StreamInput::GiveUp), Some(StreamState::Fallback));
        assert_eq!(m.attempts(), 0);
    }

    #[test]
    fn state_labels() {
        assert_eq!(StreamState::ClosedClean.to_string(), "closed_clean");
        assert_eq!(StreamState::AuthRequired.to_string(), "auth_required");
    }
}
