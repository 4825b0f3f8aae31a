//! Session state machine
//!
//! ```text
//! Connecting → Open → Closing → Closed
//!                   → Errored → Closed
//! ```
//!
//! `Closed` is terminal. `Closing` and `Errored` are the two teardown paths: the
//! first ends with the disconnect callback, the second with the error callback.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::warn;

/// State of a realtime session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Upgrade accepted, connect callback not yet run
    Connecting,
    /// Frames are being processed
    Open,
    /// The peer closed the connection
    Closing,
    /// The transport failed
    Errored,
    /// Teardown finished
    Closed,
}

impl SessionState {
    /// Check if this is a terminal state (no further transitions allowed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed)
    }

    /// Validate a state transition.
    pub fn can_transition_to(&self, next: SessionState) -> Result<(), String> {
        match (self, next) {
            (SessionState::Connecting, SessionState::Open) => Ok(()),
            (SessionState::Connecting, SessionState::Errored) => Ok(()),

            (SessionState::Open, SessionState::Closing) => Ok(()),
            (SessionState::Open, SessionState::Errored) => Ok(()),

            (SessionState::Closing, SessionState::Closed) => Ok(()),
            (SessionState::Errored, SessionState::Closed) => Ok(()),

            (current, _) if current.is_terminal() => Err(format!(
                "Cannot transition from terminal state {:?}",
                current
            )),

            (current, next) => Err(format!(
                "Invalid transition from {:?} to {:?}",
                current, next
            )),
        }
    }
}

/// Tracks one session's state and counters.
#[derive(Debug)]
pub(crate) struct SessionLifecycle {
    session_id: String,
    state: SessionState,
    events_received: u64,
    started: Instant,
}

impl SessionLifecycle {
    pub(crate) fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: SessionState::Connecting,
            events_received: 0,
            started: Instant::now(),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `next`; invalid transitions are logged and ignored.
    pub(crate) fn transition(&mut self, next: SessionState) -> bool {
        match self.state.can_transition_to(next) {
            Ok(()) => {
                self.state = next;
                true
            }
            Err(reason) => {
                warn!(session_id = %self.session_id, %reason, "Rejected session state transition");
                false
            }
        }
    }

    pub(crate) fn record_event(&mut self) {
        self.events_received += 1;
    }

    pub(crate) fn summary(&self) -> SessionSummary {
        SessionSummary {
            events_received: self.events_received,
            final_state: self.state,
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Counters reported when a session ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Application events received (pings excluded)
    pub events_received: u64,
    /// State the session ended in
    pub final_state: SessionState,
    /// Session duration in milliseconds
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_paths() {
        let mut lifecycle = SessionLifecycle::new("s1");
        assert!(lifecycle.transition(SessionState::Open));
        assert!(lifecycle.transition(SessionState::Closing));
        assert!(lifecycle.transition(SessionState::Closed));
        assert!(lifecycle.state().is_terminal());

        let mut lifecycle = SessionLifecycle::new("s2");
        assert!(lifecycle.transition(SessionState::Open));
        assert!(lifecycle.transition(SessionState::Errored));
        assert!(lifecycle.transition(SessionState::Closed));
    }

    #[test]
    fn test_invalid_transitions_are_ignored() {
        let mut lifecycle = SessionLifecycle::new("s1");
        assert!(!lifecycle.transition(SessionState::Closed));
        assert_eq!(lifecycle.state(), SessionState::Connecting);

        assert!(SessionState::Closing.can_transition_to(SessionState::Errored).is_err());
        assert!(SessionState::Closed.can_transition_to(SessionState::Open).is_err());
    }

    #[test]
    fn test_summary_counts_events() {
        let mut lifecycle = SessionLifecycle::new("s1");
        lifecycle.record_event();
        lifecycle.record_event();
        let summary = lifecycle.summary();
        assert_eq!(summary.events_received, 2);
        assert_eq!(summary.final_state, SessionState::Connecting);
        assert_eq!(serde_json::to_value(summary.final_state).unwrap(), "connecting");
    }
}
