//! Connection State
//!
//! The connection state enum, its transition table, and the reconnect
//! bookkeeping owned by the connection machine.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Lifecycle of a single feed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Never connected
    #[default]
    Idle,
    /// Transport handshake in progress
    Connecting,
    /// Transport is open and usable
    Open,
    /// Close handshake requested by this side
    Closing,
    /// No transport; a retry may still be pending
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "Idle"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// State transition information
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

const MAX_TRANSITIONS: usize = 100;

/// Current state plus a bounded transition history
#[derive(Debug, Default)]
pub struct StateTracker {
    current: ConnectionState,
    last_opened: Option<DateTime<Utc>>,
    transitions: Vec<StateTransition>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> ConnectionState {
        self.current
    }

    pub fn last_opened(&self) -> Option<DateTime<Utc>> {
        self.last_opened
    }

    /// Transition to a new state. Returns false and leaves the state
    /// untouched if the table does not allow the move.
    pub fn transition_to(&mut self, new_state: ConnectionState, reason: &str) -> bool {
        let old_state = self.current;

        if !is_valid_transition(old_state, new_state) {
            tracing::warn!(from = %old_state, to = %new_state, "Rejected connection state transition");
            return false;
        }

        if old_state == new_state {
            return true;
        }

        self.current = new_state;
        if new_state == ConnectionState::Open {
            self.last_opened = Some(Utc::now());
        }

        self.transitions.push(StateTransition {
            from: old_state,
            to: new_state,
            timestamp: Utc::now(),
            reason: Some(reason.to_string()),
        });

        if self.transitions.len() > MAX_TRANSITIONS {
            self.transitions.remove(0);
        }

        tracing::debug!(from = %old_state, to = %new_state, reason, "Connection state transition");

        true
    }

    /// Most recent transitions, newest first
    pub fn recent_transitions(&self, count: usize) -> Vec<StateTransition> {
        self.transitions.iter().rev().take(count).cloned().collect()
    }
}

/// Check if a state transition is valid
pub fn is_valid_transition(from: ConnectionState, to: ConnectionState) -> bool {
    // Self-transition is always allowed
    if from == to {
        return true;
    }

    matches!(
        (from, to),
        // From Idle
        (ConnectionState::Idle, ConnectionState::Connecting) |
        (ConnectionState::Idle, ConnectionState::Closed) |
        // From Connecting
        (ConnectionState::Connecting, ConnectionState::Open) |
        (ConnectionState::Connecting, ConnectionState::Closing) |
        (ConnectionState::Connecting, ConnectionState::Closed) |
        // From Open
        (ConnectionState::Open, ConnectionState::Closing) |
        (ConnectionState::Open, ConnectionState::Closed) |
        // From Closing
        (ConnectionState::Closing, ConnectionState::Closed) |
        // From Closed
        (ConnectionState::Closed, ConnectionState::Connecting)
    )
}

/// Retry budget for abnormal closures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    attempt_count: u32,
    limit: u32,
    interval: Duration,
}

impl ReconnectPolicy {
    pub fn new(limit: u32, interval: Duration) -> Self {
        Self {
            attempt_count: 0,
            limit,
            interval,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn can_retry(&self) -> bool {
        self.attempt_count < self.limit
    }

    /// Count one scheduled retry and return the new attempt number
    pub fn record_attempt(&mut self) -> u32 {
        self.attempt_count += 1;
        self.attempt_count
    }

    pub fn reset(&mut self) {
        self.attempt_count = 0;
    }
}

/// Observable snapshot of a connection, published after every event
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub attempt_count: u32,
    pub reconnect_pending: bool,
    pub last_error: Option<String>,
    pub url: Option<String>,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn is_connecting(&self) -> bool {
        self.state == ConnectionState::Connecting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let tracker = StateTracker::new();
        assert_eq!(tracker.current(), ConnectionState::Idle);
        assert!(tracker.last_opened().is_none());
    }

    #[test]
    fn test_valid_transitions() {
        let mut tracker = StateTracker::new();

        assert!(tracker.transition_to(ConnectionState::Connecting, "connect"));
        assert!(tracker.transition_to(ConnectionState::Open, "opened"));
        assert!(tracker.last_opened().is_some());
        assert!(tracker.transition_to(ConnectionState::Closing, "disconnect"));
        assert!(tracker.transition_to(ConnectionState::Closed, "closed"));
        assert!(tracker.transition_to(ConnectionState::Connecting, "retry"));

        let recent = tracker.recent_transitions(2);
        assert_eq!(recent[0].to, ConnectionState::Connecting);
        assert_eq!(recent[1].to, ConnectionState::Closed);
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let mut tracker = StateTracker::new();
        assert!(!tracker.transition_to(ConnectionState::Open, "skip handshake"));
        assert_eq!(tracker.current(), ConnectionState::Idle);

        tracker.transition_to(ConnectionState::Closed, "disconnect");
        assert!(!tracker.transition_to(ConnectionState::Open, "stale"));
        assert!(!tracker.transition_to(ConnectionState::Idle, "reset"));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut tracker = StateTracker::new();
        for _ in 0..80 {
            tracker.transition_to(ConnectionState::Connecting, "connect");
            tracker.transition_to(ConnectionState::Closed, "closed");
        }
        assert_eq!(tracker.recent_transitions(usize::MAX).len(), MAX_TRANSITIONS);
    }

    #[test]
    fn test_reconnect_policy() {
        let mut policy = ReconnectPolicy::new(2, Duration::from_millis(1000));
        assert!(policy.can_retry());
        assert_eq!(policy.record_attempt(), 1);
        assert_eq!(policy.record_attempt(), 2);
        assert!(!policy.can_retry());

        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert!(policy.can_retry());
    }
}
