//! Feed Errors
//!
//! Failures the feed reports to its consumers. None of them are fatal to the
//! hosting process; each ends in a state transition, a log line, or a
//! bounded retry.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// The target could not be turned into a connection (bad URL, wrong scheme).
    /// Never retried.
    #[error("invalid feed target {url}: {reason}")]
    InvalidTarget { url: String, reason: String },

    /// Network-level failure; handled by the reconnect policy
    #[error("transport error: {0}")]
    Transport(String),

    /// The reconnect policy gave up
    #[error("connection failed after {attempts} reconnect attempts")]
    RetriesExhausted { attempts: u32 },

    /// Error frame pushed by the server
    #[error("server error: {0}")]
    Server(String),
}

impl FeedError {
    /// Whether the reconnect policy may recover from this error
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_errors_are_transient() {
        assert!(FeedError::Transport("reset".into()).is_transient());
        assert!(!FeedError::RetriesExhausted { attempts: 5 }.is_transient());
        assert!(!FeedError::InvalidTarget {
            url: "http://x".into(),
            reason: "scheme".into()
        }
        .is_transient());
    }

    #[test]
    fn test_display() {
        let err = FeedError::RetriesExhausted { attempts: 2 };
        assert_eq!(err.to_string(), "connection failed after 2 reconnect attempts");
    }
}
