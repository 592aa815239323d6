//! Connection Callbacks
//!
//! Hooks the connection driver invokes as the transport changes. All calls
//! happen sequentially on the driver task, so implementations never see two
//! notifications for the same connection at once.

use tracing::warn;

use crate::connection::protocol::InboundFrame;
use crate::error::FeedError;

/// Receives lifecycle and message notifications from a connection
pub trait ConnectionHandler: Send + Sync {
    fn on_open(&self) {}

    /// Every inbound text frame, decoded or raw
    fn on_message(&self, _frame: &InboundFrame) {}

    fn on_close(&self, _code: u16, _reason: &str) {}

    fn on_error(&self, _error: &FeedError) {}

    /// Target for a retry or a manual reconnect, asked for right before the
    /// connection is reopened. `None` keeps the last target.
    fn target(&self) -> Option<String> {
        None
    }
}

/// Handler that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl ConnectionHandler for NoopHandler {}

/// User-visible sink for connectivity failures the client gave up on
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Notifier that only writes a log line
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        warn!(message, "Feed connectivity notification");
    }
}
