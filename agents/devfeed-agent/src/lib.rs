//! Devfeed Agent Library
//!
//! This crate provides a resilient client for the real-time device feed:
//! a WebSocket connection manager with reconnect and heartbeat handling,
//! and a device feed adapter that turns pushed messages into observable
//! device state.

pub mod cli;
pub mod connection;
pub mod error;
pub mod feed;

// Re-exports for convenience
pub use cli::config::Config;
pub use connection::handler::{ConnectionHandler, LogNotifier, Notifier};
pub use connection::machine::ConnectionSettings;
pub use connection::protocol::{ClientMessage, InboundFrame, ServerMessage};
pub use connection::state::{ConnectionState, ConnectionStatus};
pub use connection::websocket::{ConnectionManager, ConnectionManagerBuilder};
pub use error::FeedError;
pub use feed::adapter::{DeviceFeed, DeviceFeedBuilder, FeedListener};
pub use feed::auth::TokenProvider;
pub use feed::devices::DeviceRecord;
pub use feed::endpoint::FeedEndpoint;
