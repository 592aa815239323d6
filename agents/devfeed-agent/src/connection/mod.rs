//! Connection module
//!
//! This module owns the transport to the feed server: the lifecycle state
//! machine, the WebSocket driver, and the wire protocol.

pub mod handler;
pub mod machine;
pub mod protocol;
pub mod state;
pub mod websocket;
