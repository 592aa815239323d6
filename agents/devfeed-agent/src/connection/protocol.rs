//! Message Protocol
//!
//! Defines the JSON text frames exchanged with the device feed endpoint.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Close code for an intentional, client-initiated shutdown
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the transport dropped without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Messages sent from the client to the feed server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keep-alive
    Ping { timestamp: i64 },

    /// Start receiving pushes for a device type
    Subscribe { device_type: String, timestamp: i64 },

    /// Stop receiving pushes for a device type
    Unsubscribe { device_type: String, timestamp: i64 },

    /// Ask the server to push a fresh snapshot
    Refresh {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device_type: Option<String>,
        timestamp: i64,
    },
}

/// Messages pushed from the feed server to the client
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full snapshot of the device collection
    RealtimeData {
        #[serde(default)]
        data: Value,
    },

    /// Aggregate status summary
    DeviceSummary {
        #[serde(default)]
        data: Value,
    },

    /// Single device changed
    DeviceUpdate {
        #[serde(default)]
        data: Value,
    },

    /// Application-level error report
    Error {
        #[serde(default)]
        message: Option<String>,
    },

    /// Server-side keep-alive
    Ping,

    /// Any `type` this client does not understand
    #[serde(other)]
    Unknown,
}

/// An inbound text frame after the decode attempt.
///
/// Frames that are not valid JSON are kept verbatim so consumers can still
/// look at them.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Json(Value),
    Raw(String),
}

impl InboundFrame {
    /// Decode a text frame, falling back to the raw text
    pub fn decode(text: &str) -> Self {
        match serde_json::from_str(text) {
            Ok(value) => InboundFrame::Json(value),
            Err(_) => InboundFrame::Raw(text.to_string()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            InboundFrame::Json(value) => Some(value),
            InboundFrame::Raw(_) => None,
        }
    }
}

impl ClientMessage {
    pub fn ping() -> Self {
        ClientMessage::Ping {
            timestamp: now_millis(),
        }
    }

    pub fn subscribe(device_type: &str) -> Self {
        ClientMessage::Subscribe {
            device_type: device_type.to_string(),
            timestamp: now_millis(),
        }
    }

    pub fn unsubscribe(device_type: &str) -> Self {
        ClientMessage::Unsubscribe {
            device_type: device_type.to_string(),
            timestamp: now_millis(),
        }
    }

    pub fn refresh(device_type: Option<&str>) -> Self {
        ClientMessage::Refresh {
            device_type: device_type.map(str::to_string),
            timestamp: now_millis(),
        }
    }

    /// Serialize the message to JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl ServerMessage {
    /// Interpret a decoded frame. Raw frames and malformed messages yield `None`.
    pub fn from_frame(frame: &InboundFrame) -> Option<Self> {
        let value = frame.as_json()?;
        serde_json::from_value(value.clone()).ok()
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
