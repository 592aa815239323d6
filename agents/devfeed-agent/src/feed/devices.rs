//! Device State
//!
//! The device collection and summary a feed maintains, and how each server
//! message changes them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::connection::protocol::ServerMessage;

/// One device as pushed by the server. Everything except the key is opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_code: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl DeviceRecord {
    /// Parse a record; `None` if `device_code` is missing or not a string
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Replaced,
}

/// Devices in arrival order, unique by `device_code`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceCollection {
    records: Vec<DeviceRecord>,
}

impl DeviceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the record with the same code in place, or append
    pub fn upsert(&mut self, record: DeviceRecord) -> Upsert {
        match self
            .records
            .iter_mut()
            .find(|existing| existing.device_code == record.device_code)
        {
            Some(existing) => {
                *existing = record;
                Upsert::Replaced
            }
            None => {
                self.records.push(record);
                Upsert::Inserted
            }
        }
    }

    /// Drop everything and load `records`. A code repeated within the batch
    /// keeps its first position and its last value.
    pub fn replace_all(&mut self, records: impl IntoIterator<Item = DeviceRecord>) {
        self.records.clear();
        for record in records {
            self.upsert(record);
        }
    }

    pub fn get(&self, device_code: &str) -> Option<&DeviceRecord> {
        self.records.iter().find(|r| r.device_code == device_code)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.records.iter()
    }

    pub fn as_slice(&self) -> &[DeviceRecord] {
        &self.records
    }

    pub fn to_vec(&self) -> Vec<DeviceRecord> {
        self.records.clone()
    }
}

/// What applying a message changed
#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    Devices,
    Summary,
    ServerError(String),
    Ping,
    Ignored,
}

/// Everything a feed knows about the devices
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub devices: DeviceCollection,
    pub summary: Value,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            devices: DeviceCollection::new(),
            summary: Value::Object(Map::new()),
        }
    }
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, message: ServerMessage) -> FeedUpdate {
        match message {
            ServerMessage::RealtimeData { data } => {
                let items = snapshot_items(&data);
                let total = items.len();
                let records: Vec<DeviceRecord> =
                    items.iter().filter_map(DeviceRecord::from_value).collect();
                if records.len() < total {
                    warn!(
                        skipped = total - records.len(),
                        "Snapshot items without a device_code were skipped"
                    );
                }
                self.devices.replace_all(records);
                debug!(devices = self.devices.len(), "Device snapshot replaced");
                FeedUpdate::Devices
            }
            ServerMessage::DeviceSummary { data } => {
                self.summary = match data {
                    Value::Null => Value::Object(Map::new()),
                    other => other,
                };
                FeedUpdate::Summary
            }
            ServerMessage::DeviceUpdate { data } => match DeviceRecord::from_value(&data) {
                Some(record) => {
                    let code = record.device_code.clone();
                    let outcome = self.devices.upsert(record);
                    debug!(device_code = %code, ?outcome, "Device updated");
                    FeedUpdate::Devices
                }
                None => {
                    debug!("Device update without a device_code (ignored)");
                    FeedUpdate::Ignored
                }
            },
            ServerMessage::Error { message } => {
                FeedUpdate::ServerError(message.unwrap_or_else(|| "unknown error".to_string()))
            }
            ServerMessage::Ping => FeedUpdate::Ping,
            ServerMessage::Unknown => FeedUpdate::Ignored,
        }
    }
}

/// Locate the item array of a snapshot: `data.data`, then `data.items`,
/// then `data` itself. No array means an empty snapshot.
fn snapshot_items(data: &Value) -> &[Value] {
    [data.get("data"), data.get("items"), Some(data)]
        .into_iter()
        .flatten()
        .find_map(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}
