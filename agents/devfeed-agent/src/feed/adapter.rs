//! Device Feed
//!
//! Binds a [`ConnectionManager`] to the device protocol: builds the feed URL,
//! turns pushed messages into device state, and sends subscription commands.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::cli::config::Config;
use crate::connection::handler::{ConnectionHandler, LogNotifier, Notifier};
use crate::connection::machine::ConnectionSettings;
use crate::connection::protocol::{ClientMessage, InboundFrame, ServerMessage};
use crate::connection::state::ConnectionStatus;
use crate::connection::websocket::{ConnectionManager, ConnectionManagerBuilder};
use crate::error::FeedError;
use crate::feed::auth::{StaticToken, TokenProvider};
use crate::feed::devices::{DeviceRecord, DeviceState, FeedUpdate};
use crate::feed::endpoint::FeedEndpoint;

/// Callbacks for feed consumers. Every method has a no-op default.
pub trait FeedListener: Send + Sync {
    fn on_open(&self) {}

    /// Called with the whole collection after a snapshot or a single update
    fn on_data_update(&self, _devices: &[DeviceRecord]) {}

    fn on_summary(&self, _summary: &Value) {}

    /// Error frame pushed by the server
    fn on_server_error(&self, _message: &str) {}

    /// Connectivity problems: transport errors, exhausted retries, bad target
    fn on_connection_error(&self, _error: &FeedError) {}

    /// Every inbound frame before interpretation
    fn on_message(&self, _frame: &InboundFrame) {}
}

struct NoopListener;

impl FeedListener for NoopListener {}

/// State shared between the feed handle and its connection task
struct FeedShared {
    endpoint: Mutex<FeedEndpoint>,
    tokens: Arc<dyn TokenProvider>,
    state: RwLock<DeviceState>,
    devices: watch::Sender<Vec<DeviceRecord>>,
    summary: watch::Sender<Value>,
    last_message: watch::Sender<Option<InboundFrame>>,
    listener: Arc<dyn FeedListener>,
}

impl FeedShared {
    /// Feed URL for the current endpoint and token, rebuilt on every call
    fn url(&self) -> String {
        let token = self.tokens.token();
        self.endpoint.lock().build_url(token.as_deref())
    }
}

impl ConnectionHandler for FeedShared {
    fn on_open(&self) {
        let device_type = self.endpoint.lock().device_type.clone();
        info!(
            device_type = device_type.as_deref().unwrap_or("all"),
            "Device feed connected"
        );
        self.listener.on_open();
    }

    fn on_message(&self, frame: &InboundFrame) {
        self.last_message.send_replace(Some(frame.clone()));
        self.listener.on_message(frame);

        let Some(message) = ServerMessage::from_frame(frame) else {
            debug!("Frame is not a feed message (ignored)");
            return;
        };

        let (update, snapshot) = {
            let mut state = self.state.write();
            let update = state.apply(message);
            let snapshot = match update {
                FeedUpdate::Devices => Some(state.devices.to_vec()),
                _ => None,
            };
            (update, snapshot)
        };

        match update {
            FeedUpdate::Devices => {
                let devices = snapshot.unwrap_or_default();
                self.listener.on_data_update(&devices);
                self.devices.send_replace(devices);
            }
            FeedUpdate::Summary => {
                let summary = self.state.read().summary.clone();
                self.listener.on_summary(&summary);
                self.summary.send_replace(summary);
            }
            FeedUpdate::ServerError(message) => {
                error!(message = %message, "Device feed reported an error");
                self.listener.on_server_error(&message);
            }
            FeedUpdate::Ping => debug!("Received feed heartbeat"),
            FeedUpdate::Ignored => {}
        }
    }

    fn on_error(&self, error: &FeedError) {
        self.listener.on_connection_error(error);
    }

    /// Retries and manual reconnects pick up filter and token changes
    fn target(&self) -> Option<String> {
        Some(self.url())
    }
}

/// A real-time device feed.
///
/// Dropping the feed closes its connection and stops its timers.
pub struct DeviceFeed {
    manager: ConnectionManager,
    shared: Arc<FeedShared>,
}

impl DeviceFeed {
    pub fn builder(endpoint: FeedEndpoint) -> DeviceFeedBuilder {
        DeviceFeedBuilder::new(endpoint)
    }

    /// Feed URL for the current endpoint and token, rebuilt on every call
    pub fn url(&self) -> String {
        self.shared.url()
    }

    /// Connect with a freshly built URL. Reconnects if the URL changed.
    pub fn connect(&self) {
        self.manager.connect(Some(self.url()));
    }

    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    /// Tear down and reopen after the settle delay, with a URL built at
    /// reopen time
    pub fn reconnect(&self) {
        self.manager.reconnect();
    }

    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        self.manager.send(payload)
    }

    pub fn subscribe_device_type(&self, device_type: &str) -> bool {
        self.send(&ClientMessage::subscribe(device_type))
    }

    pub fn unsubscribe_device_type(&self, device_type: &str) -> bool {
        self.send(&ClientMessage::unsubscribe(device_type))
    }

    pub fn request_refresh(&self, device_type: Option<&str>) -> bool {
        self.send(&ClientMessage::refresh(device_type))
    }

    /// Change the device-type filter. A live connection is moved to the
    /// new URL; otherwise the next connect, retry or reconnect uses it.
    pub fn set_device_type(&self, device_type: Option<String>) {
        {
            let mut endpoint = self.shared.endpoint.lock();
            if endpoint.device_type == device_type {
                return;
            }
            endpoint.device_type = device_type;
        }

        let status = self.manager.status();
        if status.is_connected() || status.is_connecting() {
            self.connect();
        }
    }

    pub fn device_type(&self) -> Option<String> {
        self.shared.endpoint.lock().device_type.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.manager.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.manager.watch_status()
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    pub fn is_connecting(&self) -> bool {
        self.manager.is_connecting()
    }

    pub fn last_error(&self) -> Option<String> {
        self.manager.last_error()
    }

    pub fn last_message(&self) -> Option<InboundFrame> {
        self.shared.last_message.borrow().clone()
    }

    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.shared.devices.borrow().clone()
    }

    pub fn device(&self, device_code: &str) -> Option<DeviceRecord> {
        self.shared.state.read().devices.get(device_code).cloned()
    }

    pub fn watch_devices(&self) -> watch::Receiver<Vec<DeviceRecord>> {
        self.shared.devices.subscribe()
    }

    pub fn summary(&self) -> Value {
        self.shared.summary.borrow().clone()
    }

    pub fn watch_summary(&self) -> watch::Receiver<Value> {
        self.shared.summary.subscribe()
    }

    /// Disconnect and wait for the connection task to stop
    pub async fn shutdown(self) {
        self.manager.shutdown().await;
    }
}

/// Builder for DeviceFeed
pub struct DeviceFeedBuilder {
    endpoint: FeedEndpoint,
    settings: ConnectionSettings,
    tokens: Arc<dyn TokenProvider>,
    listener: Arc<dyn FeedListener>,
    notifier: Arc<dyn Notifier>,
    auto_connect: bool,
}

impl DeviceFeedBuilder {
    pub fn new(endpoint: FeedEndpoint) -> Self {
        Self {
            endpoint,
            settings: ConnectionSettings::default(),
            tokens: Arc::new(StaticToken(None)),
            listener: Arc::new(NoopListener),
            notifier: Arc::new(LogNotifier),
            auto_connect: true,
        }
    }

    /// Endpoint, timings and token sources from a loaded configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.endpoint())
            .settings(config.connection_settings())
            .tokens(config.token_provider())
            .auto_connect(config.connection.auto_connect)
    }

    pub fn settings(mut self, settings: ConnectionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn tokens(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn FeedListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Connect as soon as the feed is built (default: true)
    pub fn auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Spawn the connection task. Must be called from within a tokio runtime.
    pub fn build(self) -> DeviceFeed {
        let state = DeviceState::new();
        let shared = Arc::new(FeedShared {
            endpoint: Mutex::new(self.endpoint),
            tokens: self.tokens,
            devices: watch::channel(state.devices.to_vec()).0,
            summary: watch::channel(state.summary.clone()).0,
            last_message: watch::channel(None).0,
            state: RwLock::new(state),
            listener: self.listener,
        });

        let manager = ConnectionManagerBuilder::new(&shared.url())
            .settings(self.settings)
            .handler(shared.clone())
            .notifier(self.notifier)
            .spawn();

        let feed = DeviceFeed { manager, shared };

        if self.auto_connect {
            feed.connect();
        }

        feed
    }
}
