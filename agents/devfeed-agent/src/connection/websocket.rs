//! WebSocket Connection Manager
//!
//! Runs one feed connection on a dedicated task. The task owns the socket,
//! the retry timer and the heartbeat interval, and feeds everything that
//! happens to them through the [`ConnectionMachine`]. [`ConnectionManager`]
//! is the handle the rest of the application holds.

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, sleep, timeout, Instant, Interval, MissedTickBehavior, Sleep};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::connection::handler::{ConnectionHandler, LogNotifier, NoopHandler, Notifier};
use crate::connection::machine::{redacted, Action, ConnectionMachine, ConnectionSettings, Event};
use crate::connection::protocol::{ClientMessage, InboundFrame, ABNORMAL_CLOSURE};
use crate::connection::state::ConnectionStatus;
use crate::error::FeedError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Handshake = Pin<Box<dyn Future<Output = Result<WsStream, FeedError>> + Send>>;

/// Upper bound on finishing the close handshake of a discarded transport
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shown to the user when the reconnect policy gives up
const EXHAUSTED_NOTICE: &str = "Feed connection failed, check the network connection";

enum Command {
    Connect(Option<String>),
    Disconnect,
    Reconnect,
    Send(String),
}

/// Handle to a running connection task.
///
/// Dropping the handle tears the connection down: the transport is closed
/// with the normal-closure code and both timers are cancelled.
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Spawn a connection task with default settings and no callbacks.
    /// Must be called from within a tokio runtime.
    pub fn spawn(url: &str) -> Self {
        ConnectionManagerBuilder::new(url).spawn()
    }

    /// Open the connection, or switch to `target` if it differs from the
    /// current one
    pub fn connect(&self, target: Option<String>) {
        self.command(Command::Connect(target));
    }

    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Tear down, wait for the settle delay, then connect with a fresh
    /// retry budget
    pub fn reconnect(&self) {
        self.command(Command::Reconnect);
    }

    /// Transmit a payload if the connection is open.
    ///
    /// String payloads go out verbatim; anything else is encoded as JSON.
    /// Returns false, without transmitting, when the connection is not open
    /// or the payload cannot be encoded.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        if !self.is_connected() {
            warn!("Feed not connected, dropping outbound message");
            return false;
        }

        let text = match serde_json::to_value(payload) {
            Ok(Value::String(text)) => text,
            Ok(value) => value.to_string(),
            Err(e) => {
                warn!(error = %e, "Failed to encode outbound message");
                return false;
            }
        };

        self.commands.send(Command::Send(text)).is_ok()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status change
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().is_connected()
    }

    pub fn is_connecting(&self) -> bool {
        self.status.borrow().is_connecting()
    }

    pub fn last_error(&self) -> Option<String> {
        self.status.borrow().last_error.clone()
    }

    /// Disconnect and wait for the connection task to finish
    pub async fn shutdown(mut self) {
        self.command(Command::Disconnect);
        let task = self.task.take();
        drop(self);
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Connection task ended abnormally");
            }
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Connection task already stopped");
        }
    }
}

/// Builder for ConnectionManager
pub struct ConnectionManagerBuilder {
    url: String,
    settings: ConnectionSettings,
    handler: Arc<dyn ConnectionHandler>,
    notifier: Arc<dyn Notifier>,
}

impl ConnectionManagerBuilder {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            settings: ConnectionSettings::default(),
            handler: Arc::new(NoopHandler),
            notifier: Arc::new(LogNotifier),
        }
    }

    pub fn settings(mut self, settings: ConnectionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn reconnect_limit(mut self, limit: u32) -> Self {
        self.settings.reconnect_limit = limit;
        self
    }

    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.settings.reconnect_interval = interval;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.settings.heartbeat_interval = interval;
        self
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settings.settle_delay = delay;
        self
    }

    pub fn handler(mut self, handler: Arc<dyn ConnectionHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Start the connection task. Nothing is opened until `connect`.
    pub fn spawn(self) -> ConnectionManager {
        let machine = ConnectionMachine::new(self.url, self.settings);
        let (status_tx, status_rx) = watch::channel(machine.status());
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            machine,
            link: Link::Idle,
            retry: None,
            heartbeat: None,
            closing: JoinSet::new(),
            handler: self.handler,
            notifier: self.notifier,
            status: status_tx,
            commands: command_rx,
        };

        ConnectionManager {
            commands: command_tx,
            status: status_rx,
            task: Some(tokio::spawn(driver.run())),
        }
    }
}

/// The transport slot; at most one socket exists at a time
enum Link {
    Idle,
    Opening { generation: u64, handshake: Handshake },
    Open { generation: u64, stream: WsStream },
}

enum LinkEvent {
    Opened { generation: u64, stream: WsStream },
    OpenFailed { generation: u64, error: FeedError },
    Frame { generation: u64, message: Message },
    Failed { generation: u64, error: String },
    Ended { generation: u64 },
}

struct Driver {
    machine: ConnectionMachine,
    link: Link,
    retry: Option<Pin<Box<Sleep>>>,
    heartbeat: Option<Interval>,
    /// Discarded transports still finishing their close handshake
    closing: JoinSet<()>,
    handler: Arc<dyn ConnectionHandler>,
    notifier: Arc<dyn Notifier>,
    status: watch::Sender<ConnectionStatus>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Connect(target)) => self.apply(Event::Connect(target)).await,
                    Some(Command::Disconnect) => self.apply(Event::Disconnect).await,
                    Some(Command::Reconnect) => self.apply(Event::Reconnect).await,
                    Some(Command::Send(text)) => {
                        self.transmit(text).await;
                    }
                    None => {
                        debug!("Connection handle dropped, tearing down");
                        self.apply(Event::Disconnect).await;
                        break;
                    }
                },

                event = next_link_event(&mut self.link) => self.on_link_event(event).await,

                _ = retry_elapsed(&mut self.retry) => {
                    self.retry = None;
                    if let Some(target) = self.handler.target() {
                        self.apply(Event::Retarget(target)).await;
                    }
                    self.apply(Event::RetryElapsed).await;
                }

                _ = heartbeat_tick(&mut self.heartbeat) => self.apply(Event::HeartbeatTick).await,

                Some(result) = self.closing.join_next(), if !self.closing.is_empty() => {
                    if let Err(e) = result {
                        debug!(error = %e, "Close task ended abnormally");
                    }
                }
            }
        }

        while self.closing.join_next().await.is_some() {}
    }

    async fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened { generation, stream } => {
                info!("Feed connection established");
                self.link = Link::Open { generation, stream };
                self.apply(Event::Opened { generation }).await;
            }
            LinkEvent::OpenFailed { generation, error } => {
                warn!(error = %error, "Failed to open feed connection");
                self.link = Link::Idle;
                self.apply(Event::OpenFailed { generation, error }).await;
            }
            LinkEvent::Frame { generation, message } => match message {
                Message::Text(text) => self.deliver(&text),
                Message::Binary(data) => match String::from_utf8(data) {
                    Ok(text) => self.deliver(&text),
                    Err(_) => debug!("Received non-UTF-8 binary frame (ignored)"),
                },
                Message::Ping(_) => debug!("Received ping"),
                Message::Pong(_) => debug!("Received pong"),
                Message::Close(frame) => {
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                        None => (u16::from(CloseCode::Status), String::new()),
                    };
                    info!(code, reason = %reason, "Received close frame");
                    // the reply tungstenite queued still has to go out
                    if let Link::Open { stream, .. } = std::mem::replace(&mut self.link, Link::Idle) {
                        self.retire(stream, None);
                    }
                    self.apply(Event::Closed {
                        generation,
                        code,
                        reason,
                    })
                    .await;
                }
                Message::Frame(_) => {
                    // Raw frame, typically not used
                }
            },
            LinkEvent::Failed { generation, error } => {
                error!(error = %error, "WebSocket error");
                self.link = Link::Idle;
                self.apply(Event::TransportFailed { generation, error }).await;
            }
            LinkEvent::Ended { generation } => {
                info!("WebSocket stream ended");
                self.link = Link::Idle;
                self.apply(Event::Closed {
                    generation,
                    code: ABNORMAL_CLOSURE,
                    reason: "stream ended".to_string(),
                })
                .await;
            }
        }
    }

    fn deliver(&self, text: &str) {
        let frame = InboundFrame::decode(text);
        if let InboundFrame::Raw(_) = frame {
            warn!(len = text.len(), "Failed to decode feed message, forwarding raw text");
        }
        self.handler.on_message(&frame);
    }

    async fn apply(&mut self, event: Event) {
        for action in self.machine.handle(event) {
            self.execute(action).await;
        }

        let status = self.machine.status();
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    async fn execute(&mut self, action: Action) {
        match action {
            Action::Open { generation, url } => {
                info!(url = %redacted(&url), generation, "Connecting to device feed");
                self.link = Link::Opening {
                    generation,
                    handshake: open_transport(url),
                };
            }
            Action::Close { code, reason } => {
                match std::mem::replace(&mut self.link, Link::Idle) {
                    Link::Open { stream, .. } => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        self.retire(stream, Some(frame));
                    }
                    Link::Opening { .. } => debug!("Abandoned in-flight handshake"),
                    Link::Idle => {}
                }
            }
            Action::ScheduleRetry { delay } => {
                self.retry = Some(Box::pin(sleep(delay)));
            }
            Action::CancelRetry => self.retry = None,
            Action::StartHeartbeat { interval } => {
                self.heartbeat = Some(heartbeat_ticker(interval));
            }
            Action::StopHeartbeat => self.heartbeat = None,
            Action::SendPing => match ClientMessage::ping().to_json() {
                Ok(json) => {
                    debug!("Sending heartbeat");
                    self.transmit(json).await;
                }
                Err(e) => debug!(error = %e, "Failed to encode heartbeat"),
            },
            Action::NotifyOpen => self.handler.on_open(),
            Action::NotifyClose { code, reason } => self.handler.on_close(code, &reason),
            Action::NotifyError(error) => {
                if let FeedError::RetriesExhausted { .. } = error {
                    self.notifier.notify(EXHAUSTED_NOTICE);
                }
                self.handler.on_error(&error);
            }
        }
    }

    /// Finish the close handshake of a discarded transport off the driver
    /// task, so commands and timers keep flowing meanwhile
    fn retire(&mut self, stream: WsStream, frame: Option<CloseFrame<'static>>) {
        self.closing.spawn(close_stream(stream, frame));
    }

    /// Write one text frame. Failures are left to the read side to report.
    async fn transmit(&mut self, text: String) -> bool {
        let Link::Open { stream, .. } = &mut self.link else {
            debug!("Connection not open, outbound message dropped");
            return false;
        };

        match stream.send(Message::Text(text)).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Failed to send message");
                false
            }
        }
    }
}

/// Send our close frame (or flush the queued reply to the peer's), then
/// read until the peer confirms or drops the connection
async fn close_stream(mut stream: WsStream, frame: Option<CloseFrame<'static>>) {
    let handshake = async {
        let sent = match frame {
            Some(frame) => stream.close(Some(frame)).await,
            None => stream.flush().await,
        };
        if let Err(e) = sent {
            debug!(error = %e, "Close handshake failed");
            return;
        }
        while let Some(Ok(_)) = stream.next().await {}
        debug!("Close handshake finished");
    };

    if timeout(CLOSE_TIMEOUT, handshake).await.is_err() {
        debug!("Timed out waiting for close handshake");
    }
}

fn open_transport(url: String) -> Handshake {
    Box::pin(async move {
        match connect_async(url.as_str()).await {
            Ok((stream, _response)) => Ok(stream),
            Err(WsError::Url(e)) => Err(FeedError::InvalidTarget {
                url: redacted(&url),
                reason: e.to_string(),
            }),
            Err(WsError::HttpFormat(e)) => Err(FeedError::InvalidTarget {
                url: redacted(&url),
                reason: e.to_string(),
            }),
            Err(e) => Err(FeedError::Transport(e.to_string())),
        }
    })
}

async fn next_link_event(link: &mut Link) -> LinkEvent {
    match link {
        Link::Idle => std::future::pending().await,
        Link::Opening {
            generation,
            handshake,
        } => match handshake.as_mut().await {
            Ok(stream) => LinkEvent::Opened {
                generation: *generation,
                stream,
            },
            Err(error) => LinkEvent::OpenFailed {
                generation: *generation,
                error,
            },
        },
        Link::Open { generation, stream } => match stream.next().await {
            Some(Ok(message)) => LinkEvent::Frame {
                generation: *generation,
                message,
            },
            Some(Err(e)) => LinkEvent::Failed {
                generation: *generation,
                error: e.to_string(),
            },
            None => LinkEvent::Ended {
                generation: *generation,
            },
        },
    }
}

/// First tick one full interval after the connection opens
fn heartbeat_ticker(interval: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn retry_elapsed(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn heartbeat_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
