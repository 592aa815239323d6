//! Connection Machine
//!
//! The connection lifecycle as a pure state machine: the driver feeds it
//! [`Event`]s (commands, transport notifications, timer expiries) and
//! executes the [`Action`]s it returns. Nothing here touches the network or
//! the clock, so every retry and teardown rule can be exercised directly.

use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::connection::protocol::NORMAL_CLOSURE;
use crate::connection::state::{ConnectionState, ConnectionStatus, ReconnectPolicy, StateTracker};
use crate::error::FeedError;

/// Timing knobs for one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub reconnect_limit: u32,
    pub reconnect_interval: Duration,
    /// `Duration::ZERO` disables the heartbeat
    pub heartbeat_interval: Duration,
    /// Pause between the teardown and the fresh connect of a manual reconnect
    pub settle_delay: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            reconnect_limit: 5,
            reconnect_interval: Duration::from_millis(3000),
            heartbeat_interval: Duration::from_millis(30_000),
            settle_delay: Duration::from_millis(1000),
        }
    }
}

/// Inputs to the machine
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connect(Option<String>),
    Disconnect,
    Reconnect,
    Opened { generation: u64 },
    OpenFailed { generation: u64, error: FeedError },
    Closed { generation: u64, code: u16, reason: String },
    TransportFailed { generation: u64, error: String },
    /// Use this target for the next open. Ignored while a transport exists;
    /// use `Connect(Some(..))` to move a live connection.
    Retarget(String),
    RetryElapsed,
    HeartbeatTick,
}

/// Side effects the driver must perform, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Open a transport; events it produces carry `generation`
    Open { generation: u64, url: String },
    /// Close and discard the current transport
    Close { code: u16, reason: String },
    /// Arm the retry timer, replacing any armed one
    ScheduleRetry { delay: Duration },
    CancelRetry,
    StartHeartbeat { interval: Duration },
    StopHeartbeat,
    SendPing,
    NotifyOpen,
    NotifyClose { code: u16, reason: String },
    NotifyError(FeedError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryKind {
    /// Scheduled by the reconnect policy after an abnormal close
    Automatic,
    /// Settle delay of a user-requested reconnect
    Manual,
}

/// Connection lifecycle state machine
#[derive(Debug)]
pub struct ConnectionMachine {
    settings: ConnectionSettings,
    tracker: StateTracker,
    policy: ReconnectPolicy,
    default_url: String,
    url: Option<String>,
    generation: u64,
    has_transport: bool,
    pending_retry: Option<RetryKind>,
    heartbeat_running: bool,
    last_error: Option<String>,
}

impl ConnectionMachine {
    pub fn new(default_url: impl Into<String>, settings: ConnectionSettings) -> Self {
        let policy = ReconnectPolicy::new(settings.reconnect_limit, settings.reconnect_interval);
        Self {
            settings,
            tracker: StateTracker::new(),
            policy,
            default_url: default_url.into(),
            url: None,
            generation: 0,
            has_transport: false,
            pending_retry: None,
            heartbeat_running: false,
            last_error: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.tracker.current()
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    pub fn attempt_count(&self) -> u32 {
        self.policy.attempt_count()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn reconnect_pending(&self) -> bool {
        self.pending_retry.is_some()
    }

    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat_running
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state(),
            attempt_count: self.policy.attempt_count(),
            reconnect_pending: self.reconnect_pending(),
            last_error: self.last_error.clone(),
            url: self.url.clone(),
        }
    }

    /// Apply one event and return the resulting side effects
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        let mut actions = Vec::new();

        match event {
            Event::Connect(target) => self.connect(target, &mut actions),
            Event::Disconnect => self.teardown("disconnect requested", &mut actions),
            Event::Reconnect => {
                self.teardown("manual reconnect", &mut actions);
                self.pending_retry = Some(RetryKind::Manual);
                actions.push(Action::ScheduleRetry {
                    delay: self.settings.settle_delay,
                });
            }
            Event::Opened { generation } => self.opened(generation, &mut actions),
            Event::OpenFailed { generation, error } => {
                if !self.is_current(generation) {
                    return actions;
                }
                match error {
                    FeedError::Transport(reason) => {
                        self.transport_failed(reason, &mut actions);
                    }
                    error => {
                        self.has_transport = false;
                        self.fail_terminal(error, &mut actions);
                    }
                }
            }
            Event::Closed {
                generation,
                code,
                reason,
            } => {
                if self.is_current(generation) {
                    self.closed(code, reason, &mut actions);
                }
            }
            Event::TransportFailed { generation, error } => {
                if self.is_current(generation) {
                    self.transport_failed(error, &mut actions);
                }
            }
            Event::Retarget(target) => self.retarget(target),
            Event::RetryElapsed => match self.pending_retry.take() {
                Some(RetryKind::Manual) => {
                    self.policy.reset();
                    self.connect(None, &mut actions);
                }
                Some(RetryKind::Automatic) => {
                    info!(attempt = self.policy.attempt_count(), "Reconnecting");
                    self.connect(None, &mut actions);
                }
                None => debug!("Retry timer fired with nothing pending"),
            },
            Event::HeartbeatTick => {
                if self.heartbeat_running && self.state() == ConnectionState::Open {
                    actions.push(Action::SendPing);
                }
            }
        }

        actions
    }

    fn is_current(&self, generation: u64) -> bool {
        let current = self.has_transport && generation == self.generation;
        if !current {
            debug!(generation, current = self.generation, "Ignoring event from discarded transport");
        }
        current
    }

    fn connect(&mut self, target: Option<String>, actions: &mut Vec<Action>) {
        if matches!(self.state(), ConnectionState::Connecting | ConnectionState::Open) {
            match target {
                Some(new_url) if self.url.as_deref() != Some(new_url.as_str()) => {
                    info!(url = %redacted(&new_url), "Feed target changed, replacing connection");
                    self.teardown("target changed", actions);
                    return self.connect(Some(new_url), actions);
                }
                _ => {
                    debug!(state = %self.state(), "Already connected or connecting");
                    return;
                }
            }
        }

        // an explicit connect supersedes a pending retry
        if self.pending_retry.take().is_some() {
            actions.push(Action::CancelRetry);
        }

        let url = target
            .or_else(|| self.url.clone())
            .unwrap_or_else(|| self.default_url.clone());
        self.url = Some(url.clone());
        self.last_error = None;

        if let Err(error) = validate_target(&url) {
            self.tracker.transition_to(ConnectionState::Connecting, "connect requested");
            self.fail_terminal(error, actions);
            return;
        }

        self.generation += 1;
        self.has_transport = true;
        self.tracker.transition_to(ConnectionState::Connecting, "connect requested");
        actions.push(Action::Open {
            generation: self.generation,
            url,
        });
    }

    fn retarget(&mut self, target: String) {
        if self.has_transport || self.url.as_deref() == Some(target.as_str()) {
            return;
        }
        debug!(url = %redacted(&target), "Next connect will use a new target");
        self.url = Some(target);
    }

    fn opened(&mut self, generation: u64, actions: &mut Vec<Action>) {
        if !self.is_current(generation) || self.state() != ConnectionState::Connecting {
            return;
        }

        self.tracker.transition_to(ConnectionState::Open, "transport opened");
        self.policy.reset();
        self.last_error = None;

        if !self.settings.heartbeat_interval.is_zero() {
            self.heartbeat_running = true;
            actions.push(Action::StartHeartbeat {
                interval: self.settings.heartbeat_interval,
            });
        }
        actions.push(Action::NotifyOpen);
    }

    fn closed(&mut self, code: u16, reason: String, actions: &mut Vec<Action>) {
        self.has_transport = false;
        self.stop_heartbeat(actions);
        self.tracker.transition_to(ConnectionState::Closed, "transport closed");
        actions.push(Action::NotifyClose {
            code,
            reason: reason.clone(),
        });

        if code == NORMAL_CLOSURE {
            info!(reason = %reason, "Connection closed normally");
            return;
        }

        if self.policy.can_retry() {
            let attempt = self.policy.record_attempt();
            self.pending_retry = Some(RetryKind::Automatic);
            info!(
                code,
                attempt,
                limit = self.policy.limit(),
                delay_ms = self.policy.interval().as_millis() as u64,
                "Connection lost, scheduling reconnect"
            );
            actions.push(Action::ScheduleRetry {
                delay: self.policy.interval(),
            });
        } else {
            let error = FeedError::RetriesExhausted {
                attempts: self.policy.attempt_count(),
            };
            warn!(code, error = %error, "Giving up on reconnecting");
            self.last_error = Some(error.to_string());
            actions.push(Action::NotifyError(error));
        }
    }

    fn transport_failed(&mut self, reason: String, actions: &mut Vec<Action>) {
        let error = FeedError::Transport(reason.clone());
        self.last_error = Some(error.to_string());
        actions.push(Action::NotifyError(error));
        self.closed(crate::connection::protocol::ABNORMAL_CLOSURE, reason, actions);
    }

    fn fail_terminal(&mut self, error: FeedError, actions: &mut Vec<Action>) {
        warn!(error = %error, "Cannot open feed connection");
        self.stop_heartbeat(actions);
        self.tracker.transition_to(ConnectionState::Closed, "open failed");
        self.last_error = Some(error.to_string());
        actions.push(Action::NotifyError(error));
    }

    fn stop_heartbeat(&mut self, actions: &mut Vec<Action>) {
        self.heartbeat_running = false;
        actions.push(Action::StopHeartbeat);
    }

    /// Unconditional teardown: close any transport, cancel both timers,
    /// reset the retry budget.
    fn teardown(&mut self, reason: &str, actions: &mut Vec<Action>) {
        if self.has_transport {
            self.tracker.transition_to(ConnectionState::Closing, reason);
            self.has_transport = false;
            // events still in flight from the old transport become stale
            self.generation += 1;
            actions.push(Action::Close {
                code: NORMAL_CLOSURE,
                reason: reason.to_string(),
            });
            actions.push(Action::NotifyClose {
                code: NORMAL_CLOSURE,
                reason: reason.to_string(),
            });
        }

        self.pending_retry = None;
        actions.push(Action::CancelRetry);
        self.stop_heartbeat(actions);

        self.tracker.transition_to(ConnectionState::Closed, reason);
        self.policy.reset();
    }
}

/// Reject targets that can never become a WebSocket connection
pub fn validate_target(target: &str) -> Result<Url, FeedError> {
    let url = Url::parse(target).map_err(|e| FeedError::InvalidTarget {
        url: redacted(target),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(FeedError::InvalidTarget {
            url: redacted(target),
            reason: format!("unsupported scheme `{}`", other),
        }),
    }
}

/// Target with the `token` query value masked, for logs
pub fn redacted(target: &str) -> String {
    let Ok(mut url) = Url::parse(target) else {
        return target.to_string();
    };
    if !url.query_pairs().any(|(key, _)| key == "token") {
        return target.to_string();
    }

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == "token" { "***".to_string() } else { value.into_owned() };
            (key.into_owned(), value)
        })
        .collect();
    url.query_pairs_mut().clear().extend_pairs(pairs);
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::protocol::ABNORMAL_CLOSURE;

    const URL: &str = "ws://localhost:8001/api/v2/devices/realtime-data/ws";

    fn settings(limit: u32, interval_ms: u64) -> ConnectionSettings {
        ConnectionSettings {
            reconnect_limit: limit,
            reconnect_interval: Duration::from_millis(interval_ms),
            heartbeat_interval: Duration::from_millis(30_000),
            settle_delay: Duration::from_millis(1000),
        }
    }

    fn opened_machine(limit: u32) -> ConnectionMachine {
        let mut machine = ConnectionMachine::new(URL, settings(limit, 1000));
        machine.handle(Event::Connect(None));
        let generation = machine.generation();
        machine.handle(Event::Opened { generation });
        assert_eq!(machine.state(), ConnectionState::Open);
        machine
    }

    fn abnormal_close(machine: &mut ConnectionMachine) -> Vec<Action> {
        let generation = machine.generation();
        machine.handle(Event::Closed {
            generation,
            code: ABNORMAL_CLOSURE,
            reason: "connection reset".into(),
        })
    }

    fn scheduled(actions: &[Action]) -> usize {
        actions
            .iter()
            .filter(|a| matches!(a, Action::ScheduleRetry { .. }))
            .count()
    }

    #[test]
    fn test_connect_opens_default_url() {
        let mut machine = ConnectionMachine::new(URL, ConnectionSettings::default());
        let actions = machine.handle(Event::Connect(None));

        assert_eq!(
            actions,
            vec![Action::Open {
                generation: 1,
                url: URL.to_string()
            }]
        );
        assert_eq!(machine.state(), ConnectionState::Connecting);
        assert!(machine.status().is_connecting());
    }

    #[test]
    fn test_open_resets_attempts_and_starts_heartbeat() {
        let mut machine = ConnectionMachine::new(URL, settings(3, 1000));
        machine.handle(Event::Connect(None));
        let actions = machine.handle(Event::Opened { generation: 1 });

        assert_eq!(
            actions,
            vec![
                Action::StartHeartbeat {
                    interval: Duration::from_millis(30_000)
                },
                Action::NotifyOpen
            ]
        );
        assert!(machine.status().is_connected());
        assert!(machine.heartbeat_running());
    }

    #[test]
    fn test_zero_heartbeat_interval_disables_heartbeat() {
        let mut config = settings(3, 1000);
        config.heartbeat_interval = Duration::ZERO;
        let mut machine = ConnectionMachine::new(URL, config);
        machine.handle(Event::Connect(None));
        let actions = machine.handle(Event::Opened { generation: 1 });

        assert_eq!(actions, vec![Action::NotifyOpen]);
        assert!(machine.handle(Event::HeartbeatTick).is_empty());
    }

    #[test]
    fn test_heartbeat_only_pings_while_open() {
        let mut machine = opened_machine(3);
        assert_eq!(machine.handle(Event::HeartbeatTick), vec![Action::SendPing]);

        abnormal_close(&mut machine);
        assert!(machine.handle(Event::HeartbeatTick).is_empty());
        assert!(!machine.heartbeat_running());
    }

    #[test]
    fn test_connect_while_open_is_noop() {
        let mut machine = opened_machine(3);
        assert!(machine.handle(Event::Connect(None)).is_empty());
        assert!(machine
            .handle(Event::Connect(Some(URL.to_string())))
            .is_empty());
        assert_eq!(machine.generation(), 1);
    }

    #[test]
    fn test_connect_with_new_target_tears_down_first() {
        let mut machine = opened_machine(3);
        let other = "ws://localhost:8001/api/v2/devices/realtime-data/ws?type_code=cutting";
        let actions = machine.handle(Event::Connect(Some(other.to_string())));

        let close_at = actions
            .iter()
            .position(|a| matches!(a, Action::Close { code: NORMAL_CLOSURE, .. }))
            .unwrap();
        let open_at = actions
            .iter()
            .position(|a| matches!(a, Action::Open { .. }))
            .unwrap();
        assert!(close_at < open_at);
        assert_eq!(
            actions[open_at],
            Action::Open {
                generation: 3,
                url: other.to_string()
            }
        );
        assert_eq!(machine.state(), ConnectionState::Connecting);
        assert_eq!(machine.status().url.as_deref(), Some(other));
    }

    #[test]
    fn test_invalid_target_is_terminal() {
        let mut machine = ConnectionMachine::new("http://localhost:8001/ws", settings(3, 1000));
        let actions = machine.handle(Event::Connect(None));

        assert!(!actions.iter().any(|a| matches!(a, Action::Open { .. })));
        assert_eq!(scheduled(&actions), 0);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::NotifyError(FeedError::InvalidTarget { .. }))));
        assert_eq!(machine.state(), ConnectionState::Closed);
        assert!(machine.last_error().is_some());
        assert!(!machine.reconnect_pending());
    }

    #[test]
    fn test_malformed_target_is_terminal() {
        let mut machine = ConnectionMachine::new(URL, settings(3, 1000));
        machine.handle(Event::Connect(Some("not a url".into())));
        assert_eq!(machine.state(), ConnectionState::Closed);
        assert!(!machine.reconnect_pending());
    }

    #[test]
    fn test_open_failed_with_invalid_target_does_not_retry() {
        let mut machine = ConnectionMachine::new(URL, settings(3, 1000));
        machine.handle(Event::Connect(None));
        let actions = machine.handle(Event::OpenFailed {
            generation: 1,
            error: FeedError::InvalidTarget {
                url: URL.into(),
                reason: "bad host".into(),
            },
        });

        assert_eq!(scheduled(&actions), 0);
        assert_eq!(machine.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_unreachable_host_is_retried() {
        let mut machine = ConnectionMachine::new(URL, settings(3, 1000));
        machine.handle(Event::Connect(None));
        let actions = machine.handle(Event::OpenFailed {
            generation: 1,
            error: FeedError::Transport("connection refused".into()),
        });

        assert_eq!(scheduled(&actions), 1);
        assert_eq!(machine.attempt_count(), 1);
        assert!(machine.reconnect_pending());
    }

    #[test]
    fn test_normal_close_does_not_retry() {
        let mut machine = opened_machine(3);
        let actions = machine.handle(Event::Closed {
            generation: 1,
            code: NORMAL_CLOSURE,
            reason: "bye".into(),
        });

        assert_eq!(scheduled(&actions), 0);
        assert_eq!(machine.state(), ConnectionState::Closed);
        assert!(machine.last_error().is_none());
    }

    #[test]
    fn test_abnormal_close_schedules_single_retry() {
        let mut machine = opened_machine(3);
        let actions = abnormal_close(&mut machine);

        assert_eq!(
            actions.last(),
            Some(&Action::ScheduleRetry {
                delay: Duration::from_millis(1000)
            })
        );
        assert!(actions.contains(&Action::StopHeartbeat));
        assert_eq!(machine.attempt_count(), 1);

        let actions = machine.handle(Event::RetryElapsed);
        assert_eq!(
            actions,
            vec![Action::Open {
                generation: 2,
                url: URL.to_string()
            }]
        );
        assert!(!machine.reconnect_pending());
    }

    #[test]
    fn test_successful_reopen_resets_attempts() {
        let mut machine = opened_machine(3);
        abnormal_close(&mut machine);
        machine.handle(Event::RetryElapsed);
        let generation = machine.generation();
        machine.handle(Event::Opened { generation });
        assert_eq!(machine.attempt_count(), 0);
    }

    #[test]
    fn test_retry_budget_exhaustion() {
        // limit = 2, interval = 1000ms
        let mut machine = opened_machine(2);

        let first = abnormal_close(&mut machine);
        assert_eq!(scheduled(&first), 1);
        machine.handle(Event::RetryElapsed);

        let second = abnormal_close(&mut machine);
        assert_eq!(scheduled(&second), 1);
        assert!(machine.reconnect_pending());
        assert_eq!(machine.attempt_count(), 2);
        machine.handle(Event::RetryElapsed);

        let third = abnormal_close(&mut machine);
        assert_eq!(scheduled(&third), 0);
        assert!(third.contains(&Action::NotifyError(FeedError::RetriesExhausted {
            attempts: 2
        })));
        assert_eq!(machine.state(), ConnectionState::Closed);
        assert!(!machine.reconnect_pending());
        assert!(machine.last_error().is_some());

        // nothing left to fire
        assert!(machine.handle(Event::RetryElapsed).is_empty());
    }

    #[test]
    fn test_one_retry_pending_before_limit() {
        for limit in 1..5 {
            let mut machine = opened_machine(limit);
            for closure in 1..limit {
                abnormal_close(&mut machine);
                assert_eq!(machine.attempt_count(), closure);
                machine.handle(Event::RetryElapsed);
            }
            // closure number `limit` still has budget for one retry
            let actions = abnormal_close(&mut machine);
            assert_eq!(scheduled(&actions), 1);
            assert!(machine.reconnect_pending());
        }
    }

    #[test]
    fn test_disconnect_from_any_state() {
        let states: Vec<Box<dyn Fn() -> ConnectionMachine>> = vec![
            Box::new(|| ConnectionMachine::new(URL, settings(3, 1000))),
            Box::new(|| {
                let mut m = ConnectionMachine::new(URL, settings(3, 1000));
                m.handle(Event::Connect(None));
                m
            }),
            Box::new(|| opened_machine(3)),
            Box::new(|| {
                let mut m = opened_machine(3);
                abnormal_close(&mut m);
                m
            }),
        ];

        for build in states {
            let mut machine = build();
            let actions = machine.handle(Event::Disconnect);

            assert!(actions.contains(&Action::CancelRetry));
            assert!(actions.contains(&Action::StopHeartbeat));
            assert_eq!(machine.state(), ConnectionState::Closed);
            assert_eq!(machine.attempt_count(), 0);
            assert!(!machine.reconnect_pending());
            assert!(!machine.heartbeat_running());
        }
    }

    #[test]
    fn test_disconnect_closes_with_normal_code() {
        let mut machine = opened_machine(3);
        let actions = machine.handle(Event::Disconnect);
        assert_eq!(
            actions[0],
            Action::Close {
                code: NORMAL_CLOSURE,
                reason: "disconnect requested".into()
            }
        );

        let recent = machine.tracker().recent_transitions(2);
        assert_eq!(recent[1].to, ConnectionState::Closing);
        assert_eq!(recent[0].to, ConnectionState::Closed);
    }

    #[test]
    fn test_events_from_discarded_transport_are_ignored() {
        let mut machine = opened_machine(3);
        machine.handle(Event::Disconnect);

        // the old socket reports its close after we already tore it down
        let actions = machine.handle(Event::Closed {
            generation: 1,
            code: ABNORMAL_CLOSURE,
            reason: "late".into(),
        });
        assert!(actions.is_empty());
        assert!(!machine.reconnect_pending());

        machine.handle(Event::Connect(None));
        assert!(machine.handle(Event::Opened { generation: 1 }).is_empty());
        assert_eq!(machine.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_manual_reconnect_waits_for_settle_delay() {
        let mut machine = opened_machine(3);
        abnormal_close(&mut machine);
        machine.handle(Event::RetryElapsed);
        abnormal_close(&mut machine);
        assert_eq!(machine.attempt_count(), 2);

        let actions = machine.handle(Event::Reconnect);
        assert_eq!(
            actions.last(),
            Some(&Action::ScheduleRetry {
                delay: Duration::from_millis(1000)
            })
        );
        assert_eq!(machine.state(), ConnectionState::Closed);
        assert_eq!(machine.attempt_count(), 0);

        let actions = machine.handle(Event::RetryElapsed);
        assert!(matches!(actions.last(), Some(Action::Open { .. })));
        assert_eq!(machine.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_manual_reconnect_recovers_after_exhaustion() {
        let mut machine = opened_machine(1);
        abnormal_close(&mut machine);
        machine.handle(Event::RetryElapsed);
        abnormal_close(&mut machine);
        assert!(machine.last_error().is_some());
        assert!(!machine.reconnect_pending());

        machine.handle(Event::Reconnect);
        machine.handle(Event::RetryElapsed);
        let generation = machine.generation();
        machine.handle(Event::Opened { generation });
        assert_eq!(machine.state(), ConnectionState::Open);
        assert!(machine.last_error().is_none());
    }

    #[test]
    fn test_retarget_applies_to_pending_retry() {
        let mut machine = opened_machine(3);
        abnormal_close(&mut machine);
        assert!(machine.reconnect_pending());

        let next = format!("{}?type_code=cutting", URL);
        assert!(machine.handle(Event::Retarget(next.clone())).is_empty());
        assert!(machine.reconnect_pending());
        assert_eq!(machine.state(), ConnectionState::Closed);

        let actions = machine.handle(Event::RetryElapsed);
        assert_eq!(
            actions.last(),
            Some(&Action::Open {
                generation: machine.generation(),
                url: next
            })
        );
    }

    #[test]
    fn test_retarget_leaves_live_transport_alone() {
        let mut machine = opened_machine(3);
        let generation = machine.generation();
        assert!(machine
            .handle(Event::Retarget(format!("{}?type_code=cutting", URL)))
            .is_empty());
        assert_eq!(machine.state(), ConnectionState::Open);
        assert_eq!(machine.generation(), generation);
        assert_eq!(machine.status().url.as_deref(), Some(URL));
    }

    #[test]
    fn test_disconnect_cancels_manual_reconnect() {
        let mut machine = opened_machine(3);
        machine.handle(Event::Reconnect);
        machine.handle(Event::Disconnect);
        assert!(machine.handle(Event::RetryElapsed).is_empty());
        assert_eq!(machine.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_explicit_connect_cancels_pending_retry() {
        let mut machine = opened_machine(3);
        abnormal_close(&mut machine);
        let actions = machine.handle(Event::Connect(None));
        assert_eq!(actions[0], Action::CancelRetry);
        assert!(!machine.reconnect_pending());
    }

    #[test]
    fn test_transport_error_records_error_and_retries() {
        let mut machine = opened_machine(3);
        let actions = machine.handle(Event::TransportFailed {
            generation: 1,
            error: "broken pipe".into(),
        });

        assert!(actions.contains(&Action::NotifyError(FeedError::Transport(
            "broken pipe".into()
        ))));
        assert_eq!(scheduled(&actions), 1);
        assert_eq!(machine.last_error(), Some("transport error: broken pipe"));
    }

    #[test]
    fn test_redacted_masks_token_only() {
        assert_eq!(
            redacted("ws://h:1/ws?token=secret&page_size=100"),
            "ws://h:1/ws?token=***&page_size=100"
        );
        assert_eq!(redacted("ws://h:1/ws?page_size=100"), "ws://h:1/ws?page_size=100");
        assert_eq!(redacted("not a url"), "not a url");
    }

    #[test]
    fn test_validate_target() {
        assert!(validate_target("wss://example.com/ws").is_ok());
        assert!(validate_target("ws://127.0.0.1:8001/ws?token=a").is_ok());
        assert!(validate_target("https://example.com/ws").is_err());
        assert!(validate_target("").is_err());
    }
}
