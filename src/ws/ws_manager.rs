//! Connection manager.
//!
//! One task owns the socket, the heartbeat timer and the reconnect timer and
//! multiplexes them with incoming commands in a single `select!` loop. The
//! client facade only ever talks to it through [`Command`]s, and observes it
//! through the [`ConnectionSnapshot`] watch channel and the event bus.

use std::{fmt, future::Future, pin::Pin, sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, watch},
    time::{self, Instant, Sleep},
};
use tracing::{debug, info, trace, warn};

use crate::{
    auth::AuthProvider,
    helpers::{build_endpoint_url, now_ms},
    infra::{logging::targets, ReconnectionConfig, ReconnectionPolicy},
    prelude::*,
    ws::{
        dispatcher::{Dispatch, Dispatcher},
        heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatMonitor},
        listeners::ListenerSet,
        message_types::{ControlMessage, Envelope, MessageType},
        registry::SubscriptionRegistry,
        transport::{Connector, Frame, Transport},
    },
    WsError,
};

/// Upper bound on the close handshake of an intentional disconnect.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Backend's verdict on the presented credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum AuthState {
    /// No verdict on the current connection yet
    #[default]
    Unknown,
    Authenticated,
    Failed { reason: String },
}

/// Observable state of the connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub status: ConnectionStatus,
    /// Epoch milliseconds of the last successful open; cleared on close
    pub connected_at: Option<i64>,
    /// Automatic attempts since the last successful open
    pub reconnect_attempts: u32,
    /// Most recent failure; cleared on successful open
    pub last_error: Option<String>,
    pub auth: AuthState,
    /// Heartbeat round-trip EWMA in milliseconds
    pub latency_ms: Option<f64>,
}

impl ConnectionSnapshot {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Client lifecycle events.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    StatusChanged {
        from: ConnectionStatus,
        to: ConnectionStatus,
    },
    Authenticated,
    AuthenticationFailed {
        reason: String,
    },
    /// Backend acknowledged a subscribe request.
    Subscribed {
        channel: String,
    },
    /// Backend acknowledged an unsubscribe request.
    Unsubscribed {
        channel: String,
    },
    /// Backend reported an error.
    ServerError {
        message: String,
    },
    /// No automatic attempts remain; waiting for `reconnect()` or the
    /// network coming back.
    ReconnectExhausted {
        attempts: u32,
    },
}

#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Disconnect,
    Reconnect,
    Send(String),
    /// Send a subscribe for the channel if it is still registered.
    Subscribe(String),
    /// Send an unsubscribe for the channel if it is no longer registered.
    Unsubscribe(String),
    Authenticate(String),
    NetworkOnline(bool),
    Visibility(bool),
    Shutdown,
}

/// Everything the manager needs besides its command queue.
pub(crate) struct ManagerParts {
    pub(crate) url: String,
    pub(crate) heartbeat: HeartbeatConfig,
    pub(crate) reconnection: ReconnectionConfig,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) auth: Arc<dyn AuthProvider>,
    pub(crate) registry: Arc<SubscriptionRegistry>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) events: Arc<ListenerSet<ClientEvent>>,
}

/// Receivers the facade keeps.
pub(crate) struct ManagerHandles {
    pub(crate) commands: mpsc::UnboundedSender<Command>,
    pub(crate) snapshot: watch::Receiver<ConnectionSnapshot>,
    pub(crate) last_message: watch::Receiver<Option<Arc<Envelope>>>,
}

type PendingConnect = Pin<Box<dyn Future<Output = Result<Transport>> + Send>>;

enum Wake {
    Command(Option<Command>),
    Frame(Option<std::result::Result<Frame, WsError>>),
    Opened(Result<Transport>),
    Heartbeat,
    Retry,
}

pub(crate) struct WsManager {
    url: String,
    connector: Arc<dyn Connector>,
    auth: Arc<dyn AuthProvider>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Dispatcher,
    events: Arc<ListenerSet<ClientEvent>>,
    heartbeat: HeartbeatMonitor,
    policy: ReconnectionPolicy,
    /// Present only while connected
    socket: Option<Transport>,
    /// In-flight connect attempt
    pending: Option<PendingConnect>,
    /// Scheduled automatic attempt
    retry: Option<Pin<Box<Sleep>>>,
    visible: bool,
    commands: mpsc::UnboundedReceiver<Command>,
    snapshot: watch::Sender<ConnectionSnapshot>,
    last_message: watch::Sender<Option<Arc<Envelope>>>,
}

async fn next_frame(
    socket: &mut Option<Transport>,
) -> Option<std::result::Result<Frame, WsError>> {
    match socket {
        Some(transport) => transport.stream.next().await,
        None => std::future::pending().await,
    }
}

async fn connect_result(pending: &mut Option<PendingConnect>) -> Result<Transport> {
    match pending {
        Some(fut) => fut.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn retry_due(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

impl WsManager {
    pub(crate) fn new(parts: ManagerParts) -> (Self, ManagerHandles) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(ConnectionSnapshot::default());
        let (last_tx, last_rx) = watch::channel(None);

        let manager = Self {
            url: parts.url,
            connector: parts.connector,
            auth: parts.auth,
            registry: parts.registry,
            dispatcher: parts.dispatcher,
            events: parts.events,
            heartbeat: HeartbeatMonitor::new(parts.heartbeat),
            policy: ReconnectionPolicy::new(parts.reconnection),
            socket: None,
            pending: None,
            retry: None,
            visible: true,
            commands: command_rx,
            snapshot: snapshot_tx,
            last_message: last_tx,
        };
        let handles = ManagerHandles {
            commands: command_tx,
            snapshot: snapshot_rx,
            last_message: last_rx,
        };
        (manager, handles)
    }

    pub(crate) async fn run(mut self) {
        debug!(target: targets::WS, url = %self.url, "Connection manager started");
        loop {
            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                frame = next_frame(&mut self.socket) => Wake::Frame(frame),
                result = connect_result(&mut self.pending) => Wake::Opened(result),
                _ = self.heartbeat.tick() => Wake::Heartbeat,
                _ = retry_due(&mut self.retry) => Wake::Retry,
            };

            match wake {
                Wake::Command(None) | Wake::Command(Some(Command::Shutdown)) => break,
                Wake::Command(Some(command)) => self.handle_command(command).await,
                Wake::Frame(frame) => self.handle_frame(frame),
                Wake::Opened(result) => {
                    self.pending = None;
                    match result {
                        Ok(transport) => self.on_open(transport).await,
                        Err(err) => self.on_unexpected_close(format!("connect failed: {err}")),
                    }
                }
                Wake::Heartbeat => self.on_heartbeat().await,
                Wake::Retry => {
                    self.retry = None;
                    self.begin_connect();
                }
            }
        }

        self.disconnect().await;
        debug!(target: targets::WS, "Connection manager stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.begin_connect(),
            Command::Disconnect => {
                info!(target: targets::WS, "Disconnect requested");
                self.disconnect().await;
            }
            Command::Reconnect => {
                info!(target: targets::WS, "Manual reconnect requested");
                self.disconnect().await;
                self.begin_connect();
            }
            Command::Send(text) => {
                if self.socket.is_none() {
                    warn!(target: targets::WS, "Not connected; dropping outbound message");
                    return;
                }
                self.write(text).await;
            }
            Command::Subscribe(channel) => {
                if self.socket.is_none() {
                    return;
                }
                // Filters are read at send time; the channel may already be gone
                if let Some(filters) = self.registry.filters(&channel) {
                    debug!(target: targets::WS, channel = %channel, "Subscribing");
                    self.send_control(&ControlMessage::subscribe(&channel, &filters))
                        .await;
                }
            }
            Command::Unsubscribe(channel) => {
                if self.socket.is_none() || self.registry.contains(&channel) {
                    return;
                }
                debug!(target: targets::WS, channel = %channel, "Unsubscribing");
                self.send_control(&ControlMessage::Unsubscribe { channel })
                    .await;
            }
            Command::Authenticate(token) => {
                if self.socket.is_none() {
                    warn!(target: targets::WS, "Not connected; authenticate dropped");
                    return;
                }
                self.send_control(&ControlMessage::Authenticate { token })
                    .await;
            }
            Command::NetworkOnline(true) => {
                if self.socket.is_none() && self.pending.is_none() {
                    info!(target: targets::RECONNECT, "Network online; reconnecting");
                    self.retry = None;
                    self.policy.reset();
                    self.begin_connect();
                }
            }
            Command::NetworkOnline(false) => self.go_offline(),
            Command::Visibility(visible) => {
                self.visible = visible;
                if !visible {
                    self.heartbeat.stop();
                } else if self.socket.is_some() && !self.heartbeat.is_running() {
                    self.heartbeat.start();
                }
            }
            Command::Shutdown => {}
        }
    }

    /// Publish a status transition plus any field changes.
    fn update(&self, status: ConnectionStatus, apply: impl FnOnce(&mut ConnectionSnapshot)) {
        let mut previous = status;
        self.snapshot.send_modify(|snapshot| {
            previous = snapshot.status;
            snapshot.status = status;
            apply(snapshot);
        });
        if previous != status {
            debug!(target: targets::WS, from = %previous, to = %status, "Connection status changed");
            self.events.emit(&ClientEvent::StatusChanged {
                from: previous,
                to: status,
            });
        }
    }

    fn status(&self) -> ConnectionStatus {
        self.snapshot.borrow().status
    }

    fn begin_connect(&mut self) {
        if self.socket.is_some() || self.pending.is_some() {
            debug!(target: targets::WS, "Connect ignored; already open or in progress");
            return;
        }
        self.retry = None;

        let token = if self.auth.is_authenticated() {
            self.auth.token()
        } else {
            None
        };
        let url = match build_endpoint_url(&self.url, token.as_deref()) {
            Ok(url) => url,
            Err(err) => {
                // Retrying cannot fix a bad endpoint
                warn!(target: targets::WS, "Cannot connect: {err}");
                self.update(ConnectionStatus::Error, |s| {
                    s.last_error = Some(err.to_string());
                });
                return;
            }
        };

        let attempts = self.policy.attempts();
        info!(
            target: targets::WS,
            url = %self.url,
            attempt = attempts,
            with_token = token.is_some(),
            "Connecting"
        );
        self.update(ConnectionStatus::Connecting, |s| {
            s.reconnect_attempts = attempts;
        });

        let connector = Arc::clone(&self.connector);
        self.pending = Some(Box::pin(async move { connector.connect(&url).await }));
    }

    async fn on_open(&mut self, transport: Transport) {
        self.socket = Some(transport);
        self.policy.reset();
        let connected_at = now_ms();
        self.update(ConnectionStatus::Connected, |s| {
            s.connected_at = Some(connected_at);
            s.reconnect_attempts = 0;
            s.last_error = None;
            s.auth = AuthState::Unknown;
        });
        info!(target: targets::WS, url = %self.url, "Connected");

        self.heartbeat.stop();
        if self.visible {
            self.heartbeat.start();
        }

        let entries = self.registry.entries();
        let count = entries.len();
        for (channel, filters) in entries {
            if !self
                .send_control(&ControlMessage::subscribe(&channel, &filters))
                .await
            {
                return;
            }
        }
        if count > 0 {
            info!(target: targets::WS, channels = count, "Replayed subscriptions");
        }
    }

    /// Anything other than a requested disconnect ends up here.
    fn on_unexpected_close(&mut self, reason: String) {
        self.socket = None;
        self.heartbeat.stop();
        warn!(target: targets::WS, reason = %reason, "Connection lost");
        self.update(ConnectionStatus::Error, |s| {
            s.connected_at = None;
            s.last_error = Some(reason);
        });
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        match self.policy.next_attempt() {
            Some(delay) => {
                let attempt = self.policy.attempts();
                info!(
                    target: targets::RECONNECT,
                    attempt,
                    max_attempts = self.policy.config().max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect"
                );
                self.retry = Some(Box::pin(time::sleep(delay)));
                self.update(ConnectionStatus::Reconnecting, |s| {
                    s.reconnect_attempts = attempt;
                });
            }
            None => {
                let attempts = self.policy.attempts();
                warn!(
                    target: targets::RECONNECT,
                    attempts,
                    "Reconnection attempts exhausted; waiting for manual reconnect"
                );
                self.events
                    .emit(&ClientEvent::ReconnectExhausted { attempts });
            }
        }
    }

    /// Intentional close: no automatic retry follows.
    async fn disconnect(&mut self) {
        self.retry = None;
        self.pending = None;
        self.policy.reset();
        self.heartbeat.stop();
        if let Some(mut transport) = self.socket.take() {
            match time::timeout(CLOSE_TIMEOUT, transport.sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(target: targets::WS, "Close handshake failed: {err}"),
                Err(_) => debug!(target: targets::WS, "Close handshake timed out"),
            }
        }
        self.update(ConnectionStatus::Disconnected, |s| {
            s.connected_at = None;
            s.reconnect_attempts = 0;
        });
    }

    fn go_offline(&mut self) {
        self.retry = None;
        self.pending = None;
        self.heartbeat.stop();
        self.socket = None;
        if self.status() != ConnectionStatus::Disconnected {
            warn!(target: targets::WS, "Network offline");
        }
        self.update(ConnectionStatus::Disconnected, |s| {
            s.connected_at = None;
            s.last_error = Some("network offline".to_string());
        });
    }

    /// Write one text frame. A failed write is treated as a lost connection.
    async fn write(&mut self, text: String) -> bool {
        let Some(transport) = self.socket.as_mut() else {
            return false;
        };
        let result = transport.sink.send(Frame::Text(text)).await;
        match result {
            Ok(()) => true,
            Err(err) => {
                self.on_unexpected_close(format!("send failed: {err}"));
                false
            }
        }
    }

    async fn send_control(&mut self, message: &ControlMessage) -> bool {
        match message.to_json() {
            Ok(text) => self.write(text).await,
            Err(err) => {
                warn!(target: targets::WS, "Failed to encode control message: {err}");
                false
            }
        }
    }

    fn handle_frame(&mut self, frame: Option<std::result::Result<Frame, WsError>>) {
        match frame {
            Some(Ok(Frame::Text(text))) => self.handle_text(&text),
            Some(Ok(Frame::Pong(_))) => self.record_pong(),
            Some(Ok(Frame::Ping(_))) => trace!(target: targets::HEARTBEAT, "Transport ping"),
            Some(Ok(Frame::Close(reason))) => {
                let reason = match reason {
                    Some(r) => format!("closed by server: {r}"),
                    None => "closed by server".to_string(),
                };
                self.on_unexpected_close(reason);
            }
            Some(Err(err)) => self.on_unexpected_close(err.to_string()),
            None => self.on_unexpected_close("connection closed".to_string()),
        }
    }

    fn handle_text(&mut self, text: &str) {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(target: targets::WS, len = text.len(), "Dropping malformed envelope: {err}");
                return;
            }
        };

        if envelope.kind == MessageType::Pong {
            self.record_pong();
            return;
        }

        let envelope = Arc::new(envelope);
        self.last_message.send_replace(Some(Arc::clone(&envelope)));
        if self.dispatcher.dispatch(&envelope) == Dispatch::Control {
            self.handle_control(&envelope);
        }
    }

    fn record_pong(&mut self) {
        self.heartbeat.record_pong(Instant::now());
        let latency = self.heartbeat.latency_ms();
        self.snapshot.send_if_modified(|s| {
            let changed = s.latency_ms != latency;
            s.latency_ms = latency;
            changed
        });
    }

    fn handle_control(&mut self, envelope: &Envelope) {
        match &envelope.kind {
            MessageType::Authenticated => {
                info!(target: targets::WS, "Authenticated");
                self.snapshot
                    .send_modify(|s| s.auth = AuthState::Authenticated);
                self.events.emit(&ClientEvent::Authenticated);
            }
            MessageType::AuthenticationFailed => {
                let reason = envelope
                    .data_str("message")
                    .or_else(|| envelope.data_str("reason"))
                    .unwrap_or("authentication failed")
                    .to_string();
                warn!(target: targets::WS, reason = %reason, "Authentication failed");
                let state = AuthState::Failed {
                    reason: reason.clone(),
                };
                self.snapshot.send_modify(|s| s.auth = state);
                self.events
                    .emit(&ClientEvent::AuthenticationFailed { reason });
            }
            MessageType::Subscribed | MessageType::Unsubscribed => {
                let channel = envelope
                    .channel
                    .as_deref()
                    .or_else(|| envelope.data_str("channel"))
                    .unwrap_or_default()
                    .to_string();
                debug!(target: targets::WS, kind = %envelope.kind, channel = %channel, "Acknowledged");
                let event = if envelope.kind == MessageType::Subscribed {
                    ClientEvent::Subscribed { channel }
                } else {
                    ClientEvent::Unsubscribed { channel }
                };
                self.events.emit(&event);
            }
            MessageType::Error => {
                let message = envelope
                    .data_str("message")
                    .map(str::to_string)
                    .or_else(|| envelope.data.as_str().map(str::to_string))
                    .unwrap_or_else(|| envelope.data.to_string());
                warn!(target: targets::WS, message = %message, "Server error");
                self.events.emit(&ClientEvent::ServerError { message });
            }
            _ => {}
        }
    }

    async fn on_heartbeat(&mut self) {
        if self.socket.is_none() {
            self.heartbeat.stop();
            return;
        }
        match self.heartbeat.on_tick(Instant::now()) {
            HeartbeatAction::Probe => {
                trace!(target: targets::HEARTBEAT, missed = self.heartbeat.missed(), "Sending ping");
                self.send_control(&ControlMessage::Ping).await;
            }
            HeartbeatAction::Expired { missed } => {
                self.on_unexpected_close(format!("no heartbeat reply after {missed} probes"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{SharedToken, StaticAuth},
        config::ClientConfig,
        ws::{message_types::Filters, transport::mock::MockConnector},
        RealtimeClient,
    };
    use serde_json::json;
    use std::sync::Mutex;

    fn test_config() -> ClientConfig {
        let mut config = ClientConfig::new("ws://mock.test/ws");
        config.reconnection.interval_ms = 1_000;
        config.reconnection.max_attempts = 3;
        config.heartbeat.interval_ms = 10_000;
        config.heartbeat.max_missed_pongs = 3;
        config
    }

    fn client_with(connector: &MockConnector, auth: Arc<dyn AuthProvider>) -> RealtimeClient {
        RealtimeClient::with_parts(&test_config(), Arc::new(connector.clone()), auth)
    }

    fn client(connector: &MockConnector) -> RealtimeClient {
        client_with(connector, Arc::new(StaticAuth::anonymous()))
    }

    async fn settle() {
        time::sleep(Duration::from_millis(1)).await;
    }

    fn record_events(client: &RealtimeClient) -> Arc<Mutex<Vec<ClientEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client.on_event(move |event| sink.lock().unwrap().push(event.clone()));
        seen
    }

    fn statuses(events: &Mutex<Vec<ClientEvent>>) -> Vec<ConnectionStatus> {
        events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ClientEvent::StatusChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }

    fn pings(frames: &[serde_json::Value]) -> usize {
        frames.iter().filter(|f| f["action"] == "ping").count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_start() {
        let connector = MockConnector::new();
        let client = client(&connector);
        let events = record_events(&client);
        assert_eq!(client.status(), ConnectionStatus::Disconnected);

        client.connect();
        settle().await;

        assert_eq!(
            statuses(&events),
            vec![ConnectionStatus::Connecting, ConnectionStatus::Connected]
        );
        let snapshot = client.snapshot();
        assert!(snapshot.is_connected());
        assert_eq!(snapshot.reconnect_attempts, 0);
        assert!(snapshot.connected_at.is_some());
        assert!(snapshot.last_error.is_none());
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_noop_when_open_or_in_progress() {
        let connector = MockConnector::new();
        let client = client(&connector);
        client.connect();
        client.connect();
        settle().await;
        client.connect();
        settle().await;

        assert_eq!(connector.attempts(), 1);
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_and_heal() {
        let connector = MockConnector::new();
        let client = client(&connector);
        let events = record_events(&client);
        let _h = client.subscribe("opportunities", Filters::new(), |_| {});

        client.connect();
        settle().await;
        let mut first = connector.take_server().unwrap();
        first.drain_text();

        first.drop_connection();
        settle().await;
        let snapshot = client.snapshot();
        assert_eq!(snapshot.status, ConnectionStatus::Reconnecting);
        assert_eq!(snapshot.reconnect_attempts, 1);
        assert!(snapshot.connected_at.is_none());
        assert!(snapshot.last_error.is_some());

        time::sleep(Duration::from_millis(1_000)).await;
        let snapshot = client.snapshot();
        assert_eq!(snapshot.status, ConnectionStatus::Connected);
        assert_eq!(snapshot.reconnect_attempts, 0);
        assert!(snapshot.last_error.is_none());

        let mut second = connector.take_server().unwrap();
        assert_eq!(
            second.drain_json(),
            vec![json!({"action": "subscribe", "channel": "opportunities"})]
        );
        assert_eq!(
            statuses(&events),
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
                ConnectionStatus::Error,
                ConnectionStatus::Reconnecting,
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_close_is_unexpected() {
        let connector = MockConnector::new();
        let client = client(&connector);
        client.connect();
        settle().await;
        let server = connector.take_server().unwrap();

        server.push(Frame::Close(Some("1001 going away".to_string())));
        settle().await;
        assert_eq!(client.status(), ConnectionStatus::Reconnecting);
        assert!(client
            .snapshot()
            .last_error
            .unwrap()
            .contains("going away"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnection_bound() {
        let connector = MockConnector::new();
        connector.fail_all(true);
        let client = client(&connector);
        let events = record_events(&client);

        client.connect();
        time::sleep(Duration::from_secs(10)).await;

        // Initial attempt plus three automatic retries
        assert_eq!(connector.attempts(), 4);
        let snapshot = client.snapshot();
        assert_eq!(snapshot.status, ConnectionStatus::Error);
        assert_eq!(snapshot.reconnect_attempts, 3);
        assert!(snapshot.last_error.unwrap().contains("connection refused"));
        assert!(events
            .lock()
            .unwrap()
            .contains(&ClientEvent::ReconnectExhausted { attempts: 3 }));

        time::sleep(Duration::from_secs(300)).await;
        assert_eq!(connector.attempts(), 4);

        connector.fail_all(false);
        client.reconnect();
        settle().await;
        assert_eq!(connector.attempts(), 5);
        assert!(client.is_connected());
        assert_eq!(client.snapshot().reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_connect_failures_recover() {
        let connector = MockConnector::new();
        connector.fail_next(2);
        let client = client(&connector);

        client.connect();
        settle().await;
        assert_eq!(client.status(), ConnectionStatus::Reconnecting);

        time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(connector.attempts(), 3);
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_suppresses_reconnect() {
        let connector = MockConnector::new();
        let client = client(&connector);
        client.connect();
        settle().await;

        client.disconnect();
        settle().await;
        let snapshot = client.snapshot();
        assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
        assert!(snapshot.connected_at.is_none());
        assert_eq!(snapshot.reconnect_attempts, 0);

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_scheduled_retry() {
        let connector = MockConnector::new();
        connector.fail_all(true);
        let client = client(&connector);
        client.connect();
        settle().await;
        assert_eq!(client.status(), ConnectionStatus::Reconnecting);

        client.disconnect();
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_offline_and_online() {
        let connector = MockConnector::new();
        let client = client(&connector);
        client.connect();
        settle().await;

        client.set_network_online(false);
        settle().await;
        let snapshot = client.snapshot();
        assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
        assert_eq!(snapshot.last_error.as_deref(), Some("network offline"));

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 1);

        client.set_network_online(true);
        settle().await;
        assert_eq!(connector.attempts(), 2);
        assert!(client.is_connected());

        // Online while connected does nothing
        client.set_network_online(true);
        settle().await;
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_online_retries_after_exhaustion() {
        let connector = MockConnector::new();
        connector.fail_all(true);
        let client = client(&connector);
        client.connect();
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.attempts(), 4);

        connector.fail_all(false);
        client.set_network_online(true);
        settle().await;
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_probes_and_latency() {
        let connector = MockConnector::new();
        let client = client(&connector);
        client.connect();
        settle().await;
        let mut server = connector.take_server().unwrap();

        for _ in 0..5 {
            time::sleep(Duration::from_secs(10)).await;
            assert_eq!(pings(&server.drain_json()), 1);
            server.push_text(r#"{"type":"pong"}"#);
            settle().await;
        }

        let snapshot = client.snapshot();
        assert!(snapshot.is_connected());
        assert!(snapshot.latency_ms.is_some());
        assert_eq!(connector.attempts(), 1);
        // Replies never surface as the last message
        assert!(client.last_message().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_heartbeats_force_reconnect() {
        let connector = MockConnector::new();
        let client = client(&connector);
        client.connect();
        settle().await;
        let mut server = connector.take_server().unwrap();

        time::sleep(Duration::from_secs(35)).await;
        assert_eq!(pings(&server.drain_json()), 3);
        assert!(client.is_connected());

        // Fourth tick finds three unanswered probes
        time::sleep(Duration::from_secs(7)).await;
        assert_eq!(connector.attempts(), 2);
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_page_pauses_heartbeat() {
        let connector = MockConnector::new();
        let client = client(&connector);
        client.connect();
        settle().await;
        let mut server = connector.take_server().unwrap();

        client.set_visibility(false);
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(pings(&server.drain_json()), 0);
        assert!(client.is_connected());

        client.set_visibility(true);
        time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(pings(&server.drain_json()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_in_connect_url() {
        let connector = MockConnector::new();
        let auth = SharedToken::new();
        auth.set("first");
        let client = client_with(&connector, Arc::new(auth.clone()));

        client.connect();
        settle().await;
        let first = connector.take_server().unwrap();
        assert_eq!(first.url, "ws://mock.test/ws?token=first");

        // Credential is re-read on every attempt
        auth.set("second");
        client.reconnect();
        settle().await;
        let second = connector.take_server().unwrap();
        assert_eq!(second.url, "ws://mock.test/ws?token=second");

        auth.clear();
        client.reconnect();
        settle().await;
        assert_eq!(connector.take_server().unwrap().url, "ws://mock.test/ws");
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_is_dropped() {
        let connector = MockConnector::new();
        let client = client(&connector);
        client.connect();
        settle().await;
        let server = connector.take_server().unwrap();

        server.push_text("{not json");
        server.push_text(r#"{"channel":"missing-type"}"#);
        server.push_text(r#"{"type":"market_update","channel":"m","data":{}}"#);
        settle().await;

        assert!(client.is_connected());
        assert_eq!(client.last_message().unwrap().routing_channel(), "m");
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_messages() {
        let connector = MockConnector::new();
        let client = client(&connector);
        let events = record_events(&client);
        client.connect();
        settle().await;
        let server = connector.take_server().unwrap();

        server.push_text(r#"{"type":"authenticated"}"#);
        settle().await;
        assert_eq!(client.snapshot().auth, AuthState::Authenticated);

        server.push_text(r#"{"type":"authentication_failed","data":{"message":"expired token"}}"#);
        server.push_text(r#"{"type":"subscribed","channel":"opportunities"}"#);
        server.push_text(r#"{"type":"error","data":{"message":"rate limited"}}"#);
        settle().await;

        // Authentication failure does not close the socket
        assert!(client.is_connected());
        assert_eq!(
            client.snapshot().auth,
            AuthState::Failed {
                reason: "expired token".to_string()
            }
        );
        let events = events.lock().unwrap();
        assert!(events.contains(&ClientEvent::Authenticated));
        assert!(events.contains(&ClientEvent::AuthenticationFailed {
            reason: "expired token".to_string()
        }));
        assert!(events.contains(&ClientEvent::Subscribed {
            channel: "opportunities".to_string()
        }));
        assert!(events.contains(&ClientEvent::ServerError {
            message: "rate limited".to_string()
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_endpoint_is_not_retried() {
        let connector = MockConnector::new();
        let mut config = test_config();
        config.url = "http://mock.test/ws".to_string();
        let client = RealtimeClient::with_parts(
            &config,
            Arc::new(connector.clone()),
            Arc::new(StaticAuth::anonymous()),
        );

        client.connect();
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.attempts(), 0);
        assert_eq!(client.status(), ConnectionStatus::Error);
    }

    #[test]
    fn test_status_serde() {
        assert_eq!(
            serde_json::to_value(ConnectionStatus::Reconnecting).unwrap(),
            json!("reconnecting")
        );
        assert_eq!(ConnectionStatus::default(), ConnectionStatus::Disconnected);
        assert_eq!(ConnectionStatus::Error.to_string(), "error");
    }
}
