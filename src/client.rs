//! The real-time client: one long-lived service object per process.
//!
//! Construct it once (inside a tokio runtime) and pass it by reference to
//! whatever needs channel data or connection state. Every operation returns
//! immediately; results are observed through the status watch channel, the
//! event bus, channel callbacks and the stores.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    auth::{AuthProvider, StaticAuth},
    config::ClientConfig,
    infra::logging::targets,
    store::{spawn_expiry_sweep, NotificationStore, OpportunityStore},
    ws::{
        registry::Removed, ClientEvent, Command, ConnectionSnapshot, ConnectionStatus, Connector,
        Dispatcher, Envelope, Filters, Handler, ListenerId, ListenerSet, ManagerParts,
        SubscriptionRegistry, TungsteniteConnector, WsManager,
    },
};

pub struct RealtimeClient {
    commands: mpsc::UnboundedSender<Command>,
    registry: Arc<SubscriptionRegistry>,
    snapshot: watch::Receiver<ConnectionSnapshot>,
    last_message: watch::Receiver<Option<Arc<Envelope>>>,
    events: Arc<ListenerSet<ClientEvent>>,
    opportunities: OpportunityStore,
    notifications: NotificationStore,
    manager: Option<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("snapshot", &*self.snapshot.borrow())
            .field("channels", &self.registry.channels())
            .finish_non_exhaustive()
    }
}

impl RealtimeClient {
    /// Client over `tokio-tungstenite` using the configured token.
    ///
    /// # Panics
    /// Outside a tokio runtime.
    pub fn new(config: &ClientConfig) -> Self {
        let auth = StaticAuth::from_option(config.auth_token.clone());
        Self::with_parts(config, Arc::new(TungsteniteConnector), Arc::new(auth))
    }

    /// Client with an explicit transport and credential source.
    ///
    /// # Panics
    /// Outside a tokio runtime.
    pub fn with_parts(
        config: &ClientConfig,
        connector: Arc<dyn Connector>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let events = Arc::new(ListenerSet::new());
        let opportunities = OpportunityStore::new(&config.store);
        let notifications = NotificationStore::from_config(&config.store);

        let dispatcher = Dispatcher::new(Arc::clone(&registry))
            .with_state_sync(Arc::new(opportunities.clone()))
            .with_state_sync(Arc::new(notifications.clone()));

        let (manager, handles) = WsManager::new(ManagerParts {
            url: config.url.clone(),
            heartbeat: config.heartbeat.clone(),
            reconnection: config.reconnection.clone(),
            connector,
            auth,
            registry: Arc::clone(&registry),
            dispatcher,
            events: Arc::clone(&events),
        });
        let manager = tokio::spawn(manager.run());
        let sweeper = spawn_expiry_sweep(
            opportunities.clone(),
            Duration::from_millis(config.store.sweep_interval_ms),
        );

        Self {
            commands: handles.commands,
            registry,
            snapshot: handles.snapshot,
            last_message: handles.last_message,
            events,
            opportunities,
            notifications,
            manager: Some(manager),
            sweeper: Some(sweeper),
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!(target: targets::WS, "Connection manager has stopped; command dropped");
        }
    }

    /// Open the connection. No-op when already open or in progress.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Close the connection; no automatic reconnect follows.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Drop the current connection and connect again immediately, resetting
    /// the attempt counter.
    pub fn reconnect(&self) {
        self.command(Command::Reconnect);
    }

    /// Serialize and send a message. Dropped with a warning unless connected;
    /// nothing is queued.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) {
        match serde_json::to_string(message) {
            Ok(text) => self.command(Command::Send(text)),
            Err(err) => warn!(target: targets::WS, "Failed to serialize outbound message: {err}"),
        }
    }

    /// Present a credential on the open connection.
    pub fn authenticate(&self, token: impl Into<String>) {
        self.command(Command::Authenticate(token.into()));
    }

    /// Register a callback for a channel.
    ///
    /// Non-empty `filters` replace the filters stored for the channel. A
    /// subscribe request goes out immediately when connected and on every
    /// later (re)connect while the channel has callbacks.
    pub fn subscribe<F>(&self, channel: &str, filters: Filters, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let handler: Handler<Envelope> = Arc::new(callback);
        let added = self.registry.add(channel, filters, handler);
        debug!(
            target: targets::WS,
            channel,
            new_channel = added.new_channel,
            "Callback registered"
        );
        self.command(Command::Subscribe(channel.to_string()));
        SubscriptionHandle {
            channel: channel.to_string(),
            id: added.id,
            registry: Arc::clone(&self.registry),
            commands: self.commands.clone(),
        }
    }

    /// Like [`subscribe`](Self::subscribe), delivering into a channel.
    pub fn subscribe_stream(
        &self,
        channel: &str,
        filters: Filters,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<Arc<Envelope>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.subscribe(channel, filters, move |envelope: &Envelope| {
            let _ = tx.send(Arc::new(envelope.clone()));
        });
        (handle, rx)
    }

    pub fn is_connected(&self) -> bool {
        self.snapshot.borrow().is_connected()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.snapshot.borrow().status
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that changes on every connection state update.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.snapshot.clone()
    }

    /// Most recent inbound envelope other than heartbeat replies.
    pub fn last_message(&self) -> Option<Arc<Envelope>> {
        self.last_message.borrow().clone()
    }

    pub fn watch_last_message(&self) -> watch::Receiver<Option<Arc<Envelope>>> {
        self.last_message.clone()
    }

    pub fn on_event<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.events.on(handler)
    }

    pub fn off_event(&self, id: ListenerId) -> bool {
        self.events.off(id)
    }

    /// Network reachability signal. Going offline drops the connection
    /// without waiting for a socket error; coming back online reconnects
    /// immediately even after exhausted attempts.
    pub fn set_network_online(&self, online: bool) {
        self.command(Command::NetworkOnline(online));
    }

    /// Foreground/background signal. The heartbeat pauses while hidden.
    pub fn set_visibility(&self, visible: bool) {
        self.command(Command::Visibility(visible));
    }

    /// Channels with at least one callback, sorted.
    pub fn subscribed_channels(&self) -> Vec<String> {
        self.registry.channels()
    }

    pub fn opportunities(&self) -> &OpportunityStore {
        &self.opportunities
    }

    pub fn notifications(&self) -> &NotificationStore {
        &self.notifications
    }

    /// Close the connection and wait for the background tasks to stop.
    pub async fn shutdown(mut self) {
        self.command(Command::Shutdown);
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
        if let Some(manager) = self.manager.take() {
            if let Err(err) = manager.await {
                warn!(target: targets::WS, "Connection manager task failed: {err}");
            }
        }
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        if self.manager.is_some() {
            let _ = self.commands.send(Command::Shutdown);
        }
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

/// Registration of one callback on one channel.
///
/// Dropping the handle leaves the callback registered; call
/// [`unsubscribe`](Self::unsubscribe) to stop delivery.
#[must_use = "the callback stays registered until unsubscribe() is called"]
#[derive(Debug)]
pub struct SubscriptionHandle {
    channel: String,
    id: ListenerId,
    registry: Arc<SubscriptionRegistry>,
    commands: mpsc::UnboundedSender<Command>,
}

impl SubscriptionHandle {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the callback. Takes effect for the next dispatched envelope.
    /// When it was the channel's last callback an unsubscribe request is
    /// sent if connected.
    pub fn unsubscribe(self) {
        match self.registry.remove(&self.channel, self.id) {
            Removed::ChannelEmpty => {
                debug!(target: targets::WS, channel = %self.channel, "Last callback removed");
                let _ = self.commands.send(Command::Unsubscribe(self.channel));
            }
            Removed::Remaining(left) => {
                debug!(target: targets::WS, channel = %self.channel, left, "Callback removed");
            }
            Removed::NotFound => {}
        }
    }
}
