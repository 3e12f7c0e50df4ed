use crate::credentials::Credentials;
use crate::error::{ConnectError, SubscriptionError};
use crate::handler::SubscriptionSpec;
use crate::mux::{Dispatch, Multiplexer, SubscriptionKey};
use crate::reconnect::{BackoffPolicy, ReconnectController, ReconnectDecision};
use crate::transport::{
    Connector, Transport, TransportError, TransportMessage, TransportSink, TransportStream,
};
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use gridcast_core::protocol::{
    decode_frame, encode_frame, ClientFrame, ServerFrame, StartPayload, DEFAULT_MAX_FRAME_BYTES,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_KEEPALIVE_TIMEOUT_MS: u64 = 300_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealtimeOptions {
    pub handshake_timeout: Duration,
    /// Silence allowed before the connection counts as dropped. A
    /// `connectionTimeoutMs` announced in the ack takes precedence.
    pub keepalive_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub max_frame_bytes: usize,
}

impl Default for RealtimeOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            keepalive_timeout: Duration::from_millis(DEFAULT_KEEPALIVE_TIMEOUT_MS),
            backoff: BackoffPolicy::default(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub reconnect_attempt: u32,
    pub last_error: Option<String>,
    /// Reconnection stopped; only a new `connect` revives the session.
    pub gave_up: bool,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_attempt: 0,
            last_error: None,
            gave_up: false,
        }
    }
}

impl ConnectionStatus {
    pub fn is_live(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Whether data shown from this connection may be out of date.
    pub fn is_stale(&self) -> bool {
        !self.is_live()
    }
}

enum Command {
    Connect {
        credentials: Credentials,
        reply: oneshot::Sender<Result<(), ConnectError>>,
    },
    Subscribe {
        key: SubscriptionKey,
        spec: SubscriptionSpec,
    },
    Unsubscribe {
        key: SubscriptionKey,
        reply: oneshot::Sender<bool>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle onto a realtime connection task. Clones share the same connection.
#[derive(Clone)]
pub struct RealtimeClient {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    next_key: Arc<AtomicU64>,
}

impl RealtimeClient {
    pub fn spawn<C: Connector>(connector: C, options: RealtimeOptions) -> (Self, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let driver = Driver::new(connector, options, commands_rx, status_tx);
        let task = tokio::spawn(driver.run());
        (
            Self {
                commands: commands_tx,
                status: status_rx,
                next_key: Arc::new(AtomicU64::new(1)),
            },
            task,
        )
    }

    /// Resolves once the handshake is acknowledged. Concurrent calls with the
    /// same credentials share one connection attempt.
    pub async fn connect(&self, credentials: Credentials) -> Result<(), ConnectError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect { credentials, reply })
            .map_err(|_| ConnectError::ClientClosed)?;
        rx.await.map_err(|_| ConnectError::ClientClosed)?
    }

    /// Register a subscription. It is started as soon as the connection is
    /// live and restarted after every reconnect.
    pub fn add_subscription(&self, spec: SubscriptionSpec) -> SubscriptionKey {
        let key = SubscriptionKey(self.next_key.fetch_add(1, Ordering::SeqCst));
        if self.commands.send(Command::Subscribe { key, spec }).is_err() {
            warn!(%key, "realtime_subscribe_dropped: client closed");
        }
        key
    }

    /// Returns false when the key was unknown or already removed.
    pub async fn remove_subscription(&self, key: SubscriptionKey) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Unsubscribe { key, reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Disconnect and stop the connection task.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub async fn wait_for_state(
        &self,
        state: ConnectionState,
    ) -> Result<ConnectionStatus, ConnectError> {
        let mut rx = self.status.clone();
        let status = rx
            .wait_for(|status| status.state == state)
            .await
            .map_err(|_| ConnectError::ClientClosed)?;
        Ok(status.clone())
    }
}

type OpenFuture = BoxFuture<'static, Result<Transport, TransportError>>;

struct Driver<C> {
    connector: C,
    options: RealtimeOptions,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<ConnectionStatus>,
    credentials: Option<Credentials>,
    waiters: Vec<oneshot::Sender<Result<(), ConnectError>>>,
    registry: BTreeMap<SubscriptionKey, SubscriptionSpec>,
    mux: Multiplexer,
    reconnect: ReconnectController,
    opening: Option<OpenFuture>,
    sink: Option<TransportSink>,
    stream: Option<TransportStream>,
    handshake_deadline: Option<Instant>,
    keepalive_deadline: Option<Instant>,
    keepalive: Duration,
}

impl<C: Connector> Driver<C> {
    fn new(
        connector: C,
        options: RealtimeOptions,
        commands: mpsc::UnboundedReceiver<Command>,
        status: watch::Sender<ConnectionStatus>,
    ) -> Self {
        Self {
            connector,
            options,
            commands,
            status,
            credentials: None,
            waiters: Vec::new(),
            registry: BTreeMap::new(),
            mux: Multiplexer::new(),
            reconnect: ReconnectController::new(options.backoff),
            opening: None,
            sink: None,
            stream: None,
            handshake_deadline: None,
            keepalive_deadline: None,
            keepalive: options.keepalive_timeout,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let keep_running = match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            self.teardown().await;
                            false
                        }
                    };
                    if !keep_running {
                        break;
                    }
                }
                opened = poll_opening(&mut self.opening) => {
                    self.opening = None;
                    self.on_opened(opened).await;
                }
                inbound = next_inbound(&mut self.stream) => self.on_inbound(inbound).await,
                _ = sleep_until_opt(self.handshake_deadline) => {
                    self.handshake_deadline = None;
                    let timeout = self.options.handshake_timeout;
                    self.fail(ConnectError::HandshakeTimeout(timeout)).await;
                }
                _ = sleep_until_opt(self.keepalive_deadline) => {
                    self.keepalive_deadline = None;
                    let timeout = self.keepalive;
                    self.fail(ConnectError::KeepaliveTimeout(timeout)).await;
                }
                _ = sleep_until_opt(self.reconnect.deadline()) => {
                    self.reconnect.fire();
                    if self.credentials.is_some() {
                        info!(attempt = self.reconnect.attempt(), "realtime_reconnecting");
                        self.begin_open();
                    }
                }
            }
        }
        debug!("realtime_driver_stopped");
    }

    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect { credentials, reply } => self.on_connect(credentials, reply).await,
            Command::Subscribe { key, spec } => self.on_subscribe(key, spec).await,
            Command::Unsubscribe { key, reply } => {
                let removed = self.on_unsubscribe(key).await;
                let _ = reply.send(removed);
            }
            Command::Disconnect { reply } => {
                self.teardown().await;
                let _ = reply.send(());
            }
            Command::Shutdown { reply } => {
                self.teardown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    fn publish(&self, update: impl FnOnce(&mut ConnectionStatus)) {
        self.status.send_modify(update);
    }

    async fn on_connect(
        &mut self,
        credentials: Credentials,
        reply: oneshot::Sender<Result<(), ConnectError>>,
    ) {
        if self.credentials.as_ref() == Some(&credentials) {
            match self.state() {
                ConnectionState::Connected => {
                    let _ = reply.send(Ok(()));
                    return;
                }
                ConnectionState::Connecting => {
                    self.waiters.push(reply);
                    return;
                }
                ConnectionState::Disconnected | ConnectionState::Error => {}
            }
        } else if self.credentials.is_some() {
            info!("realtime_credentials_changed");
            self.close_transport(true).await;
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(Err(ConnectError::Superseded));
            }
        }

        self.credentials = Some(credentials);
        self.reconnect.cancel();
        self.waiters.push(reply);
        self.begin_open();
    }

    fn begin_open(&mut self) {
        let Some(credentials) = &self.credentials else {
            return;
        };
        debug!(endpoint = %credentials.endpoint, "realtime_connecting");
        self.opening = Some(self.connector.connect(&credentials.endpoint));
        self.publish(|status| {
            status.state = ConnectionState::Connecting;
            status.gave_up = false;
        });
    }

    async fn on_opened(&mut self, opened: Result<Transport, TransportError>) {
        let transport = match opened {
            Ok(transport) => transport,
            Err(err) => return self.fail(err.into()).await,
        };
        self.sink = Some(transport.sink);
        self.stream = Some(transport.stream);

        let Some(init) = self.credentials.as_ref().map(Credentials::init_frame) else {
            self.close_transport(false).await;
            return;
        };
        self.handshake_deadline = Some(Instant::now() + self.options.handshake_timeout);
        if let Err(err) = self.send_frame(&init).await {
            self.fail(err).await;
        }
    }

    async fn on_inbound(&mut self, inbound: Option<Result<TransportMessage, TransportError>>) {
        let message = match inbound {
            Some(Ok(message)) => message,
            Some(Err(err)) => return self.fail(err.into()).await,
            None => {
                let error = ConnectError::Dropped("server closed the stream".to_string());
                return self.fail(error).await;
            }
        };
        if self.keepalive_deadline.is_some() {
            self.keepalive_deadline = Some(Instant::now() + self.keepalive);
        }

        match message {
            TransportMessage::Text(text) => {
                match decode_frame::<ServerFrame>(&text, self.options.max_frame_bytes) {
                    Ok(frame) => self.on_frame(frame).await,
                    Err(err) => warn!("realtime_frame_dropped: {err}"),
                }
            }
            TransportMessage::Ping(data) => {
                if let Some(sink) = self.sink.as_mut() {
                    if let Err(err) = sink.send(TransportMessage::Pong(data)).await {
                        warn!("realtime_pong_failed: {err}");
                    }
                }
            }
            TransportMessage::Pong(_) => {}
            TransportMessage::Close => {
                let error = ConnectError::Dropped("server sent close".to_string());
                self.fail(error).await;
            }
        }
    }

    async fn on_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::ConnectionAck { payload } => {
                self.on_ack(payload.connection_timeout_ms).await
            }
            ServerFrame::ConnectionError { payload } => {
                let summary = payload.summary();
                let error = if payload.is_unauthorized() {
                    ConnectError::Unauthorized(summary)
                } else {
                    ConnectError::Rejected(summary)
                };
                self.fail(error).await;
            }
            ServerFrame::Ka => {}
            ServerFrame::Error { id: None, payload } => {
                warn!("realtime_server_error: {payload}");
            }
            other => {
                if let Dispatch::Completed(key) = self.mux.dispatch(&other) {
                    debug!(%key, "realtime_subscription_completed");
                    self.registry.remove(&key);
                }
            }
        }
    }

    async fn on_ack(&mut self, connection_timeout_ms: Option<u64>) {
        if self.handshake_deadline.take().is_none() {
            debug!("realtime_unexpected_ack");
            return;
        }
        self.keepalive = connection_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(self.options.keepalive_timeout);
        self.keepalive_deadline = Some(Instant::now() + self.keepalive);
        self.reconnect.on_success();
        self.publish(|status| {
            status.state = ConnectionState::Connected;
            status.reconnect_attempt = 0;
            status.last_error = None;
            status.gave_up = false;
        });
        info!(
            subscriptions = self.registry.len(),
            keepalive_ms = self.keepalive.as_millis() as u64,
            "realtime_connected"
        );
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }

        self.mux.clear();
        let registered: Vec<(SubscriptionKey, SubscriptionSpec)> = self
            .registry
            .iter()
            .map(|(key, spec)| (*key, spec.clone()))
            .collect();
        for (key, spec) in registered {
            if let Err(err) = self.start(key, spec).await {
                self.fail(err).await;
                return;
            }
        }
    }

    async fn start(&mut self, key: SubscriptionKey, spec: SubscriptionSpec) -> Result<(), ConnectError> {
        let payload = StartPayload {
            query: spec.query.clone(),
            variables: spec.variables.clone(),
        };
        let id = self.mux.register(key, spec);
        debug!(%key, id = %id, "realtime_subscription_started");
        self.send_frame(&ClientFrame::Start { id, payload }).await
    }

    async fn on_subscribe(&mut self, key: SubscriptionKey, spec: SubscriptionSpec) {
        self.registry.insert(key, spec.clone());
        if self.state() != ConnectionState::Connected {
            debug!(%key, "realtime_subscription_queued");
            return;
        }
        if let Err(err) = self.start(key, spec).await {
            self.fail(err).await;
        }
    }

    async fn on_unsubscribe(&mut self, key: SubscriptionKey) -> bool {
        let known = self.registry.remove(&key).is_some();
        if let Some(id) = self.mux.unregister_key(key) {
            if self.state() == ConnectionState::Connected {
                if let Err(err) = self.send_frame(&ClientFrame::Stop { id }).await {
                    debug!("realtime_stop_failed: {err}");
                }
            }
        }
        known
    }

    async fn send_frame(&mut self, frame: &ClientFrame) -> Result<(), ConnectError> {
        let text = encode_frame(frame, self.options.max_frame_bytes)?;
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| ConnectError::Dropped("no open transport".to_string()))?;
        sink.send(TransportMessage::Text(text)).await?;
        Ok(())
    }

    /// Drop the current transport and every per-connection route. Stop frames
    /// are only attempted while the connection is live.
    async fn close_transport(&mut self, send_stops: bool) {
        self.opening = None;
        self.handshake_deadline = None;
        self.keepalive_deadline = None;
        if send_stops && self.state() == ConnectionState::Connected {
            for id in self.mux.correlation_ids() {
                let _ = self.send_frame(&ClientFrame::Stop { id }).await;
            }
        }
        if let Some(mut sink) = self.sink.take() {
            let _ = sink.send(TransportMessage::Close).await;
        }
        self.stream = None;
        self.mux.clear();
    }

    async fn fail(&mut self, error: ConnectError) {
        warn!("realtime_connection_failed: {error}");
        self.close_transport(false).await;

        let message = error.to_string();
        let decision = self.reconnect.on_drop(&error, Instant::now());
        self.publish(|status| {
            status.state = ConnectionState::Error;
            status.last_error = Some(message.clone());
            match decision {
                ReconnectDecision::Retry { attempt, .. } => {
                    status.reconnect_attempt = attempt;
                    status.gave_up = false;
                }
                ReconnectDecision::GiveUp { .. } | ReconnectDecision::Terminal => {
                    status.gave_up = true;
                }
            }
        });
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }

        match decision {
            ReconnectDecision::Retry { attempt, delay } => {
                info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "realtime_reconnect_scheduled"
                );
            }
            ReconnectDecision::GiveUp { attempts } => {
                warn!(attempts, "realtime_reconnect_gave_up");
                self.notify_lost(&ConnectError::GaveUp(attempts).to_string());
            }
            ReconnectDecision::Terminal => {
                warn!("realtime_reconnect_stopped: {message}");
                self.notify_lost(&message);
            }
        }
    }

    fn notify_lost(&self, reason: &str) {
        for spec in self.registry.values() {
            spec.handler
                .error(SubscriptionError::ConnectionLost(reason.to_string()));
        }
    }

    async fn teardown(&mut self) {
        let was_active = self.credentials.is_some();
        self.close_transport(true).await;
        self.reconnect.cancel();
        self.registry.clear();
        self.credentials = None;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(ConnectError::Cancelled));
        }
        self.publish(|status| *status = ConnectionStatus::default());
        if was_active {
            info!("realtime_disconnected");
        }
    }
}

async fn poll_opening(opening: &mut Option<OpenFuture>) -> Result<Transport, TransportError> {
    match opening {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn next_inbound(
    stream: &mut Option<TransportStream>,
) -> Option<Result<TransportMessage, TransportError>> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_stale_unless_connected() {
        let mut status = ConnectionStatus::default();
        assert!(status.is_stale());
        status.state = ConnectionState::Connected;
        assert!(!status.is_stale());
        status.state = ConnectionState::Error;
        status.gave_up = true;
        assert!(status.is_stale());
    }

    #[test]
    fn defaults_match_protocol_timings() {
        let options = RealtimeOptions::default();
        assert_eq!(options.handshake_timeout, Duration::from_secs(10));
        assert_eq!(options.keepalive_timeout, Duration::from_secs(300));
        assert_eq!(options.backoff.max_attempts, 10);
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
    }
}
