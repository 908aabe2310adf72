//! Impure I/O supervisor for the notification session
//!
//! [`WorksClient`] owns one spawned task that opens the transport, runs the
//! MQTT session and reconnects with backoff. All session state lives on that
//! task; callers observe it through a `watch` channel.

use super::codec::{encode_to_bytes, PacketBuffer};
use super::connection::{
    generate_client_id, ConnectionState, ConnectionStateMachine, Credentials, KeepaliveAction,
};
use super::dedup::MessageDeduplicator;
use super::health_monitor::{
    ConnectionQuality, HealthMetrics, HealthMonitor, ReconnectionDecision,
};
use super::message_handler::{
    route_packet, DispatchStats, MessageHandler, PacketRoute, PublishDispatcher,
};
use super::packet::Packet;
use crate::config::WorksConfig;
use crate::error::WorksError;
use crate::observability::{connection_span, session_span};
use crate::transport::websocket::handshake_headers;
use crate::transport::{Connector, HandshakeHeaders, TransportStream};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

/// Snapshot of session health published by the supervisor
#[derive(Debug, Clone)]
pub struct ClientHealth {
    pub state: ConnectionState,
    pub metrics: HealthMetrics,
    pub quality: ConnectionQuality,
    pub dispatch: DispatchStats,
}

impl Default for ClientHealth {
    fn default() -> Self {
        let metrics = HealthMetrics {
            uptime: None,
            time_since_last_packet: None,
            reconnect_count: 0,
            is_healthy: false,
        };
        Self {
            state: ConnectionState::Disconnected,
            quality: HealthMonitor::assess_connection_quality(&metrics),
            metrics,
            dispatch: DispatchStats::default(),
        }
    }
}

/// Notification client: one supervised MQTT-over-WebSocket session
pub struct WorksClient {
    config: WorksConfig,
    connector: Arc<dyn Connector>,
    credentials: Credentials,
    cookie_header: Option<String>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    health_tx: watch::Sender<ClientHealth>,
    shutdown_tx: watch::Sender<bool>,
    // Built at construction so bad settings fail early; consumed by start()
    pending: Option<(ConnectionStateMachine, PublishDispatcher)>,
    supervisor: Option<JoinHandle<Result<(), WorksError>>>,
}

impl WorksClient {
    pub fn new(
        config: WorksConfig,
        connector: Arc<dyn Connector>,
        handler: impl MessageHandler + 'static,
    ) -> Result<Self, WorksError> {
        config.validate()?;

        let machine =
            ConnectionStateMachine::new(config.mqtt.session_settings(), config.reconnect.clone())?;
        let dedup = MessageDeduplicator::new(config.dedup.retention(), config.dedup.max_entries)?;
        let dispatcher = PublishDispatcher::new(dedup, Arc::new(handler));

        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (health_tx, _) = watch::channel(ClientHealth::default());
        let (shutdown_tx, _) = watch::channel(false);
        let credentials = Credentials::new(config.mqtt.username.clone(), None);

        Ok(Self {
            config,
            connector,
            credentials,
            cookie_header: None,
            state_tx,
            state_rx,
            health_tx,
            shutdown_tx,
            pending: Some((machine, dispatcher)),
            supervisor: None,
        })
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Cookie header sent with every WebSocket handshake
    pub fn with_cookie_header(mut self, cookie_header: impl Into<String>) -> Self {
        self.cookie_header = Some(cookie_header.into());
        self
    }

    /// Spawn the supervisor task. Calling it again is a no-op.
    pub fn start(&mut self) {
        let Some((machine, dispatcher)) = self.pending.take() else {
            debug!("Client already started");
            return;
        };

        let supervisor = Supervisor {
            machine,
            dispatcher,
            connector: Arc::clone(&self.connector),
            url: self.config.websocket.url.clone(),
            headers: handshake_headers(&self.config.websocket, self.cookie_header.as_deref()),
            credentials: self.credentials.clone(),
            client_id_prefix: self.config.mqtt.client_id_prefix.clone(),
            ping_interval: self.config.mqtt.ping_interval(),
            connect_timeout: self.config.mqtt.connect_timeout(),
            max_packet_size: self.config.mqtt.max_packet_size,
            state_tx: self.state_tx.clone(),
            health_tx: self.health_tx.clone(),
            shutdown_rx: self.shutdown_tx.subscribe(),
        };

        let span = session_span!(url = %self.config.websocket.url);
        self.supervisor = Some(tokio::spawn(supervisor.run().instrument(span)));
    }

    /// Shut the session down and wait for the supervisor to finish
    ///
    /// Returns the supervisor's own error if it had already failed.
    pub async fn stop(&mut self) -> Result<(), WorksError> {
        self.shutdown_tx.send_replace(true);

        match self.supervisor.take() {
            Some(handle) => join_supervisor(handle).await,
            None => {
                self.pending = None;
                self.state_tx.send_replace(ConnectionState::Closed);
                self.health_tx
                    .send_modify(|health| health.state = ConnectionState::Closed);
                Ok(())
            }
        }
    }

    /// Wait for the supervisor to end on its own (terminal error or stop)
    ///
    /// Cancel safe: dropping the future leaves the session running.
    pub async fn wait(&mut self) -> Result<(), WorksError> {
        let Some(handle) = self.supervisor.as_mut() else {
            return Ok(());
        };
        let result = handle.await;
        self.supervisor = None;
        result.map_err(|e| WorksError::connection(format!("Supervisor task failed: {e}")))?
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Latest health snapshot, refreshed on state changes, deliveries and keepalive ticks
    pub fn health(&self) -> ClientHealth {
        self.health_tx.borrow().clone()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<ClientHealth> {
        self.health_tx.subscribe()
    }
}

impl Drop for WorksClient {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);

        // Drop cannot await; stop() is the graceful path
        if let Some(handle) = self.supervisor.take() {
            handle.abort();
        }
    }
}

async fn join_supervisor(handle: JoinHandle<Result<(), WorksError>>) -> Result<(), WorksError> {
    handle
        .await
        .map_err(|e| WorksError::connection(format!("Supervisor task failed: {e}")))?
}

/// Resolves once shutdown is requested or the client is gone
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

/// Perform interruptible sleep with shutdown monitoring
/// Returns true if sleep completed, false if shutdown requested
async fn interruptible_sleep(shutdown_rx: &mut watch::Receiver<bool>, delay_ms: u64) -> bool {
    tokio::select! {
        biased;
        _ = shutdown_requested(shutdown_rx) => {
            info!("Shutdown signal received during reconnection delay, stopping");
            false
        }
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}

/// How a single transport connection ended
#[derive(Debug)]
enum SessionEnd {
    Shutdown,
    /// Not worth retrying
    Fatal(WorksError),
    /// Retry according to the reconnect policy
    Lost(String),
}

struct Supervisor {
    machine: ConnectionStateMachine,
    dispatcher: PublishDispatcher,
    connector: Arc<dyn Connector>,
    url: String,
    headers: HandshakeHeaders,
    credentials: Credentials,
    client_id_prefix: String,
    ping_interval: Duration,
    connect_timeout: Duration,
    max_packet_size: usize,
    state_tx: watch::Sender<ConnectionState>,
    health_tx: watch::Sender<ClientHealth>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Supervisor {
    async fn run(mut self) -> Result<(), WorksError> {
        if let Err(e) = self.machine.start() {
            return Err(WorksError::connection(e.to_string()));
        }
        self.publish_state();

        loop {
            if *self.shutdown_rx.borrow() {
                self.finish();
                return Ok(());
            }

            let client_id = generate_client_id(&self.client_id_prefix);
            let span = connection_span!(client_id = %client_id);
            let end = self.run_connection(&client_id).instrument(span).await;

            match end {
                SessionEnd::Shutdown => {
                    self.finish();
                    info!("Session stopped");
                    return Ok(());
                }
                SessionEnd::Fatal(e) => {
                    self.finish();
                    return Err(e);
                }
                SessionEnd::Lost(reason) => match self.machine.transport_lost(&reason) {
                    ReconnectionDecision::Proceed { attempt, delay_ms } => {
                        self.publish_state();
                        info!(attempt, delay_ms, "Scheduling reconnection");

                        if !interruptible_sleep(&mut self.shutdown_rx, delay_ms).await {
                            self.finish();
                            return Ok(());
                        }
                        if let Err(e) = self.machine.begin_reconnect() {
                            self.finish();
                            return Err(WorksError::connection(e.to_string()));
                        }
                        self.publish_state();
                    }
                    ReconnectionDecision::AbortMaxAttemptsExceeded => {
                        self.publish_state();
                        return Err(WorksError::connection_exhausted(format!(
                            "Gave up after {} reconnection attempts: {reason}",
                            self.machine.session().reconnect_attempts
                        )));
                    }
                    ReconnectionDecision::AbortShutdownRequested => {
                        self.finish();
                        return Ok(());
                    }
                },
            }
        }
    }

    fn publish_state(&self) {
        let state = self.machine.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        self.publish_health();
    }

    fn publish_health(&self) {
        let metrics = self.machine.health_metrics(Instant::now());
        self.health_tx.send_replace(ClientHealth {
            state: self.machine.state(),
            quality: HealthMonitor::assess_connection_quality(&metrics),
            metrics,
            dispatch: self.dispatcher.stats(),
        });
    }

    fn finish(&mut self) {
        self.machine.stop();
        self.publish_state();
    }

    /// Open the transport, send CONNECT and serve the session until it ends
    async fn run_connection(&mut self, client_id: &str) -> SessionEnd {
        let connect = self.machine.connect_packet(&self.credentials, client_id);
        let connect_bytes = match encode_to_bytes(&connect) {
            Ok(bytes) => bytes,
            Err(e) => return SessionEnd::Fatal(e.into()),
        };

        // Covers the WebSocket handshake and the wait for CONNACK
        let deadline = tokio::time::sleep(self.connect_timeout);
        tokio::pin!(deadline);

        let opened = tokio::select! {
            biased;
            _ = shutdown_requested(&mut self.shutdown_rx) => return SessionEnd::Shutdown,
            _ = &mut deadline => {
                return SessionEnd::Lost(format!(
                    "Handshake timed out after {:?}",
                    self.connect_timeout
                ));
            }
            result = self.connector.open(&self.url, &self.headers) => result,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) if e.is_terminal() => return SessionEnd::Fatal(e),
            Err(e) => return SessionEnd::Lost(e.to_string()),
        };

        // From here on the stream is open and every exit must close it
        debug!(target: "mqtt_transport", packet_type = ?connect.packet_type(), len = connect_bytes.len(), "Sending packet");
        let written = tokio::select! {
            biased;
            _ = shutdown_requested(&mut self.shutdown_rx) => Err(SessionEnd::Shutdown),
            _ = &mut deadline => Err(SessionEnd::Lost(format!(
                "CONNECT not written within {:?}",
                self.connect_timeout
            ))),
            result = stream.write(connect_bytes) => {
                result.map_err(|e| SessionEnd::Lost(e.to_string()))
            }
        };
        if let Err(end) = written {
            if let Err(e) = stream.close().await {
                debug!(error = %e, "Transport close failed");
            }
            return end;
        }

        let mut buffer = PacketBuffer::with_max_packet_size(self.max_packet_size);
        let mut keepalive = interval_at(Instant::now() + self.ping_interval, self.ping_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let end = loop {
            let connected = self.machine.state() == ConnectionState::Connected;

            tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown_rx) => {
                    if connected {
                        if let Err(e) = send(stream.as_mut(), &Packet::Disconnect).await {
                            debug!(error = %e, "DISCONNECT not delivered");
                        }
                    }
                    break SessionEnd::Shutdown;
                }
                _ = &mut deadline, if !connected => {
                    break SessionEnd::Lost(format!(
                        "No CONNACK within {:?}",
                        self.connect_timeout
                    ));
                }
                _ = keepalive.tick(), if connected => {
                    let action = self.machine.on_keepalive_tick(Instant::now());
                    self.publish_health();
                    match action {
                        KeepaliveAction::SendPing => {
                            if let Err(e) = send(stream.as_mut(), &Packet::PingReq).await {
                                break SessionEnd::Lost(e.to_string());
                            }
                        }
                        KeepaliveAction::TimedOut => {
                            break SessionEnd::Lost("Keepalive timed out".to_string());
                        }
                        KeepaliveAction::Idle => {}
                    }
                }
                read = stream.read() => match read {
                    Ok(Some(data)) => {
                        buffer.extend(&data);
                        if let Some(end) = self.drain(&mut buffer, stream.as_mut()).await {
                            break end;
                        }
                        if !connected && self.machine.state() == ConnectionState::Connected {
                            keepalive.reset();
                        }
                    }
                    Ok(None) => break SessionEnd::Lost("Transport closed by server".to_string()),
                    Err(e) => break SessionEnd::Lost(e.to_string()),
                },
            }
        };

        if let Err(e) = stream.close().await {
            debug!(error = %e, "Transport close failed");
        }
        end
    }

    /// Handle every complete packet in the buffer
    async fn drain(
        &mut self,
        buffer: &mut PacketBuffer,
        stream: &mut dyn TransportStream,
    ) -> Option<SessionEnd> {
        loop {
            match buffer.next_packet() {
                Ok(Some(packet)) => {
                    if let Some(end) = self.handle_packet(packet, stream).await {
                        return Some(end);
                    }
                }
                Ok(None) => return None,
                Err(e) if e.is_framing() => {
                    buffer.clear();
                    return Some(SessionEnd::Lost(format!("Unrecoverable framing error: {e}")));
                }
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable packet");
                }
            }
        }
    }

    async fn handle_packet(
        &mut self,
        packet: Packet,
        stream: &mut dyn TransportStream,
    ) -> Option<SessionEnd> {
        debug!(target: "mqtt_transport", packet_type = ?packet.packet_type(), "Received packet");

        match route_packet(packet) {
            PacketRoute::ConnAck(connack) => {
                let result = self.machine.handle_connack(connack);
                self.publish_state();
                result.err().map(SessionEnd::Fatal)
            }
            PacketRoute::PingResp => {
                self.machine.handle_pingresp();
                None
            }
            PacketRoute::PubAck { packet_id } => {
                if !self.machine.handle_puback(packet_id) {
                    debug!(packet_id, "PUBACK for unknown packet id");
                }
                None
            }
            PacketRoute::Publish(publish) => {
                self.machine.handle_publish_received();
                let ack = self.dispatcher.dispatch(&publish);
                self.publish_health();
                let ack = ack?;
                send(stream, &ack)
                    .await
                    .err()
                    .map(|e| SessionEnd::Lost(e.to_string()))
            }
            PacketRoute::ServerDisconnect => {
                Some(SessionEnd::Lost("Server sent DISCONNECT".to_string()))
            }
            PacketRoute::Unexpected(packet_type) => {
                debug!(?packet_type, "Ignoring unexpected packet from server");
                None
            }
        }
    }
}

async fn send(stream: &mut dyn TransportStream, packet: &Packet) -> Result<(), WorksError> {
    let bytes = encode_to_bytes(packet)?;
    debug!(target: "mqtt_transport", packet_type = ?packet.packet_type(), len = bytes.len(), "Sending packet");
    stream.write(bytes).await
}
