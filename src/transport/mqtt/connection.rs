//! Connection lifecycle state machine
//!
//! `ConnectionStateMachine` owns the session bookkeeping and is driven by the
//! client's supervisor task. It performs no I/O: each operation returns what the
//! caller should do next (send a ping, wait and reconnect, give up).

use super::health_monitor::{
    ConnectionEvent, HealthMetrics, HealthMonitor, ReconnectionDecision,
};
use super::packet::{ConnAck, Connect, Packet};
use crate::config::ConfigError;
use crate::error::WorksError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Initial state, nothing opened yet
    #[default]
    Disconnected,
    /// Transport opening or CONNECT sent, awaiting CONNACK
    Connecting,
    /// CONNACK accepted, keepalive running
    Connected,
    /// Waiting out the backoff before the next attempt
    Reconnecting,
    /// Terminal. Stopped, rejected, or out of retries
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Delay schedule between reconnection attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BackoffPolicy {
    Fixed { delay_ms: u64 },
    /// `base_ms * 2^(attempt - 1)`, capped at `max_ms`
    Exponential { base_ms: u64, max_ms: u64 },
    /// Explicit per-attempt delays, then `sustained_ms` forever
    Pattern { delays_ms: Vec<u64>, sustained_ms: u64 },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base_ms: 5_000,
            max_ms: 60_000,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the given 1-based attempt
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        match self {
            BackoffPolicy::Fixed { delay_ms } => *delay_ms,
            BackoffPolicy::Exponential { base_ms, max_ms } => {
                let exponent = attempt.saturating_sub(1).min(32);
                base_ms
                    .saturating_mul(1u64 << exponent)
                    .min(*max_ms)
            }
            BackoffPolicy::Pattern {
                delays_ms,
                sustained_ms,
            } => {
                let index = attempt.saturating_sub(1) as usize;
                delays_ms.get(index).copied().unwrap_or(*sustained_ms)
            }
        }
    }
}

/// Reconnection configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub backoff: BackoffPolicy,
}

impl ReconnectConfig {
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        self.backoff.delay_ms(attempt)
    }
}

/// Static parameters of an MQTT session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub protocol_level: u8,
    pub keep_alive_secs: u16,
    pub missed_ping_threshold: u32,
    pub ping_interval: Duration,
    pub clean_session: bool,
}

impl SessionSettings {
    /// Silence longer than this means the keepalive policy has already given up
    pub fn stale_after(&self) -> Duration {
        self.ping_interval.saturating_mul(self.missed_ping_threshold)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            protocol_level: super::packet::PROTOCOL_LEVEL,
            keep_alive_secs: 50,
            missed_ping_threshold: 3,
            ping_interval: Duration::from_secs(30),
            clean_session: true,
        }
    }
}

/// CONNECT credentials. The token is opaque and sent as the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub token: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, token: Option<String>) -> Self {
        Self {
            username: username.into(),
            token,
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new("dummy", None)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Generate a client identifier: prefix plus 12 hex characters
pub fn generate_client_id(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{prefix}{}", &id[..12])
}

/// What the supervisor should do on a keepalive tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveAction {
    SendPing,
    /// Too many unanswered pings; the connection is now Reconnecting
    TimedOut,
    /// Not connected, nothing to do
    Idle,
}

/// Operation attempted from a state that does not allow it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {operation} while {state}")]
pub struct InvalidTransition {
    pub operation: &'static str,
    pub state: ConnectionState,
}

/// Mutable per-session bookkeeping
#[derive(Debug, Clone, Default)]
pub struct ConnectionSession {
    pub state: ConnectionState,
    pub last_ping_sent: Option<Instant>,
    pub awaiting_pingresp: bool,
    pub missed_pings: u32,
    pub reconnect_attempts: u32,
    /// Packet id to send time for PUBLISHes awaiting PUBACK
    pub outstanding: HashMap<u16, Instant>,
    pub connected_at: Option<Instant>,
    pub last_packet_at: Option<Instant>,
    /// Successful reconnections over the life of the client
    pub reconnect_count: u32,
}

impl ConnectionSession {
    fn reset_liveness(&mut self) {
        self.last_ping_sent = None;
        self.awaiting_pingresp = false;
        self.missed_pings = 0;
        self.outstanding.clear();
        self.connected_at = None;
    }
}

#[derive(Debug)]
pub struct ConnectionStateMachine {
    session: ConnectionSession,
    settings: SessionSettings,
    reconnect: ReconnectConfig,
}

impl ConnectionStateMachine {
    pub fn new(settings: SessionSettings, reconnect: ReconnectConfig) -> Result<Self, ConfigError> {
        HealthMonitor::validate_reconnect_config(&reconnect)
            .map_err(|e| ConfigError::InvalidConfig(format!("reconnect: {e}")))?;
        if settings.missed_ping_threshold == 0 {
            return Err(ConfigError::InvalidConfig(
                "missed_ping_threshold must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            session: ConnectionSession::default(),
            settings,
            reconnect,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state
    }

    pub fn session(&self) -> &ConnectionSession {
        &self.session
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    fn apply(&mut self, event: ConnectionEvent) -> ConnectionState {
        let from = self.session.state;
        let to = HealthMonitor::determine_next_state(from, &event);
        if from != to {
            HealthMonitor::log_state_transition(from, to, &event);
            self.session.state = to;
        }
        to
    }

    /// Disconnected → Connecting
    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        if self.session.state != ConnectionState::Disconnected {
            return Err(InvalidTransition {
                operation: "start",
                state: self.session.state,
            });
        }
        self.apply(ConnectionEvent::StartRequested);
        Ok(())
    }

    /// Build the CONNECT sent once the transport is open
    pub fn connect_packet(&self, credentials: &Credentials, client_id: &str) -> Packet {
        let mut connect = Connect::new(client_id, self.settings.keep_alive_secs);
        connect.protocol_level = self.settings.protocol_level;
        connect.clean_session = self.settings.clean_session;
        connect.username = Some(credentials.username.clone());
        connect.password = credentials
            .token
            .as_ref()
            .map(|token| Bytes::from(token.clone().into_bytes()));
        Packet::Connect(connect)
    }

    pub fn handle_connack(&mut self, connack: ConnAck) -> Result<(), WorksError> {
        match self.session.state {
            ConnectionState::Connecting | ConnectionState::Reconnecting => {}
            state => {
                debug!(target: "mqtt_transport", %state, "Ignoring unexpected CONNACK");
                return Ok(());
            }
        }

        if !connack.return_code.is_accepted() {
            let reason = connack.return_code.description();
            self.apply(ConnectionEvent::ConnAckRejected(connack.return_code));
            self.session.reset_liveness();
            return Err(WorksError::authentication(format!(
                "server rejected CONNECT: {reason}"
            )));
        }

        let now = Instant::now();
        if self.session.reconnect_attempts > 0 {
            self.session.reconnect_count += 1;
        }
        self.session.reset_liveness();
        self.session.reconnect_attempts = 0;
        self.session.connected_at = Some(now);
        self.session.last_packet_at = Some(now);
        self.apply(ConnectionEvent::ConnAckAccepted);
        Ok(())
    }

    pub fn on_keepalive_tick(&mut self, now: Instant) -> KeepaliveAction {
        if self.session.state != ConnectionState::Connected {
            return KeepaliveAction::Idle;
        }

        if self.session.awaiting_pingresp {
            self.session.missed_pings += 1;
            warn!(
                missed_pings = self.session.missed_pings,
                threshold = self.settings.missed_ping_threshold,
                "PINGREQ went unanswered"
            );
        }

        if self.session.missed_pings >= self.settings.missed_ping_threshold {
            self.apply(ConnectionEvent::KeepaliveTimedOut);
            return KeepaliveAction::TimedOut;
        }

        self.session.last_ping_sent = Some(now);
        self.session.awaiting_pingresp = true;
        KeepaliveAction::SendPing
    }

    pub fn handle_pingresp(&mut self) {
        self.session.missed_pings = 0;
        self.session.awaiting_pingresp = false;
        self.session.last_packet_at = Some(Instant::now());
    }

    pub fn track_outstanding(&mut self, packet_id: u16, now: Instant) {
        self.session.outstanding.insert(packet_id, now);
    }

    /// Returns false for a PUBACK with no matching outstanding PUBLISH
    pub fn handle_puback(&mut self, packet_id: u16) -> bool {
        self.session.last_packet_at = Some(Instant::now());
        self.session.outstanding.remove(&packet_id).is_some()
    }

    pub fn handle_publish_received(&mut self) {
        self.session.last_packet_at = Some(Instant::now());
    }

    /// Record a lost transport and decide whether to retry
    pub fn transport_lost(&mut self, reason: &str) -> ReconnectionDecision {
        match self.session.state {
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::Reconnecting => {}
            ConnectionState::Disconnected | ConnectionState::Closed => {
                return ReconnectionDecision::AbortShutdownRequested;
            }
        }

        self.session.reset_liveness();
        let decision = HealthMonitor::should_attempt_reconnection(
            self.session.reconnect_attempts,
            &self.reconnect,
            false,
        );

        match decision {
            ReconnectionDecision::Proceed { .. } => {
                self.apply(ConnectionEvent::TransportLost(reason.to_string()));
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                self.apply(ConnectionEvent::RetriesExhausted);
            }
            ReconnectionDecision::AbortShutdownRequested => {}
        }
        decision
    }

    /// Reconnecting → Connecting, returning the attempt number
    pub fn begin_reconnect(&mut self) -> Result<u32, InvalidTransition> {
        if self.session.state != ConnectionState::Reconnecting {
            return Err(InvalidTransition {
                operation: "begin reconnect",
                state: self.session.state,
            });
        }
        self.session.reconnect_attempts += 1;
        let attempt = self.session.reconnect_attempts;
        self.apply(ConnectionEvent::ReconnectStarted(attempt));
        Ok(attempt)
    }

    /// Any state → Closed
    pub fn stop(&mut self) {
        self.session.reset_liveness();
        self.apply(ConnectionEvent::StopRequested);
    }

    pub fn health_metrics(&self, now: Instant) -> HealthMetrics {
        HealthMonitor::calculate_health_metrics(
            self.session.connected_at,
            self.session.last_packet_at,
            self.session.reconnect_count,
            self.settings.stale_after(),
            now,
        )
    }
}
