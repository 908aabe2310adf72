//! Pure health monitoring and reconnection logic
//!
//! Transition rules, retry decisions and health assessment live here as
//! pure functions so the state machine and client stay thin.

use super::connection::{BackoffPolicy, ConnectionState, ReconnectConfig};
use super::packet::ConnectReturnCode;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine if reconnection should be attempted (pure function)
    /// Supports unlimited retries when max_attempts is None
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if let Some(max_attempts) = config.max_attempts {
            if current_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        let attempt = current_attempts.saturating_add(1);
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: config.calculate_backoff_delay(attempt),
        }
    }

    /// Determine next state after connection event (pure function)
    ///
    /// Closed is absorbing. Events that do not apply to the current state
    /// leave it unchanged.
    pub fn determine_next_state(
        current: ConnectionState,
        event: &ConnectionEvent,
    ) -> ConnectionState {
        use ConnectionState::*;

        if current == Closed {
            return Closed;
        }

        match (current, event) {
            (Disconnected, ConnectionEvent::StartRequested) => Connecting,
            (Connecting | Reconnecting, ConnectionEvent::ConnAckAccepted) => Connected,
            (_, ConnectionEvent::ConnAckRejected(_)) => Closed,
            (Connected, ConnectionEvent::KeepaliveTimedOut) => Reconnecting,
            (Connecting | Connected | Reconnecting, ConnectionEvent::TransportLost(_)) => {
                Reconnecting
            }
            (Reconnecting, ConnectionEvent::ReconnectStarted(_)) => Connecting,
            (_, ConnectionEvent::RetriesExhausted) => Closed,
            (_, ConnectionEvent::StopRequested) => Closed,
            (state, _) => state,
        }
    }

    /// Log connection state transition (pure logging function)
    pub fn log_state_transition(
        from: ConnectionState,
        to: ConnectionState,
        event: &ConnectionEvent,
    ) {
        match (from, to, event) {
            (ConnectionState::Connecting, ConnectionState::Connected, _) => {
                info!("Connection established");
            }
            (ConnectionState::Reconnecting, ConnectionState::Connected, _) => {
                info!("Reconnection successful");
            }
            (_, ConnectionState::Reconnecting, ConnectionEvent::KeepaliveTimedOut) => {
                warn!("Keepalive timed out, connection considered lost");
            }
            (_, ConnectionState::Reconnecting, ConnectionEvent::TransportLost(reason)) => {
                warn!(reason = %reason, "Connection lost");
            }
            (_, ConnectionState::Connecting, ConnectionEvent::ReconnectStarted(attempt)) => {
                info!(attempt, "Starting reconnection attempt");
            }
            (_, ConnectionState::Closed, ConnectionEvent::ConnAckRejected(code)) => {
                error!(
                    return_code = code.as_u8(),
                    "Server rejected connection: {}",
                    code.description()
                );
            }
            (_, ConnectionState::Closed, ConnectionEvent::RetriesExhausted) => {
                error!("Reconnection attempts exhausted, giving up");
            }
            (_, ConnectionState::Closed, ConnectionEvent::StopRequested) => {
                info!("Connection closed");
            }
            _ => {
                info!("Connection state: {} -> {}", from, to);
            }
        }
    }

    /// Calculate health metrics for connection (pure function)
    pub fn calculate_health_metrics(
        connected_at: Option<Instant>,
        last_packet_at: Option<Instant>,
        reconnect_count: u32,
        stale_after: Duration,
        now: Instant,
    ) -> HealthMetrics {
        let uptime = connected_at.map(|t| now.saturating_duration_since(t));
        let time_since_last_packet = last_packet_at.map(|t| now.saturating_duration_since(t));

        HealthMetrics {
            uptime,
            time_since_last_packet,
            reconnect_count,
            is_healthy: Self::determine_health_status(uptime, time_since_last_packet, stale_after),
        }
    }

    fn determine_health_status(
        uptime: Option<Duration>,
        time_since_last_packet: Option<Duration>,
        stale_after: Duration,
    ) -> bool {
        match (uptime, time_since_last_packet) {
            (Some(_), None) => true,
            (Some(_), Some(idle)) => idle <= stale_after,
            _ => false,
        }
    }

    /// Assess connection quality based on metrics (pure function)
    pub fn assess_connection_quality(metrics: &HealthMetrics) -> ConnectionQuality {
        if !metrics.is_healthy {
            return ConnectionQuality::Critical;
        }

        match (metrics.reconnect_count, metrics.uptime) {
            (0, Some(uptime)) if uptime > Duration::from_secs(3600) => ConnectionQuality::Excellent,
            (0, Some(_)) => ConnectionQuality::Good,
            (1..=2, Some(uptime)) if uptime > Duration::from_secs(1800) => ConnectionQuality::Good,
            (1..=2, Some(_)) => ConnectionQuality::Fair,
            (3..=5, _) => ConnectionQuality::Fair,
            (6..=10, _) => ConnectionQuality::Poor,
            _ => ConnectionQuality::Critical,
        }
    }

    /// Validate reconnection configuration (pure function)
    pub fn validate_reconnect_config(config: &ReconnectConfig) -> Result<(), String> {
        if config.max_attempts == Some(0) {
            return Err("max_attempts must be greater than 0 or unset for unlimited".to_string());
        }

        match &config.backoff {
            BackoffPolicy::Fixed { delay_ms } if *delay_ms == 0 => {
                Err("fixed delay_ms must be greater than 0".to_string())
            }
            BackoffPolicy::Exponential { base_ms, .. } if *base_ms == 0 => {
                Err("exponential base_ms must be greater than 0".to_string())
            }
            BackoffPolicy::Exponential { base_ms, max_ms } if max_ms < base_ms => {
                Err(format!("exponential max_ms {max_ms} is below base_ms {base_ms}"))
            }
            BackoffPolicy::Pattern { sustained_ms, .. } if *sustained_ms == 0 => {
                Err("pattern sustained_ms must be greater than 0".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectionDecision {
    Proceed { attempt: u32, delay_ms: u64 },
    AbortShutdownRequested,
    AbortMaxAttemptsExceeded,
}

/// Events that drive state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    StartRequested,
    ConnAckAccepted,
    ConnAckRejected(ConnectReturnCode),
    KeepaliveTimedOut,
    TransportLost(String),
    ReconnectStarted(u32),
    RetriesExhausted,
    StopRequested,
}

/// Health metrics for connection monitoring
#[derive(Debug, Clone)]
pub struct HealthMetrics {
    pub uptime: Option<Duration>,
    pub time_since_last_packet: Option<Duration>,
    /// Successful reconnections since the client started
    pub reconnect_count: u32,
    pub is_healthy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}
