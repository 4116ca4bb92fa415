//! Pure health monitoring and state transition logic for the AMQP client
//!
//! The connection manager feeds [`ConnectionEvent`]s through
//! [`HealthMonitor::determine_next_state`]; nothing here performs I/O.

use super::connection::ConnectionState;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Pure health monitoring and transition logic
pub struct HealthMonitor;

/// Events that drive connection state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A connect sequence started
    ConnectStarted,
    /// Transport, channel and topology are up
    TopologyReady,
    /// The connect sequence failed; retry attempt number that was scheduled
    ConnectFailed { attempt: u32, reason: String },
    /// The transport or channel reported a fault; retry attempt number that was scheduled
    FaultReported { attempt: u32, reason: String },
    /// The owner asked for the connection to be closed
    ClientDisconnected,
}

impl HealthMonitor {
    /// Determine next state after a connection event (pure function)
    pub fn determine_next_state(
        _current_state: &ConnectionState,
        event: &ConnectionEvent,
    ) -> ConnectionState {
        match event {
            ConnectionEvent::ConnectStarted => ConnectionState::Connecting,
            ConnectionEvent::TopologyReady => ConnectionState::Ready,
            ConnectionEvent::ConnectFailed { attempt, .. }
            | ConnectionEvent::FaultReported { attempt, .. } => {
                ConnectionState::Reconnecting(*attempt)
            }
            ConnectionEvent::ClientDisconnected => ConnectionState::Disconnected,
        }
    }

    /// Check if connection state allows channel operations (pure function)
    pub fn can_use_channel(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Ready)
    }

    /// Whether callers of the ready gate should keep waiting (pure function)
    pub fn is_settling(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connecting)
    }

    /// Calculate health metrics for the connection (pure function)
    pub fn calculate_health_metrics(
        connect_time: Option<Instant>,
        reconnect_count: u32,
        last_fault: Option<String>,
        state: &ConnectionState,
    ) -> HealthMetrics {
        let uptime = match state {
            ConnectionState::Ready => connect_time.map(|t| t.elapsed()),
            _ => None,
        };

        HealthMetrics {
            uptime,
            reconnect_count,
            last_fault,
            is_healthy: Self::can_use_channel(state),
        }
    }

    /// Log connection state transition (pure logging function)
    pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Ready) => {
                info!("Broker connection established");
            }
            (ConnectionState::Reconnecting(attempt), ConnectionState::Connecting) => {
                info!("Starting reconnection attempt {}", attempt);
            }
            (ConnectionState::Ready, ConnectionState::Reconnecting(_)) => {
                warn!("Broker connection lost");
            }
            (ConnectionState::Connecting, ConnectionState::Reconnecting(attempt)) => {
                error!("Connect attempt failed, retry {} scheduled", attempt);
            }
            (_, ConnectionState::Disconnected) => {
                info!("Broker connection closed");
            }
            _ => {
                info!("Broker connection state: {:?} -> {:?}", from, to);
            }
        }
    }
}

/// Health metrics for connection monitoring
#[derive(Debug, Clone, PartialEq)]
pub struct HealthMetrics {
    /// Time since the current connection was established
    pub uptime: Option<Duration>,
    /// Number of reconnections performed after the first successful connect
    pub reconnect_count: u32,
    /// Most recent transport or connect fault
    pub last_fault: Option<String>,
    /// Channel is usable
    pub is_healthy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determine_next_state() {
        let state = ConnectionState::Disconnected;

        let next = HealthMonitor::determine_next_state(&state, &ConnectionEvent::ConnectStarted);
        assert_eq!(next, ConnectionState::Connecting);

        let next = HealthMonitor::determine_next_state(&next, &ConnectionEvent::TopologyReady);
        assert_eq!(next, ConnectionState::Ready);

        let next = HealthMonitor::determine_next_state(
            &next,
            &ConnectionEvent::FaultReported {
                attempt: 1,
                reason: "socket closed".to_string(),
            },
        );
        assert_eq!(next, ConnectionState::Reconnecting(1));

        let next = HealthMonitor::determine_next_state(
            &ConnectionState::Connecting,
            &ConnectionEvent::ConnectFailed {
                attempt: 2,
                reason: "refused".to_string(),
            },
        );
        assert_eq!(next, ConnectionState::Reconnecting(2));

        let next =
            HealthMonitor::determine_next_state(&next, &ConnectionEvent::ClientDisconnected);
        assert_eq!(next, ConnectionState::Disconnected);
    }

    #[test]
    fn test_can_use_channel() {
        assert!(HealthMonitor::can_use_channel(&ConnectionState::Ready));
        assert!(!HealthMonitor::can_use_channel(&ConnectionState::Connecting));
        assert!(!HealthMonitor::can_use_channel(&ConnectionState::Disconnected));
        assert!(!HealthMonitor::can_use_channel(
            &ConnectionState::Reconnecting(3)
        ));
    }

    #[test]
    fn test_is_settling() {
        assert!(HealthMonitor::is_settling(&ConnectionState::Connecting));
        assert!(!HealthMonitor::is_settling(&ConnectionState::Ready));
        assert!(!HealthMonitor::is_settling(&ConnectionState::Reconnecting(1)));
    }

    #[test]
    fn test_health_metrics_ready() {
        let metrics = HealthMonitor::calculate_health_metrics(
            Some(Instant::now()),
            2,
            Some("socket closed".to_string()),
            &ConnectionState::Ready,
        );
        assert!(metrics.is_healthy);
        assert!(metrics.uptime.is_some());
        assert_eq!(metrics.reconnect_count, 2);
        assert_eq!(metrics.last_fault.as_deref(), Some("socket closed"));
    }

    #[test]
    fn test_health_metrics_not_ready_has_no_uptime() {
        let metrics = HealthMonitor::calculate_health_metrics(
            Some(Instant::now()),
            0,
            None,
            &ConnectionState::Reconnecting(1),
        );
        assert!(!metrics.is_healthy);
        assert_eq!(metrics.uptime, None);
    }
}
