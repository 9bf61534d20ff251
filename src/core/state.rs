//! Liveness and worker status types

use serde::{Deserialize, Serialize};

/// Connection state of the agent host client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// The client can reach the agent host
    Connected,

    /// The client lost its connection
    Disconnected,

    /// Not probed yet, or the probe was inconclusive
    Unknown,
}

impl ConnectionState {
    /// Check if the connection is known to be good
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Lifecycle status of a worker session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Created, waiting for a task
    Idle,

    /// A dispatched task is in flight
    Running,

    /// The last task failed
    Error,
}

impl WorkerStatus {
    /// Check if a task is currently in flight
    pub fn is_running(&self) -> bool {
        matches!(self, WorkerStatus::Running)
    }

    /// Short label for listings
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Running => "running",
            WorkerStatus::Error => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(!ConnectionState::Unknown.is_connected());
    }

    #[test]
    fn test_worker_status_serialization() {
        let json = serde_json::to_string(&WorkerStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        assert!(WorkerStatus::Running.is_running());
        assert_eq!(WorkerStatus::Idle.as_str(), "idle");
    }
}
