//! Boundaries to the orchestration layer: runtime status lookup and restart.
//!
//! The health engine never touches containers itself. It asks a
//! [`RuntimeStatusSource`] what state a container is in, and hands recovery
//! to a [`RestartAction`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Lifecycle state reported by the container/process runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    Running,
    Stopped,
    Starting,
    Stopping,
    /// The runtime knows the container but reports a state we don't map.
    Unknown,
    /// The runtime has no such container (or could not be asked).
    NotFound,
}

impl RuntimeState {
    /// Map a Docker `{{.State.Status}}` string.
    pub fn from_docker(status: &str) -> Self {
        match status.trim() {
            "running" => RuntimeState::Running,
            "exited" | "dead" | "created" => RuntimeState::Stopped,
            "restarting" => RuntimeState::Starting,
            "removing" | "paused" => RuntimeState::Stopping,
            _ => RuntimeState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeState::Running => "running",
            RuntimeState::Stopped => "stopped",
            RuntimeState::Starting => "starting",
            RuntimeState::Stopping => "stopping",
            RuntimeState::Unknown => "unknown",
            RuntimeState::NotFound => "not_found",
        }
    }
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status lookup provided by the service registry.
#[async_trait]
pub trait RuntimeStatusSource: Send + Sync {
    /// Current lifecycle state of the named container.
    async fn runtime_state(&self, container: &str) -> RuntimeState;
}

/// The recovery action delegated to the orchestration layer.
#[async_trait]
pub trait RestartAction: Send + Sync {
    /// Restart the service. Returns `true` if the restart went through.
    async fn restart(&self, service_id: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_states_map() {
        assert_eq!(RuntimeState::from_docker("running\n"), RuntimeState::Running);
        assert_eq!(RuntimeState::from_docker("exited"), RuntimeState::Stopped);
        assert_eq!(RuntimeState::from_docker("restarting"), RuntimeState::Starting);
        assert_eq!(RuntimeState::from_docker("paused"), RuntimeState::Stopping);
        assert_eq!(RuntimeState::from_docker("weird"), RuntimeState::Unknown);
    }
}
