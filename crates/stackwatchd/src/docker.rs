//! Docker bindings for the health engine.
//!
//! Status comes from `docker inspect`, restarts go through
//! `docker compose -f <file> restart <service>`.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, warn};

use stackwatch_health::{RestartAction, RuntimeState, RuntimeStatusSource};

/// Upper bound for a single `docker inspect`.
const INSPECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for a `docker compose restart`.
const RESTART_TIMEOUT: Duration = Duration::from_secs(120);

/// Looks up container state with `docker inspect`.
pub struct DockerRuntime {
    docker: String,
}

impl DockerRuntime {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    pub fn with_binary(docker: impl Into<String>) -> Self {
        Self {
            docker: docker.into(),
        }
    }
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuntimeStatusSource for DockerRuntime {
    async fn runtime_state(&self, container: &str) -> RuntimeState {
        let mut cmd = Command::new(&self.docker);
        cmd.args(["inspect", "--format", "{{.State.Status}}", container])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(INSPECT_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                RuntimeState::from_docker(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(Ok(output)) => {
                debug!(
                    %container,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "docker inspect found no container"
                );
                RuntimeState::NotFound
            }
            Ok(Err(e)) => {
                warn!(%container, error = %e, "failed to run docker inspect");
                RuntimeState::NotFound
            }
            Err(_) => {
                warn!(%container, "docker inspect timed out");
                RuntimeState::NotFound
            }
        }
    }
}

/// Restarts services with `docker compose restart`.
pub struct ComposeRestarter {
    docker: String,
    compose_file: PathBuf,
}

impl ComposeRestarter {
    pub fn new(compose_file: impl Into<PathBuf>) -> Self {
        Self {
            docker: "docker".to_string(),
            compose_file: compose_file.into(),
        }
    }

    pub fn with_binary(mut self, docker: impl Into<String>) -> Self {
        self.docker = docker.into();
        self
    }

    fn command(&self, service_id: &str) -> Command {
        let mut cmd = Command::new(&self.docker);
        cmd.arg("compose")
            .arg("-f")
            .arg(&self.compose_file)
            .args(["restart", service_id])
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RestartAction for ComposeRestarter {
    async fn restart(&self, service_id: &str) -> bool {
        let mut cmd = self.command(service_id);
        match tokio::time::timeout(RESTART_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => true,
            Ok(Ok(output)) => {
                error!(
                    service = %service_id,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "docker compose restart failed"
                );
                false
            }
            Ok(Err(e)) => {
                error!(service = %service_id, error = %e, "failed to run docker compose");
                false
            }
            Err(_) => {
                error!(service = %service_id, "docker compose restart timed out");
                false
            }
        }
    }
}
