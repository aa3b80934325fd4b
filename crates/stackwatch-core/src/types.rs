//! Service health profiles and the status vocabulary shared across stackwatch crates.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Unique key for a monitored service.
pub type ServiceId = String;

/// Default per-probe timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time between probes of one service.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default consecutive failures before a service is UNHEALTHY.
pub const DEFAULT_UNHEALTHY_THRESHOLD: u32 = 3;

/// Default consecutive successes before a service is HEALTHY again.
pub const DEFAULT_HEALTHY_THRESHOLD: u32 = 2;

/// Default minimum time between two automatic restarts of one service.
pub const DEFAULT_RESTART_COOLDOWN: Duration = Duration::from_secs(300);

// ── Status ────────────────────────────────────────────────────────

/// Health status of a service, or of the whole stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "✅",
            HealthStatus::Degraded => "⚠️",
            HealthStatus::Unhealthy => "❌",
            HealthStatus::Unknown => "❓",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Check strategy ────────────────────────────────────────────────

/// How a service is probed, with its strategy-specific target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStrategy {
    /// GET the URL; healthy iff the response status is below 400.
    Http { url: String },
    /// Open a TCP connection to `host:port`.
    Tcp { host: String, port: u16 },
    /// Run `argv`; healthy iff it exits 0.
    Command { argv: Vec<String> },
    /// Ask the container runtime whether the container is running.
    /// `None` means the container is named after the service.
    RuntimeStatus { container: Option<String> },
}

impl CheckStrategy {
    /// Short strategy name as written in the registry file.
    pub fn kind(&self) -> &'static str {
        match self {
            CheckStrategy::Http { .. } => "http",
            CheckStrategy::Tcp { .. } => "tcp",
            CheckStrategy::Command { .. } => "command",
            CheckStrategy::RuntimeStatus { .. } => "runtime",
        }
    }

    /// Human-readable target, used in logs.
    pub fn target(&self) -> String {
        match self {
            CheckStrategy::Http { url } => url.clone(),
            CheckStrategy::Tcp { host, port } => format!("{host}:{port}"),
            CheckStrategy::Command { argv } => argv.join(" "),
            CheckStrategy::RuntimeStatus { container } => {
                container.clone().unwrap_or_else(|| "-".to_string())
            }
        }
    }

    fn validate(&self, service: &str) -> ConfigResult<()> {
        let malformed = |reason: &str| ConfigError::MalformedTarget {
            service: service.to_string(),
            reason: reason.to_string(),
        };

        match self {
            CheckStrategy::Http { url } => {
                let uri: http::Uri = url
                    .parse()
                    .map_err(|e: http::uri::InvalidUri| malformed(&format!("{url}: {e}")))?;
                match uri.scheme_str() {
                    Some("http") => {}
                    Some(other) => {
                        return Err(malformed(&format!("unsupported scheme {other:?}")));
                    }
                    None => return Err(malformed("url must start with http://")),
                }
                if uri.host().is_none_or(str::is_empty) {
                    return Err(malformed("url has no host"));
                }
            }
            CheckStrategy::Tcp { host, port } => {
                if host.trim().is_empty() {
                    return Err(malformed("tcp host is empty"));
                }
                if *port == 0 {
                    return Err(malformed("tcp port must be non-zero"));
                }
            }
            CheckStrategy::Command { argv } => {
                if argv.first().is_none_or(|program| program.trim().is_empty()) {
                    return Err(malformed("command argv is empty"));
                }
            }
            CheckStrategy::RuntimeStatus { container } => {
                if container.as_deref().is_some_and(|c| c.trim().is_empty()) {
                    return Err(malformed("container name is empty"));
                }
            }
        }
        Ok(())
    }
}

// ── Profile ───────────────────────────────────────────────────────

/// Static health-check configuration for one service.
///
/// Immutable once registered with a health checker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceProfile {
    pub service_id: ServiceId,
    pub strategy: CheckStrategy,
    /// Maximum duration of a single probe.
    pub timeout: Duration,
    /// Time between probes of this service.
    pub poll_interval: Duration,
    /// Consecutive failures required to become UNHEALTHY.
    pub unhealthy_threshold: u32,
    /// Consecutive successes required to become HEALTHY again.
    pub healthy_threshold: u32,
    pub auto_restart: bool,
    /// Minimum time between two automatic restart attempts.
    pub restart_cooldown: Duration,
}

impl ServiceProfile {
    /// Create a profile with the default timings and thresholds.
    pub fn new(service_id: impl Into<ServiceId>, strategy: CheckStrategy) -> Self {
        Self {
            service_id: service_id.into(),
            strategy,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            unhealthy_threshold: DEFAULT_UNHEALTHY_THRESHOLD,
            healthy_threshold: DEFAULT_HEALTHY_THRESHOLD,
            auto_restart: true,
            restart_cooldown: DEFAULT_RESTART_COOLDOWN,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_thresholds(mut self, unhealthy: u32, healthy: u32) -> Self {
        self.unhealthy_threshold = unhealthy;
        self.healthy_threshold = healthy;
        self
    }

    pub fn with_auto_restart(mut self, enabled: bool) -> Self {
        self.auto_restart = enabled;
        self
    }

    pub fn with_restart_cooldown(mut self, cooldown: Duration) -> Self {
        self.restart_cooldown = cooldown;
        self
    }

    /// Container name queried by a runtime-status check.
    pub fn container_name(&self) -> &str {
        match &self.strategy {
            CheckStrategy::RuntimeStatus {
                container: Some(name),
            } => name,
            _ => &self.service_id,
        }
    }

    /// Reject profiles that could never be probed meaningfully.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.service_id.trim().is_empty() {
            return Err(ConfigError::EmptyServiceId);
        }
        let zero = |field: &'static str| ConfigError::ZeroValue {
            service: self.service_id.clone(),
            field,
        };
        if self.timeout.is_zero() {
            return Err(zero("timeout"));
        }
        if self.poll_interval.is_zero() {
            return Err(zero("interval"));
        }
        if self.unhealthy_threshold == 0 {
            return Err(zero("unhealthy_threshold"));
        }
        if self.healthy_threshold == 0 {
            return Err(zero("healthy_threshold"));
        }
        self.strategy.validate(&self.service_id)
    }
}
