//! stackwatch.toml registry parser.
//!
//! The file holds monitor-wide settings plus one table per service:
//!
//! ```toml
//! [monitor]
//! tick = "1s"
//! max_concurrent_probes = 10
//! history_limit = 100
//!
//! [services.qdrant]
//! check = "http"
//! url = "http://localhost:6333/readyz"
//! timeout = "5s"
//! ```
//!
//! Raw entries are converted into validated [`ServiceProfile`]s up front so
//! that a bad strategy or target is rejected at registration time.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::{format_duration, parse_duration};
use crate::error::{ConfigError, ConfigResult};
use crate::types::*;

/// Default scheduler tick resolution.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Default bound on probes running at the same time.
pub const DEFAULT_MAX_CONCURRENT_PROBES: usize = 10;

/// Default number of probe results kept per service.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackwatchConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub tick: Option<String>,
    pub max_concurrent_probes: Option<usize>,
    pub history_limit: Option<usize>,
}

/// One `[services.<id>]` table as written in the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceEntry {
    /// "http", "tcp", "command" or "runtime" ("docker" is accepted as an alias).
    pub check: String,
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub command: Option<Vec<String>>,
    pub container: Option<String>,
    pub timeout: Option<String>,
    pub interval: Option<String>,
    pub unhealthy_threshold: Option<u32>,
    pub healthy_threshold: Option<u32>,
    pub auto_restart: Option<bool>,
    pub restart_cooldown: Option<String>,
}

/// Monitor-wide settings after defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    /// How often the scheduler looks for services that are due.
    pub tick: Duration,
    pub max_concurrent_probes: usize,
    pub history_limit: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            max_concurrent_probes: DEFAULT_MAX_CONCURRENT_PROBES,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl StackwatchConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Monitor settings with defaults filled in.
    pub fn settings(&self) -> ConfigResult<MonitorSettings> {
        let defaults = MonitorSettings::default();
        let tick = match &self.monitor.tick {
            Some(raw) => parse_duration(raw)
                .filter(|d| !d.is_zero())
                .ok_or_else(|| ConfigError::InvalidSetting {
                    field: "tick",
                    reason: format!("{raw:?} is not a positive duration"),
                })?,
            None => defaults.tick,
        };
        let max_concurrent_probes = self
            .monitor
            .max_concurrent_probes
            .unwrap_or(defaults.max_concurrent_probes);
        if max_concurrent_probes == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "max_concurrent_probes",
                reason: "must be at least 1".to_string(),
            });
        }
        let history_limit = self.monitor.history_limit.unwrap_or(defaults.history_limit);
        if history_limit == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "history_limit",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(MonitorSettings {
            tick,
            max_concurrent_probes,
            history_limit,
        })
    }

    /// Validated profiles for every service, in id order.
    pub fn profiles(&self) -> ConfigResult<Vec<ServiceProfile>> {
        self.services
            .iter()
            .map(|(id, entry)| entry.to_profile(id))
            .collect()
    }

    /// The registry of the self-hosted AI stack, used when no file is given.
    pub fn default_stack() -> Self {
        let mut services = BTreeMap::new();
        let mut http = |id: &str, url: &str, timeout: &str, interval: &str| {
            services.insert(
                id.to_string(),
                ServiceEntry {
                    check: "http".to_string(),
                    url: Some(url.to_string()),
                    timeout: Some(timeout.to_string()),
                    interval: Some(interval.to_string()),
                    ..Default::default()
                },
            );
        };
        http("ollama", "http://localhost:11434/api/tags", "10s", "30s");
        http("qdrant", "http://localhost:6333/readyz", "5s", "30s");
        http("supabase-kong", "http://localhost:8000/", "10s", "30s");
        http("n8n", "http://localhost:5678/healthz", "10s", "30s");
        http("langfuse", "http://localhost:3002/api/public/health", "10s", "60s");
        http("open-webui", "http://localhost:3003/", "10s", "30s");
        http("flowise", "http://localhost:3004/", "10s", "60s");
        http("searxng", "http://localhost:8888/", "10s", "60s");

        let mut command = |id: &str, argv: &[&str], timeout: &str, interval: &str| {
            services.insert(
                id.to_string(),
                ServiceEntry {
                    check: "command".to_string(),
                    command: Some(argv.iter().map(|s| s.to_string()).collect()),
                    timeout: Some(timeout.to_string()),
                    interval: Some(interval.to_string()),
                    ..Default::default()
                },
            );
        };
        command(
            "redis",
            &["docker", "exec", "redis", "redis-cli", "ping"],
            "5s",
            "15s",
        );
        command(
            "supabase-db",
            &["docker", "exec", "supabase-db", "pg_isready", "-U", "postgres"],
            "10s",
            "30s",
        );

        services.insert(
            "caddy".to_string(),
            ServiceEntry {
                check: "runtime".to_string(),
                timeout: Some("5s".to_string()),
                interval: Some("30s".to_string()),
                ..Default::default()
            },
        );

        StackwatchConfig {
            monitor: MonitorConfig::default(),
            services,
        }
    }
}

impl ServiceEntry {
    /// Convert into a validated profile for `service_id`.
    pub fn to_profile(&self, service_id: &str) -> ConfigResult<ServiceProfile> {
        let missing = |what: &str| ConfigError::MalformedTarget {
            service: service_id.to_string(),
            reason: format!("{} check requires `{what}`", self.check),
        };

        let strategy = match self.check.trim().to_ascii_lowercase().as_str() {
            "http" => CheckStrategy::Http {
                url: self.url.clone().ok_or_else(|| missing("url"))?,
            },
            "tcp" => CheckStrategy::Tcp {
                host: self.host.clone().unwrap_or_else(|| "localhost".to_string()),
                port: self.port.ok_or_else(|| missing("port"))?,
            },
            "command" => CheckStrategy::Command {
                argv: self.command.clone().ok_or_else(|| missing("command"))?,
            },
            "runtime" | "docker" => CheckStrategy::RuntimeStatus {
                container: self.container.clone(),
            },
            other => {
                return Err(ConfigError::UnknownStrategy {
                    service: service_id.to_string(),
                    strategy: other.to_string(),
                });
            }
        };

        let duration = |field: &'static str, raw: &Option<String>, default: Duration| match raw {
            Some(value) => parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
                service: service_id.to_string(),
                field,
                value: value.clone(),
            }),
            None => Ok(default),
        };

        let profile = ServiceProfile {
            service_id: service_id.to_string(),
            strategy,
            timeout: duration("timeout", &self.timeout, DEFAULT_TIMEOUT)?,
            poll_interval: duration("interval", &self.interval, DEFAULT_POLL_INTERVAL)?,
            unhealthy_threshold: self
                .unhealthy_threshold
                .unwrap_or(DEFAULT_UNHEALTHY_THRESHOLD),
            healthy_threshold: self.healthy_threshold.unwrap_or(DEFAULT_HEALTHY_THRESHOLD),
            auto_restart: self.auto_restart.unwrap_or(true),
            restart_cooldown: duration(
                "restart_cooldown",
                &self.restart_cooldown,
                DEFAULT_RESTART_COOLDOWN,
            )?,
        };
        profile.validate()?;
        Ok(profile)
    }

    /// Inverse of [`ServiceEntry::to_profile`], with every field spelled out.
    pub fn from_profile(profile: &ServiceProfile) -> Self {
        let mut entry = ServiceEntry {
            check: profile.strategy.kind().to_string(),
            timeout: Some(format_duration(profile.timeout)),
            interval: Some(format_duration(profile.poll_interval)),
            unhealthy_threshold: Some(profile.unhealthy_threshold),
            healthy_threshold: Some(profile.healthy_threshold),
            auto_restart: Some(profile.auto_restart),
            restart_cooldown: Some(format_duration(profile.restart_cooldown)),
            ..Default::default()
        };
        match &profile.strategy {
            CheckStrategy::Http { url } => entry.url = Some(url.clone()),
            CheckStrategy::Tcp { host, port } => {
                entry.host = Some(host.clone());
                entry.port = Some(*port);
            }
            CheckStrategy::Command { argv } => entry.command = Some(argv.clone()),
            CheckStrategy::RuntimeStatus { container } => entry.container = container.clone(),
        }
        entry
    }
}
