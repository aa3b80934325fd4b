//! Reporter: read-only projections of tracker state.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use stackwatch_core::HealthStatus;

use crate::error::{HealthError, HealthResult};
use crate::monitor::HealthChecker;
use crate::probe::{epoch_millis, ProbeOutcome, ProbeResult};

/// Default number of entries returned by a history query.
pub const DEFAULT_HISTORY_QUERY: usize = 50;

/// Aggregate health of the whole stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Unix timestamp (milliseconds) the report was built at.
    pub generated_at_ms: u64,
    pub overall_status: HealthStatus,
    pub services: BTreeMap<String, ServiceReport>,
    pub summary: StatusSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceReport {
    pub status: HealthStatus,
    pub message: Option<String>,
    pub latency_ms: Option<f64>,
    pub consecutive_failures: u32,
    pub last_restart_at_ms: Option<u64>,
}

/// Count of services per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub unknown: usize,
}

impl StatusSummary {
    fn count(&mut self, status: HealthStatus) {
        self.total += 1;
        match status {
            HealthStatus::Healthy => self.healthy += 1,
            HealthStatus::Degraded => self.degraded += 1,
            HealthStatus::Unhealthy => self.unhealthy += 1,
            HealthStatus::Unknown => self.unknown += 1,
        }
    }
}

/// One entry of a service's probe history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub observed_at_ms: u64,
    pub outcome: ProbeOutcome,
    pub message: String,
    pub latency_ms: f64,
}

impl From<&ProbeResult> for HistoryEntry {
    fn from(result: &ProbeResult) -> Self {
        Self {
            observed_at_ms: result.observed_at_ms,
            outcome: result.outcome,
            message: result.message.clone(),
            latency_ms: result.latency_ms(),
        }
    }
}

/// Overall status from per-service statuses.
///
/// UNHEALTHY when strictly more than half are UNHEALTHY, DEGRADED when any
/// is UNHEALTHY or DEGRADED, HEALTHY otherwise (including no services).
pub fn overall_status(statuses: impl IntoIterator<Item = HealthStatus>) -> HealthStatus {
    let mut total = 0usize;
    let mut unhealthy = 0usize;
    let mut degraded = 0usize;
    for status in statuses {
        total += 1;
        match status {
            HealthStatus::Unhealthy => unhealthy += 1,
            HealthStatus::Degraded => degraded += 1,
            _ => {}
        }
    }

    if unhealthy * 2 > total {
        HealthStatus::Unhealthy
    } else if unhealthy > 0 || degraded > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

impl HealthReport {
    /// Build a report from per-service entries.
    pub fn from_services(services: BTreeMap<String, ServiceReport>) -> Self {
        let mut summary = StatusSummary::default();
        for entry in services.values() {
            summary.count(entry.status);
        }
        Self {
            generated_at_ms: epoch_millis(),
            overall_status: overall_status(services.values().map(|s| s.status)),
            services,
            summary,
        }
    }

    /// Human-readable rendering with one line per service.
    pub fn render_text(&self) -> String {
        let mut out = String::from("Health Check Report\n\n");
        for (name, service) in &self.services {
            let latency = service
                .latency_ms
                .map(|ms| format!("({ms:.0}ms)"))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "  {} {:<20} {:<12} {}",
                service.status.symbol(),
                name,
                service.status.as_str(),
                latency
            );
            if service.status != HealthStatus::Healthy {
                if let Some(message) = service.message.as_deref().filter(|m| !m.is_empty()) {
                    let _ = writeln!(out, "     └─ {message}");
                }
            }
        }
        let _ = writeln!(
            out,
            "\n{} Overall Status: {} ({} healthy, {} degraded, {} unhealthy, {} unknown)",
            self.overall_status.symbol(),
            self.overall_status.as_str().to_uppercase(),
            self.summary.healthy,
            self.summary.degraded,
            self.summary.unhealthy,
            self.summary.unknown,
        );
        out
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl HealthChecker {
    /// Run a full pass over every service, then report.
    pub async fn full_report(&self) -> HealthReport {
        self.check_all().await;
        self.snapshot_report().await
    }

    /// Report from current tracker state without probing.
    pub async fn snapshot_report(&self) -> HealthReport {
        let mut services = BTreeMap::new();
        for slot in self.slots().await {
            let snap = slot.tracker.read().await.snapshot();
            services.insert(
                slot.profile.service_id.clone(),
                ServiceReport {
                    status: snap.status,
                    message: snap.message,
                    latency_ms: snap.latency_ms,
                    consecutive_failures: snap.consecutive_failures,
                    last_restart_at_ms: snap.last_restart_at_ms,
                },
            );
        }
        HealthReport::from_services(services)
    }

    /// The last `limit` probe results of a service, oldest first.
    pub async fn history(
        &self,
        service_id: &str,
        limit: Option<usize>,
    ) -> HealthResult<Vec<HistoryEntry>> {
        let slot = self
            .slot(service_id)
            .await
            .ok_or_else(|| HealthError::UnknownService(service_id.to_string()))?;
        let tracker = slot.tracker.read().await;
        Ok(tracker
            .history(limit.unwrap_or(DEFAULT_HISTORY_QUERY))
            .iter()
            .map(HistoryEntry::from)
            .collect())
    }
}
