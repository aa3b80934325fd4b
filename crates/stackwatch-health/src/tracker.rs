//! Per-service state tracker and hysteresis state machine.
//!
//! Status changes are driven only by consecutive-count thresholds:
//!
//! ```text
//!            success                      failures >= unhealthy_threshold
//! UNKNOWN ──────────▶ HEALTHY ──failure──▶ DEGRADED ─────────────────────▶ UNHEALTHY
//!    │                   ▲                    │  ▲                            │
//!    └────failure────────┼───────────────────▶┘  └──success (< healthy_thr)───┘
//!                        └──────── successes >= healthy_threshold ────────────┘
//! ```
//!
//! UNKNOWN is left on the first result and never re-entered.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use stackwatch_core::{HealthStatus, ServiceProfile};

use crate::probe::{ProbeOutcome, ProbeResult};

/// Status change produced by recording one result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous: HealthStatus,
    pub current: HealthStatus,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }

    /// True exactly on the result that pushed the service into UNHEALTHY.
    pub fn entered_unhealthy(&self) -> bool {
        self.current == HealthStatus::Unhealthy && self.previous != HealthStatus::Unhealthy
    }
}

/// Point-in-time copy of a tracker, safe to hand to readers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerSnapshot {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Message of the most recent probe, if any.
    pub message: Option<String>,
    /// Latency of the most recent probe in milliseconds.
    pub latency_ms: Option<f64>,
    pub last_outcome: Option<ProbeOutcome>,
    /// Unix timestamp (milliseconds) of the last successful restart.
    pub last_restart_at_ms: Option<u64>,
    pub restart_count: u32,
}

/// Mutable health state of one service.
#[derive(Debug)]
pub struct ServiceTracker {
    status: HealthStatus,
    consecutive_failures: u32,
    consecutive_successes: u32,
    unhealthy_threshold: u32,
    healthy_threshold: u32,
    /// Most recent results, oldest first.
    history: VecDeque<ProbeResult>,
    history_limit: usize,
    last_probe_at: Option<Instant>,
    last_restart_at_ms: Option<u64>,
    /// Monotonic twin of `last_restart_at_ms`; the cooldown runs from here.
    last_restarted: Option<Instant>,
    restart_in_flight: bool,
    restart_count: u32,
}

impl ServiceTracker {
    /// Create a tracker for a registered profile.
    pub fn new(profile: &ServiceProfile, history_limit: usize) -> Self {
        Self::with_thresholds(
            profile.unhealthy_threshold,
            profile.healthy_threshold,
            history_limit,
        )
    }

    /// Create a tracker with explicit thresholds.
    pub fn with_thresholds(
        unhealthy_threshold: u32,
        healthy_threshold: u32,
        history_limit: usize,
    ) -> Self {
        Self {
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            unhealthy_threshold: unhealthy_threshold.max(1),
            healthy_threshold: healthy_threshold.max(1),
            history: VecDeque::with_capacity(history_limit.min(128)),
            history_limit: history_limit.max(1),
            last_probe_at: None,
            last_restart_at_ms: None,
            last_restarted: None,
            restart_in_flight: false,
            restart_count: 0,
        }
    }

    /// Apply one probe result: counters, status and history move together.
    pub fn record(&mut self, result: ProbeResult, now: Instant) -> Transition {
        let previous = self.status;
        self.apply(result.outcome);

        if self.history.len() == self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(result);
        self.last_probe_at = Some(now);

        Transition {
            previous,
            current: self.status,
        }
    }

    fn apply(&mut self, outcome: ProbeOutcome) {
        if outcome.is_success() {
            self.consecutive_failures = 0;
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);

            self.status = match self.status {
                HealthStatus::Unknown | HealthStatus::Healthy => HealthStatus::Healthy,
                HealthStatus::Degraded | HealthStatus::Unhealthy => {
                    if self.consecutive_successes >= self.healthy_threshold {
                        debug!(
                            successes = self.consecutive_successes,
                            "service recovered to healthy"
                        );
                        HealthStatus::Healthy
                    } else {
                        HealthStatus::Degraded
                    }
                }
            };
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);

            if self.consecutive_failures >= self.unhealthy_threshold {
                if self.status != HealthStatus::Unhealthy {
                    warn!(
                        failures = self.consecutive_failures,
                        threshold = self.unhealthy_threshold,
                        "service marked unhealthy"
                    );
                }
                self.status = HealthStatus::Unhealthy;
            } else if self.status != HealthStatus::Unhealthy {
                self.status = HealthStatus::Degraded;
            }
        }
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn last_restart_at_ms(&self) -> Option<u64> {
        self.last_restart_at_ms
    }

    /// When the last successful restart completed.
    pub fn last_restarted(&self) -> Option<Instant> {
        self.last_restarted
    }

    pub fn restart_in_flight(&self) -> bool {
        self.restart_in_flight
    }

    /// Whether `interval` has passed since the last completed probe.
    pub fn is_due(&self, interval: Duration, now: Instant) -> bool {
        self.last_probe_at
            .is_none_or(|last| now.saturating_duration_since(last) >= interval)
    }

    /// Reserve the restart slot. Returns `false` if an attempt is already running.
    pub(crate) fn begin_restart(&mut self) -> bool {
        !std::mem::replace(&mut self.restart_in_flight, true)
    }

    /// A restart attempt failed: release the reservation and nothing else.
    pub(crate) fn restart_failed(&mut self) {
        self.restart_in_flight = false;
    }

    /// A restart went through: start counting failures afresh.
    ///
    /// The status is left alone; only `healthy_threshold` successes clear UNHEALTHY.
    pub(crate) fn mark_restarted(&mut self, at_ms: u64, now: Instant) {
        self.restart_in_flight = false;
        self.consecutive_failures = 0;
        self.last_restart_at_ms = Some(at_ms);
        self.last_restarted = Some(now);
        self.restart_count = self.restart_count.saturating_add(1);
    }

    /// Up to `limit` most recent results, oldest first.
    pub fn history(&self, limit: usize) -> Vec<ProbeResult> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn last_result(&self) -> Option<&ProbeResult> {
        self.history.back()
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let last = self.history.back();
        TrackerSnapshot {
            status: self.status,
            consecutive_failures: self.consecutive_failures,
            consecutive_successes: self.consecutive_successes,
            message: last.map(|r| r.message.clone()),
            latency_ms: last.map(ProbeResult::latency_ms),
            last_outcome: last.map(|r| r.outcome),
            last_restart_at_ms: self.last_restart_at_ms,
            restart_count: self.restart_count,
        }
    }
}
