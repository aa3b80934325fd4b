//! Health checking and auto-recovery for a service stack.
//!
//! Probes each registered service with its configured strategy, tracks
//! consecutive results with hysteresis, and restarts services that stay
//! down, at most once per cooldown window.
//!
//! # Architecture
//!
//! ```text
//! HealthChecker
//!   ├── Background loop (one global tick)
//!   │   ├── due services → Prober::run() → ProbeResult   (bounded by a semaphore)
//!   │   ├── ServiceTracker::record() → Transition        (per-service lock)
//!   │   └── detached per service, holding its gate:
//!   │       ├── AlertCallback on entry to UNHEALTHY
//!   │       └── RestartController::maybe_restart()       (cooldown-gated)
//!   └── Reporter: full_report(), snapshot_report(), history()
//! ```
//!
//! The engine never talks to a container runtime directly: status lookups
//! go through [`RuntimeStatusSource`] and recovery through [`RestartAction`].

pub mod error;
pub mod monitor;
pub mod probe;
pub mod report;
pub mod restart;
pub mod runtime;
pub mod tracker;

pub use error::{HealthError, HealthResult};
pub use monitor::{AlertCallback, BoxFuture, HealthChecker};
pub use probe::{ProbeOutcome, ProbeResult, Prober};
pub use report::{
    DEFAULT_HISTORY_QUERY, HealthReport, HistoryEntry, ServiceReport, StatusSummary,
    overall_status,
};
pub use restart::{RestartController, RestartOutcome};
pub use runtime::{RestartAction, RuntimeState, RuntimeStatusSource};
pub use tracker::{ServiceTracker, TrackerSnapshot, Transition};
