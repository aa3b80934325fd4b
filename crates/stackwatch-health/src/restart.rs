//! Rate-limited automatic restarts.
//!
//! A restart is attempted only for an UNHEALTHY service with auto-restart
//! enabled, and at most once per `restart_cooldown`. The cooldown runs from
//! the last successful restart. A failed restart is logged and left for the
//! next cycle to retry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{error, info};

use stackwatch_core::{HealthStatus, ServiceProfile};

use crate::probe::epoch_millis;
use crate::runtime::RestartAction;
use crate::tracker::ServiceTracker;

/// What `maybe_restart` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    /// Auto-restart disabled or the service is not UNHEALTHY.
    NotEligible,
    /// The last successful restart is still inside the cooldown window.
    CoolingDown { remaining: Duration },
    /// Another caller is restarting this service right now.
    InProgress,
    /// The restart action reported success.
    Restarted,
    /// The restart action failed; the next eligible cycle will retry.
    Failed,
}

/// Why a restart may not happen right now, or `None` if it may.
fn blocked(
    profile: &ServiceProfile,
    tracker: &ServiceTracker,
    now: Instant,
) -> Option<RestartOutcome> {
    if !profile.auto_restart || tracker.status() != HealthStatus::Unhealthy {
        return Some(RestartOutcome::NotEligible);
    }
    if tracker.restart_in_flight() {
        return Some(RestartOutcome::InProgress);
    }
    let since = now.saturating_duration_since(tracker.last_restarted()?);
    (since < profile.restart_cooldown).then(|| RestartOutcome::CoolingDown {
        remaining: profile.restart_cooldown - since,
    })
}

/// Performs restarts through the injected [`RestartAction`].
#[derive(Clone)]
pub struct RestartController {
    action: Arc<dyn RestartAction>,
}

impl RestartController {
    pub fn new(action: Arc<dyn RestartAction>) -> Self {
        Self { action }
    }

    /// Restart the service if it is eligible and out of cooldown.
    ///
    /// The eligibility check and the in-flight reservation are applied under
    /// one write lock, so two callers can never both pass the gate.
    pub async fn maybe_restart(
        &self,
        profile: &ServiceProfile,
        tracker: &RwLock<ServiceTracker>,
    ) -> RestartOutcome {
        let service = profile.service_id.as_str();
        {
            let mut guard = tracker.write().await;
            match blocked(profile, &guard, Instant::now()) {
                None => {
                    guard.begin_restart();
                }
                Some(RestartOutcome::CoolingDown { remaining }) => {
                    info!(
                        %service,
                        remaining_secs = remaining.as_secs(),
                        "restart cooldown active"
                    );
                    return RestartOutcome::CoolingDown { remaining };
                }
                Some(other) => return other,
            }
        }

        info!(%service, "auto-restarting service");

        // Run the action in its own task so a panicking action is just a failed restart.
        let action = Arc::clone(&self.action);
        let id = service.to_string();
        let restarted = match tokio::spawn(async move { action.restart(&id).await }).await {
            Ok(ok) => ok,
            Err(e) => {
                error!(%service, error = %e, "restart action panicked");
                false
            }
        };

        let mut guard = tracker.write().await;
        if restarted {
            guard.mark_restarted(epoch_millis(), Instant::now());
            info!(%service, "service restarted");
            RestartOutcome::Restarted
        } else {
            guard.restart_failed();
            error!(%service, "failed to restart service");
            RestartOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use stackwatch_core::CheckStrategy;

    use crate::probe::{ProbeOutcome, ProbeResult};

    struct CountingRestart {
        calls: AtomicUsize,
        succeed: AtomicBool,
    }

    impl CountingRestart {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                succeed: AtomicBool::new(succeed),
            })
        }
    }

    #[async_trait]
    impl RestartAction for CountingRestart {
        async fn restart(&self, _service_id: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.succeed.load(Ordering::SeqCst)
        }
    }

    struct SlowRestart {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RestartAction for SlowRestart {
        async fn restart(&self, _service_id: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(10)).await;
            true
        }
    }

    struct PanickingRestart;

    #[async_trait]
    impl RestartAction for PanickingRestart {
        async fn restart(&self, service_id: &str) -> bool {
            panic!("orchestrator exploded while restarting {service_id}");
        }
    }

    fn profile() -> ServiceProfile {
        ServiceProfile::new("redis", CheckStrategy::RuntimeStatus { container: None })
            .with_thresholds(3, 2)
            .with_restart_cooldown(Duration::from_secs(60))
    }

    fn unhealthy_tracker(profile: &ServiceProfile) -> RwLock<ServiceTracker> {
        let mut tracker = ServiceTracker::new(profile, 10);
        for _ in 0..profile.unhealthy_threshold {
            tracker.record(
                ProbeResult {
                    service_id: profile.service_id.clone(),
                    observed_at_ms: 0,
                    outcome: ProbeOutcome::Failure,
                    latency: Duration::ZERO,
                    message: "down".to_string(),
                    raw_details: BTreeMap::new(),
                },
                Instant::now(),
            );
        }
        RwLock::new(tracker)
    }

    #[tokio::test(start_paused = true)]
    async fn restart_then_cooldown_then_retry() {
        let action = CountingRestart::new(true);
        let controller = RestartController::new(action.clone());
        let profile = profile();
        let tracker = unhealthy_tracker(&profile);

        assert_eq!(
            controller.maybe_restart(&profile, &tracker).await,
            RestartOutcome::Restarted
        );
        assert_eq!(tracker.read().await.consecutive_failures(), 0);
        assert!(tracker.read().await.last_restart_at_ms().is_some());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(matches!(
            controller.maybe_restart(&profile, &tracker).await,
            RestartOutcome::CoolingDown { remaining } if remaining == Duration::from_secs(30)
        ));
        assert_eq!(action.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(
            controller.maybe_restart(&profile, &tracker).await,
            RestartOutcome::Restarted
        );
        assert_eq!(action.calls.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.read().await.restart_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_restart_leaves_state_and_retries_next_cycle() {
        let action = CountingRestart::new(false);
        let controller = RestartController::new(action.clone());
        let profile = profile();
        let tracker = unhealthy_tracker(&profile);

        assert_eq!(
            controller.maybe_restart(&profile, &tracker).await,
            RestartOutcome::Failed
        );
        {
            let t = tracker.read().await;
            assert_eq!(t.consecutive_failures(), 3);
            assert_eq!(t.status(), HealthStatus::Unhealthy);
            assert_eq!(t.last_restart_at_ms(), None);
            assert_eq!(t.last_restarted(), None);
            assert!(!t.restart_in_flight());
        }

        // No cooldown after a failure: the very next cycle tries again.
        assert_eq!(
            controller.maybe_restart(&profile, &tracker).await,
            RestartOutcome::Failed
        );
        action.succeed.store(true, Ordering::SeqCst);
        assert_eq!(
            controller.maybe_restart(&profile, &tracker).await,
            RestartOutcome::Restarted
        );
        assert_eq!(action.calls.load(Ordering::SeqCst), 3);

        // The cooldown starts at the successful restart.
        assert!(matches!(
            controller.maybe_restart(&profile, &tracker).await,
            RestartOutcome::CoolingDown { remaining } if remaining == Duration::from_secs(60)
        ));
        assert_eq!(action.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_attempts_run_the_action_once() {
        let action = Arc::new(SlowRestart {
            calls: AtomicUsize::new(0),
        });
        let controller = RestartController::new(action.clone());
        let profile = profile();
        let tracker = Arc::new(unhealthy_tracker(&profile));

        let first = {
            let (controller, profile, tracker) =
                (controller.clone(), profile.clone(), Arc::clone(&tracker));
            tokio::spawn(async move { controller.maybe_restart(&profile, &tracker).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            controller.maybe_restart(&profile, &tracker).await,
            RestartOutcome::InProgress
        );
        assert_eq!(first.await.unwrap(), RestartOutcome::Restarted);
        assert_eq!(action.calls.load(Ordering::SeqCst), 1);
        assert!(!tracker.read().await.restart_in_flight());
    }

    #[tokio::test]
    async fn not_eligible_when_disabled_or_not_unhealthy() {
        let action = CountingRestart::new(true);
        let controller = RestartController::new(action.clone());

        let disabled = profile().with_auto_restart(false);
        let tracker = unhealthy_tracker(&disabled);
        assert_eq!(
            controller.maybe_restart(&disabled, &tracker).await,
            RestartOutcome::NotEligible
        );

        let fresh = RwLock::new(ServiceTracker::new(&profile(), 10));
        assert_eq!(
            controller.maybe_restart(&profile(), &fresh).await,
            RestartOutcome::NotEligible
        );
        assert_eq!(action.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panicking_action_is_a_failed_restart() {
        let controller = RestartController::new(Arc::new(PanickingRestart));
        let profile = profile();
        let tracker = unhealthy_tracker(&profile);
        assert_eq!(
            controller.maybe_restart(&profile, &tracker).await,
            RestartOutcome::Failed
        );
        let t = tracker.read().await;
        assert_eq!(t.status(), HealthStatus::Unhealthy);
        assert!(!t.restart_in_flight());
    }
}
