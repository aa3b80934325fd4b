//! Health checker: the scheduler/aggregator engine.
//!
//! A single background loop wakes every `tick`, picks the services whose
//! poll interval has elapsed, and probes them concurrently. Results are
//! applied to each service's tracker as they arrive; alerts and restarts
//! follow from the resulting transition. On scheduled ticks they run on their
//! own task, so a slow restart never holds up the next tick.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{watch, Mutex, OwnedMutexGuard, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use stackwatch_core::{HealthStatus, MonitorSettings, ServiceId, ServiceProfile};

use crate::error::{HealthError, HealthResult};
use crate::probe::{ProbeResult, Prober};
use crate::report::overall_status;
use crate::restart::{RestartController, RestartOutcome};
use crate::runtime::{RestartAction, RuntimeStatusSource};
use crate::tracker::{ServiceTracker, TrackerSnapshot, Transition};

/// Callback invoked with the probe result that pushed a service into UNHEALTHY.
pub type AlertCallback = Arc<dyn Fn(ProbeResult) -> BoxFuture + Send + Sync>;

pub type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// One registered service.
pub(crate) struct ServiceSlot {
    pub(crate) profile: ServiceProfile,
    /// Held for the whole probe/record/restart cycle: one probe in flight.
    gate: Arc<Mutex<()>>,
    pub(crate) tracker: RwLock<ServiceTracker>,
}

#[derive(Default)]
struct Registry {
    slots: HashMap<ServiceId, Arc<ServiceSlot>>,
    /// Gate per service ID. An entry stays alive while any cycle still holds
    /// it, so a service registered again under the same ID waits for the
    /// probe or restart its previous registration left running.
    gates: HashMap<ServiceId, Weak<Mutex<()>>>,
}

impl Registry {
    fn gate_for(&mut self, service_id: &str) -> Arc<Mutex<()>> {
        self.gates.retain(|_, gate| gate.strong_count() > 0);
        if let Some(gate) = self.gates.get(service_id).and_then(Weak::upgrade) {
            return gate;
        }
        let gate = Arc::new(Mutex::new(()));
        self.gates.insert(service_id.to_string(), Arc::downgrade(&gate));
        gate
    }
}

/// How a pass treats busy services and the work that follows a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// Timer tick: busy services are skipped, alerts and restarts run detached.
    Scheduled,
    /// Caller-driven: waits for busy services and for its own restarts.
    OnDemand,
}

/// Handle to the running background loop.
struct Worker {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Monitors every registered service and restarts the ones that stay down.
///
/// Cheap to clone; clones share the registry and the background loop.
#[derive(Clone)]
pub struct HealthChecker {
    settings: MonitorSettings,
    services: Arc<RwLock<Registry>>,
    prober: Prober,
    restarts: RestartController,
    /// Bounds probes in flight across all services.
    permits: Arc<Semaphore>,
    on_unhealthy: Option<AlertCallback>,
    worker: Arc<Mutex<Option<Worker>>>,
}

impl HealthChecker {
    /// Create an engine with no registered services.
    pub fn new(
        settings: MonitorSettings,
        runtime: Arc<dyn RuntimeStatusSource>,
        restart: Arc<dyn RestartAction>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_probes.max(1)));
        Self {
            settings,
            services: Arc::new(RwLock::new(Registry::default())),
            prober: Prober::new(runtime),
            restarts: RestartController::new(restart),
            permits,
            on_unhealthy: None,
            worker: Arc::new(Mutex::new(None)),
        }
    }

    /// Set a callback for services entering UNHEALTHY.
    pub fn with_alert_callback(mut self, callback: AlertCallback) -> Self {
        self.on_unhealthy = Some(callback);
        self
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Register a service. Its tracker starts out UNKNOWN.
    pub async fn register(&self, profile: ServiceProfile) -> HealthResult<()> {
        profile.validate()?;

        let mut services = self.services.write().await;
        if services.slots.contains_key(&profile.service_id) {
            return Err(HealthError::AlreadyRegistered(profile.service_id));
        }

        info!(
            service = %profile.service_id,
            check = profile.strategy.kind(),
            target = %profile.strategy.target(),
            "service registered"
        );
        let slot = ServiceSlot {
            tracker: RwLock::new(ServiceTracker::new(&profile, self.settings.history_limit)),
            gate: services.gate_for(&profile.service_id),
            profile,
        };
        services
            .slots
            .insert(slot.profile.service_id.clone(), Arc::new(slot));
        Ok(())
    }

    /// Register several services, stopping at the first invalid one.
    pub async fn register_all(
        &self,
        profiles: impl IntoIterator<Item = ServiceProfile>,
    ) -> HealthResult<()> {
        for profile in profiles {
            self.register(profile).await?;
        }
        Ok(())
    }

    /// Drop a service and its tracker. A probe already in flight finishes
    /// but no restart follows it.
    pub async fn unregister(&self, service_id: &str) -> bool {
        let removed = self
            .services
            .write()
            .await
            .slots
            .remove(service_id)
            .is_some();
        if removed {
            info!(service = %service_id, "service unregistered");
        }
        removed
    }

    /// Registered service IDs, sorted.
    pub async fn services(&self) -> Vec<ServiceId> {
        let services = self.services.read().await;
        let mut ids: Vec<_> = services.slots.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn profile(&self, service_id: &str) -> Option<ServiceProfile> {
        self.slot(service_id).await.map(|s| s.profile.clone())
    }

    pub(crate) async fn slot(&self, service_id: &str) -> Option<Arc<ServiceSlot>> {
        self.services.read().await.slots.get(service_id).cloned()
    }

    /// All slots, sorted by service ID.
    pub(crate) async fn slots(&self) -> Vec<Arc<ServiceSlot>> {
        let services = self.services.read().await;
        let mut slots: Vec<_> = services.slots.values().cloned().collect();
        slots.sort_by(|a, b| a.profile.service_id.cmp(&b.profile.service_id));
        slots
    }

    /// Probe one service now, waiting for any probe already in flight.
    pub async fn check_service(&self, service_id: &str) -> HealthResult<ProbeResult> {
        let slot = self
            .slot(service_id)
            .await
            .ok_or_else(|| HealthError::UnknownService(service_id.to_string()))?;
        let _gate = slot.gate.lock().await;
        let (result, transition) = self.probe_and_record(&slot).await;
        self.follow_up(&slot, &result, transition).await;
        Ok(result)
    }

    /// Probe every registered service now, regardless of poll intervals.
    ///
    /// Waits for in-flight probes of the scheduled loop, then runs its own.
    pub async fn check_all(&self) -> BTreeMap<ServiceId, ProbeResult> {
        let slots = self.slots().await;
        self.dispatch(slots, Pass::OnDemand).await
    }

    /// One scheduler tick: probe the services whose interval has elapsed.
    ///
    /// Services with a probe or restart still in flight are skipped until the
    /// next tick. Alerts and restarts triggered here finish in the background.
    pub async fn tick(&self) -> BTreeMap<ServiceId, ProbeResult> {
        let now = Instant::now();
        let mut due = Vec::new();
        for slot in self.slots().await {
            if slot.tracker.read().await.is_due(slot.profile.poll_interval, now) {
                due.push(slot);
            }
        }
        if due.is_empty() {
            return BTreeMap::new();
        }
        debug!(due = due.len(), "dispatching health probes");
        self.dispatch(due, Pass::Scheduled).await
    }

    /// Fan out one cycle per slot and collect the results.
    async fn dispatch(
        &self,
        slots: Vec<Arc<ServiceSlot>>,
        pass: Pass,
    ) -> BTreeMap<ServiceId, ProbeResult> {
        let mut set = JoinSet::new();
        for slot in slots {
            let this = self.clone();
            set.spawn(async move {
                let gate = match pass {
                    Pass::OnDemand => Arc::clone(&slot.gate).lock_owned().await,
                    Pass::Scheduled => match Arc::clone(&slot.gate).try_lock_owned() {
                        Ok(gate) => gate,
                        Err(_) => {
                            debug!(service = %slot.profile.service_id, "service busy, skipping");
                            return None;
                        }
                    },
                };
                let (result, transition) = this.probe_and_record(&slot).await;
                match pass {
                    Pass::OnDemand => this.follow_up(&slot, &result, transition).await,
                    Pass::Scheduled => {
                        this.spawn_follow_up(gate, Arc::clone(&slot), result.clone(), transition)
                    }
                }
                Some((slot.profile.service_id.clone(), result))
            });
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Some((id, result))) => {
                    results.insert(id, result);
                }
                Ok(None) => {}
                Err(e) => error!(error = %e, "health check task failed"),
            }
        }
        results
    }

    /// Probe and record. The caller holds the slot's gate.
    async fn probe_and_record(&self, slot: &ServiceSlot) -> (ProbeResult, Transition) {
        let result = self.probe(slot).await;

        let transition = slot
            .tracker
            .write()
            .await
            .record(result.clone(), Instant::now());

        if transition.changed() {
            info!(
                service = %slot.profile.service_id,
                from = %transition.previous,
                to = %transition.current,
                "health status changed"
            );
        }
        (result, transition)
    }

    /// Alert on entry into UNHEALTHY, then apply the restart rule.
    async fn follow_up(
        &self,
        slot: &Arc<ServiceSlot>,
        result: &ProbeResult,
        transition: Transition,
    ) {
        if transition.current != HealthStatus::Unhealthy {
            return;
        }

        if transition.entered_unhealthy() {
            warn!(
                service = %slot.profile.service_id,
                message = %result.message,
                "service is unhealthy"
            );
            if let Some(ref cb) = self.on_unhealthy {
                cb(result.clone()).await;
            }
        }

        if self.is_registered(slot).await {
            self.restarts.maybe_restart(&slot.profile, &slot.tracker).await;
        }
    }

    /// Run [`follow_up`](Self::follow_up) on its own task. The gate moves
    /// with it: the service is not probed again until that task is done.
    fn spawn_follow_up(
        &self,
        gate: OwnedMutexGuard<()>,
        slot: Arc<ServiceSlot>,
        result: ProbeResult,
        transition: Transition,
    ) {
        if transition.current != HealthStatus::Unhealthy {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            let _gate = gate;
            this.follow_up(&slot, &result, transition).await;
        });
    }

    /// Run the probe in its own task under a concurrency permit.
    async fn probe(&self, slot: &ServiceSlot) -> ProbeResult {
        let _permit = self.permits.acquire().await.ok();
        let prober = self.prober.clone();
        let profile = slot.profile.clone();
        let started = Instant::now();

        match tokio::spawn(async move { prober.run(&profile).await }).await {
            Ok(result) => result,
            Err(e) => {
                error!(service = %slot.profile.service_id, error = %e, "probe panicked");
                ProbeResult::error(
                    &slot.profile.service_id,
                    format!("probe panicked: {e}"),
                    started.elapsed(),
                )
            }
        }
    }

    async fn is_registered(&self, slot: &Arc<ServiceSlot>) -> bool {
        self.services
            .read()
            .await
            .slots
            .get(&slot.profile.service_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    /// Restart a service now if it is eligible and out of cooldown.
    pub async fn maybe_restart(&self, service_id: &str) -> HealthResult<RestartOutcome> {
        let slot = self
            .slot(service_id)
            .await
            .ok_or_else(|| HealthError::UnknownService(service_id.to_string()))?;
        Ok(self.restarts.maybe_restart(&slot.profile, &slot.tracker).await)
    }

    /// Current tracker state of one service.
    pub async fn snapshot(&self, service_id: &str) -> Option<TrackerSnapshot> {
        let slot = self.slot(service_id).await?;
        let tracker = slot.tracker.read().await;
        Some(tracker.snapshot())
    }

    pub async fn status(&self, service_id: &str) -> Option<HealthStatus> {
        let slot = self.slot(service_id).await?;
        let status = slot.tracker.read().await.status();
        Some(status)
    }

    /// Aggregate status over every registered service.
    pub async fn overall_status(&self) -> HealthStatus {
        let mut statuses = Vec::new();
        for slot in self.slots().await {
            statuses.push(slot.tracker.read().await.status());
        }
        overall_status(statuses)
    }

    /// Start the background loop. Starting a running checker does nothing.
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            warn!("health checker already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let this = self.clone();
        let handle = tokio::spawn(async move {
            this.run_loop(shutdown_rx).await;
        });
        *worker = Some(Worker {
            handle,
            shutdown_tx,
        });

        info!(
            tick_ms = self.settings.tick.as_millis() as u64,
            max_concurrent_probes = self.settings.max_concurrent_probes,
            "health checker started"
        );
    }

    /// Stop the background loop and wait for the current tick to finish.
    ///
    /// A restart the loop already started runs to completion on its own.
    pub async fn stop(&self) {
        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };
        let _ = worker.shutdown_tx.send(true);
        if let Err(e) = worker.handle.await {
            error!(error = %e, "health loop ended abnormally");
        }
        info!("health checker stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    async fn run_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.tick.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!("health loop starting");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // A tick completes once every probe it dispatched has been recorded.
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    debug!("health loop shutting down");
                    break;
                }
            }
        }
    }
}
