//! Lifecycle engine
//!
//! Public entry point. Wires the subsystems together, serializes alert
//! intake per link and runs one driver task per open incident. Drivers only
//! ever call [`LifecycleEngine::dispatch`]; everything they know comes from
//! the persisted record, so an engine restarted on the same store picks up
//! where the previous one stopped via [`LifecycleEngine::resume_all`].

use crate::config::{ConfigError, EngineConfig};
use crate::emitter::{EventEmitter, LogSink};
use crate::error::{EngineError, StoreError};
use crate::escalation::{EscalationPolicy, RuleTablePolicy};
use crate::orchestrator::{Orchestrator, OrchestratorParts};
use crate::store::{InMemoryIncidentStore, IncidentStore};
use crate::tasks::{Resolution, TaskRequest, TaskResult, TaskType};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use reroute_correlation::{
    AlertTriage, CorrelationRule, FlapStore, FlapVerdict, InMemoryFlapStore, Triage, TriageStats,
};
use reroute_model::clock::remaining;
use reroute_model::{
    Alert, AuditSink, Clock, Incident, IncidentId, IncidentState, LinkId, NotificationSink,
    ProvisioningApi, ServiceImpactOracle, SlaOracle, SystemClock, TopologyOracle,
};
use reroute_path::PathPlanner;
use reroute_restoration::RestorationController;
use reroute_tunnel::{BindingPool, InMemoryBindingPool, TunnelController};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Intake counters
pub type IntakeStats = TriageStats;

/// What happened to an ingested alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A new incident was opened
    Created {
        /// New incident
        incident: IncidentId,
    },
    /// Same fingerprint already handled
    Duplicate {
        /// Incident that owns the fingerprint
        incident: IncidentId,
    },
    /// Attached to an existing incident
    Correlated {
        /// Target incident
        incident: IncidentId,
        /// Rule that matched
        rule: CorrelationRule,
    },
    /// Link is damped
    Suppressed {
        /// Damping expiry
        until: DateTime<Utc>,
        /// Incident waiting out the damping, if any
        incident: Option<IncidentId>,
    },
    /// Clear alert absorbed
    Cleared,
}

impl IngestOutcome {
    /// Incident the alert ended up on
    #[must_use]
    pub fn incident(&self) -> Option<IncidentId> {
        match self {
            Self::Created { incident }
            | Self::Duplicate { incident }
            | Self::Correlated { incident, .. } => Some(*incident),
            Self::Suppressed { incident, .. } => *incident,
            Self::Cleared => None,
        }
    }
}

/// Engine-wide counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Alert intake decisions
    pub intake: IntakeStats,
    /// Open incidents
    pub active: usize,
    /// Open incidents per state
    pub by_state: BTreeMap<IncidentState, usize>,
    /// Running drivers
    pub drivers: usize,
    /// Links with an alert being handled
    pub intake_in_flight: usize,
}

struct DriverHandle {
    generation: u64,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct Inner {
    orchestrator: Orchestrator,
    triage: Arc<AlertTriage>,
    intake: DashMap<LinkId, Arc<Mutex<()>>>,
    drivers: DashMap<IncidentId, DriverHandle>,
    generation: AtomicU64,
    shutting_down: AtomicBool,
}

/// Incident lifecycle engine
#[derive(Clone)]
pub struct LifecycleEngine {
    inner: Arc<Inner>,
}

impl fmt::Debug for LifecycleEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleEngine")
            .field("orchestrator", &self.inner.orchestrator)
            .field("drivers", &self.inner.drivers.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`LifecycleEngine`]
///
/// The four network collaborators are required. Everything else falls back
/// to a process-local default: log sinks, the system clock, in-memory stores
/// and the configured rule table.
#[derive(Default)]
pub struct LifecycleEngineBuilder {
    config: EngineConfig,
    topology: Option<Arc<dyn TopologyOracle>>,
    impact: Option<Arc<dyn ServiceImpactOracle>>,
    provisioning: Option<Arc<dyn ProvisioningApi>>,
    sla: Option<Arc<dyn SlaOracle>>,
    audit: Option<Arc<dyn AuditSink>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    clock: Option<Arc<dyn Clock>>,
    store: Option<Arc<dyn IncidentStore>>,
    flap_store: Option<Arc<dyn FlapStore>>,
    binding_pool: Option<Arc<dyn BindingPool>>,
    policy: Option<Arc<dyn EscalationPolicy>>,
}

impl fmt::Debug for LifecycleEngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleEngineBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LifecycleEngineBuilder {
    /// Builder with `config`
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Topology oracle (required)
    #[must_use]
    pub fn with_topology(mut self, topology: Arc<dyn TopologyOracle>) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Service impact oracle (required)
    #[must_use]
    pub fn with_impact(mut self, impact: Arc<dyn ServiceImpactOracle>) -> Self {
        self.impact = Some(impact);
        self
    }

    /// Provisioning API (required)
    #[must_use]
    pub fn with_provisioning(mut self, provisioning: Arc<dyn ProvisioningApi>) -> Self {
        self.provisioning = Some(provisioning);
        self
    }

    /// SLA oracle (required)
    #[must_use]
    pub fn with_sla(mut self, sla: Arc<dyn SlaOracle>) -> Self {
        self.sla = Some(sla);
        self
    }

    /// Audit sink
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Notification sink
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Incident store
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn IncidentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Flap history store
    #[must_use]
    pub fn with_flap_store(mut self, flap_store: Arc<dyn FlapStore>) -> Self {
        self.flap_store = Some(flap_store);
        self
    }

    /// Binding-id pool
    #[must_use]
    pub fn with_binding_pool(mut self, pool: Arc<dyn BindingPool>) -> Self {
        self.binding_pool = Some(pool);
        self
    }

    /// Escalation policy
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn EscalationPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Validate the configuration and assemble the engine
    ///
    /// # Errors
    /// `ConfigError::Missing` when a required collaborator was not set, or
    /// whatever [`EngineConfig::validate`] reports.
    pub fn build(self) -> Result<LifecycleEngine, ConfigError> {
        self.config.validate()?;
        let topology = self.topology.ok_or(ConfigError::Missing("topology oracle"))?;
        let impact = self.impact.ok_or(ConfigError::Missing("service impact oracle"))?;
        let provisioning = self
            .provisioning
            .ok_or(ConfigError::Missing("provisioning api"))?;
        let sla = self.sla.ok_or(ConfigError::Missing("sla oracle"))?;

        let config = self.config;
        let orchestrator_config = config.orchestrator.clone();
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = self.store.unwrap_or_else(|| {
            Arc::new(InMemoryIncidentStore::new(
                orchestrator_config.archive_capacity,
                orchestrator_config.archive_ttl(),
            ))
        });
        let flap_store = self
            .flap_store
            .unwrap_or_else(|| Arc::new(InMemoryFlapStore::new()));
        let pool = self.binding_pool.unwrap_or_else(|| {
            Arc::new(InMemoryBindingPool::new(config.tunnel.binding_ranges))
        });
        let policy = self.policy.unwrap_or_else(|| {
            Arc::new(RuleTablePolicy::new(orchestrator_config.escalation_rules))
        });
        let emitter = EventEmitter::new(
            self.audit.unwrap_or_else(|| Arc::new(LogSink)),
            self.notifier.unwrap_or_else(|| Arc::new(LogSink)),
            orchestrator_config.call_timeout(),
        );

        let triage = Arc::new(AlertTriage::new(&config.correlation, flap_store));
        let tunnels =
            TunnelController::new(config.tunnel, provisioning, pool, Arc::clone(&clock));
        let restoration = RestorationController::new(
            config.restoration,
            sla,
            tunnels.clone(),
            Arc::clone(&clock),
        );
        let orchestrator = Orchestrator::new(OrchestratorParts {
            config: orchestrator_config,
            store,
            triage: Arc::clone(&triage),
            impact,
            planner: PathPlanner::new(config.planner, topology),
            tunnels,
            restoration,
            policy,
            emitter,
            clock,
        });

        tracing::info!(version = crate::VERSION, "lifecycle engine built");
        Ok(LifecycleEngine {
            inner: Arc::new(Inner {
                orchestrator,
                triage,
                intake: DashMap::new(),
                drivers: DashMap::new(),
                generation: AtomicU64::new(0),
                shutting_down: AtomicBool::new(false),
            }),
        })
    }
}

impl LifecycleEngine {
    /// Start building an engine
    #[inline]
    #[must_use]
    pub fn builder(config: EngineConfig) -> LifecycleEngineBuilder {
        LifecycleEngineBuilder::new(config)
    }

    fn ensure_running(&self) -> Result<(), EngineError> {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            Err(EngineError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    fn auto_drive(&self) -> bool {
        self.inner.orchestrator.config().auto_drive
    }

    /// Triage an alert and open, extend or drop an incident accordingly
    ///
    /// Alerts for the same link are handled one at a time.
    ///
    /// # Errors
    /// Store failures while persisting the incident, or
    /// `EngineError::ShuttingDown`.
    pub async fn ingest_alert(&self, alert: Alert) -> Result<IngestOutcome, EngineError> {
        self.ensure_running()?;
        let link = alert.link.clone();
        let lock = Arc::clone(self.inner.intake.entry(link.clone()).or_default().value());
        let result = {
            let _guard = lock.lock().await;
            self.ingest_locked(alert).await
        };
        drop(lock);
        // Only the map still holds the lock when nobody else is queued on it
        self.inner
            .intake
            .remove_if(&link, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn ingest_locked(&self, alert: Alert) -> Result<IngestOutcome, EngineError> {
        let outcome = match self.inner.triage.triage(&alert) {
            Triage::Suppressed { until, incident } => {
                tracing::debug!(link = %alert.link, %until, "alert suppressed, link damped");
                IngestOutcome::Suppressed { until, incident }
            }
            Triage::Cleared { .. } => IngestOutcome::Cleared,
            Triage::Duplicate { incident } => IngestOutcome::Duplicate { incident },
            Triage::Correlated {
                incident,
                rule,
                flap,
            } => {
                if self
                    .inner
                    .orchestrator
                    .attach(incident, &alert, rule, flap)
                    .await?
                {
                    if self.auto_drive() {
                        self.drive(incident);
                    }
                    IngestOutcome::Correlated { incident, rule }
                } else {
                    self.open(&alert, flap).await?
                }
            }
            Triage::Open { flap } => self.open(&alert, flap).await?,
        };
        Ok(outcome)
    }

    async fn open(
        &self,
        alert: &Alert,
        flap: FlapVerdict,
    ) -> Result<IngestOutcome, EngineError> {
        let incident = self.inner.orchestrator.open(alert, flap).await?;
        if self.auto_drive() {
            self.drive(incident.id);
        }
        Ok(IngestOutcome::Created {
            incident: incident.id,
        })
    }

    /// Run one step for one incident
    ///
    /// # Errors
    /// `TaskStateMismatch` when the task does not match the persisted state,
    /// `NotDue` when the step's wait has not elapsed, and whatever the step
    /// itself fails with. A failed step leaves the record unchanged.
    pub async fn dispatch(&self, request: TaskRequest) -> Result<TaskResult, EngineError> {
        self.ensure_running()?;
        self.inner.orchestrator.dispatch(&request).await
    }

    /// Close an escalated incident on behalf of an operator
    ///
    /// # Errors
    /// As [`dispatch`](Self::dispatch).
    pub async fn resolve(
        &self,
        incident: IncidentId,
        resolution: Resolution,
    ) -> Result<TaskResult, EngineError> {
        self.dispatch(TaskRequest::resolve(incident, resolution)).await
    }

    /// Current record of an incident, active or archived
    ///
    /// # Errors
    /// `StoreError::NotFound` for unknown ids.
    pub async fn status(&self, incident: IncidentId) -> Result<Incident, EngineError> {
        Ok(self.inner.orchestrator.store().load(incident).await?)
    }

    /// Every open incident
    ///
    /// # Errors
    /// Store failures.
    pub async fn active_incidents(&self) -> Result<Vec<Incident>, EngineError> {
        let store = self.inner.orchestrator.store();
        let mut incidents = Vec::new();
        for id in store.list_active().await? {
            match store.load(id).await {
                Ok(incident) if !incident.is_closed() => incidents.push(incident),
                Ok(_) | Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(incidents)
    }

    /// Engine-wide counters
    ///
    /// # Errors
    /// Store failures.
    pub async fn stats(&self) -> Result<EngineStats, EngineError> {
        let active = self.active_incidents().await?;
        let mut by_state = BTreeMap::new();
        for incident in &active {
            *by_state.entry(incident.state).or_insert(0) += 1;
        }
        Ok(EngineStats {
            intake: self.inner.triage.stats(),
            active: active.len(),
            by_state,
            drivers: self.inner.drivers.len(),
            intake_in_flight: self.inner.intake.len(),
        })
    }

    // ------------------------------------------------------------------
    // Drivers
    // ------------------------------------------------------------------

    /// Start, or restart, the driver for an incident
    ///
    /// The driver dispatches the task for the persisted state whenever it is
    /// due, until the incident closes, escalates or the driver is cancelled.
    pub fn drive(&self, incident: IncidentId) {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return;
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let (cancel, signal) = watch::channel(false);
        // Hold the slot so a driver that finishes at once cannot miss its own handle
        let slot = self.inner.drivers.entry(incident);
        let task = tokio::spawn(run_driver(
            Arc::clone(&self.inner),
            incident,
            generation,
            signal,
        ));
        let handle = DriverHandle {
            generation,
            cancel,
            task,
        };
        match slot {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(handle);
                let _ = previous.cancel.send(true);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(handle);
            }
        }
    }

    /// Start drivers for every open incident in the store
    ///
    /// # Errors
    /// Store failures.
    pub async fn resume_all(&self) -> Result<usize, EngineError> {
        self.ensure_running()?;
        let ids = self.inner.orchestrator.store().list_active().await?;
        for id in &ids {
            self.drive(*id);
        }
        tracing::info!(count = ids.len(), "resumed incident drivers");
        Ok(ids.len())
    }

    /// Stop the driver for an incident; the record stays as persisted
    pub fn cancel(&self, incident: IncidentId) -> bool {
        match self.inner.drivers.remove(&incident) {
            Some((_, handle)) => {
                let _ = handle.cancel.send(true);
                true
            }
            None => false,
        }
    }

    /// Refuse new work and wait for every driver to stop
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::Release);
        let ids: Vec<IncidentId> = self.inner.drivers.iter().map(|d| *d.key()).collect();
        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, handle)) = self.inner.drivers.remove(&id) {
                let _ = handle.cancel.send(true);
                tasks.push(handle.task);
            }
        }
        let stopped = tasks.len();
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                tracing::warn!("driver task ended abnormally: {}", e);
            }
        }
        tracing::info!(drivers = stopped, "lifecycle engine stopped");
    }
}

/// Sleep for `wait` unless cancelled first; `true` when cancelled
async fn pause(cancel: &mut watch::Receiver<bool>, wait: Duration) -> bool {
    if *cancel.borrow() {
        return true;
    }
    tokio::select! {
        () = tokio::time::sleep(wait) => false,
        changed = cancel.changed() => changed.is_err() || *cancel.borrow(),
    }
}

async fn run_driver(
    inner: Arc<Inner>,
    id: IncidentId,
    generation: u64,
    mut cancel: watch::Receiver<bool>,
) {
    let orchestrator = &inner.orchestrator;
    let retry = orchestrator.config().driver_retry();
    let mut failures = 0u32;

    loop {
        if *cancel.borrow() {
            break;
        }
        let incident = match orchestrator.store().load(id).await {
            Ok(incident) => incident,
            Err(e) => {
                let e = EngineError::from(e);
                if e.is_retryable() && failures + 1 < retry.max_attempts() {
                    failures += 1;
                    if pause(&mut cancel, retry.backoff(failures)).await {
                        break;
                    }
                    continue;
                }
                tracing::warn!(incident = %id, "driver cannot load incident: {}", e);
                break;
            }
        };

        let Some(task) = TaskType::for_state(incident.state).filter(|t| t.is_automated()) else {
            break;
        };

        if let Some(due) = orchestrator.next_due(&incident) {
            let wait = remaining(orchestrator.clock().now(), due);
            if !wait.is_zero() {
                if pause(&mut cancel, wait).await {
                    break;
                }
                continue;
            }
        }

        match orchestrator.dispatch(&TaskRequest::new(id, task)).await {
            Ok(result) => {
                failures = 0;
                tracing::debug!(
                    incident = %id,
                    task = %result.task_type,
                    to = result.to.as_str(),
                    "driver step"
                );
            }
            Err(EngineError::NotDue { .. } | EngineError::TaskStateMismatch { .. }) => {}
            Err(e) if e.is_retryable() && failures + 1 < retry.max_attempts() => {
                failures += 1;
                let delay = retry.backoff(failures);
                tracing::warn!(
                    incident = %id,
                    task = %task,
                    attempt = failures,
                    "step failed, retrying: {}",
                    e
                );
                if pause(&mut cancel, delay).await {
                    break;
                }
            }
            Err(e) => {
                metrics::counter!("reroute_driver_failures_total", "task" => task.as_str())
                    .increment(1);
                tracing::error!(incident = %id, task = %task, "driver stopped: {}", e);
                break;
            }
        }
    }

    inner
        .drivers
        .remove_if(&id, |_, handle| handle.generation == generation);
}
