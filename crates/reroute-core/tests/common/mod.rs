//! Shared harness: an engine over the metro reference network

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use reroute_core::{
    EngineConfig, EngineError, IngestOutcome, LifecycleEngine, LifecycleEngineBuilder,
    TaskRequest, TaskResult, TaskType,
};
use reroute_model::clock::remaining;
use reroute_model::{Alert, Clock, Incident, IncidentId, IncidentState, MetricKind};
use reroute_sim::fixtures::{degraded_sample, metro_impact, metro_topology};
use reroute_sim::{RecordingSink, SimImpact, SimProvisioning, SimSla, SimTopology, TokioClock};
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub engine: LifecycleEngine,
    pub topology: Arc<SimTopology>,
    pub impact: Arc<SimImpact>,
    pub provisioning: Arc<SimProvisioning>,
    pub sla: Arc<SimSla>,
    pub audit: Arc<RecordingSink>,
    pub notifier: Arc<RecordingSink>,
    pub clock: Arc<TokioClock>,
}

pub fn base() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// Default configuration with drivers off, so tests step by hand
pub fn manual_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.orchestrator.auto_drive = false;
    config
}

pub fn harness(config: EngineConfig) -> Harness {
    harness_with(config, metro_impact(), |b| b)
}

pub fn harness_with(
    config: EngineConfig,
    impact: SimImpact,
    customize: impl FnOnce(LifecycleEngineBuilder) -> LifecycleEngineBuilder,
) -> Harness {
    let topology = Arc::new(metro_topology());
    let impact = Arc::new(impact);
    let provisioning = Arc::new(SimProvisioning::new());
    let sla = Arc::new(SimSla::new(degraded_sample()));
    let audit = Arc::new(RecordingSink::new());
    let notifier = Arc::new(RecordingSink::new());
    let clock = Arc::new(TokioClock::new(base()));

    let builder = LifecycleEngine::builder(config)
        .with_topology(topology.clone())
        .with_impact(impact.clone())
        .with_provisioning(provisioning.clone())
        .with_sla(sla.clone())
        .with_audit(audit.clone())
        .with_notifier(notifier.clone())
        .with_clock(clock.clone());
    let engine = customize(builder).build().unwrap();

    Harness {
        engine,
        topology,
        impact,
        provisioning,
        sla,
        audit,
        notifier,
        clock,
    }
}

impl Harness {
    /// Latency alert for `link` observed now
    pub fn alert(&self, id: &str, link: &str, a: &str, z: &str) -> Alert {
        Alert::raise(id, link, a, z, self.clock.now()).with_violation(MetricKind::Latency)
    }

    /// Ingest an L1 alert and return the new incident
    pub async fn open_l1(&self) -> IncidentId {
        match self.engine.ingest_alert(self.alert("a-1", "L1", "PE1", "P1")).await {
            Ok(IngestOutcome::Created { incident }) => incident,
            other => panic!("expected a new incident, got {other:?}"),
        }
    }

    pub async fn status(&self, id: IncidentId) -> Incident {
        self.engine.status(id).await.unwrap()
    }

    /// Dispatch the task for the persisted state, waiting out `NotDue`
    pub async fn step(&self, id: IncidentId) -> Result<TaskResult, EngineError> {
        loop {
            let state = self.status(id).await.state;
            let task = TaskType::for_state(state).expect("incident is closed");
            match self.engine.dispatch(TaskRequest::new(id, task)).await {
                Err(EngineError::NotDue { due, .. }) => {
                    tokio::time::sleep(remaining(self.clock.now(), due)).await;
                }
                other => return other,
            }
        }
    }

    /// Step until the incident reaches `target`
    pub async fn step_until(&self, id: IncidentId, target: IncidentState, max_steps: usize) {
        for _ in 0..max_steps {
            if self.status(id).await.state == target {
                return;
            }
            self.step(id).await.unwrap();
        }
        assert_eq!(self.status(id).await.state, target, "target not reached");
    }

    /// Let drivers run until `predicate` holds or `limit` of paused time passes
    pub async fn wait_for(
        &self,
        id: IncidentId,
        limit: Duration,
        predicate: impl Fn(&Incident) -> bool,
    ) -> Incident {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let incident = self.status(id).await;
            if predicate(&incident) {
                return incident;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not met, incident stuck in {}",
                incident.state
            );
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    /// Wait until the notifier received `name`; notifications run detached
    pub async fn notified(&self, name: &str) -> bool {
        for _ in 0..20 {
            if self.notifier.names().contains(&name) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}
