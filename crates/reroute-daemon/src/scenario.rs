//! Scripted incidents over the simulated metro network
//!
//! Each scenario opens one incident on L1 (PE1-P1) and lets the engine's
//! drivers carry it, nudging the simulated network along the way.

use anyhow::{bail, Result};
use clap::ValueEnum;
use reroute_core::{CascadePolicy, EngineConfig, IngestOutcome, LifecycleEngine};
use reroute_model::{
    Alert, Clock, EscalationReason, Incident, IncidentId, IncidentState, LifecycleEvent, LinkId,
    MetricKind, Outcome,
};
use reroute_sim::fixtures::{
    degraded_sample, healthy_sample, metro_endpoints, metro_impact, metro_topology,
};
use reroute_sim::{RecordingSink, SimProvisioning, SimSla, SimTopology, TokioClock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Longest simulated time any scenario may take
const SCENARIO_LIMIT: Duration = Duration::from_secs(3_600);

/// Scenario catalogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Scenario {
    /// Degrade, protect, recover and restore
    Recovery,
    /// Head end cut off from every alternate route
    NoPath,
    /// Link flaps before it settles into a degradation
    Flapping,
    /// Protection path degrades while the original is still down
    Cascade,
}

impl Scenario {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Recovery => "recovery",
            Self::NoPath => "no-path",
            Self::Flapping => "flapping",
            Self::Cascade => "cascade",
        }
    }
}

/// Result of one scenario run
#[derive(Debug, Serialize)]
pub(crate) struct ScenarioReport {
    pub(crate) scenario: Scenario,
    pub(crate) incident: Incident,
    pub(crate) audit: Vec<LifecycleEvent>,
    pub(crate) live_tunnels: usize,
    pub(crate) elapsed_secs: i64,
    pub(crate) as_expected: bool,
}

impl ScenarioReport {
    pub(crate) fn expected(&self) -> bool {
        self.as_expected
    }
}

struct Network {
    engine: LifecycleEngine,
    topology: Arc<SimTopology>,
    provisioning: Arc<SimProvisioning>,
    sla: Arc<SimSla>,
    audit: Arc<RecordingSink>,
    clock: Arc<TokioClock>,
}

impl Network {
    fn new(config: EngineConfig) -> Result<Self> {
        let topology = Arc::new(metro_topology());
        let provisioning = Arc::new(SimProvisioning::new());
        let sla = Arc::new(SimSla::new(degraded_sample()));
        let audit = Arc::new(RecordingSink::new());
        let clock = Arc::new(TokioClock::new(chrono::Utc::now()));

        let engine = LifecycleEngine::builder(config)
            .with_topology(topology.clone())
            .with_impact(Arc::new(metro_impact()))
            .with_provisioning(provisioning.clone())
            .with_sla(sla.clone())
            .with_audit(audit.clone())
            .with_clock(clock.clone())
            .build()?;

        Ok(Self {
            engine,
            topology,
            provisioning,
            sla,
            audit,
            clock,
        })
    }

    fn raise(&self, id: &str, link: &str, a: &str, z: &str) -> Alert {
        Alert::raise(id, link, a, z, self.clock.now()).with_violation(MetricKind::Latency)
    }

    async fn open(&self, alert: Alert) -> Result<IncidentId> {
        match self.engine.ingest_alert(alert).await? {
            IngestOutcome::Created { incident } => Ok(incident),
            other => bail!("alert did not open an incident: {other:?}"),
        }
    }

    fn recover(&self) {
        tracing::info!("original path recovered");
        self.sla.set_steady(&metro_endpoints(), healthy_sample());
    }

    /// Poll once per simulated second until `predicate` holds
    async fn wait(
        &self,
        id: IncidentId,
        what: &str,
        predicate: impl Fn(&Incident) -> bool,
    ) -> Result<Incident> {
        let deadline = tokio::time::Instant::now() + SCENARIO_LIMIT;
        loop {
            let incident = self.engine.status(id).await?;
            if predicate(&incident) {
                return Ok(incident);
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("incident {id} never reached {what}, stuck in {}", incident.state);
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn settle(&self, id: IncidentId) -> Result<Incident> {
        self.wait(id, "a resting state", |i| {
            i.is_closed() || i.state == IncidentState::Escalated
        })
        .await
    }
}

/// Run `scenario` to a resting state
///
/// Must run on a paused tokio runtime; timers then advance instantly.
pub(crate) async fn run(scenario: Scenario, mut config: EngineConfig) -> Result<ScenarioReport> {
    // Intake is scripted; drivers start once the alerts are in
    config.orchestrator.auto_drive = false;
    let cascade_policy = config.orchestrator.cascade_policy;
    let net = Network::new(config)?;
    let started = net.clock.now();
    tracing::info!(scenario = scenario.as_str(), "simulation started");

    let id = net.open(net.raise("a-1", "L1", "PE1", "P1")).await?;
    let incident = match scenario {
        Scenario::Recovery => {
            net.engine.drive(id);
            net.wait(id, "monitoring", |i| i.state == IncidentState::Monitoring)
                .await?;
            tokio::time::sleep(Duration::from_secs(90)).await;
            net.recover();
            net.settle(id).await?
        }
        Scenario::NoPath => {
            net.topology.remove_link(&LinkId::from("L3"));
            net.topology.remove_link(&LinkId::from("L5"));
            net.engine.drive(id);
            net.settle(id).await?
        }
        Scenario::Flapping => {
            let now = net.clock.now();
            net.engine
                .ingest_alert(Alert::clear("c-1", "L1", "PE1", "P1", now))
                .await?;
            net.engine
                .ingest_alert(net.raise("a-2", "L1", "PE1", "P1"))
                .await?;
            net.engine.drive(id);
            net.wait(id, "monitoring", |i| i.state == IncidentState::Monitoring)
                .await?;
            net.recover();
            net.settle(id).await?
        }
        Scenario::Cascade => {
            net.engine.drive(id);
            net.wait(id, "monitoring", |i| i.state == IncidentState::Monitoring)
                .await?;
            net.engine
                .ingest_alert(net.raise("a-2", "L6", "P3", "P4"))
                .await?;
            net.wait(id, "cascade handling", |i| !i.cascade_pending)
                .await?;
            net.recover();
            net.settle(id).await?
        }
    };

    let as_expected = check(scenario, cascade_policy, &incident);
    if !as_expected {
        tracing::warn!(
            scenario = scenario.as_str(),
            state = %incident.state,
            "scenario ended somewhere unexpected"
        );
    }
    net.engine.shutdown().await;

    Ok(ScenarioReport {
        scenario,
        audit: net.audit.events(),
        live_tunnels: net.provisioning.live_tunnels().len(),
        elapsed_secs: (net.clock.now() - started).num_seconds(),
        incident,
        as_expected,
    })
}

fn check(scenario: Scenario, policy: CascadePolicy, incident: &Incident) -> bool {
    let restored = incident.outcome == Some(Outcome::Restored);
    let escalated_for = |reason| {
        incident.state == IncidentState::Escalated
            && incident.escalation.as_ref().is_some_and(|e| e.reason == reason)
    };
    match scenario {
        Scenario::Recovery => restored,
        Scenario::NoPath => escalated_for(EscalationReason::NoPath),
        Scenario::Flapping => {
            restored
                && incident
                    .history
                    .iter()
                    .any(|t| t.to == IncidentState::Dampening)
        }
        Scenario::Cascade => match policy {
            CascadePolicy::Recompute => restored,
            CascadePolicy::Escalate => escalated_for(EscalationReason::CascadingDegradation),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn recovery_restores_and_removes_the_tunnel() {
        let report = run(Scenario::Recovery, EngineConfig::default())
            .await
            .unwrap();
        assert!(report.expected());
        assert_eq!(report.live_tunnels, 0);
        assert_eq!(report.audit.first().map(|e| e.kind.name()), Some("incident_created"));
        assert_eq!(report.audit.last().map(|e| e.kind.name()), Some("closed"));
    }

    #[tokio::test(start_paused = true)]
    async fn no_path_holds_for_an_operator() {
        let report = run(Scenario::NoPath, EngineConfig::default()).await.unwrap();
        assert!(report.expected());
        assert!(report.incident.tunnel.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn flapping_link_is_damped_first() {
        let report = run(Scenario::Flapping, EngineConfig::default())
            .await
            .unwrap();
        assert!(report.expected());
        assert_eq!(report.incident.history[0].to, IncidentState::Dampening);
    }

    #[tokio::test(start_paused = true)]
    async fn cascade_follows_the_configured_policy() {
        let escalate = run(Scenario::Cascade, EngineConfig::default())
            .await
            .unwrap();
        assert!(escalate.expected());
        assert_eq!(escalate.live_tunnels, 1);

        let recompute = run(
            Scenario::Cascade,
            EngineConfig::default().with_cascade_policy(CascadePolicy::Recompute),
        )
        .await
        .unwrap();
        assert!(recompute.expected());
        assert_eq!(recompute.live_tunnels, 0);
    }

    #[test]
    fn report_serializes_scenario_in_snake_case() {
        assert_eq!(
            serde_json::to_value(Scenario::NoPath).unwrap(),
            serde_json::json!("no_path")
        );
    }
}
