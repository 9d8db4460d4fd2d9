//! Escalation paths: no path, provisioning failure, cascades, operator close
//!
//! Tenet: the policy only chooses from the fixed menu; the engine decides
//! what is applicable and how many automated recoveries an incident gets.

mod common;

use async_trait::async_trait;
use common::{harness, harness_with, manual_config};
use pretty_assertions::assert_eq;
use reroute_core::{
    CascadePolicy, EngineConfig, EscalationContext, IngestOutcome, Reasoner, ReasonerPolicy,
    Resolution, RuleTablePolicy,
};
use reroute_correlation::CorrelationRule;
use reroute_model::{
    CollaboratorError, DecisionSource, EscalationReason, IncidentState, LinkId, NodeId, Outcome,
    RecoveryAction, SlaTier,
};
use reroute_sim::fixtures::{metro_impact, primary_service};
use reroute_sim::SimImpact;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn isolated_head_end_escalates_with_no_path() {
    let h = harness(manual_config());
    h.topology.remove_link(&LinkId::from("L3"));
    h.topology.remove_link(&LinkId::from("L5"));
    let id = h.open_l1().await;

    h.step_until(id, IncidentState::Escalated, 4).await;
    let incident = h.status(id).await;
    let record = incident.escalation.clone().unwrap();
    assert_eq!(record.reason, EscalationReason::NoPath);
    assert_eq!(record.raised_from, IncidentState::Computing);
    assert_eq!(record.decision.action, RecoveryAction::HoldDegraded);
    assert_eq!(record.decision.decided_by, DecisionSource::RuleBased);
    assert!(!record.trace.is_empty());
    assert_eq!(incident.plan_attempts.len(), 5);
    assert!(incident.tunnel.is_none());
    assert!(h.notified("escalated").await);
}

#[tokio::test(start_paused = true)]
async fn operator_resolution_closes_and_removes_tunnel() {
    let h = harness(manual_config());
    let id = h.open_l1().await;
    h.step_until(id, IncidentState::Monitoring, 6).await;

    h.engine
        .ingest_alert(h.alert("a-2", "L6", "P3", "P4"))
        .await
        .unwrap();
    h.step_until(id, IncidentState::Escalated, 2).await;
    assert_eq!(h.provisioning.live_tunnels().len(), 1, "hold keeps the tunnel");

    let result = h
        .engine
        .resolve(id, Resolution::new("noc-1", "fibre spliced"))
        .await
        .unwrap();
    assert_eq!(result.to, IncidentState::Closed);

    let closed = h.status(id).await;
    assert_eq!(closed.outcome, Some(Outcome::ResolvedByOperator));
    assert_eq!(
        closed.history.last().unwrap().trigger,
        "resolved by noc-1: fibre spliced"
    );
    assert!(h.provisioning.live_tunnels().is_empty());
}

#[tokio::test(start_paused = true)]
async fn resolution_can_keep_the_tunnel() {
    let h = harness(manual_config());
    let id = h.open_l1().await;
    h.step_until(id, IncidentState::Monitoring, 6).await;
    h.engine
        .ingest_alert(h.alert("a-2", "L6", "P3", "P4"))
        .await
        .unwrap();
    h.step_until(id, IncidentState::Escalated, 2).await;

    h.engine
        .resolve(id, Resolution::new("noc-1", "leave it").keeping_tunnel())
        .await
        .unwrap();
    assert!(h.status(id).await.tunnel.is_some());
    assert_eq!(h.provisioning.live_tunnels().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn protection_path_alert_escalates_by_default() {
    let h = harness(manual_config());
    let id = h.open_l1().await;
    h.step_until(id, IncidentState::Monitoring, 6).await;

    let outcome = h
        .engine
        .ingest_alert(h.alert("a-2", "L6", "P3", "P4"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        IngestOutcome::Correlated {
            incident: id,
            rule: CorrelationRule::ProtectionPath,
        }
    );
    let incident = h.status(id).await;
    assert!(incident.cascade_pending);
    assert!(incident.cascade_links.contains(&LinkId::from("L6")));
    assert!(!incident.degraded_links.contains(&LinkId::from("L6")));

    h.step(id).await.unwrap();
    let incident = h.status(id).await;
    assert_eq!(incident.state, IncidentState::Escalated);
    assert!(!incident.cascade_pending);
    let record = incident.escalation.unwrap();
    assert_eq!(record.reason, EscalationReason::CascadingDegradation);
    assert!(record.trace[0].contains("L6"));
}

#[tokio::test(start_paused = true)]
async fn protection_path_alert_recomputes_under_recompute_policy() {
    let config = manual_config().with_cascade_policy(CascadePolicy::Recompute);
    let h = harness(config);
    let id = h.open_l1().await;
    h.step_until(id, IncidentState::Monitoring, 6).await;

    h.engine
        .ingest_alert(h.alert("a-2", "L6", "P3", "P4"))
        .await
        .unwrap();
    let result = h.step(id).await.unwrap();
    assert_eq!(result.to, IncidentState::Computing);
    assert!(h.provisioning.live_tunnels().is_empty());
    assert!(h.status(id).await.tunnel.is_none());

    h.step(id).await.unwrap();
    let incident = h.status(id).await;
    let path = incident.path.unwrap();
    assert_eq!(incident.state, IncidentState::Provisioning);
    assert!(!path.traverses_link(&LinkId::from("L1")));
    assert!(!path.traverses_link(&LinkId::from("L6")));
    assert!(path.traverses_link(&LinkId::from("L3")));
}

#[tokio::test(start_paused = true)]
async fn rejected_provisioning_tries_one_alternate_path_then_holds() {
    let h = harness(manual_config());
    h.provisioning.reject_creates(true);
    let id = h.open_l1().await;
    h.step_until(id, IncidentState::Provisioning, 4).await;

    let first = h.step(id).await.unwrap();
    assert_eq!(first.to, IncidentState::Computing);
    let incident = h.status(id).await;
    assert_eq!(incident.retries.escalation_recoveries, 1);
    assert_eq!(
        incident.avoid_nodes,
        [NodeId::from("P3"), NodeId::from("P4")].into_iter().collect()
    );
    assert_eq!(
        incident.escalation.as_ref().unwrap().decision.action,
        RecoveryAction::TryAlternatePath
    );

    h.step(id).await.unwrap();
    let path = h.status(id).await.path.unwrap();
    assert!(!path.transit_nodes().contains(&NodeId::from("P3")));

    let second = h.step(id).await.unwrap();
    assert_eq!(second.to, IncidentState::Escalated);
    let record = h.status(id).await.escalation.unwrap();
    assert_eq!(record.reason, EscalationReason::ProvisionExhausted);
    assert_eq!(record.decision.action, RecoveryAction::HoldDegraded);
    assert_eq!(record.coerced_from, Some(RecoveryAction::TryAlternatePath));
    assert!(record.decision.justification.contains("budget"));
}

#[tokio::test(start_paused = true)]
async fn unknown_service_technology_escalates_from_assessment() {
    let impact = SimImpact::new().with_service(
        primary_service("svc-odd", SlaTier::Gold).with_technology("frame-relay"),
        &["L1"],
    );
    let h = harness_with(manual_config(), impact, |b| b);
    let id = h.open_l1().await;

    h.step_until(id, IncidentState::Escalated, 3).await;
    let record = h.status(id).await.escalation.unwrap();
    assert_eq!(record.reason, EscalationReason::UnknownTechnology);
    assert_eq!(record.raised_from, IncidentState::Assessing);
    assert!(record.trace[0].contains("frame-relay"));
}

struct GiveUp;

#[async_trait]
impl Reasoner for GiveUp {
    async fn recommend(
        &self,
        context: &EscalationContext,
    ) -> Result<(RecoveryAction, String), CollaboratorError> {
        Ok((
            RecoveryAction::CloseUnresolved,
            format!("{} is not worth chasing", context.reason),
        ))
    }
}

#[tokio::test(start_paused = true)]
async fn reasoner_can_close_unresolved() {
    let policy = ReasonerPolicy::new(
        Arc::new(GiveUp),
        RuleTablePolicy::default(),
        Duration::from_secs(5),
    );
    let h = harness_with(manual_config(), metro_impact(), |b| {
        b.with_policy(Arc::new(policy))
    });
    h.topology.remove_link(&LinkId::from("L3"));
    h.topology.remove_link(&LinkId::from("L5"));
    let id = h.open_l1().await;

    h.step_until(id, IncidentState::Closed, 4).await;
    let closed = h.status(id).await;
    assert_eq!(closed.outcome, Some(Outcome::Unresolved));
    let record = closed.escalation.unwrap();
    assert_eq!(record.decision.decided_by, DecisionSource::Assisted);
    assert_eq!(record.decision.justification, "no_path is not worth chasing");

    let tail: Vec<IncidentState> = closed.history.iter().rev().take(2).map(|t| t.to).collect();
    assert_eq!(tail, vec![IncidentState::Closed, IncidentState::Escalated]);
}

#[tokio::test(start_paused = true)]
async fn drivers_stop_at_escalation() {
    let h = harness(EngineConfig::default());
    h.topology.remove_link(&LinkId::from("L3"));
    h.topology.remove_link(&LinkId::from("L5"));
    let id = h.open_l1().await;

    h.wait_for(id, Duration::from_secs(60), |i| {
        i.state == IncidentState::Escalated
    })
    .await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.engine.stats().await.unwrap().drivers, 0);
    assert_eq!(h.status(id).await.state, IncidentState::Escalated);
}
