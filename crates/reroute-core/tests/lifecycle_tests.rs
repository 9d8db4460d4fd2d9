//! Incident lifecycle over the metro reference network
//!
//! Tenet: every step commits its state before anything observes it, and a
//! recovered incident always ends with its tunnel removed.

mod common;

use common::{harness, manual_config};
use pretty_assertions::assert_eq;
use reroute_core::{EngineConfig, EngineError, TaskRequest, TaskType};
use reroute_model::{IncidentState, LinkId, NodeId, Outcome, SlaTier};
use reroute_sim::fixtures::{degraded_sample, healthy_sample, metro_endpoints};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn platinum_incident_recovers_step_by_step() {
    let h = harness(manual_config());
    let id = h.open_l1().await;
    assert_eq!(h.status(id).await.state, IncidentState::Detecting);

    let detect = h.step(id).await.unwrap();
    assert_eq!(detect.to, IncidentState::Assessing);
    assert_eq!(detect.detail, "2 services impacted");

    h.step(id).await.unwrap();
    let incident = h.status(id).await;
    let impact = incident.impact.clone().unwrap();
    assert_eq!(impact.governing_tier, SlaTier::Platinum);
    assert_eq!(impact.primary.as_str(), "svc-platinum-1");
    assert_eq!(incident.state, IncidentState::Computing);

    h.step(id).await.unwrap();
    let incident = h.status(id).await;
    let path = incident.path.clone().unwrap();
    assert_eq!(incident.state, IncidentState::Provisioning);
    assert!(!path.traverses_link(&LinkId::from("L1")));
    assert!(!path.traverses_link(&LinkId::from("L3")), "shared-risk link used");
    assert_eq!(path.hop_count(), 3);

    h.step(id).await.unwrap();
    let incident = h.status(id).await;
    assert_eq!(incident.state, IncidentState::Steering);
    assert_eq!(h.provisioning.live_tunnels().len(), 1);

    h.step(id).await.unwrap();
    let incident = h.status(id).await;
    assert_eq!(incident.state, IncidentState::Monitoring);
    assert_eq!(incident.tunnel.as_ref().unwrap().weight.protection(), 100);

    let still = h.step(id).await.unwrap();
    assert_eq!(still.detail, "still_degraded");
    assert!(!still.changed_state());

    h.sla.set_steady(&metro_endpoints(), healthy_sample());
    let started = h.step(id).await.unwrap();
    assert_eq!(started.detail, "hold_started");
    let timer = h.status(id).await.hold_timer.unwrap();
    assert_eq!((timer.expires_at - timer.recovery_observed_at).num_seconds(), 30);

    h.step_until(id, IncidentState::Restoring, 6).await;
    h.step_until(id, IncidentState::Closed, 6).await;

    let closed = h.status(id).await;
    assert_eq!(closed.outcome, Some(Outcome::Restored));
    assert!(closed.tunnel.is_none());
    assert!(closed.closed_at.is_some());
    assert!(h.provisioning.live_tunnels().is_empty());

    let protections: Vec<u8> = h
        .provisioning
        .weight_history()
        .iter()
        .map(|(_, split)| split.protection())
        .collect();
    assert_eq!(protections, vec![100, 75, 50, 25, 0]);

    let states: Vec<IncidentState> = closed.history.iter().map(|t| t.to).collect();
    assert_eq!(
        states,
        vec![
            IncidentState::Assessing,
            IncidentState::Computing,
            IncidentState::Provisioning,
            IncidentState::Steering,
            IncidentState::Monitoring,
            IncidentState::Restoring,
            IncidentState::Closed,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn audit_trail_follows_the_lifecycle() {
    let h = harness(manual_config());
    h.sla.set_steady(&metro_endpoints(), healthy_sample());
    let id = h.open_l1().await;
    h.step_until(id, IncidentState::Closed, 30).await;

    let names = h.audit.names();
    assert_eq!(names.first(), Some(&"incident_created"));
    assert_eq!(names.last(), Some(&"closed"));
    for expected in [
        "path_computed",
        "tunnel_provisioned",
        "traffic_steered",
        "hold_timer_started",
        "cutover_stage",
    ] {
        assert!(names.contains(&expected), "missing {expected} in {names:?}");
    }
    assert_eq!(names.iter().filter(|n| **n == "cutover_stage").count(), 4);
    assert!(h.notified("closed").await);
}

#[tokio::test(start_paused = true)]
async fn drivers_carry_an_incident_to_closure() {
    let h = harness(EngineConfig::default());
    h.sla.set_steady(&metro_endpoints(), healthy_sample());
    let id = h.open_l1().await;

    let closed = h
        .wait_for(id, Duration::from_secs(900), |i| i.is_closed())
        .await;
    assert_eq!(closed.outcome, Some(Outcome::Restored));
    assert!(h.provisioning.live_tunnels().is_empty());
    assert_eq!(h.engine.stats().await.unwrap().active, 0);
}

#[tokio::test(start_paused = true)]
async fn task_for_another_state_is_refused() {
    let h = harness(manual_config());
    let id = h.open_l1().await;
    let before = h.status(id).await;

    let err = h
        .engine
        .dispatch(TaskRequest::new(id, TaskType::SteerTraffic))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::TaskStateMismatch {
            task: TaskType::SteerTraffic,
            state: IncidentState::Detecting,
            ..
        }
    ));
    assert_eq!(h.status(id).await, before);
}

#[tokio::test(start_paused = true)]
async fn poll_before_interval_is_not_due() {
    let h = harness(manual_config());
    let id = h.open_l1().await;
    h.step_until(id, IncidentState::Monitoring, 6).await;
    h.step(id).await.unwrap();

    let err = h
        .engine
        .dispatch(TaskRequest::new(id, TaskType::MonitorRestoration))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotDue { .. }));
    assert!(err.is_retryable());
}

#[tokio::test(start_paused = true)]
async fn failed_steering_removes_tunnel_and_reprovisions() {
    let h = harness(manual_config());
    let id = h.open_l1().await;
    h.step_until(id, IncidentState::Steering, 6).await;
    let first = h.status(id).await.tunnel.unwrap();

    // One call plus three retries
    h.provisioning.fail_weight_updates(4);
    let result = h.step(id).await.unwrap();
    assert_eq!(result.to, IncidentState::Provisioning);

    let incident = h.status(id).await;
    assert!(incident.tunnel.is_none());
    assert_eq!(incident.retries.steering_rounds, 1);
    assert_eq!(h.provisioning.deletes(), 1);

    h.step_until(id, IncidentState::Monitoring, 4).await;
    let second = h.status(id).await.tunnel.unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(h.provisioning.live_tunnels(), vec![second.id]);
}

#[tokio::test(start_paused = true)]
async fn degradation_during_hold_cancels_the_timer() {
    let h = harness(manual_config());
    let id = h.open_l1().await;
    h.step_until(id, IncidentState::Monitoring, 6).await;

    h.sla.set_steady(&metro_endpoints(), healthy_sample());
    assert_eq!(h.step(id).await.unwrap().detail, "hold_started");

    h.sla.set_steady(&metro_endpoints(), degraded_sample());
    assert_eq!(h.step(id).await.unwrap().detail, "hold_cancelled");
    let incident = h.status(id).await;
    assert!(incident.hold_timer.is_none());
    assert_eq!(incident.state, IncidentState::Monitoring);
    assert!(h.audit.names().contains(&"hold_timer_cancelled"));
}

#[tokio::test(start_paused = true)]
async fn sla_outage_while_monitoring_keeps_the_cadence() {
    let h = harness(manual_config());
    let id = h.open_l1().await;
    h.step_until(id, IncidentState::Monitoring, 6).await;

    // Every attempt of the poll fails
    h.sla.fail_next(4);
    let result = h.step(id).await.unwrap();
    assert!(result.detail.starts_with("poll failed"));
    let incident = h.status(id).await;
    assert_eq!(incident.state, IncidentState::Monitoring);
    assert!(incident.last_poll_at.is_some());
    assert_eq!(incident.retries.polls, 0);
}

#[tokio::test(start_paused = true)]
async fn protection_path_transits_the_southern_route() {
    let h = harness(manual_config());
    let id = h.open_l1().await;
    h.step_until(id, IncidentState::Provisioning, 4).await;

    let path = h.status(id).await.path.unwrap();
    assert_eq!(
        path.transit_nodes(),
        [NodeId::from("P3"), NodeId::from("P4")].into_iter().collect()
    );
}
