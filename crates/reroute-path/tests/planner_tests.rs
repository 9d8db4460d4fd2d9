//! Planner behaviour against scripted topology oracles
//!
//! Tenet: relaxation is cumulative and auditable, and the links that caused
//! the degradation are never traversed by an accepted path.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use reroute_model::{
    AttemptOutcome, CollaboratorError, ComputedPath, EndpointPair, LinkId, PathConstraintSet,
    PathHop, RelaxationRung, RetryPolicy, ServiceRequirements, SrlgId, TopologyOracle,
};
use reroute_path::{PathPlanner, PlanRequest, PlannerConfig, PlannerError};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// L1 (A-Z direct) is degraded. The only alternative, A-B-Z, shares risk
/// group G1 with L1 through link L2.
struct SharedRiskTopology;

#[async_trait]
impl TopologyOracle for SharedRiskTopology {
    async fn compute_path(
        &self,
        _endpoints: &EndpointPair,
        constraints: &PathConstraintSet,
    ) -> Result<Option<ComputedPath>, CollaboratorError> {
        if constraints.avoid_srlgs.contains(&SrlgId::from("G1")) {
            return Ok(None);
        }
        Ok(Some(ComputedPath::new(vec![
            PathHop::new("A", "B", "L2", 3.0, 40.0),
            PathHop::new("B", "Z", "L3", 3.0, 40.0),
        ])))
    }

    async fn shared_risk_groups(
        &self,
        links: &BTreeSet<LinkId>,
    ) -> Result<BTreeSet<SrlgId>, CollaboratorError> {
        if links.contains(&LinkId::from("L1")) {
            Ok(BTreeSet::from([SrlgId::from("G1")]))
        } else {
            Ok(BTreeSet::new())
        }
    }
}

/// Always answers with the degraded link itself
struct StubbornTopology;

#[async_trait]
impl TopologyOracle for StubbornTopology {
    async fn compute_path(
        &self,
        _endpoints: &EndpointPair,
        _constraints: &PathConstraintSet,
    ) -> Result<Option<ComputedPath>, CollaboratorError> {
        Ok(Some(ComputedPath::new(vec![PathHop::new(
            "A", "Z", "L1", 1.0, 100.0,
        )])))
    }
}

/// Only ever offers the slow detour A-B-Z, whatever the constraints
struct SlowDetourTopology;

#[async_trait]
impl TopologyOracle for SlowDetourTopology {
    async fn compute_path(
        &self,
        _endpoints: &EndpointPair,
        _constraints: &PathConstraintSet,
    ) -> Result<Option<ComputedPath>, CollaboratorError> {
        Ok(Some(ComputedPath::new(vec![
            PathHop::new("A", "B", "L2", 150.0, 100.0),
            PathHop::new("B", "Z", "L3", 150.0, 100.0),
        ])))
    }
}

struct DownTopology {
    calls: AtomicU32,
}

#[async_trait]
impl TopologyOracle for DownTopology {
    async fn compute_path(
        &self,
        _endpoints: &EndpointPair,
        _constraints: &PathConstraintSet,
    ) -> Result<Option<ComputedPath>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CollaboratorError::unavailable("topology", "connection refused"))
    }
}

struct StalledTopology;

#[async_trait]
impl TopologyOracle for StalledTopology {
    async fn compute_path(
        &self,
        _endpoints: &EndpointPair,
        _constraints: &PathConstraintSet,
    ) -> Result<Option<ComputedPath>, CollaboratorError> {
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        Ok(None)
    }
}

fn request() -> PlanRequest {
    PlanRequest::new(
        EndpointPair::new("A", "Z"),
        BTreeSet::from([LinkId::from("L1")]),
    )
}

#[tokio::test]
async fn srlg_relaxation_finds_path_on_second_rung() {
    let planner = PathPlanner::new(PlannerConfig::default(), Arc::new(SharedRiskTopology));
    let planned = planner.plan(&request()).await.unwrap();

    assert_eq!(planned.rung, RelaxationRung::DropSrlgAvoidance);
    assert_eq!(planned.attempts.len(), 2);
    assert_eq!(planned.attempts[0].outcome, AttemptOutcome::NoPath);
    assert!(planned.attempts[0]
        .constraints
        .avoid_srlgs
        .contains(&SrlgId::from("G1")));
    assert!(planned.constraints.avoid_srlgs.is_empty());
    assert!(!planned.path.traverses_link(&LinkId::from("L1")));
}

#[tokio::test]
async fn path_through_degraded_link_is_never_accepted() {
    let planner = PathPlanner::new(PlannerConfig::default(), Arc::new(StubbornTopology));
    let err = planner.plan(&request()).await.unwrap_err();

    let PlannerError::NoPath { attempts } = &err else {
        panic!("expected NoPath, got {err:?}");
    };
    let rungs: Vec<_> = attempts.iter().map(|a| a.rung).collect();
    assert_eq!(
        rungs,
        vec![
            RelaxationRung::Initial,
            RelaxationRung::DropSrlgAvoidance,
            RelaxationRung::IncreaseHopCeiling,
            RelaxationRung::SwitchObjective,
            RelaxationRung::DropNodeAvoidance,
        ]
    );
    assert!(attempts
        .iter()
        .all(|a| matches!(a.outcome, AttemptOutcome::Rejected { .. })));
    assert!(attempts
        .iter()
        .all(|a| a.constraints.avoid_links.contains(&LinkId::from("L1"))));
}

#[tokio::test]
async fn relaxed_objective_still_honours_service_delay_ceiling() {
    let planner = PathPlanner::new(PlannerConfig::default(), Arc::new(SlowDetourTopology));
    let request = request().with_requirements(ServiceRequirements {
        max_delay_ms: Some(20.0),
        min_bandwidth_gbps: None,
    });
    let err = planner.plan(&request).await.unwrap_err();

    let PlannerError::NoPath { attempts } = &err else {
        panic!("expected NoPath, got {err:?}");
    };
    assert_eq!(attempts.len(), 5);
    let relaxed = attempts
        .iter()
        .find(|a| a.rung == RelaxationRung::SwitchObjective)
        .unwrap();
    assert_eq!(relaxed.constraints.max_delay_ms, None);
    let AttemptOutcome::Rejected { violations } = &relaxed.outcome else {
        panic!("expected rejection, got {:?}", relaxed.outcome);
    };
    assert!(violations[0].contains("exceeds ceiling 20.00ms"));
}

#[tokio::test(start_paused = true)]
async fn unreachable_oracle_is_retried_then_reported() {
    let oracle = Arc::new(DownTopology {
        calls: AtomicU32::new(0),
    });
    let planner = PathPlanner::new(PlannerConfig::default(), oracle.clone());
    let err = planner.plan(&request()).await.unwrap_err();

    assert!(matches!(err, PlannerError::OracleUnavailable { .. }));
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 4);
    assert_eq!(err.attempts().len(), 1);
    assert!(err.trace().last().unwrap().contains("connection refused"));
}

#[tokio::test(start_paused = true)]
async fn stalled_oracle_times_out() {
    let config = PlannerConfig {
        call_timeout_secs: 5,
        retry: RetryPolicy::none(),
        ..PlannerConfig::default()
    };
    let planner = PathPlanner::new(config, Arc::new(StalledTopology));
    let err = planner.plan(&request()).await.unwrap_err();

    let PlannerError::OracleUnavailable { source, .. } = err else {
        panic!("expected OracleUnavailable");
    };
    assert!(matches!(source, CollaboratorError::Timeout { .. }));
}
