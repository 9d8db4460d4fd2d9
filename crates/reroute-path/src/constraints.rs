//! Constraint construction and the relaxation ladder
//!
//! The ladder is cumulative: each rung starts from the set produced by the
//! previous rung and loosens one more dimension. The causal links are never
//! loosened.

use reroute_model::{
    EndpointPair, LinkId, NodeId, PathConstraintSet, PathObjective, RelaxationRung, RetryPolicy,
    ServiceRequirements, SrlgId, TeTechnology,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Planner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Hop ceiling of the initial constraint set
    pub default_max_hops: usize,
    /// Hops added by the hop-ceiling rung
    pub hop_increase: usize,
    /// Objective when the service does not dictate one
    pub default_objective: PathObjective,
    /// Objective after the switch-objective rung
    pub relaxed_objective: PathObjective,
    /// Retry policy for oracle calls
    pub retry: RetryPolicy,
    /// Deadline for one oracle call
    pub call_timeout_secs: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default_max_hops: 10,
            hop_increase: 5,
            default_objective: PathObjective::Latency,
            relaxed_objective: PathObjective::IgpMetric,
            retry: RetryPolicy::default(),
            call_timeout_secs: 30,
        }
    }
}

/// Inputs to one path computation
#[derive(Debug, Clone, PartialEq)]
pub struct PlanRequest {
    /// Head-end and tail-end of the protected service
    pub endpoints: EndpointPair,
    /// Links causing the degradation; never relaxed
    pub causal_links: BTreeSet<LinkId>,
    /// Nodes to avoid, e.g. transit nodes of failed attempts
    pub avoid_nodes: BTreeSet<NodeId>,
    /// Service requirements
    pub requirements: ServiceRequirements,
    /// Technology the service runs, if known
    pub technology: Option<TeTechnology>,
}

impl PlanRequest {
    /// Request avoiding `causal_links` between `endpoints`
    #[must_use]
    pub fn new(endpoints: EndpointPair, causal_links: BTreeSet<LinkId>) -> Self {
        Self {
            endpoints,
            causal_links,
            avoid_nodes: BTreeSet::new(),
            requirements: ServiceRequirements::default(),
            technology: None,
        }
    }

    /// Set nodes to avoid
    #[inline]
    #[must_use]
    pub fn with_avoid_nodes(mut self, nodes: BTreeSet<NodeId>) -> Self {
        self.avoid_nodes = nodes;
        self
    }

    /// Set service requirements
    #[inline]
    #[must_use]
    pub fn with_requirements(mut self, requirements: ServiceRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    /// Set service technology
    #[inline]
    #[must_use]
    pub fn with_technology(mut self, technology: Option<TeTechnology>) -> Self {
        self.technology = technology;
        self
    }
}

/// Builds and relaxes constraint sets
#[derive(Debug, Clone, Copy)]
pub struct ConstraintBuilder<'a> {
    config: &'a PlannerConfig,
}

impl<'a> ConstraintBuilder<'a> {
    /// Create a builder
    #[inline]
    #[must_use]
    pub fn new(config: &'a PlannerConfig) -> Self {
        Self { config }
    }

    /// Unrelaxed constraints for `request`
    #[must_use]
    pub fn initial(&self, request: &PlanRequest, srlgs: BTreeSet<SrlgId>) -> PathConstraintSet {
        let objective = match request.technology {
            Some(TeTechnology::RsvpTe) => PathObjective::TeMetric,
            _ => self.config.default_objective,
        };
        let avoid_nodes = request
            .avoid_nodes
            .iter()
            .filter(|n| **n != request.endpoints.head && **n != request.endpoints.tail)
            .cloned()
            .collect();

        PathConstraintSet {
            avoid_links: request.causal_links.clone(),
            avoid_nodes,
            avoid_srlgs: srlgs,
            objective,
            max_hops: self.config.default_max_hops,
            max_delay_ms: request.requirements.max_delay_ms,
            min_bandwidth_gbps: request.requirements.min_bandwidth_gbps,
        }
    }

    /// Apply one rung to `set`, returning a new set
    #[must_use]
    pub fn relax(&self, set: &PathConstraintSet, rung: RelaxationRung) -> PathConstraintSet {
        let mut next = set.clone();
        match rung {
            RelaxationRung::Initial => {}
            RelaxationRung::DropSrlgAvoidance => next.avoid_srlgs.clear(),
            RelaxationRung::IncreaseHopCeiling => {
                next.max_hops = next.max_hops.saturating_add(self.config.hop_increase);
            }
            RelaxationRung::SwitchObjective => {
                next.objective = self.config.relaxed_objective;
                next.max_delay_ms = None;
            }
            RelaxationRung::DropNodeAvoidance => next.avoid_nodes.clear(),
        }
        next
    }

    /// Every rung in order, starting with the unrelaxed set
    #[must_use]
    pub fn ladder(&self, initial: PathConstraintSet) -> Vec<(RelaxationRung, PathConstraintSet)> {
        let mut steps = Vec::with_capacity(RelaxationRung::LADDER.len() + 1);
        let mut current = initial;
        steps.push((RelaxationRung::Initial, current.clone()));
        for rung in RelaxationRung::LADDER {
            current = self.relax(&current, rung);
            steps.push((rung, current.clone()));
        }
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PlanRequest {
        PlanRequest::new(EndpointPair::new("A", "Z"), BTreeSet::from([LinkId::from("L1")]))
            .with_avoid_nodes(BTreeSet::from([NodeId::from("A"), NodeId::from("M")]))
            .with_requirements(ServiceRequirements {
                max_delay_ms: Some(20.0),
                min_bandwidth_gbps: Some(5.0),
            })
    }

    #[test]
    fn initial_set_carries_requirements() {
        let config = PlannerConfig::default();
        let set = ConstraintBuilder::new(&config)
            .initial(&request(), BTreeSet::from([SrlgId::from("G1")]));
        assert_eq!(set.max_hops, 10);
        assert_eq!(set.objective, PathObjective::Latency);
        assert_eq!(set.max_delay_ms, Some(20.0));
        assert_eq!(set.min_bandwidth_gbps, Some(5.0));
        assert!(set.avoid_srlgs.contains(&SrlgId::from("G1")));
        assert_eq!(set.avoid_nodes, BTreeSet::from([NodeId::from("M")]));
    }

    #[test]
    fn rsvp_services_optimize_te_metric() {
        let config = PlannerConfig::default();
        let req = request().with_technology(Some(TeTechnology::RsvpTe));
        let set = ConstraintBuilder::new(&config).initial(&req, BTreeSet::new());
        assert_eq!(set.objective, PathObjective::TeMetric);
    }

    #[test]
    fn ladder_is_cumulative() {
        let config = PlannerConfig::default();
        let builder = ConstraintBuilder::new(&config);
        let initial = builder.initial(&request(), BTreeSet::from([SrlgId::from("G1")]));
        let ladder = builder.ladder(initial);
        assert_eq!(ladder.len(), 5);

        let (_, last) = &ladder[4];
        assert!(last.avoid_srlgs.is_empty());
        assert_eq!(last.max_hops, 15);
        assert_eq!(last.objective, PathObjective::IgpMetric);
        assert_eq!(last.max_delay_ms, None);
        assert!(last.avoid_nodes.is_empty());
        assert_eq!(last.avoid_links, BTreeSet::from([LinkId::from("L1")]));
        assert_eq!(last.min_bandwidth_gbps, Some(5.0));
    }
}
