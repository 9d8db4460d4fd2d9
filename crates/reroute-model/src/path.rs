//! Paths, path constraints and planning records

use crate::ids::{LinkId, NodeId, SrlgId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// What the path computation optimizes for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathObjective {
    /// Lowest end-to-end delay
    #[default]
    Latency,
    /// Lowest IGP metric
    IgpMetric,
    /// Lowest TE metric
    TeMetric,
    /// Fewest hops
    HopCount,
}

impl PathObjective {
    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Latency => "latency",
            Self::IgpMetric => "igp_metric",
            Self::TeMetric => "te_metric",
            Self::HopCount => "hop_count",
        }
    }
}

impl fmt::Display for PathObjective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One traversed link of a computed path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathHop {
    /// Upstream node
    pub from: NodeId,
    /// Downstream node
    pub to: NodeId,
    /// Link between them
    pub link: LinkId,
    /// Link delay
    pub delay_ms: f64,
    /// Available bandwidth on the link
    pub available_bandwidth_gbps: f64,
    /// IGP metric of the link
    pub igp_metric: u32,
    /// TE metric of the link
    pub te_metric: u32,
}

impl PathHop {
    /// Create a hop with unit metrics
    #[must_use]
    pub fn new(
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        link: impl Into<LinkId>,
        delay_ms: f64,
        available_bandwidth_gbps: f64,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            link: link.into(),
            delay_ms,
            available_bandwidth_gbps,
            igp_metric: 10,
            te_metric: 10,
        }
    }
}

/// An explicit path returned by the topology oracle
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComputedPath {
    /// Ordered hops from head-end to tail-end
    pub hops: Vec<PathHop>,
}

impl ComputedPath {
    /// Create from hops
    #[inline]
    #[must_use]
    pub fn new(hops: Vec<PathHop>) -> Self {
        Self { hops }
    }

    /// Number of traversed links
    #[inline]
    #[must_use]
    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }

    /// Sum of link delays
    #[must_use]
    pub fn total_delay_ms(&self) -> f64 {
        self.hops.iter().map(|h| h.delay_ms).sum()
    }

    /// Bottleneck bandwidth; zero for an empty path
    #[must_use]
    pub fn min_bandwidth_gbps(&self) -> f64 {
        self.hops
            .iter()
            .map(|h| h.available_bandwidth_gbps)
            .reduce(f64::min)
            .unwrap_or(0.0)
    }

    /// Whether the path uses `link`
    #[must_use]
    pub fn traverses_link(&self, link: &LinkId) -> bool {
        self.hops.iter().any(|h| &h.link == link)
    }

    /// Traversed links in path order
    pub fn links(&self) -> impl Iterator<Item = &LinkId> {
        self.hops.iter().map(|h| &h.link)
    }

    /// Nodes strictly between head-end and tail-end
    #[must_use]
    pub fn transit_nodes(&self) -> BTreeSet<NodeId> {
        self.hops
            .iter()
            .skip(1)
            .map(|h| h.from.clone())
            .collect()
    }
}

impl fmt::Display for ComputedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(first) = self.hops.first() else {
            return f.write_str("<empty>");
        };
        write!(f, "{}", first.from)?;
        for hop in &self.hops {
            write!(f, " -[{}]-> {}", hop.link, hop.to)?;
        }
        Ok(())
    }
}

/// Constraints passed to the topology oracle for one computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathConstraintSet {
    /// Links that must not be traversed; the causes of the degradation
    pub avoid_links: BTreeSet<LinkId>,
    /// Nodes to avoid
    pub avoid_nodes: BTreeSet<NodeId>,
    /// Shared-risk groups to avoid
    pub avoid_srlgs: BTreeSet<SrlgId>,
    /// Optimization objective
    pub objective: PathObjective,
    /// Hop ceiling
    pub max_hops: usize,
    /// Delay ceiling
    pub max_delay_ms: Option<f64>,
    /// Bandwidth floor
    pub min_bandwidth_gbps: Option<f64>,
}

impl PathConstraintSet {
    /// Create a constraint set avoiding `avoid_links`
    #[must_use]
    pub fn new(avoid_links: BTreeSet<LinkId>, max_hops: usize) -> Self {
        Self {
            avoid_links,
            avoid_nodes: BTreeSet::new(),
            avoid_srlgs: BTreeSet::new(),
            objective: PathObjective::default(),
            max_hops,
            max_delay_ms: None,
            min_bandwidth_gbps: None,
        }
    }
}

/// Position on the relaxation ladder that produced a constraint set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelaxationRung {
    /// Unrelaxed constraints
    Initial,
    /// Shared-risk group avoidance removed
    DropSrlgAvoidance,
    /// Hop ceiling raised
    IncreaseHopCeiling,
    /// Objective switched to IGP metric, delay ceiling removed
    SwitchObjective,
    /// Node avoidance removed
    DropNodeAvoidance,
}

impl RelaxationRung {
    /// Relaxation steps in the order they are applied
    pub const LADDER: [Self; 4] = [
        Self::DropSrlgAvoidance,
        Self::IncreaseHopCeiling,
        Self::SwitchObjective,
        Self::DropNodeAvoidance,
    ];

    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::DropSrlgAvoidance => "drop_srlg_avoidance",
            Self::IncreaseHopCeiling => "increase_hop_ceiling",
            Self::SwitchObjective => "switch_objective",
            Self::DropNodeAvoidance => "drop_node_avoidance",
        }
    }
}

impl fmt::Display for RelaxationRung {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one computation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// A valid path was found
    Found {
        /// Hop count of the path
        hops: usize,
        /// Total delay of the path
        delay_ms: f64,
    },
    /// The oracle found no path
    NoPath,
    /// The oracle returned a path that broke a constraint
    Rejected {
        /// Violated constraints
        violations: Vec<String>,
    },
    /// The oracle could not be reached
    OracleFailed {
        /// Last error reported
        error: String,
    },
}

/// Audit record of one rung of the ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanAttempt {
    /// Rung that produced the constraints
    pub rung: RelaxationRung,
    /// Constraints sent to the oracle
    pub constraints: PathConstraintSet,
    /// What happened
    pub outcome: AttemptOutcome,
}
