//! Simulated topology oracle
//!
//! Holds a link table and answers constrained shortest-path queries with
//! A* over a petgraph view filtered by the constraint set.

use async_trait::async_trait;
use parking_lot::RwLock;
use petgraph::algo::astar;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use reroute_model::{
    CollaboratorError, ComputedPath, EndpointPair, LinkId, NodeId, PathConstraintSet, PathHop,
    PathObjective, SrlgId, TopologyOracle,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};

/// A link of the simulated network
#[derive(Debug, Clone, PartialEq)]
pub struct SimLink {
    /// Link id
    pub id: LinkId,
    /// Endpoint A
    pub a: NodeId,
    /// Endpoint Z
    pub z: NodeId,
    /// Propagation delay
    pub delay_ms: f64,
    /// Available bandwidth
    pub bandwidth_gbps: f64,
    /// IGP metric
    pub igp_metric: u32,
    /// TE metric
    pub te_metric: u32,
    /// Shared-risk groups
    pub srlgs: BTreeSet<SrlgId>,
}

impl SimLink {
    /// Create a link with metrics derived from its delay
    #[must_use]
    pub fn new(
        id: impl Into<LinkId>,
        a: impl Into<NodeId>,
        z: impl Into<NodeId>,
        delay_ms: f64,
        bandwidth_gbps: f64,
    ) -> Self {
        Self {
            id: id.into(),
            a: a.into(),
            z: z.into(),
            delay_ms,
            bandwidth_gbps,
            igp_metric: 10,
            te_metric: 10,
            srlgs: BTreeSet::new(),
        }
    }

    /// Add a shared-risk group
    #[must_use]
    pub fn with_srlg(mut self, group: impl Into<SrlgId>) -> Self {
        self.srlgs.insert(group.into());
        self
    }

    /// Set the IGP metric
    #[must_use]
    pub fn with_igp_metric(mut self, metric: u32) -> Self {
        self.igp_metric = metric;
        self
    }

    fn cost(&self, objective: PathObjective) -> f64 {
        match objective {
            PathObjective::Latency => self.delay_ms,
            PathObjective::IgpMetric => f64::from(self.igp_metric),
            PathObjective::TeMetric => f64::from(self.te_metric),
            PathObjective::HopCount => 1.0,
        }
    }
}

/// In-memory topology oracle
#[derive(Debug, Default)]
pub struct SimTopology {
    links: RwLock<Vec<SimLink>>,
    failures: AtomicU32,
    calls: AtomicU32,
}

impl SimTopology {
    /// Empty topology
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a link
    #[must_use]
    pub fn with_link(self, link: SimLink) -> Self {
        self.links.write().push(link);
        self
    }

    /// Remove a link, e.g. to model a cut
    pub fn remove_link(&self, id: &LinkId) {
        self.links.write().retain(|l| &l.id != id);
    }

    /// Fail the next `n` path computations as unavailable
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Path computations served so far
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn usable(link: &SimLink, endpoints: &EndpointPair, constraints: &PathConstraintSet) -> bool {
        let avoided_node = |n: &NodeId| {
            constraints.avoid_nodes.contains(n) && *n != endpoints.head && *n != endpoints.tail
        };
        !constraints.avoid_links.contains(&link.id)
            && link.srlgs.is_disjoint(&constraints.avoid_srlgs)
            && constraints
                .min_bandwidth_gbps
                .map_or(true, |min| link.bandwidth_gbps >= min)
            && !avoided_node(&link.a)
            && !avoided_node(&link.z)
    }

    /// Shortest path under `constraints`, ignoring ceilings
    #[must_use]
    pub fn shortest_path(
        &self,
        endpoints: &EndpointPair,
        constraints: &PathConstraintSet,
    ) -> Option<ComputedPath> {
        let links = self.links.read();
        let mut graph: UnGraph<NodeId, usize> = UnGraph::new_undirected();
        let mut index: HashMap<NodeId, NodeIndex> = HashMap::new();
        let mut node = |graph: &mut UnGraph<NodeId, usize>, id: &NodeId| {
            *index
                .entry(id.clone())
                .or_insert_with(|| graph.add_node(id.clone()))
        };

        for (i, link) in links.iter().enumerate() {
            if Self::usable(link, endpoints, constraints) {
                let a = node(&mut graph, &link.a);
                let z = node(&mut graph, &link.z);
                graph.add_edge(a, z, i);
            }
        }

        let start = *index.get(&endpoints.head)?;
        let goal = *index.get(&endpoints.tail)?;
        let objective = constraints.objective;
        let (_, nodes) = astar(
            &graph,
            start,
            |n| n == goal,
            |e| links[*e.weight()].cost(objective),
            |_| 0.0,
        )?;

        let hops = nodes
            .windows(2)
            .map(|pair| {
                let link = graph
                    .edges_connecting(pair[0], pair[1])
                    .map(|e| &links[*e.weight()])
                    .min_by(|x, y| x.cost(objective).total_cmp(&y.cost(objective)))?;
                Some(PathHop {
                    from: graph[pair[0]].clone(),
                    to: graph[pair[1]].clone(),
                    link: link.id.clone(),
                    delay_ms: link.delay_ms,
                    available_bandwidth_gbps: link.bandwidth_gbps,
                    igp_metric: link.igp_metric,
                    te_metric: link.te_metric,
                })
            })
            .collect::<Option<Vec<_>>>()?;
        Some(ComputedPath::new(hops))
    }
}

#[async_trait]
impl TopologyOracle for SimTopology {
    async fn compute_path(
        &self,
        endpoints: &EndpointPair,
        constraints: &PathConstraintSet,
    ) -> Result<Option<ComputedPath>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.take_failure() {
            return Err(CollaboratorError::unavailable("topology", "simulated outage"));
        }
        Ok(self.shortest_path(endpoints, constraints))
    }

    async fn shared_risk_groups(
        &self,
        links: &BTreeSet<LinkId>,
    ) -> Result<BTreeSet<SrlgId>, CollaboratorError> {
        Ok(self
            .links
            .read()
            .iter()
            .filter(|l| links.contains(&l.id))
            .flat_map(|l| l.srlgs.iter().cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn square() -> SimTopology {
        SimTopology::new()
            .with_link(SimLink::new("L1", "A", "Z", 1.0, 100.0).with_srlg("G1"))
            .with_link(SimLink::new("L2", "A", "B", 2.0, 100.0).with_srlg("G1"))
            .with_link(SimLink::new("L3", "B", "Z", 2.0, 100.0))
            .with_link(SimLink::new("L4", "A", "C", 5.0, 100.0))
            .with_link(SimLink::new("L5", "C", "Z", 5.0, 5.0))
    }

    fn avoid(links: &[&str]) -> PathConstraintSet {
        PathConstraintSet::new(links.iter().map(|l| LinkId::from(*l)).collect(), 10)
    }

    #[test]
    fn picks_lowest_delay() {
        let path = square()
            .shortest_path(&EndpointPair::new("A", "Z"), &avoid(&[]))
            .unwrap();
        assert_eq!(path.hop_count(), 1);
        assert!(path.traverses_link(&LinkId::from("L1")));
    }

    #[test]
    fn honours_link_and_srlg_avoidance() {
        let topo = square();
        let endpoints = EndpointPair::new("A", "Z");
        let mut c = avoid(&["L1"]);
        let path = topo.shortest_path(&endpoints, &c).unwrap();
        assert!(path.traverses_link(&LinkId::from("L2")));

        c.avoid_srlgs.insert(SrlgId::from("G1"));
        let path = topo.shortest_path(&endpoints, &c).unwrap();
        assert!(path.traverses_link(&LinkId::from("L4")));

        c.min_bandwidth_gbps = Some(10.0);
        assert!(topo.shortest_path(&endpoints, &c).is_none());
    }

    #[tokio::test]
    async fn scripted_outage_fails_calls() {
        let topo = square();
        topo.fail_next(1);
        let endpoints = EndpointPair::new("A", "Z");
        assert!(topo.compute_path(&endpoints, &avoid(&[])).await.is_err());
        assert!(topo.compute_path(&endpoints, &avoid(&[])).await.is_ok());
        assert_eq!(topo.calls(), 2);
    }

    #[tokio::test]
    async fn reports_srlgs_of_links() {
        let groups = square()
            .shared_risk_groups(&BTreeSet::from([LinkId::from("L1")]))
            .await
            .unwrap();
        assert_eq!(groups, BTreeSet::from([SrlgId::from("G1")]));
    }
}
