//! Hard-constraint validation of oracle results

use reroute_model::{
    ComputedPath, EndpointPair, LinkId, NodeId, PathConstraintSet, ServiceRequirements,
};
use std::fmt;

/// A constraint the path breaks
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    /// Path is empty
    Empty,
    /// Path does not join the requested endpoints
    WrongEndpoints,
    /// Path uses an avoided link
    AvoidedLink(LinkId),
    /// Path transits an avoided node
    AvoidedNode(NodeId),
    /// Hop ceiling exceeded
    TooManyHops {
        /// Hops in the path
        hops: usize,
        /// Ceiling
        max: usize,
    },
    /// Delay ceiling exceeded
    DelayExceeded {
        /// Path delay
        delay_ms: f64,
        /// Ceiling
        max_ms: f64,
    },
    /// Bandwidth floor not met
    InsufficientBandwidth {
        /// Bottleneck bandwidth
        available_gbps: f64,
        /// Floor
        min_gbps: f64,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty path"),
            Self::WrongEndpoints => f.write_str("path does not join the service endpoints"),
            Self::AvoidedLink(link) => write!(f, "traverses avoided link {link}"),
            Self::AvoidedNode(node) => write!(f, "transits avoided node {node}"),
            Self::TooManyHops { hops, max } => write!(f, "{hops} hops exceeds ceiling {max}"),
            Self::DelayExceeded { delay_ms, max_ms } => {
                write!(f, "delay {delay_ms:.2}ms exceeds ceiling {max_ms:.2}ms")
            }
            Self::InsufficientBandwidth {
                available_gbps,
                min_gbps,
            } => write!(
                f,
                "bandwidth {available_gbps:.2}Gbps below floor {min_gbps:.2}Gbps"
            ),
        }
    }
}

/// Tighter of two optional ceilings
fn ceiling(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Tighter of two optional floors
fn floor(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Every hard constraint `path` breaks; empty when the path is acceptable
///
/// `requirements` are the service's own delay ceiling and bandwidth floor.
/// They apply on every rung, whatever the relaxed `constraints` dropped.
#[must_use]
pub fn validate(
    path: &ComputedPath,
    endpoints: &EndpointPair,
    constraints: &PathConstraintSet,
    requirements: &ServiceRequirements,
) -> Vec<Violation> {
    let (Some(first), Some(last)) = (path.hops.first(), path.hops.last()) else {
        return vec![Violation::Empty];
    };

    let mut violations = Vec::new();
    if first.from != endpoints.head || last.to != endpoints.tail {
        violations.push(Violation::WrongEndpoints);
    }

    violations.extend(
        path.links()
            .filter(|l| constraints.avoid_links.contains(*l))
            .cloned()
            .map(Violation::AvoidedLink),
    );
    violations.extend(
        path.transit_nodes()
            .into_iter()
            .filter(|n| constraints.avoid_nodes.contains(n))
            .map(Violation::AvoidedNode),
    );

    if path.hop_count() > constraints.max_hops {
        violations.push(Violation::TooManyHops {
            hops: path.hop_count(),
            max: constraints.max_hops,
        });
    }
    if let Some(max_ms) = ceiling(constraints.max_delay_ms, requirements.max_delay_ms) {
        let delay_ms = path.total_delay_ms();
        if delay_ms > max_ms {
            violations.push(Violation::DelayExceeded { delay_ms, max_ms });
        }
    }
    if let Some(min_gbps) = floor(
        constraints.min_bandwidth_gbps,
        requirements.min_bandwidth_gbps,
    ) {
        let available_gbps = path.min_bandwidth_gbps();
        if available_gbps < min_gbps {
            violations.push(Violation::InsufficientBandwidth {
                available_gbps,
                min_gbps,
            });
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use reroute_model::PathHop;
    use std::collections::BTreeSet;

    fn path() -> ComputedPath {
        ComputedPath::new(vec![
            PathHop::new("A", "B", "L2", 4.0, 10.0),
            PathHop::new("B", "Z", "L3", 4.0, 40.0),
        ])
    }

    fn constraints() -> PathConstraintSet {
        PathConstraintSet::new(BTreeSet::from([LinkId::from("L1")]), 10)
    }

    fn open() -> ServiceRequirements {
        ServiceRequirements::default()
    }

    #[test]
    fn acceptable_path_has_no_violations() {
        assert!(validate(&path(), &EndpointPair::new("A", "Z"), &constraints(), &open()).is_empty());
    }

    #[test]
    fn avoided_link_is_rejected() {
        let mut c = constraints();
        c.avoid_links.insert(LinkId::from("L3"));
        let v = validate(&path(), &EndpointPair::new("A", "Z"), &c, &open());
        assert_eq!(v, vec![Violation::AvoidedLink(LinkId::from("L3"))]);
    }

    #[test]
    fn ceilings_and_floor_are_enforced() {
        let mut c = constraints();
        c.max_hops = 1;
        c.max_delay_ms = Some(5.0);
        c.min_bandwidth_gbps = Some(20.0);
        c.avoid_nodes.insert(NodeId::from("B"));
        let v = validate(&path(), &EndpointPair::new("A", "Z"), &c, &open());
        assert_eq!(v.len(), 4);
        assert!(v.iter().any(|x| matches!(x, Violation::AvoidedNode(_))));
    }

    #[test]
    fn empty_and_misrouted_paths_are_rejected() {
        let endpoints = EndpointPair::new("A", "Z");
        assert_eq!(
            validate(&ComputedPath::default(), &endpoints, &constraints(), &open()),
            vec![Violation::Empty]
        );
        assert_eq!(
            validate(&path(), &EndpointPair::new("A", "Y"), &constraints(), &open()),
            vec![Violation::WrongEndpoints]
        );
    }

    #[test]
    fn service_ceiling_survives_relaxed_constraints() {
        let relaxed = constraints();
        assert_eq!(relaxed.max_delay_ms, None);
        let required = ServiceRequirements {
            max_delay_ms: Some(5.0),
            min_bandwidth_gbps: Some(20.0),
        };
        let v = validate(&path(), &EndpointPair::new("A", "Z"), &relaxed, &required);
        assert_eq!(
            v,
            vec![
                Violation::DelayExceeded {
                    delay_ms: 8.0,
                    max_ms: 5.0
                },
                Violation::InsufficientBandwidth {
                    available_gbps: 10.0,
                    min_gbps: 20.0
                },
            ]
        );
    }

    #[test]
    fn tighter_of_constraint_and_requirement_applies() {
        let mut c = constraints();
        c.max_delay_ms = Some(20.0);
        let required = ServiceRequirements {
            max_delay_ms: Some(6.0),
            min_bandwidth_gbps: None,
        };
        let v = validate(&path(), &EndpointPair::new("A", "Z"), &c, &required);
        assert_eq!(
            v,
            vec![Violation::DelayExceeded {
                delay_ms: 8.0,
                max_ms: 6.0
            }]
        );
    }
}
