//! Reference network used by scenarios and tests
//!
//! ```text
//!          L1 (2ms, G1)      L2 (2ms)
//!   PE1 --------------- P1 --------------- PE2
//!    |  \                                 / |
//!    |   L3 (3ms, G1) P2 --- L4 (3ms) ---   |
//!    |                                      |
//!    L5 (4ms) -- P3 -- L6 (4ms) -- P4 -- L7 (4ms)
//! ```
//!
//! The primary path PE1-P1-PE2 rides L1 and L2. L3 shares risk group G1
//! with L1, so protection for an L1 degradation lands on the southern
//! route unless shared-risk avoidance is relaxed.

use crate::impact::SimImpact;
use crate::topology::{SimLink, SimTopology};
use reroute_model::{AffectedService, EndpointPair, MetricSample, SlaTier};

/// Head-end of every reference service
pub const HEAD: &str = "PE1";
/// Tail-end of every reference service
pub const TAIL: &str = "PE2";

/// The reference topology
#[must_use]
pub fn metro_topology() -> SimTopology {
    SimTopology::new()
        .with_link(SimLink::new("L1", "PE1", "P1", 2.0, 100.0).with_srlg("G1"))
        .with_link(SimLink::new("L2", "P1", "PE2", 2.0, 100.0))
        .with_link(SimLink::new("L3", "PE1", "P2", 3.0, 40.0).with_srlg("G1"))
        .with_link(SimLink::new("L4", "P2", "PE2", 3.0, 40.0))
        .with_link(SimLink::new("L5", "PE1", "P3", 4.0, 100.0))
        .with_link(SimLink::new("L6", "P3", "P4", 4.0, 100.0))
        .with_link(SimLink::new("L7", "P4", "PE2", 4.0, 100.0))
}

/// Endpoints shared by the reference services
#[must_use]
pub fn metro_endpoints() -> EndpointPair {
    EndpointPair::new(HEAD, TAIL)
}

/// A service of `tier` riding the primary path
#[must_use]
pub fn primary_service(id: &str, tier: SlaTier) -> AffectedService {
    AffectedService::new(id, tier, metro_endpoints()).with_max_delay_ms(30.0)
}

/// Service inventory with one platinum and one gold service on L1/L2
#[must_use]
pub fn metro_impact() -> SimImpact {
    SimImpact::new()
        .with_service(primary_service("svc-platinum-1", SlaTier::Platinum), &["L1", "L2"])
        .with_service(primary_service("svc-gold-1", SlaTier::Gold), &["L1", "L2"])
}

/// Sample well inside every tier's thresholds
#[must_use]
pub fn healthy_sample() -> MetricSample {
    MetricSample::new(4.0, 0.5, 0.0)
}

/// Sample violating every tier's thresholds
#[must_use]
pub fn degraded_sample() -> MetricSample {
    MetricSample::new(180.0, 40.0, 3.0)
}
