//! Service tiers, thresholds and affected services

use crate::alert::{MetricKind, MetricSample};
use crate::ids::{NodeId, ServiceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Service tier. Declaration order is priority order: `Platinum` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaTier {
    /// Highest priority
    Platinum,
    /// Second priority
    Gold,
    /// Third priority
    Silver,
    /// Lowest priority
    Bronze,
}

impl SlaTier {
    /// All tiers, highest priority first
    pub const ALL: [Self; 4] = [Self::Platinum, Self::Gold, Self::Silver, Self::Bronze];

    /// Numeric priority (1 = highest)
    #[inline]
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::Platinum => 1,
            Self::Gold => 2,
            Self::Silver => 3,
            Self::Bronze => 4,
        }
    }

    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Platinum => "platinum",
            Self::Gold => "gold",
            Self::Silver => "silver",
            Self::Bronze => "bronze",
        }
    }
}

impl fmt::Display for SlaTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper bounds a measurement must stay under to meet an SLA
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlaThresholds {
    /// Maximum latency in milliseconds
    pub max_latency_ms: f64,
    /// Maximum jitter in milliseconds
    pub max_jitter_ms: f64,
    /// Maximum loss in percent
    pub max_loss_pct: f64,
}

impl SlaThresholds {
    /// Create thresholds
    #[inline]
    #[must_use]
    pub fn new(max_latency_ms: f64, max_jitter_ms: f64, max_loss_pct: f64) -> Self {
        Self {
            max_latency_ms,
            max_jitter_ms,
            max_loss_pct,
        }
    }

    /// Default thresholds for a tier
    #[must_use]
    pub fn for_tier(tier: SlaTier) -> Self {
        match tier {
            SlaTier::Platinum => Self::new(10.0, 2.0, 0.01),
            SlaTier::Gold => Self::new(25.0, 5.0, 0.1),
            SlaTier::Silver => Self::new(50.0, 10.0, 0.5),
            SlaTier::Bronze => Self::new(100.0, 20.0, 1.0),
        }
    }

    /// Metrics in `sample` that exceed these thresholds
    #[must_use]
    pub fn violations(&self, sample: &MetricSample) -> BTreeSet<MetricKind> {
        let mut violated = BTreeSet::new();
        if sample.latency_ms > self.max_latency_ms {
            violated.insert(MetricKind::Latency);
        }
        if sample.jitter_ms > self.max_jitter_ms {
            violated.insert(MetricKind::Jitter);
        }
        if sample.loss_pct > self.max_loss_pct {
            violated.insert(MetricKind::Loss);
        }
        violated
    }

    /// Whether `sample` is within every threshold
    #[inline]
    #[must_use]
    pub fn is_met_by(&self, sample: &MetricSample) -> bool {
        self.violations(sample).is_empty()
    }
}

/// Head-end and tail-end of a service or tunnel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointPair {
    /// Head-end node
    pub head: NodeId,
    /// Tail-end node
    pub tail: NodeId,
}

impl EndpointPair {
    /// Create an endpoint pair
    #[inline]
    #[must_use]
    pub fn new(head: impl Into<NodeId>, tail: impl Into<NodeId>) -> Self {
        Self {
            head: head.into(),
            tail: tail.into(),
        }
    }
}

impl fmt::Display for EndpointPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.head, self.tail)
    }
}

/// Path requirements a service imposes on its protection path
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ServiceRequirements {
    /// End-to-end delay ceiling
    pub max_delay_ms: Option<f64>,
    /// Bandwidth floor
    pub min_bandwidth_gbps: Option<f64>,
}

/// A service carried over a degraded link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectedService {
    /// Service id
    pub id: ServiceId,
    /// Service tier
    pub tier: SlaTier,
    /// Service endpoints
    pub endpoints: EndpointPair,
    /// Traffic-engineering technology as reported by inventory, if any
    pub technology: Option<String>,
    /// Path requirements
    pub requirements: ServiceRequirements,
}

impl AffectedService {
    /// Create an affected service without technology or requirements
    #[must_use]
    pub fn new(id: impl Into<ServiceId>, tier: SlaTier, endpoints: EndpointPair) -> Self {
        Self {
            id: id.into(),
            tier,
            endpoints,
            technology: None,
            requirements: ServiceRequirements::default(),
        }
    }

    /// Set the reported technology
    #[inline]
    #[must_use]
    pub fn with_technology(mut self, technology: impl Into<String>) -> Self {
        self.technology = Some(technology.into());
        self
    }

    /// Set the delay ceiling
    #[inline]
    #[must_use]
    pub fn with_max_delay_ms(mut self, max_delay_ms: f64) -> Self {
        self.requirements.max_delay_ms = Some(max_delay_ms);
        self
    }

    /// Set the bandwidth floor
    #[inline]
    #[must_use]
    pub fn with_min_bandwidth_gbps(mut self, min_bandwidth_gbps: f64) -> Self {
        self.requirements.min_bandwidth_gbps = Some(min_bandwidth_gbps);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_sort_by_priority() {
        let mut tiers = vec![SlaTier::Bronze, SlaTier::Platinum, SlaTier::Silver];
        tiers.sort();
        assert_eq!(tiers, vec![SlaTier::Platinum, SlaTier::Silver, SlaTier::Bronze]);
        assert_eq!(SlaTier::Gold.priority(), 2);
    }

    #[test]
    fn platinum_thresholds_flag_each_metric() {
        let thresholds = SlaThresholds::for_tier(SlaTier::Platinum);
        let sample = MetricSample::new(12.0, 1.0, 0.5);
        let violated = thresholds.violations(&sample);
        assert!(violated.contains(&MetricKind::Latency));
        assert!(violated.contains(&MetricKind::Loss));
        assert!(!violated.contains(&MetricKind::Jitter));
    }

    #[test]
    fn boundary_values_meet_the_sla() {
        let thresholds = SlaThresholds::for_tier(SlaTier::Gold);
        assert!(thresholds.is_met_by(&MetricSample::new(25.0, 5.0, 0.1)));
    }
}
