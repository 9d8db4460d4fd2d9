//! Correlation of alerts into existing incidents
//!
//! Rules, checked in order:
//! - `SameLink`: an open incident saw an alert on the same link inside the window
//! - `ProtectionPath`: the link carries an open incident's protection path
//! - `AdjacentNode`: an open incident saw an alert on a link sharing a node inside the window
//!
//! When several incidents match the same rule the oldest one wins.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reroute_model::clock::to_delta;
use reroute_model::{Alert, IncidentId, LinkId, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Correlation rule that attached an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationRule {
    /// Same link inside the window
    SameLink,
    /// Link shares a node with an incident link inside the window
    AdjacentNode,
    /// Link is part of an incident's protection path
    ProtectionPath,
}

impl CorrelationRule {
    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SameLink => "same_link",
            Self::AdjacentNode => "adjacent_node",
            Self::ProtectionPath => "protection_path",
        }
    }
}

impl fmt::Display for CorrelationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incident an alert correlates with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationMatch {
    /// Matching incident
    pub incident: IncidentId,
    /// Rule that matched
    pub rule: CorrelationRule,
}

#[derive(Debug, Clone)]
struct Footprint {
    links: BTreeSet<LinkId>,
    nodes: BTreeSet<NodeId>,
    last_alert_at: DateTime<Utc>,
}

/// Index of open incidents used for correlation
#[derive(Debug)]
pub struct Correlator {
    window: Duration,
    footprints: DashMap<IncidentId, Footprint>,
    protection: DashMap<IncidentId, BTreeSet<LinkId>>,
}

impl Correlator {
    /// Create a correlator with the given window
    #[inline]
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            footprints: DashMap::new(),
            protection: DashMap::new(),
        }
    }

    /// Find the incident `alert` belongs to
    #[must_use]
    pub fn correlate(&self, alert: &Alert) -> Option<CorrelationMatch> {
        let window = to_delta(self.window);
        let in_window = |f: &Footprint| (alert.observed_at - f.last_alert_at).abs() <= window;

        let oldest = |rule: CorrelationRule, hits: Vec<IncidentId>| {
            hits.into_iter()
                .min()
                .map(|incident| CorrelationMatch { incident, rule })
        };

        let same_link: Vec<_> = self
            .footprints
            .iter()
            .filter(|e| e.links.contains(&alert.link) && in_window(e.value()))
            .map(|e| *e.key())
            .collect();
        if let Some(m) = oldest(CorrelationRule::SameLink, same_link) {
            return Some(m);
        }

        let protection: Vec<_> = self
            .protection
            .iter()
            .filter(|e| e.value().contains(&alert.link))
            .map(|e| *e.key())
            .collect();
        if let Some(m) = oldest(CorrelationRule::ProtectionPath, protection) {
            return Some(m);
        }

        let adjacent: Vec<_> = self
            .footprints
            .iter()
            .filter(|e| {
                (e.nodes.contains(&alert.a_node) || e.nodes.contains(&alert.z_node))
                    && in_window(e.value())
            })
            .map(|e| *e.key())
            .collect();
        oldest(CorrelationRule::AdjacentNode, adjacent)
    }

    /// Add `alert` to the footprint of `incident`
    pub fn track(&self, incident: IncidentId, alert: &Alert) {
        let mut entry = self.footprints.entry(incident).or_insert_with(|| Footprint {
            links: BTreeSet::new(),
            nodes: BTreeSet::new(),
            last_alert_at: alert.observed_at,
        });
        entry.links.insert(alert.link.clone());
        entry.nodes.insert(alert.a_node.clone());
        entry.nodes.insert(alert.z_node.clone());
        if alert.observed_at > entry.last_alert_at {
            entry.last_alert_at = alert.observed_at;
        }
    }

    /// Register the links of `incident`'s protection path
    pub fn set_protection_path(&self, incident: IncidentId, links: impl IntoIterator<Item = LinkId>) {
        self.protection.insert(incident, links.into_iter().collect());
    }

    /// Forget `incident`'s protection path
    pub fn clear_protection_path(&self, incident: IncidentId) {
        self.protection.remove(&incident);
    }

    /// Forget everything about `incident`
    pub fn release(&self, incident: IncidentId) {
        self.footprints.remove(&incident);
        self.protection.remove(&incident);
    }

    /// Number of tracked incidents
    #[inline]
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.footprints.len()
    }
}
