//! Flap detection and exponential damping
//!
//! A link that changes state `threshold` times inside the flap window is
//! flapping. Each flapping occurrence damps the link for
//! `min(initial * 2^(n-1), max)`; the occurrence count resets after a quiet
//! period of `reset_after_secs`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reroute_model::clock::to_delta;
use reroute_model::{IncidentId, LinkId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Flap detection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlapConfig {
    /// Window in which transitions are counted
    pub window_secs: u64,
    /// Transitions within the window that mark the link as flapping
    pub threshold: usize,
    /// Damping for the first occurrence
    pub initial_dampen_secs: u64,
    /// Damping ceiling
    pub max_dampen_secs: u64,
    /// Quiet period after which the occurrence count starts over
    pub reset_after_secs: u64,
}

impl Default for FlapConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            threshold: 3,
            initial_dampen_secs: 60,
            max_dampen_secs: 3_600,
            reset_after_secs: 7_200,
        }
    }
}

impl FlapConfig {
    /// Damping applied for the `occurrence`-th flap (1-based)
    #[must_use]
    pub fn dampen_for(&self, occurrence: u32) -> Duration {
        let exp = occurrence.saturating_sub(1).min(32);
        let secs = self.initial_dampen_secs.saturating_mul(1_u64 << exp);
        Duration::from_secs(secs.min(self.max_dampen_secs))
    }
}

/// Per-link flap state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlapRecord {
    /// Transition timestamps inside the window
    pub transitions: VecDeque<DateTime<Utc>>,
    /// Flapping occurrences since the last reset
    pub occurrences: u32,
    /// Last time the link was declared flapping
    pub last_flap_at: Option<DateTime<Utc>>,
    /// Damping expiry
    pub dampen_until: Option<DateTime<Utc>>,
    /// Incident parked in `Dampening` for this link
    pub dampened_incident: Option<IncidentId>,
}

/// Storage for flap records
///
/// `update` must apply `f` atomically with respect to other updates of the
/// same link.
pub trait FlapStore: Send + Sync + Debug {
    /// Read-modify-write the record for `link`, creating it if absent
    fn update(&self, link: &LinkId, f: &mut dyn FnMut(&mut FlapRecord));

    /// Snapshot of the record for `link`
    fn get(&self, link: &LinkId) -> Option<FlapRecord>;
}

/// Process-local flap store
#[derive(Debug, Default)]
pub struct InMemoryFlapStore {
    records: DashMap<LinkId, FlapRecord>,
}

impl InMemoryFlapStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlapStore for InMemoryFlapStore {
    fn update(&self, link: &LinkId, f: &mut dyn FnMut(&mut FlapRecord)) {
        let mut entry = self.records.entry(link.clone()).or_default();
        f(entry.value_mut());
    }

    fn get(&self, link: &LinkId) -> Option<FlapRecord> {
        self.records.get(link).map(|r| r.value().clone())
    }
}

/// Result of recording one transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlapVerdict {
    /// Below threshold
    Stable,
    /// Threshold reached
    Flapping {
        /// Occurrence number since the last reset
        occurrence: u32,
        /// Damping applied
        dampen_for: Duration,
        /// Damping expiry
        until: DateTime<Utc>,
    },
}

impl FlapVerdict {
    /// Whether the link was declared flapping
    #[inline]
    #[must_use]
    pub fn is_flapping(&self) -> bool {
        matches!(self, Self::Flapping { .. })
    }
}

/// Flap detector over an injectable store
#[derive(Debug, Clone)]
pub struct FlapDetector {
    config: FlapConfig,
    store: Arc<dyn FlapStore>,
}

impl FlapDetector {
    /// Create a detector
    #[inline]
    #[must_use]
    pub fn new(config: FlapConfig, store: Arc<dyn FlapStore>) -> Self {
        Self { config, store }
    }

    /// Settings in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &FlapConfig {
        &self.config
    }

    /// Damping expiry for `link` if it is still damped at `at`
    #[must_use]
    pub fn damped_until(&self, link: &LinkId, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.store
            .get(link)
            .and_then(|r| r.dampen_until)
            .filter(|until| *until > at)
    }

    /// Incident parked for a damped link
    #[must_use]
    pub fn dampened_incident(&self, link: &LinkId) -> Option<IncidentId> {
        self.store.get(link).and_then(|r| r.dampened_incident)
    }

    /// Remember which incident waits out the damping of `link`
    pub fn park(&self, link: &LinkId, incident: IncidentId) {
        self.store
            .update(link, &mut |record| record.dampened_incident = Some(incident));
    }

    /// Record a state transition of `link` at `at`
    pub fn observe(&self, link: &LinkId, at: DateTime<Utc>) -> FlapVerdict {
        let window = to_delta(Duration::from_secs(self.config.window_secs));
        let reset_after = to_delta(Duration::from_secs(self.config.reset_after_secs));
        let mut verdict = FlapVerdict::Stable;

        self.store.update(link, &mut |record| {
            while record
                .transitions
                .front()
                .is_some_and(|t| at - *t > window)
            {
                record.transitions.pop_front();
            }
            record.transitions.push_back(at);

            if record.transitions.len() < self.config.threshold {
                return;
            }

            if record.last_flap_at.is_some_and(|last| at - last > reset_after) {
                record.occurrences = 0;
            }
            record.occurrences = record.occurrences.saturating_add(1);
            let dampen_for = self.config.dampen_for(record.occurrences);
            let until = at + to_delta(dampen_for);

            record.last_flap_at = Some(at);
            record.dampen_until = Some(until);
            record.dampened_incident = None;
            record.transitions.clear();

            verdict = FlapVerdict::Flapping {
                occurrence: record.occurrences,
                dampen_for,
                until,
            };
        });

        if let FlapVerdict::Flapping {
            occurrence,
            dampen_for,
            ..
        } = verdict
        {
            tracing::warn!(
                link = %link,
                occurrence,
                dampen_secs = dampen_for.as_secs(),
                "link flapping, damping"
            );
            metrics::counter!("reroute_link_flaps_total").increment(1);
        }
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn detector() -> FlapDetector {
        FlapDetector::new(FlapConfig::default(), Arc::new(InMemoryFlapStore::new()))
    }

    #[test]
    fn third_transition_in_window_flaps() {
        let d = detector();
        let link = LinkId::from("L1");
        assert_eq!(d.observe(&link, t(0)), FlapVerdict::Stable);
        assert_eq!(d.observe(&link, t(60)), FlapVerdict::Stable);
        let verdict = d.observe(&link, t(120));
        assert_eq!(
            verdict,
            FlapVerdict::Flapping {
                occurrence: 1,
                dampen_for: Duration::from_secs(60),
                until: t(180),
            }
        );
        assert_eq!(d.damped_until(&link, t(150)), Some(t(180)));
        assert_eq!(d.damped_until(&link, t(180)), None);
    }

    #[test]
    fn transitions_outside_window_do_not_count() {
        let d = detector();
        let link = LinkId::from("L1");
        d.observe(&link, t(0));
        d.observe(&link, t(200));
        assert_eq!(d.observe(&link, t(400)), FlapVerdict::Stable);
    }

    #[test]
    fn repeated_flapping_doubles_damping() {
        let d = detector();
        let link = LinkId::from("L1");
        for s in [0, 10, 20] {
            d.observe(&link, t(s));
        }
        let mut last = FlapVerdict::Stable;
        for s in [100, 110, 120] {
            last = d.observe(&link, t(s));
        }
        assert!(matches!(
            last,
            FlapVerdict::Flapping { occurrence: 2, dampen_for, .. } if dampen_for == Duration::from_secs(120)
        ));
    }

    #[test]
    fn occurrence_count_resets_after_quiet_period() {
        let d = detector();
        let link = LinkId::from("L1");
        for s in [0, 10, 20] {
            d.observe(&link, t(s));
        }
        let mut last = FlapVerdict::Stable;
        for s in [8_000, 8_010, 8_020] {
            last = d.observe(&link, t(s));
        }
        assert!(matches!(last, FlapVerdict::Flapping { occurrence: 1, .. }));
    }

    #[test]
    fn damping_is_capped() {
        let config = FlapConfig::default();
        assert_eq!(config.dampen_for(1), Duration::from_secs(60));
        assert_eq!(config.dampen_for(4), Duration::from_secs(480));
        assert_eq!(config.dampen_for(7), Duration::from_secs(3_600));
        assert_eq!(config.dampen_for(40), Duration::from_secs(3_600));
    }

    #[test]
    fn parked_incident_is_remembered() {
        let d = detector();
        let link = LinkId::from("L1");
        let id = IncidentId::new();
        d.park(&link, id);
        assert_eq!(d.dampened_incident(&link), Some(id));
    }
}
