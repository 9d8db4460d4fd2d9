//! Alert triage: damping gate, dedup, correlation, flap detection
//!
//! Triage is synchronous and keeps no per-alert state of its own beyond the
//! indexes it owns. Callers serialize triage per link and report back what
//! they did with the verdict through [`AlertTriage::admit`].

use crate::correlator::{CorrelationRule, Correlator};
use crate::dedup::DedupIndex;
use crate::flap::{FlapConfig, FlapDetector, FlapStore, FlapVerdict};
use chrono::{DateTime, Utc};
use reroute_model::{Alert, IncidentId, LinkId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Correlation and damping settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Window in which a repeated fingerprint is a duplicate
    pub dedup_window_secs: u64,
    /// Window for same-link and adjacent-node correlation
    pub correlation_window_secs: u64,
    /// Flap detection
    pub flap: FlapConfig,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 300,
            correlation_window_secs: 60,
            flap: FlapConfig::default(),
        }
    }
}

/// What to do with an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Triage {
    /// Link is damped; drop the alert
    Suppressed {
        /// Damping expiry
        until: DateTime<Utc>,
        /// Incident waiting out the damping, if any
        incident: Option<IncidentId>,
    },
    /// Clear alert; nothing to open
    Cleared {
        /// Flap verdict for the transition
        flap: FlapVerdict,
    },
    /// Same fingerprint inside the dedup window
    Duplicate {
        /// Incident that accepted the fingerprint
        incident: IncidentId,
    },
    /// Attach to an existing incident
    Correlated {
        /// Target incident
        incident: IncidentId,
        /// Rule that matched
        rule: CorrelationRule,
        /// Flap verdict for the transition
        flap: FlapVerdict,
    },
    /// Open a new incident
    Open {
        /// Flap verdict for the transition
        flap: FlapVerdict,
    },
}

/// Aggregate counters of triage decisions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TriageStats {
    /// Alerts seen
    pub received: u64,
    /// Dropped as duplicates
    pub duplicates: u64,
    /// Dropped because the link was damped
    pub suppressed: u64,
    /// Clear alerts
    pub cleared: u64,
    /// Attached to existing incidents
    pub correlated: u64,
    /// Opened new incidents
    pub opened: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    duplicates: AtomicU64,
    suppressed: AtomicU64,
    cleared: AtomicU64,
    correlated: AtomicU64,
    opened: AtomicU64,
}

/// Flap/dedup filter plus correlator
#[derive(Debug)]
pub struct AlertTriage {
    flap: FlapDetector,
    dedup: DedupIndex,
    correlator: Correlator,
    counters: Counters,
}

impl AlertTriage {
    /// Create triage over a flap store
    #[must_use]
    pub fn new(config: &CorrelationConfig, flap_store: Arc<dyn FlapStore>) -> Self {
        Self {
            flap: FlapDetector::new(config.flap.clone(), flap_store),
            dedup: DedupIndex::new(Duration::from_secs(config.dedup_window_secs)),
            correlator: Correlator::new(Duration::from_secs(config.correlation_window_secs)),
            counters: Counters::default(),
        }
    }

    /// Decide what to do with `alert`
    pub fn triage(&self, alert: &Alert) -> Triage {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let at = alert.observed_at;

        if let Some(until) = self.flap.damped_until(&alert.link, at) {
            self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("reroute_alerts_suppressed_total").increment(1);
            tracing::debug!(link = %alert.link, %until, "alert suppressed, link damped");
            return Triage::Suppressed {
                until,
                incident: self.flap.dampened_incident(&alert.link),
            };
        }

        if !alert.is_raise() {
            self.counters.cleared.fetch_add(1, Ordering::Relaxed);
            self.dedup.mark_cleared(&alert.link);
            let flap = self.flap.observe(&alert.link, at);
            return Triage::Cleared { flap };
        }

        self.dedup.prune(at);
        if let Some(hit) = self.dedup.lookup(&alert.fingerprint(), at) {
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("reroute_alerts_duplicate_total").increment(1);
            // Re-raise after a clear still counts towards flapping
            if hit.after_clear && self.flap.observe(&alert.link, at).is_flapping() {
                self.flap.park(&alert.link, hit.incident);
            }
            return Triage::Duplicate {
                incident: hit.incident,
            };
        }

        let correlated = self.correlator.correlate(alert);
        let flap = self.flap.observe(&alert.link, at);

        match correlated {
            Some(m) => {
                self.counters.correlated.fetch_add(1, Ordering::Relaxed);
                Triage::Correlated {
                    incident: m.incident,
                    rule: m.rule,
                    flap,
                }
            }
            None => {
                self.counters.opened.fetch_add(1, Ordering::Relaxed);
                Triage::Open { flap }
            }
        }
    }

    /// Record that `incident` now owns `alert`
    pub fn admit(&self, incident: IncidentId, alert: &Alert, flap: FlapVerdict) {
        self.dedup.record(
            alert.fingerprint(),
            alert.link.clone(),
            incident,
            alert.observed_at,
        );
        self.correlator.track(incident, alert);
        if flap.is_flapping() {
            self.flap.park(&alert.link, incident);
        }
    }

    /// Register `incident`'s protection path links
    pub fn protect(&self, incident: IncidentId, links: impl IntoIterator<Item = LinkId>) {
        self.correlator.set_protection_path(incident, links);
    }

    /// Forget `incident`'s protection path
    pub fn unprotect(&self, incident: IncidentId) {
        self.correlator.clear_protection_path(incident);
    }

    /// Forget a closed incident
    pub fn release(&self, incident: IncidentId) {
        self.correlator.release(incident);
        self.dedup.forget_incident(incident);
    }

    /// Damping expiry of `link` at `at`
    #[must_use]
    pub fn damped_until(&self, link: &LinkId, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.flap.damped_until(link, at)
    }

    /// Aggregate counters
    #[must_use]
    pub fn stats(&self) -> TriageStats {
        TriageStats {
            received: self.counters.received.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            suppressed: self.counters.suppressed.load(Ordering::Relaxed),
            cleared: self.counters.cleared.load(Ordering::Relaxed),
            correlated: self.counters.correlated.load(Ordering::Relaxed),
            opened: self.counters.opened.load(Ordering::Relaxed),
        }
    }
}
