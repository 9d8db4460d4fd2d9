//! Fingerprint deduplication

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reroute_model::clock::to_delta;
use reroute_model::{Fingerprint, IncidentId, LinkId};
use std::time::Duration;

#[derive(Debug, Clone)]
struct DedupEntry {
    incident: IncidentId,
    link: LinkId,
    accepted_at: DateTime<Utc>,
    cleared: bool,
}

/// A fingerprint already accepted inside the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupHit {
    /// Incident that owns the fingerprint
    pub incident: IncidentId,
    /// The link cleared since the fingerprint was last seen, so this raise
    /// is a state transition even though it is a duplicate
    pub after_clear: bool,
}

/// Fingerprints accepted within the dedup window
///
/// Entries are only kept as long as the window requires; expired ones are
/// dropped on lookup and by [`DedupIndex::prune`]. A clear does not end the
/// window, it only marks the link's entries so the next raise counts as a
/// transition.
#[derive(Debug)]
pub struct DedupIndex {
    window: Duration,
    entries: DashMap<Fingerprint, DedupEntry>,
}

impl DedupIndex {
    /// Create an index with the given window
    #[inline]
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: DashMap::new(),
        }
    }

    /// Incident that already accepted `fingerprint`, if still inside the window
    #[must_use]
    pub fn lookup(&self, fingerprint: &Fingerprint, at: DateTime<Utc>) -> Option<DedupHit> {
        let window = to_delta(self.window);
        let hit = self.entries.get_mut(fingerprint).map(|mut e| {
            let fresh = at - e.accepted_at <= window;
            let hit = DedupHit {
                incident: e.incident,
                after_clear: std::mem::take(&mut e.cleared),
            };
            (hit, fresh)
        });
        match hit {
            Some((hit, true)) => Some(hit),
            Some((_, false)) => {
                self.entries.remove(fingerprint);
                None
            }
            None => None,
        }
    }

    /// Record an accepted fingerprint
    pub fn record(
        &self,
        fingerprint: Fingerprint,
        link: LinkId,
        incident: IncidentId,
        at: DateTime<Utc>,
    ) {
        self.entries.insert(
            fingerprint,
            DedupEntry {
                incident,
                link,
                accepted_at: at,
                cleared: false,
            },
        );
    }

    /// Note that `link` cleared; its fingerprints stay inside the window
    pub fn mark_cleared(&self, link: &LinkId) {
        for mut entry in self.entries.iter_mut() {
            if &entry.link == link {
                entry.cleared = true;
            }
        }
    }

    /// Drop every fingerprint resolving to `incident`
    pub fn forget_incident(&self, incident: IncidentId) {
        self.entries.retain(|_, e| e.incident != incident);
    }

    /// Drop expired fingerprints
    pub fn prune(&self, now: DateTime<Utc>) {
        let window = to_delta(self.window);
        self.entries.retain(|_, e| now - e.accepted_at <= window);
    }

    /// Number of live fingerprints
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no fingerprint is tracked
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
