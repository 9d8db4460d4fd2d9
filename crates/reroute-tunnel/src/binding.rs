//! Binding-id pools
//!
//! Binding ids are scoped to a head-end and drawn from a per-technology
//! range:
//! - Allocation hands out the lowest free value
//! - A value is live from allocation until its single release
//! - Only the current holder can release a value; a stale release from a
//!   tunnel that no longer holds it is refused

use dashmap::DashMap;
use parking_lot::Mutex;
use reroute_model::{BindingId, IncidentId, NodeId, TeTechnology, TunnelId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Debug};

/// Inclusive range of binding values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingRange {
    /// First value
    pub first: u32,
    /// Last value
    pub last: u32,
}

impl BindingRange {
    /// Create a range
    #[inline]
    #[must_use]
    pub fn new(first: u32, last: u32) -> Self {
        Self { first, last }
    }

    /// Number of values; zero for an inverted range
    #[inline]
    #[must_use]
    pub fn len(&self) -> u32 {
        if self.last < self.first {
            0
        } else {
            self.last - self.first + 1
        }
    }

    /// Whether the range holds no value
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `value` falls inside
    #[inline]
    #[must_use]
    pub fn contains(&self, value: u32) -> bool {
        (self.first..=self.last).contains(&value)
    }
}

/// Range per technology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingRanges {
    /// SR-MPLS binding SIDs
    pub sr_mpls: BindingRange,
    /// SRv6 binding SID function values
    pub srv6: BindingRange,
    /// RSVP-TE tunnel interface numbers
    pub rsvp_te: BindingRange,
}

impl Default for BindingRanges {
    fn default() -> Self {
        Self {
            sr_mpls: BindingRange::new(24_000, 24_999),
            srv6: BindingRange::new(1, 4_095),
            rsvp_te: BindingRange::new(1_000, 1_999),
        }
    }
}

impl BindingRanges {
    /// Range for `technology`
    #[inline]
    #[must_use]
    pub fn for_technology(&self, technology: TeTechnology) -> BindingRange {
        match technology {
            TeTechnology::SrMpls => self.sr_mpls,
            TeTechnology::Srv6 => self.srv6,
            TeTechnology::RsvpTe => self.rsvp_te,
        }
    }
}

/// Who holds a live binding value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BindingHolder {
    /// Reserved while `IncidentId`'s tunnel is being created
    Reserved(IncidentId),
    /// Referenced by a live tunnel
    Tunnel(TunnelId),
}

impl fmt::Display for BindingHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reserved(incident) => write!(f, "reservation of {incident}"),
            Self::Tunnel(tunnel) => write!(f, "tunnel {tunnel}"),
        }
    }
}

/// Binding pool errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Every value in the range is live
    #[error("binding range exhausted for {technology} on {head_end}")]
    Exhausted {
        /// Head-end
        head_end: NodeId,
        /// Technology
        technology: TeTechnology,
    },

    /// Value released that is not live
    #[error("binding {binding} is not allocated on {head_end}")]
    NotAllocated {
        /// Head-end
        head_end: NodeId,
        /// Binding
        binding: BindingId,
    },

    /// Value is live but held by someone else
    #[error("binding {binding} on {head_end} is held by {holder}, not {claimed}")]
    NotHolder {
        /// Head-end
        head_end: NodeId,
        /// Binding
        binding: BindingId,
        /// Current holder
        holder: BindingHolder,
        /// Holder named by the caller
        claimed: BindingHolder,
    },
}

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindingPoolStats {
    /// Successful allocations
    pub allocated: u64,
    /// Successful releases
    pub released: u64,
    /// Allocations refused for lack of values
    pub exhausted: u64,
}

/// Shared binding-id allocator
///
/// Implementations must make `allocate`, `assign` and `release` atomic per
/// (head-end, technology).
pub trait BindingPool: Send + Sync + Debug {
    /// Reserve the lowest free value for `incident`
    ///
    /// # Errors
    /// `PoolError::Exhausted` when no value is free.
    fn allocate(
        &self,
        head_end: &NodeId,
        technology: TeTechnology,
        incident: IncidentId,
    ) -> Result<BindingId, PoolError>;

    /// Hand a reserved value over to the tunnel created with it
    ///
    /// # Errors
    /// `PoolError::NotAllocated` when the value is not live, and
    /// `PoolError::NotHolder` when it is not reserved for `incident`.
    fn assign(
        &self,
        head_end: &NodeId,
        binding: BindingId,
        incident: IncidentId,
        tunnel: &TunnelId,
    ) -> Result<(), PoolError>;

    /// Return a live value to the pool on behalf of its holder
    ///
    /// # Errors
    /// `PoolError::NotAllocated` when the value is not live, and
    /// `PoolError::NotHolder` when `holder` does not hold it.
    fn release(
        &self,
        head_end: &NodeId,
        binding: BindingId,
        holder: &BindingHolder,
    ) -> Result<(), PoolError>;

    /// Current holder of a live value
    fn holder(&self, head_end: &NodeId, binding: BindingId) -> Option<BindingHolder>;

    /// Live values for a head-end and technology
    fn live(&self, head_end: &NodeId, technology: TeTechnology) -> BTreeSet<u32>;
}

#[derive(Debug, Default)]
struct PoolState {
    next_unused: Option<u32>,
    free: BTreeSet<u32>,
    live: BTreeMap<u32, BindingHolder>,
}

/// Process-local binding pool
#[derive(Debug, Default)]
pub struct InMemoryBindingPool {
    ranges: BindingRanges,
    pools: DashMap<(NodeId, TeTechnology), PoolState>,
    stats: Mutex<BindingPoolStats>,
}

impl InMemoryBindingPool {
    /// Create a pool over the given ranges
    #[inline]
    #[must_use]
    pub fn new(ranges: BindingRanges) -> Self {
        Self {
            ranges,
            pools: DashMap::new(),
            stats: Mutex::new(BindingPoolStats::default()),
        }
    }

    /// Pool statistics
    #[inline]
    #[must_use]
    pub fn stats(&self) -> BindingPoolStats {
        *self.stats.lock()
    }
}

impl InMemoryBindingPool {
    /// Check that `claimed` holds `binding`, returning the pool entry
    fn held_by(
        &self,
        head_end: &NodeId,
        binding: BindingId,
        claimed: &BindingHolder,
    ) -> Result<dashmap::mapref::one::RefMut<'_, (NodeId, TeTechnology), PoolState>, PoolError> {
        let not_allocated = || PoolError::NotAllocated {
            head_end: head_end.clone(),
            binding,
        };
        let state = self
            .pools
            .get_mut(&(head_end.clone(), binding.technology))
            .ok_or_else(not_allocated)?;
        match state.live.get(&binding.value).cloned() {
            None => Err(not_allocated()),
            Some(holder) if &holder != claimed => Err(PoolError::NotHolder {
                head_end: head_end.clone(),
                binding,
                holder,
                claimed: claimed.clone(),
            }),
            Some(_) => Ok(state),
        }
    }
}

impl BindingPool for InMemoryBindingPool {
    fn allocate(
        &self,
        head_end: &NodeId,
        technology: TeTechnology,
        incident: IncidentId,
    ) -> Result<BindingId, PoolError> {
        let range = self.ranges.for_technology(technology);
        let mut state = self
            .pools
            .entry((head_end.clone(), technology))
            .or_insert_with(|| PoolState {
                next_unused: (!range.is_empty()).then_some(range.first),
                ..PoolState::default()
            });

        let value = match state.free.pop_first() {
            Some(value) => Some(value),
            None => {
                let next = state.next_unused;
                if let Some(v) = next {
                    state.next_unused = v.checked_add(1).filter(|n| range.contains(*n));
                }
                next
            }
        };

        let Some(value) = value else {
            self.stats.lock().exhausted += 1;
            metrics::counter!("reroute_binding_exhausted_total").increment(1);
            return Err(PoolError::Exhausted {
                head_end: head_end.clone(),
                technology,
            });
        };

        state.live.insert(value, BindingHolder::Reserved(incident));
        self.stats.lock().allocated += 1;
        Ok(BindingId::new(technology, value))
    }

    fn assign(
        &self,
        head_end: &NodeId,
        binding: BindingId,
        incident: IncidentId,
        tunnel: &TunnelId,
    ) -> Result<(), PoolError> {
        let mut state = self.held_by(head_end, binding, &BindingHolder::Reserved(incident))?;
        state
            .live
            .insert(binding.value, BindingHolder::Tunnel(tunnel.clone()));
        Ok(())
    }

    fn release(
        &self,
        head_end: &NodeId,
        binding: BindingId,
        holder: &BindingHolder,
    ) -> Result<(), PoolError> {
        let mut state = self.held_by(head_end, binding, holder)?;
        state.live.remove(&binding.value);
        state.free.insert(binding.value);
        self.stats.lock().released += 1;
        Ok(())
    }

    fn holder(&self, head_end: &NodeId, binding: BindingId) -> Option<BindingHolder> {
        self.pools
            .get(&(head_end.clone(), binding.technology))
            .and_then(|s| s.live.get(&binding.value).cloned())
    }

    fn live(&self, head_end: &NodeId, technology: TeTechnology) -> BTreeSet<u32> {
        self.pools
            .get(&(head_end.clone(), technology))
            .map(|s| s.live.keys().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incident() -> IncidentId {
        IncidentId::new()
    }

    fn pool(first: u32, last: u32) -> InMemoryBindingPool {
        InMemoryBindingPool::new(BindingRanges {
            sr_mpls: BindingRange::new(first, last),
            ..BindingRanges::default()
        })
    }

    #[test]
    fn allocates_lowest_free_value() {
        let pool = pool(24_000, 24_999);
        let head = NodeId::from("PE1");
        let owner = incident();
        let reserved = BindingHolder::Reserved(owner);
        let a = pool.allocate(&head, TeTechnology::SrMpls, owner).unwrap();
        let b = pool.allocate(&head, TeTechnology::SrMpls, owner).unwrap();
        assert_eq!((a.value, b.value), (24_000, 24_001));

        pool.release(&head, a, &reserved).unwrap();
        let c = pool.allocate(&head, TeTechnology::SrMpls, owner).unwrap();
        assert_eq!(c.value, 24_000);
    }

    #[test]
    fn head_ends_have_independent_ranges() {
        let pool = pool(24_000, 24_999);
        let a = pool
            .allocate(&NodeId::from("PE1"), TeTechnology::SrMpls, incident())
            .unwrap();
        let b = pool
            .allocate(&NodeId::from("PE2"), TeTechnology::SrMpls, incident())
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn exhaustion_is_reported() {
        let pool = pool(10, 11);
        let head = NodeId::from("PE1");
        let owner = incident();
        pool.allocate(&head, TeTechnology::SrMpls, owner).unwrap();
        pool.allocate(&head, TeTechnology::SrMpls, owner).unwrap();
        assert!(matches!(
            pool.allocate(&head, TeTechnology::SrMpls, owner),
            Err(PoolError::Exhausted { .. })
        ));
        assert_eq!(pool.stats().exhausted, 1);
    }

    #[test]
    fn double_release_is_rejected() {
        let pool = pool(10, 20);
        let head = NodeId::from("PE1");
        let owner = incident();
        let reserved = BindingHolder::Reserved(owner);
        let id = pool.allocate(&head, TeTechnology::SrMpls, owner).unwrap();
        pool.release(&head, id, &reserved).unwrap();
        assert!(matches!(
            pool.release(&head, id, &reserved),
            Err(PoolError::NotAllocated { .. })
        ));
        assert!(pool.live(&head, TeTechnology::SrMpls).is_empty());
    }

    #[test]
    fn only_the_current_holder_releases() {
        let pool = pool(10, 20);
        let head = NodeId::from("PE1");
        let (first, second) = (incident(), incident());
        let old = TunnelId::from("tun-1");
        let new = TunnelId::from("tun-2");

        let id = pool.allocate(&head, TeTechnology::SrMpls, first).unwrap();
        pool.assign(&head, id, first, &old).unwrap();
        pool.release(&head, id, &BindingHolder::Tunnel(old.clone()))
            .unwrap();

        let again = pool.allocate(&head, TeTechnology::SrMpls, second).unwrap();
        assert_eq!(again, id);
        pool.assign(&head, again, second, &new).unwrap();

        assert!(matches!(
            pool.release(&head, id, &BindingHolder::Tunnel(old)),
            Err(PoolError::NotHolder { .. })
        ));
        assert_eq!(pool.holder(&head, id), Some(BindingHolder::Tunnel(new)));
        assert_eq!(pool.live(&head, TeTechnology::SrMpls), BTreeSet::from([10]));
    }

    #[test]
    fn assign_requires_the_reserving_incident() {
        let pool = pool(10, 20);
        let head = NodeId::from("PE1");
        let id = pool.allocate(&head, TeTechnology::SrMpls, incident()).unwrap();
        assert!(matches!(
            pool.assign(&head, id, incident(), &TunnelId::from("tun-9")),
            Err(PoolError::NotHolder { .. })
        ));
    }

    #[test]
    fn range_len_handles_inversion() {
        assert_eq!(BindingRange::new(5, 4).len(), 0);
        assert_eq!(BindingRange::new(24_000, 24_999).len(), 1_000);
    }
}
