//! Simulated provisioning system
//!
//! Tunnels live in a map keyed by generated id. Failures are scripted per
//! call kind with countdowns so tests can model flaky controllers.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use reroute_model::{
    CollaboratorError, NodeId, ProvisioningApi, TeTechnology, TunnelId, TunnelSpec, TunnelStatus,
    WeightSplit,
};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// A tunnel as the simulated controller sees it
#[derive(Debug, Clone, PartialEq)]
pub struct SimTunnel {
    /// What was requested
    pub spec: TunnelSpec,
    /// Reported operational status
    pub status: TunnelStatus,
    /// Last applied split
    pub weight: WeightSplit,
}

fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// In-memory provisioning API
#[derive(Debug, Default)]
pub struct SimProvisioning {
    capabilities: DashMap<NodeId, Vec<TeTechnology>>,
    tunnels: DashMap<TunnelId, SimTunnel>,
    next_id: AtomicU64,
    create_failures: AtomicU32,
    reject_creates: AtomicBool,
    down_on_create: AtomicU32,
    weight_failures: AtomicU32,
    delete_failures: AtomicU32,
    capability_failures: AtomicU32,
    creates: AtomicU32,
    deletes: AtomicU32,
    weight_log: Mutex<Vec<(TunnelId, WeightSplit)>>,
}

impl SimProvisioning {
    /// Controller with no advertised capabilities
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise `technologies` at `node`
    #[must_use]
    pub fn with_capabilities(self, node: impl Into<NodeId>, technologies: &[TeTechnology]) -> Self {
        self.capabilities.insert(node.into(), technologies.to_vec());
        self
    }

    /// Fail the next `n` creates as unavailable
    pub fn fail_creates(&self, n: u32) {
        self.create_failures.store(n, Ordering::SeqCst);
    }

    /// Reject every create permanently
    pub fn reject_creates(&self, reject: bool) {
        self.reject_creates.store(reject, Ordering::SeqCst);
    }

    /// Report the next `n` created tunnels as down
    pub fn report_down(&self, n: u32) {
        self.down_on_create.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` weight updates
    pub fn fail_weight_updates(&self, n: u32) {
        self.weight_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` deletes
    pub fn fail_deletes(&self, n: u32) {
        self.delete_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` capability queries
    pub fn fail_capabilities(&self, n: u32) {
        self.capability_failures.store(n, Ordering::SeqCst);
    }

    /// Tunnels that currently exist
    #[must_use]
    pub fn live_tunnels(&self) -> Vec<TunnelId> {
        let mut ids: Vec<_> = self.tunnels.iter().map(|t| t.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Snapshot of one tunnel
    #[must_use]
    pub fn tunnel(&self, id: &TunnelId) -> Option<SimTunnel> {
        self.tunnels.get(id).map(|t| t.clone())
    }

    /// Every successful weight update, in order
    #[must_use]
    pub fn weight_history(&self) -> Vec<(TunnelId, WeightSplit)> {
        self.weight_log.lock().clone()
    }

    /// Create calls received
    #[must_use]
    pub fn creates(&self) -> u32 {
        self.creates.load(Ordering::SeqCst)
    }

    /// Successful deletes
    #[must_use]
    pub fn deletes(&self) -> u32 {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProvisioningApi for SimProvisioning {
    async fn capabilities(&self, head_end: &NodeId) -> Result<Vec<TeTechnology>, CollaboratorError> {
        if take(&self.capability_failures) {
            return Err(CollaboratorError::unavailable("provisioning", "capability query failed"));
        }
        Ok(self
            .capabilities
            .get(head_end)
            .map(|c| c.clone())
            .unwrap_or_default())
    }

    async fn create_tunnel(&self, spec: &TunnelSpec) -> Result<TunnelId, CollaboratorError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.reject_creates.load(Ordering::SeqCst) {
            return Err(CollaboratorError::rejected("provisioning", "tunnel refused"));
        }
        if take(&self.create_failures) {
            return Err(CollaboratorError::unavailable("provisioning", "create timed out"));
        }

        let id = TunnelId::new(format!(
            "tun-{}",
            self.next_id.fetch_add(1, Ordering::SeqCst) + 1
        ));
        let status = if take(&self.down_on_create) {
            TunnelStatus::Down
        } else {
            TunnelStatus::Up
        };
        tracing::debug!(tunnel = %id, binding = %spec.binding, "simulated tunnel created");
        self.tunnels.insert(
            id.clone(),
            SimTunnel {
                spec: spec.clone(),
                status,
                weight: WeightSplit::ORIGINAL_ONLY,
            },
        );
        Ok(id)
    }

    async fn tunnel_status(&self, tunnel: &TunnelId) -> Result<TunnelStatus, CollaboratorError> {
        self.tunnels
            .get(tunnel)
            .map(|t| t.status)
            .ok_or_else(|| CollaboratorError::NotFound(tunnel.to_string()))
    }

    async fn update_weights(
        &self,
        tunnel: &TunnelId,
        split: WeightSplit,
    ) -> Result<(), CollaboratorError> {
        if take(&self.weight_failures) {
            return Err(CollaboratorError::unavailable("provisioning", "weight update failed"));
        }
        let mut entry = self
            .tunnels
            .get_mut(tunnel)
            .ok_or_else(|| CollaboratorError::NotFound(tunnel.to_string()))?;
        entry.weight = split;
        self.weight_log.lock().push((tunnel.clone(), split));
        Ok(())
    }

    async fn delete_tunnel(&self, tunnel: &TunnelId) -> Result<(), CollaboratorError> {
        if take(&self.delete_failures) {
            return Err(CollaboratorError::unavailable("provisioning", "delete failed"));
        }
        self.tunnels
            .remove(tunnel)
            .ok_or_else(|| CollaboratorError::NotFound(tunnel.to_string()))?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
