//! Tunnel controller
//!
//! Creates, verifies, re-weights and deletes protection tunnels. A tunnel
//! counts as provisioned only once the provisioning system reports it up;
//! half-created tunnels are deleted before the next attempt.

use crate::binding::{BindingHolder, BindingPool, BindingRanges, PoolError};
use crate::error::TunnelError;
use crate::technology::{TechnologySelection, TechnologySelector};
use reroute_model::{
    with_timeout, BindingId, Clock, CollaboratorError, ComputedPath, EndpointPair, IncidentId,
    NodeId, PathObjective, ProvisioningApi, RetryPolicy, Retryable, TeTechnology, Tunnel, TunnelId,
    TunnelSpec, TunnelStatus, WeightSplit,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Tunnel controller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Retry policy for provisioning calls
    pub retry: RetryPolicy,
    /// Technology used when nothing else determines one
    pub default_technology: Option<TeTechnology>,
    /// Binding-id ranges
    pub binding_ranges: BindingRanges,
    /// Deadline for one provisioning call
    pub call_timeout_secs: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            default_technology: Some(TeTechnology::SrMpls),
            binding_ranges: BindingRanges::default(),
            call_timeout_secs: 30,
        }
    }
}

/// What to provision
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionRequest {
    /// Owning incident
    pub owner: IncidentId,
    /// Head-end and tail-end
    pub endpoints: EndpointPair,
    /// Explicit path
    pub path: ComputedPath,
    /// Objective the path was computed for
    pub objective: PathObjective,
    /// Technology reported by the service, if any
    pub service_technology: Option<String>,
}

#[derive(Debug)]
enum AttemptFailure {
    Create(CollaboratorError),
    Status(TunnelId, CollaboratorError),
    NotUp(TunnelId, TunnelStatus),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create(e) => write!(f, "create failed: {e}"),
            Self::Status(id, e) => write!(f, "status of {id} unavailable: {e}"),
            Self::NotUp(id, status) => write!(f, "tunnel {id} reported {status:?}"),
        }
    }
}

impl Retryable for AttemptFailure {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Create(e) => e.is_retryable(),
            Self::Status(..) | Self::NotUp(..) => true,
        }
    }
}

/// Protection tunnel controller
#[derive(Clone)]
pub struct TunnelController {
    config: TunnelConfig,
    api: Arc<dyn ProvisioningApi>,
    pool: Arc<dyn BindingPool>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TunnelController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelController")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl TunnelController {
    /// Create a controller
    #[must_use]
    pub fn new(
        config: TunnelConfig,
        api: Arc<dyn ProvisioningApi>,
        pool: Arc<dyn BindingPool>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            api,
            pool,
            clock,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.call_timeout_secs)
    }

    /// Determine the technology for a tunnel at `head_end`
    ///
    /// # Errors
    /// `TunnelError::UnknownTechnology` when none can be determined.
    pub async fn select_technology(
        &self,
        service_technology: Option<&str>,
        head_end: &NodeId,
    ) -> Result<TechnologySelection, TunnelError> {
        TechnologySelector::new(self.config.default_technology, self.config.retry, self.timeout())
            .select(service_technology, head_end, self.api.as_ref())
            .await
    }

    /// Provision and verify a protection tunnel
    ///
    /// The binding id is reserved once for the owning incident, handed to the
    /// tunnel once it is up, and released again if every attempt fails.
    ///
    /// # Errors
    /// - `TunnelError::UnknownTechnology` if no technology can be chosen
    /// - `TunnelError::Pool` if the binding range is exhausted
    /// - `TunnelError::ProvisionExhausted` once retries are spent
    pub async fn provision(&self, request: &ProvisionRequest) -> Result<Tunnel, TunnelError> {
        let head_end = &request.endpoints.head;
        let selection = self
            .select_technology(request.service_technology.as_deref(), head_end)
            .await?;
        let binding = self
            .pool
            .allocate(head_end, selection.technology, request.owner)?;
        let reservation = BindingHolder::Reserved(request.owner);

        let spec = TunnelSpec {
            owner: request.owner,
            technology: selection.technology,
            endpoints: request.endpoints.clone(),
            path: request.path.clone(),
            binding,
            objective: request.objective,
        };

        let counter = AtomicU32::new(0);
        let (this, spec_ref, attempts_seen) = (self, &spec, &counter);
        let result = self
            .config
            .retry
            .run("provision_tunnel", move |attempt| {
                attempts_seen.store(attempt, Ordering::Relaxed);
                this.attempt(spec_ref)
            })
            .await;
        let attempts = counter.load(Ordering::Relaxed);

        match result {
            Ok(id) => {
                if let Err(lost) = self.pool.assign(head_end, binding, request.owner, &id) {
                    tracing::error!(
                        tunnel = %id,
                        %binding,
                        "binding lost during provisioning: {}",
                        lost
                    );
                    if let Err(e) = self.delete_remote(&id).await {
                        tracing::warn!(tunnel = %id, "could not remove unbound tunnel: {}", e);
                    }
                    return Err(lost.into());
                }
                tracing::info!(
                    incident = %request.owner,
                    tunnel = %id,
                    technology = %selection.technology,
                    binding = %binding,
                    "protection tunnel up"
                );
                metrics::counter!("reroute_tunnels_provisioned_total").increment(1);
                Ok(Tunnel {
                    id,
                    owner: request.owner,
                    technology: selection.technology,
                    endpoints: request.endpoints.clone(),
                    binding,
                    status: TunnelStatus::Up,
                    weight: WeightSplit::ORIGINAL_ONLY,
                    created_at: self.clock.now(),
                })
            }
            Err(failure) => {
                self.release_binding(head_end, binding, &reservation);
                tracing::error!(
                    incident = %request.owner,
                    attempts,
                    "tunnel provisioning exhausted: {}",
                    failure
                );
                Err(TunnelError::ProvisionExhausted {
                    attempts,
                    last_error: failure.to_string(),
                })
            }
        }
    }

    async fn attempt(&self, spec: &TunnelSpec) -> Result<TunnelId, AttemptFailure> {
        let timeout = self.timeout();
        let id = with_timeout("provisioning", timeout, self.api.create_tunnel(spec))
            .await
            .map_err(AttemptFailure::Create)?;

        let failure = match with_timeout("provisioning", timeout, self.api.tunnel_status(&id)).await
        {
            Ok(TunnelStatus::Up) => return Ok(id),
            Ok(status) => AttemptFailure::NotUp(id.clone(), status),
            Err(e) => AttemptFailure::Status(id.clone(), e),
        };

        if let Err(e) = self.delete_remote(&id).await {
            tracing::warn!(tunnel = %id, "could not remove half-created tunnel: {}", e);
        }
        Err(failure)
    }

    async fn delete_remote(&self, id: &TunnelId) -> Result<(), CollaboratorError> {
        let (api, timeout) = (&self.api, self.timeout());
        let result = self
            .config
            .retry
            .run("delete_tunnel", move |_| {
                with_timeout("provisioning", timeout, api.delete_tunnel(id))
            })
            .await;
        match result {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    fn release_binding(&self, head_end: &NodeId, binding: BindingId, holder: &BindingHolder) {
        match self.pool.release(head_end, binding, holder) {
            Ok(()) => {}
            Err(PoolError::NotAllocated { .. }) => {
                tracing::debug!(%binding, "binding already released");
            }
            Err(PoolError::NotHolder { holder: current, .. }) => {
                tracing::debug!(%binding, %current, "binding now held elsewhere, left alone");
            }
            Err(e) => tracing::warn!(%binding, "binding release failed: {}", e),
        }
    }

    /// Delete a tunnel and release its binding id
    ///
    /// Deleting a tunnel that no longer exists succeeds. The binding id is
    /// only released while this tunnel still holds it, so a repeated delete
    /// never frees a value another tunnel has since taken.
    ///
    /// # Errors
    /// `TunnelError::DeleteFailed` if the provisioning system keeps failing.
    pub async fn delete(&self, tunnel: &Tunnel) -> Result<(), TunnelError> {
        self.delete_remote(&tunnel.id)
            .await
            .map_err(|source| TunnelError::DeleteFailed {
                tunnel: tunnel.id.clone(),
                source,
            })?;
        self.release_binding(
            tunnel.head_end(),
            tunnel.binding,
            &BindingHolder::Tunnel(tunnel.id.clone()),
        );
        tracing::info!(tunnel = %tunnel.id, owner = %tunnel.owner, "protection tunnel deleted");
        Ok(())
    }

    /// Apply a traffic split to a tunnel
    ///
    /// # Errors
    /// `TunnelError::WeightUpdateFailed` once retries are spent.
    pub async fn set_weights(&self, tunnel: &Tunnel, split: WeightSplit) -> Result<(), TunnelError> {
        let (api, timeout, id) = (&self.api, self.timeout(), &tunnel.id);
        self.config
            .retry
            .run("update_weights", move |_| {
                with_timeout("provisioning", timeout, api.update_weights(id, split))
            })
            .await
            .map_err(|source| TunnelError::WeightUpdateFailed {
                tunnel: tunnel.id.clone(),
                source,
            })?;
        tracing::info!(tunnel = %tunnel.id, %split, "traffic split applied");
        Ok(())
    }
}
