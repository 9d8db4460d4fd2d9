//! Interfaces to the external systems the engine talks to
//!
//! All of them are asynchronous and may fail or stall. Callers wrap every
//! call in [`with_timeout`], so an elapsed deadline surfaces as
//! [`CollaboratorError::Timeout`] and is handled like any other failure.

use crate::alert::MetricSample;
use crate::events::LifecycleEvent;
use crate::ids::{LinkId, NodeId, SrlgId, TunnelId};
use crate::path::{ComputedPath, PathConstraintSet};
use crate::retry::Retryable;
use crate::sla::{AffectedService, EndpointPair};
use crate::tunnel::{TeTechnology, TunnelSpec, TunnelStatus, WeightSplit};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

/// Failure talking to an external system
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    /// Call did not complete in time
    #[error("{service} timed out after {timeout_ms}ms")]
    Timeout {
        /// System called
        service: &'static str,
        /// Deadline applied
        timeout_ms: u64,
    },

    /// System unreachable or temporarily failing
    #[error("{service} unavailable: {message}")]
    Unavailable {
        /// System called
        service: &'static str,
        /// Reported cause
        message: String,
    },

    /// System refused the request; repeating it will not help
    #[error("{service} rejected request: {message}")]
    Rejected {
        /// System called
        service: &'static str,
        /// Reported cause
        message: String,
    },

    /// Referenced object does not exist
    #[error("not found: {0}")]
    NotFound(String),
}

impl CollaboratorError {
    /// Convenience constructor for transient failures
    #[inline]
    pub fn unavailable(service: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            service,
            message: message.into(),
        }
    }

    /// Convenience constructor for permanent failures
    #[inline]
    pub fn rejected(service: &'static str, message: impl Into<String>) -> Self {
        Self::Rejected {
            service,
            message: message.into(),
        }
    }

    /// Whether the object was simply absent
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl Retryable for CollaboratorError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable { .. })
    }
}

/// Run `call` with a deadline
///
/// # Errors
/// `CollaboratorError::Timeout` when the deadline passes, otherwise whatever
/// `call` returned.
pub async fn with_timeout<T, F>(
    service: &'static str,
    timeout: Duration,
    call: F,
) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout {
            service,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

/// Constrained path computation
#[async_trait]
pub trait TopologyOracle: Send + Sync {
    /// Best path between `endpoints` under `constraints`, or `None`
    async fn compute_path(
        &self,
        endpoints: &EndpointPair,
        constraints: &PathConstraintSet,
    ) -> Result<Option<ComputedPath>, CollaboratorError>;

    /// Shared-risk groups the given links belong to
    async fn shared_risk_groups(
        &self,
        _links: &BTreeSet<LinkId>,
    ) -> Result<BTreeSet<SrlgId>, CollaboratorError> {
        Ok(BTreeSet::new())
    }
}

/// Which services ride on which links
#[async_trait]
pub trait ServiceImpactOracle: Send + Sync {
    /// Services carried over any of `links`
    async fn affected_services(
        &self,
        links: &BTreeSet<LinkId>,
    ) -> Result<Vec<AffectedService>, CollaboratorError>;
}

/// Tunnel provisioning on network devices
#[async_trait]
pub trait ProvisioningApi: Send + Sync {
    /// Technologies supported by a head-end
    async fn capabilities(&self, head_end: &NodeId) -> Result<Vec<TeTechnology>, CollaboratorError>;

    /// Create a tunnel
    async fn create_tunnel(&self, spec: &TunnelSpec) -> Result<TunnelId, CollaboratorError>;

    /// Operational status of a tunnel
    async fn tunnel_status(&self, tunnel: &TunnelId) -> Result<TunnelStatus, CollaboratorError>;

    /// Set the traffic split between a tunnel and the original path
    async fn update_weights(
        &self,
        tunnel: &TunnelId,
        split: WeightSplit,
    ) -> Result<(), CollaboratorError>;

    /// Delete a tunnel
    async fn delete_tunnel(&self, tunnel: &TunnelId) -> Result<(), CollaboratorError>;
}

/// Live SLA measurements
#[async_trait]
pub trait SlaOracle: Send + Sync {
    /// Current metrics of the original path between `endpoints`
    async fn current_metrics(
        &self,
        endpoints: &EndpointPair,
    ) -> Result<MetricSample, CollaboratorError>;
}

/// Operator-facing notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver an event
    async fn notify(&self, event: &LifecycleEvent) -> Result<(), CollaboratorError>;
}

/// Append-only audit trail
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record an event
    async fn record(&self, event: &LifecycleEvent) -> Result<(), CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn stalled_call_becomes_timeout() {
        let result: Result<(), _> = with_timeout("sla", Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert_eq!(
            result,
            Err(CollaboratorError::Timeout {
                service: "sla",
                timeout_ms: 5_000
            })
        );
    }

    #[test]
    fn timeouts_and_outages_are_retryable() {
        assert!(CollaboratorError::unavailable("x", "down").is_retryable());
        assert!(!CollaboratorError::rejected("x", "bad").is_retryable());
        assert!(!CollaboratorError::NotFound("t".into()).is_retryable());
    }
}
