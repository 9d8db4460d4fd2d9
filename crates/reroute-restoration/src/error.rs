//! Restoration errors

use reroute_model::{CollaboratorError, IncidentId};
use reroute_tunnel::TunnelError;

/// Restoration failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum RestorationError {
    /// Settings rejected
    #[error("invalid restoration config: {0}")]
    InvalidConfig(String),

    /// Incident has no impact summary to take a tier and endpoints from
    #[error("incident {0} has not been assessed")]
    NotAssessed(IncidentId),

    /// Incident has no protection tunnel to cut over from
    #[error("incident {0} has no protection tunnel")]
    MissingTunnel(IncidentId),

    /// Every cutover stage has been applied
    #[error("cutover of incident {0} is already complete")]
    CutoverComplete(IncidentId),

    /// SLA could not be measured
    #[error("SLA query failed: {0}")]
    SlaUnavailable(#[source] CollaboratorError),

    /// Verification before a stage failed
    #[error("cutover stage {stage} not verified at {protection_weight}% protection: {detail}")]
    Unstable {
        /// Stage about to be applied
        stage: usize,
        /// Protection share left in place
        protection_weight: u8,
        /// What failed
        detail: String,
    },

    /// Weight update exhausted its retries
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
}

impl RestorationError {
    /// Whether the cutover must stop and escalate as unstable
    #[inline]
    #[must_use]
    pub fn is_cutover_unstable(&self) -> bool {
        matches!(self, Self::Unstable { .. } | Self::Tunnel(_))
    }
}
