//! Tunnel controller errors

use crate::binding::PoolError;
use reroute_model::{CollaboratorError, NodeId, TunnelId};

/// Tunnel lifecycle failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum TunnelError {
    /// No usable traffic-engineering technology
    #[error("unknown technology for head-end {head_end}: {detail}")]
    UnknownTechnology {
        /// Head-end
        head_end: NodeId,
        /// What was reported or missing
        detail: String,
    },

    /// Every creation attempt failed
    #[error("tunnel provisioning failed after {attempts} attempts: {last_error}")]
    ProvisionExhausted {
        /// Attempts made
        attempts: u32,
        /// Last failure
        last_error: String,
    },

    /// Binding pool refused
    #[error("binding pool: {0}")]
    Pool(#[from] PoolError),

    /// Tunnel could not be deleted
    #[error("failed to delete tunnel {tunnel}: {source}")]
    DeleteFailed {
        /// Tunnel
        tunnel: TunnelId,
        /// Cause
        #[source]
        source: CollaboratorError,
    },

    /// Traffic split could not be applied
    #[error("failed to update weights on tunnel {tunnel}: {source}")]
    WeightUpdateFailed {
        /// Tunnel
        tunnel: TunnelId,
        /// Cause
        #[source]
        source: CollaboratorError,
    },
}

impl TunnelError {
    /// Whether the failure is structural and needs the escalation hook
    #[inline]
    #[must_use]
    pub fn requires_escalation(&self) -> bool {
        matches!(
            self,
            Self::UnknownTechnology { .. } | Self::ProvisionExhausted { .. } | Self::Pool(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_errors_escalate() {
        let err = TunnelError::ProvisionExhausted {
            attempts: 4,
            last_error: "down".into(),
        };
        assert!(err.requires_escalation());
        let err = TunnelError::DeleteFailed {
            tunnel: TunnelId::from("t1"),
            source: CollaboratorError::unavailable("provisioning", "down"),
        };
        assert!(!err.requires_escalation());
        assert!(err.to_string().contains("t1"));
    }
}
