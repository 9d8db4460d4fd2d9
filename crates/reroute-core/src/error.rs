//! Error types for the lifecycle engine
//!
//! Every error maps onto one of three classes:
//! - Transient: retried with backoff, the incident stays resumable
//! - Structural: never retried; handled by escalation or surfaced to callers
//! - Suppressed: absorbed and counted (duplicate or damped alerts)

use crate::config::ConfigError;
use crate::state_machine::TransitionError;
use crate::tasks::TaskType;
use chrono::{DateTime, Utc};
use reroute_model::{CollaboratorError, IncidentId, IncidentState, Retryable};
use reroute_restoration::RestorationError;
use reroute_tunnel::TunnelError;

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Worth retrying
    Transient,
    /// Needs escalation or a caller fix
    Structural,
    /// Silently absorbed
    Suppressed,
}

/// Incident store failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No record, active or archived
    #[error("incident {0} not found")]
    NotFound(IncidentId),

    /// Record with the same id already stored
    #[error("incident {0} already exists")]
    AlreadyExists(IncidentId),

    /// Optimistic concurrency check failed
    #[error("incident {id} changed concurrently: expected version {expected}, found {found}")]
    Conflict {
        /// Incident
        id: IncidentId,
        /// Version the writer started from
        expected: u64,
        /// Version in the store
        found: u64,
    },

    /// Backend unreachable or failing
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Classification
    #[inline]
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Unavailable(_) | Self::Conflict { .. } => ErrorClass::Transient,
            Self::NotFound(_) | Self::AlreadyExists(_) => ErrorClass::Structural,
        }
    }
}

/// Engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Persisting a record failed; the previous state is intact
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Transition not in the table
    #[error(transparent)]
    IllegalTransition(#[from] TransitionError),

    /// Task does not match the incident's persisted state
    #[error("task {task} does not apply to incident {incident} in state {state}")]
    TaskStateMismatch {
        /// Incident
        incident: IncidentId,
        /// Requested task
        task: TaskType,
        /// Persisted state
        state: IncidentState,
    },

    /// Step called before its wait elapsed
    #[error("incident {incident} is not due before {due}")]
    NotDue {
        /// Incident
        incident: IncidentId,
        /// Earliest time the step may run
        due: DateTime<Utc>,
    },

    /// A collaborator failed after retries
    #[error("collaborator failure: {0}")]
    Collaborator(#[from] CollaboratorError),

    /// Tunnel teardown or update failed
    #[error("tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// Restoration failed outside a cutover verification
    #[error("restoration error: {0}")]
    Restoration(#[from] RestorationError),

    /// Persisted record is missing data its state requires
    #[error("incident {incident} is inconsistent: {detail}")]
    Inconsistent {
        /// Incident
        incident: IncidentId,
        /// What is missing
        detail: String,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Engine is shutting down
    #[error("engine is shutting down")]
    ShuttingDown,
}

impl EngineError {
    /// Classification
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Store(e) => e.class(),
            Self::Collaborator(e) if e.is_retryable() => ErrorClass::Transient,
            Self::Tunnel(TunnelError::DeleteFailed { .. } | TunnelError::WeightUpdateFailed { .. })
            | Self::Restoration(RestorationError::SlaUnavailable(_))
            | Self::NotDue { .. } => ErrorClass::Transient,
            _ => ErrorClass::Structural,
        }
    }

    /// Whether a driver should retry the step
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    pub(crate) fn inconsistent(incident: IncidentId, detail: impl Into<String>) -> Self {
        Self::Inconsistent {
            incident,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_failures_are_transient() {
        let err = EngineError::from(StoreError::Unavailable("disk full".into()));
        assert!(err.is_retryable());
        let err = EngineError::from(StoreError::NotFound(IncidentId::new()));
        assert_eq!(err.class(), ErrorClass::Structural);
    }

    #[test]
    fn collaborator_timeout_is_transient() {
        let err = EngineError::from(CollaboratorError::Timeout {
            service: "service-impact",
            timeout_ms: 30_000,
        });
        assert!(err.is_retryable());
        let err = EngineError::from(CollaboratorError::rejected("service-impact", "bad links"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn mismatch_is_structural() {
        let err = EngineError::TaskStateMismatch {
            incident: IncidentId::new(),
            task: TaskType::ComputePath,
            state: IncidentState::Monitoring,
        };
        assert_eq!(err.class(), ErrorClass::Structural);
        assert!(err.to_string().contains("compute_path"));
    }
}
