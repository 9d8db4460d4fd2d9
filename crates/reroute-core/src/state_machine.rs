//! Incident transition table
//!
//! Self-loops are listed explicitly: they persist progress (a poll, a cutover
//! stage, a granted retry) without moving the incident to another state.

use reroute_model::IncidentState;

/// Transition not in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition {from} -> {to}")]
pub struct TransitionError {
    /// Current state
    pub from: IncidentState,
    /// Requested state
    pub to: IncidentState,
}

/// Validates a state transition.
///
/// # Errors
/// `TransitionError` when `to` is not reachable from `from`.
pub fn validate_transition(from: IncidentState, to: IncidentState) -> Result<(), TransitionError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: IncidentState) -> Vec<IncidentState> {
    use IncidentState::*;
    match from {
        Detecting => vec![Dampening, Closed, Assessing],
        Dampening => vec![Detecting],
        Assessing => vec![Computing, Escalated],
        Computing => vec![Provisioning, Escalated, Computing],
        Provisioning => vec![Steering, Escalated, Provisioning, Computing],
        Steering => vec![Monitoring, Provisioning],
        Monitoring => vec![Restoring, Monitoring, Escalated, Computing],
        Restoring => vec![Closed, Restoring, Escalated],
        Escalated => vec![Closed],
        Closed => vec![],
    }
}

fn allowed(from: IncidentState, to: IncidentState) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}
