//! Planner errors

use reroute_model::{AttemptOutcome, CollaboratorError, PlanAttempt};

/// Path planning failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlannerError {
    /// Every rung of the ladder failed
    #[error("no path after {} attempts", attempts.len())]
    NoPath {
        /// Attempts made, in ladder order
        attempts: Vec<PlanAttempt>,
    },

    /// The topology oracle stayed unreachable after retries
    #[error("topology oracle unavailable: {source}")]
    OracleUnavailable {
        /// Attempts made before giving up
        attempts: Vec<PlanAttempt>,
        /// Last oracle error
        #[source]
        source: CollaboratorError,
    },
}

impl PlannerError {
    /// Attempts made before failing
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> &[PlanAttempt] {
        match self {
            Self::NoPath { attempts } | Self::OracleUnavailable { attempts, .. } => attempts,
        }
    }

    /// Human-readable trace of the failure, one line per attempt
    #[must_use]
    pub fn trace(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .attempts()
            .iter()
            .map(|a| {
                let outcome = match &a.outcome {
                    AttemptOutcome::Found { hops, delay_ms } => {
                        format!("found {hops} hops, {delay_ms:.2}ms")
                    }
                    AttemptOutcome::NoPath => "no path".to_string(),
                    AttemptOutcome::Rejected { violations } => {
                        format!("rejected: {}", violations.join("; "))
                    }
                    AttemptOutcome::OracleFailed { error } => format!("oracle failed: {error}"),
                };
                format!("{}: {}", a.rung, outcome)
            })
            .collect();
        if let Self::OracleUnavailable { source, .. } = self {
            lines.push(format!("oracle unavailable: {source}"));
        }
        lines
    }
}
