//! Path planner
//!
//! Walks the relaxation ladder against the topology oracle until a path
//! passes validation. Every attempt is recorded so the incident keeps a
//! reproducible account of how its path was chosen.

use crate::constraints::{ConstraintBuilder, PlanRequest, PlannerConfig};
use crate::error::PlannerError;
use crate::validate::validate;
use reroute_model::{
    with_timeout, AttemptOutcome, CollaboratorError, ComputedPath, PathConstraintSet, PlanAttempt,
    RelaxationRung, TopologyOracle,
};
use std::sync::Arc;
use std::time::Duration;

/// A path that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedPath {
    /// The path
    pub path: ComputedPath,
    /// Rung that produced it
    pub rung: RelaxationRung,
    /// Constraints it satisfies
    pub constraints: PathConstraintSet,
    /// Every attempt, including the successful one
    pub attempts: Vec<PlanAttempt>,
}

/// Protection path planner
#[derive(Clone)]
pub struct PathPlanner {
    config: PlannerConfig,
    oracle: Arc<dyn TopologyOracle>,
}

impl std::fmt::Debug for PathPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathPlanner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PathPlanner {
    /// Create a planner
    #[inline]
    #[must_use]
    pub fn new(config: PlannerConfig, oracle: Arc<dyn TopologyOracle>) -> Self {
        Self { config, oracle }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.call_timeout_secs)
    }

    /// Compute a protection path for `request`
    ///
    /// # Errors
    /// - `PlannerError::NoPath` if every rung fails
    /// - `PlannerError::OracleUnavailable` if the oracle keeps failing
    pub async fn plan(&self, request: &PlanRequest) -> Result<PlannedPath, PlannerError> {
        let builder = ConstraintBuilder::new(&self.config);
        let mut attempts = Vec::new();

        let (oracle, timeout) = (&self.oracle, self.timeout());
        let links = &request.causal_links;
        let srlgs = self
            .config
            .retry
            .run("shared_risk_groups", move |_| {
                with_timeout("topology", timeout, oracle.shared_risk_groups(links))
            })
            .await
            .map_err(|source| PlannerError::OracleUnavailable {
                attempts: Vec::new(),
                source,
            })?;

        let initial = builder.initial(request, srlgs);
        for (rung, constraints) in builder.ladder(initial) {
            let result = self.compute(request, &constraints).await;
            let outcome = match result {
                Ok(Some(path)) => {
                    let violations = validate(
                        &path,
                        &request.endpoints,
                        &constraints,
                        &request.requirements,
                    );
                    if violations.is_empty() {
                        tracing::info!(
                            %rung,
                            hops = path.hop_count(),
                            "protection path found: {}",
                            path
                        );
                        attempts.push(PlanAttempt {
                            rung,
                            constraints: constraints.clone(),
                            outcome: AttemptOutcome::Found {
                                hops: path.hop_count(),
                                delay_ms: path.total_delay_ms(),
                            },
                        });
                        return Ok(PlannedPath {
                            path,
                            rung,
                            constraints,
                            attempts,
                        });
                    }
                    tracing::warn!(%rung, "oracle path rejected: {:?}", violations);
                    AttemptOutcome::Rejected {
                        violations: violations.iter().map(ToString::to_string).collect(),
                    }
                }
                Ok(None) => {
                    tracing::debug!(%rung, "no path under constraints");
                    AttemptOutcome::NoPath
                }
                Err(source) => {
                    attempts.push(PlanAttempt {
                        rung,
                        constraints,
                        outcome: AttemptOutcome::OracleFailed {
                            error: source.to_string(),
                        },
                    });
                    return Err(PlannerError::OracleUnavailable { attempts, source });
                }
            };
            attempts.push(PlanAttempt {
                rung,
                constraints,
                outcome,
            });
        }

        Err(PlannerError::NoPath { attempts })
    }

    async fn compute(
        &self,
        request: &PlanRequest,
        constraints: &PathConstraintSet,
    ) -> Result<Option<ComputedPath>, CollaboratorError> {
        let (oracle, timeout) = (&self.oracle, self.timeout());
        let endpoints = &request.endpoints;
        self.config
            .retry
            .run("compute_path", move |_| {
                with_timeout("topology", timeout, oracle.compute_path(endpoints, constraints))
            })
            .await
    }
}
