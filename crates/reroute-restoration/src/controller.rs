//! Restoration controller
//!
//! Runs one monitoring poll or one cutover stage per call. Callers persist
//! the returned timer or progress before invoking it again.

use crate::config::RestorationConfig;
use crate::cutover::CutoverPlan;
use crate::error::RestorationError;
use crate::hold::{Assessment, HoldEvaluator, PollDecision};
use chrono::{DateTime, Utc};
use reroute_model::clock::to_delta;
use reroute_model::{
    with_timeout, Clock, CollaboratorError, CutoverProgress, EndpointPair, Incident, MetricSample,
    SlaOracle, SlaTier, WeightSplit,
};
use reroute_tunnel::TunnelController;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Result of one monitoring poll
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    /// Decision
    pub decision: PollDecision,
    /// Sample the decision started from
    pub sample: MetricSample,
    /// When the poll ran
    pub polled_at: DateTime<Utc>,
}

/// Result of one cutover stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageOutcome {
    /// Progress after the stage
    pub progress: CutoverProgress,
    /// Whether all traffic is back on the original path
    pub complete: bool,
}

/// Restoration controller
#[derive(Clone)]
pub struct RestorationController {
    config: RestorationConfig,
    sla: Arc<dyn SlaOracle>,
    tunnels: TunnelController,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RestorationController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestorationController")
            .field("config", &self.config)
            .field("tunnels", &self.tunnels)
            .finish_non_exhaustive()
    }
}

impl RestorationController {
    /// Create a controller
    #[must_use]
    pub fn new(
        config: RestorationConfig,
        sla: Arc<dyn SlaOracle>,
        tunnels: TunnelController,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            sla,
            tunnels,
            clock,
        }
    }

    /// Settings
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RestorationConfig {
        &self.config
    }

    fn target(&self, incident: &Incident) -> Result<(SlaTier, EndpointPair), RestorationError> {
        let tier = incident
            .governing_tier()
            .ok_or(RestorationError::NotAssessed(incident.id))?;
        let endpoints = incident
            .primary_service()
            .map(|s| s.endpoints.clone())
            .or_else(|| incident.tunnel.as_ref().map(|t| t.endpoints.clone()))
            .ok_or(RestorationError::NotAssessed(incident.id))?;
        Ok((tier, endpoints))
    }

    fn evaluator(&self, tier: SlaTier) -> HoldEvaluator {
        HoldEvaluator::new(tier, *self.config.tiers.for_tier(tier))
    }

    async fn measure(&self, endpoints: &EndpointPair) -> Result<MetricSample, CollaboratorError> {
        let (sla, timeout) = (&self.sla, Duration::from_secs(self.config.call_timeout_secs));
        self.config
            .retry
            .run("sla_query", move |_| {
                with_timeout("sla", timeout, sla.current_metrics(endpoints))
            })
            .await
    }

    /// When the next poll is due; `None` means now
    #[must_use]
    pub fn next_poll_at(&self, incident: &Incident) -> Option<DateTime<Utc>> {
        incident
            .last_poll_at
            .map(|at| at + to_delta(self.config.poll_interval()))
    }

    /// Poll the original path once
    ///
    /// An expired hold timer triggers a second, independent sample that
    /// decides between cutover and a restarted timer.
    ///
    /// # Errors
    /// - `RestorationError::NotAssessed` without a tier or endpoints
    /// - `RestorationError::SlaUnavailable` if the SLA oracle keeps failing
    pub async fn poll(&self, incident: &Incident) -> Result<PollOutcome, RestorationError> {
        let (tier, endpoints) = self.target(incident)?;
        let evaluator = self.evaluator(tier);
        let sample = self
            .measure(&endpoints)
            .await
            .map_err(RestorationError::SlaUnavailable)?;
        let now = self.clock.now();

        let decision = match evaluator.assess(incident.hold_timer.as_ref(), &sample, now) {
            Assessment::Decided(decision) => decision,
            Assessment::NeedsStabilityCheck(timer) => {
                let check = self
                    .measure(&endpoints)
                    .await
                    .map_err(RestorationError::SlaUnavailable)?;
                evaluator.confirm(&timer, &check, self.clock.now())
            }
        };

        tracing::debug!(
            incident = %incident.id,
            tier = %tier,
            decision = decision.as_str(),
            "restoration poll"
        );
        metrics::counter!("reroute_restoration_polls_total", "decision" => decision.as_str())
            .increment(1);
        Ok(PollOutcome {
            decision,
            sample,
            polled_at: now,
        })
    }

    /// Cutover plan for an incident, keeping the mode of a cutover in flight
    #[must_use]
    pub fn plan(&self, incident: &Incident) -> CutoverPlan {
        let mode = incident
            .cutover
            .map_or(self.config.cutover_mode, |c| c.mode);
        CutoverPlan::new(mode, &self.config.gradual_ladder)
    }

    /// When the next cutover stage is due; `None` means now
    #[must_use]
    pub fn next_stage_at(&self, incident: &Incident) -> Option<DateTime<Utc>> {
        let progress = incident.cutover?;
        self.plan(incident)
            .next_stage_at(&progress, self.config.stage_interval())
    }

    /// Verify the original path and apply the next cutover stage
    ///
    /// Leaves the tunnel in place; callers delete it once the returned
    /// outcome is complete and persisted.
    ///
    /// # Errors
    /// - `RestorationError::Unstable` if verification fails; the previous
    ///   split stays applied
    /// - `RestorationError::Tunnel` if the weight update is exhausted
    /// - `RestorationError::MissingTunnel` / `CutoverComplete` on misuse
    pub async fn apply_stage(&self, incident: &Incident) -> Result<StageOutcome, RestorationError> {
        let tunnel = incident
            .tunnel
            .as_ref()
            .ok_or(RestorationError::MissingTunnel(incident.id))?;
        let (tier, endpoints) = self.target(incident)?;
        let plan = self.plan(incident);
        let progress = incident
            .cutover
            .unwrap_or_else(|| CutoverProgress::start(plan.mode()));
        let weight = plan
            .next_weight(&progress)
            .ok_or(RestorationError::CutoverComplete(incident.id))?;

        let unstable = |detail: String| RestorationError::Unstable {
            stage: progress.stages_applied + 1,
            protection_weight: progress.protection_weight,
            detail,
        };
        let sample = self
            .measure(&endpoints)
            .await
            .map_err(|e| unstable(format!("verification query failed: {e}")))?;
        let violations = self.config.tiers.for_tier(tier).thresholds.violations(&sample);
        if !violations.is_empty() {
            let names: Vec<&str> = violations.iter().map(|m| m.as_str()).collect();
            return Err(unstable(format!("violated {}", names.join(", "))));
        }

        self.tunnels
            .set_weights(tunnel, WeightSplit::protection_share(weight))
            .await?;

        let now = self.clock.now();
        let next = plan
            .advance(&progress, now)
            .ok_or(RestorationError::CutoverComplete(incident.id))?;
        let complete = plan.is_complete(&next);
        tracing::info!(
            incident = %incident.id,
            stage = next.stages_applied,
            protection = weight,
            "cutover stage applied"
        );
        metrics::counter!("reroute_cutover_stages_total").increment(1);
        Ok(StageOutcome {
            progress: next,
            complete,
        })
    }
}
