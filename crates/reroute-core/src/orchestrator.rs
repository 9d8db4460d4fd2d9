//! Incident state machine
//!
//! Owns every incident record. Each step runs under the incident's async
//! lock, loads the persisted record, calls at most the subsystems that step
//! needs, and commits the new state together with its payload before
//! anything else observes it. A step that fails before its commit leaves
//! the previous record untouched, so it can simply be run again.

use crate::config::{CascadePolicy, OrchestratorConfig};
use crate::emitter::EventEmitter;
use crate::error::{EngineError, StoreError};
use crate::escalation::{arbitrate, Arbitrated, EscalationContext, EscalationPolicy};
use crate::state_machine::validate_transition;
use crate::store::IncidentStore;
use crate::tasks::{Resolution, TaskPayload, TaskRequest, TaskResult, TaskType};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reroute_correlation::{AlertTriage, CorrelationRule, FlapVerdict};
use reroute_model::{
    with_timeout, AffectedService, Alert, Clock, CollaboratorError, EscalationReason,
    EscalationRecord, EventKind, ImpactSummary, Incident, IncidentId, IncidentState, LinkId,
    Outcome, PathObjective, RecoveryAction, ServiceImpactOracle, TeTechnology, TransitionRecord,
    WeightSplit,
};
use reroute_path::{PathPlanner, PlanRequest};
use reroute_restoration::{PollDecision, RestorationController, RestorationError};
use reroute_tunnel::{ProvisionRequest, TunnelController, TunnelError};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type StepResult = Result<(Incident, String), EngineError>;

/// Everything the orchestrator drives
pub(crate) struct OrchestratorParts {
    pub(crate) config: OrchestratorConfig,
    pub(crate) store: Arc<dyn IncidentStore>,
    pub(crate) triage: Arc<AlertTriage>,
    pub(crate) impact: Arc<dyn ServiceImpactOracle>,
    pub(crate) planner: PathPlanner,
    pub(crate) tunnels: TunnelController,
    pub(crate) restoration: RestorationController,
    pub(crate) policy: Arc<dyn EscalationPolicy>,
    pub(crate) emitter: EventEmitter,
    pub(crate) clock: Arc<dyn Clock>,
}

pub(crate) struct Orchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn IncidentStore>,
    triage: Arc<AlertTriage>,
    impact: Arc<dyn ServiceImpactOracle>,
    planner: PathPlanner,
    tunnels: TunnelController,
    restoration: RestorationController,
    policy: Arc<dyn EscalationPolicy>,
    emitter: EventEmitter,
    clock: Arc<dyn Clock>,
    locks: DashMap<IncidentId, Arc<Mutex<()>>>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("locks", &self.locks.len())
            .finish_non_exhaustive()
    }
}

/// Move the live tunnel, if any, into the teardown marker
fn detach_tunnel(incident: &mut Incident) {
    if let Some(tunnel) = incident.tunnel.take() {
        incident.pending_teardown = Some(tunnel);
    }
}

/// Drop everything tied to the current protection attempt
fn clear_protection(incident: &mut Incident) {
    detach_tunnel(incident);
    incident.path = None;
    incident.hold_timer = None;
    incident.cutover = None;
    incident.last_poll_at = None;
}

impl Orchestrator {
    pub(crate) fn new(parts: OrchestratorParts) -> Self {
        Self {
            config: parts.config,
            store: parts.store,
            triage: parts.triage,
            impact: parts.impact,
            planner: parts.planner,
            tunnels: parts.tunnels,
            restoration: parts.restoration,
            policy: parts.policy,
            emitter: parts.emitter,
            clock: parts.clock,
            locks: DashMap::new(),
        }
    }

    pub(crate) fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &Arc<dyn IncidentStore> {
        &self.store
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    async fn lock(&self, id: IncidentId) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.locks.entry(id).or_default().value());
        lock.lock_owned().await
    }

    /// Earliest time the next automated step may run; `None` means now
    pub(crate) fn next_due(&self, incident: &Incident) -> Option<DateTime<Utc>> {
        match incident.state {
            IncidentState::Dampening => incident.dampen_until,
            IncidentState::Monitoring if !incident.cascade_pending => {
                self.restoration.next_poll_at(incident)
            }
            IncidentState::Restoring => self.restoration.next_stage_at(incident),
            _ => None,
        }
    }

    fn not_before(&self, incident: &Incident, due: Option<DateTime<Utc>>) -> Result<(), EngineError> {
        match due {
            Some(due) if self.clock.now() < due => Err(EngineError::NotDue {
                incident: incident.id,
                due,
            }),
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    async fn persist(&self, mut next: Incident) -> Result<Incident, EngineError> {
        next.updated_at = self.clock.now();
        let expected = next.version;
        Ok(self.store.commit(next, expected).await?)
    }

    /// Validate, record and commit a transition, then announce it
    async fn advance(
        &self,
        mut next: Incident,
        to: IncidentState,
        trigger: impl Into<String>,
    ) -> Result<Incident, EngineError> {
        let from = next.state;
        validate_transition(from, to)?;
        let trigger = trigger.into();
        let now = self.clock.now();

        next.state = to;
        next.updated_at = now;
        if from != to {
            next.history.push(TransitionRecord {
                from,
                to,
                trigger: trigger.clone(),
                at: now,
            });
        }
        if to == IncidentState::Closed {
            next.closed_at = Some(now);
        }
        let expected = next.version;
        let stored = self.store.commit(next, expected).await?;

        if from != to {
            tracing::info!(
                incident = %stored.id,
                from = from.as_str(),
                to = to.as_str(),
                trigger = %trigger,
                "incident transition"
            );
            metrics::counter!(
                "reroute_transitions_total",
                "from" => from.as_str(),
                "to" => to.as_str()
            )
            .increment(1);
            self.emitter
                .emit(stored.id, now, EventKind::StateChanged { from, to, trigger })
                .await;
        }
        if to == IncidentState::Closed {
            self.finalize(&stored, now).await;
        }
        Ok(stored)
    }

    async fn finalize(&self, closed: &Incident, at: DateTime<Utc>) {
        if let Err(e) = self.store.archive(closed.id).await {
            tracing::warn!(incident = %closed.id, "archiving closed incident failed: {}", e);
        }
        self.triage.release(closed.id);
        self.locks.remove(&closed.id);
        metrics::counter!("reroute_incidents_closed_total").increment(1);
        if let Some(outcome) = closed.outcome {
            self.emitter
                .emit(closed.id, at, EventKind::Closed { outcome })
                .await;
        }
    }

    /// Delete the tunnel awaiting teardown and commit its removal
    ///
    /// The marker is only cleared once the delete succeeded, so a failure
    /// here leaves a record that still names the tunnel to remove.
    async fn drain_teardown(&self, incident: Incident) -> Result<Incident, EngineError> {
        let Some(tunnel) = incident.pending_teardown.clone() else {
            return Ok(incident);
        };
        self.tunnels.delete(&tunnel).await?;
        let mut next = incident;
        next.pending_teardown = None;
        self.persist(next).await
    }

    /// Drain a teardown committed along with a transition
    ///
    /// A failed delete is left on the record for the next step; returns
    /// whether the tunnel is gone.
    async fn settle_teardown(&self, stored: Incident) -> (Incident, bool) {
        if stored.pending_teardown.is_none() {
            return (stored, true);
        }
        match self.drain_teardown(stored.clone()).await {
            Ok(drained) => (drained, true),
            Err(e) => {
                tracing::warn!(incident = %stored.id, "tunnel teardown deferred: {}", e);
                (stored, false)
            }
        }
    }

    /// Commit `to` with the tunnel marked for teardown, then remove it
    async fn advance_and_teardown(
        &self,
        mut next: Incident,
        to: IncidentState,
        trigger: impl Into<String>,
    ) -> Result<Incident, EngineError> {
        detach_tunnel(&mut next);
        let stored = self.advance(next, to, trigger).await?;
        Ok(self.settle_teardown(stored).await.0)
    }

    /// Remove the tunnel before a closing transition
    ///
    /// The marker is committed in the current state first; the incident
    /// only closes once the tunnel is confirmed gone.
    async fn teardown_in_place(&self, incident: Incident) -> Result<Incident, EngineError> {
        let drained = if incident.tunnel.is_none() {
            self.drain_teardown(incident).await?
        } else {
            let mut next = incident;
            detach_tunnel(&mut next);
            let marked = self.persist(next).await?;
            self.drain_teardown(marked).await?
        };
        self.triage.unprotect(drained.id);
        Ok(drained)
    }

    // ------------------------------------------------------------------
    // Intake
    // ------------------------------------------------------------------

    /// Persist a new incident for `alert`
    pub(crate) async fn open(&self, alert: &Alert, flap: FlapVerdict) -> Result<Incident, EngineError> {
        let now = self.clock.now();
        let incident = Incident::open(IncidentId::new(), alert, now);
        let _guard = self.lock(incident.id).await;
        self.store.insert(&incident).await?;
        self.triage.admit(incident.id, alert, flap);

        tracing::info!(incident = %incident.id, link = %alert.link, "incident opened");
        metrics::counter!("reroute_incidents_created_total").increment(1);
        self.emitter
            .emit(
                incident.id,
                now,
                EventKind::IncidentCreated {
                    links: incident.degraded_links.clone(),
                    severity: incident.severity,
                },
            )
            .await;

        match flap {
            FlapVerdict::Flapping { until, .. } => {
                let mut next = incident;
                next.dampen_until = Some(until);
                self.advance(next, IncidentState::Dampening, "link flapping")
                    .await
            }
            FlapVerdict::Stable => Ok(incident),
        }
    }

    /// Attach a correlated alert; `false` if the incident is already closed
    pub(crate) async fn attach(
        &self,
        id: IncidentId,
        alert: &Alert,
        rule: CorrelationRule,
        flap: FlapVerdict,
    ) -> Result<bool, EngineError> {
        let _guard = self.lock(id).await;
        let incident = match self.store.load(id).await {
            Ok(incident) => incident,
            Err(StoreError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if incident.is_closed() {
            return Ok(false);
        }

        let mut next = incident.clone();
        if !next.alert_ids.contains(&alert.id) {
            next.alert_ids.push(alert.id.clone());
        }
        next.severity = next.severity.max(alert.severity);
        match rule {
            CorrelationRule::ProtectionPath => {
                if incident.protection_uses(&alert.link)
                    && matches!(
                        incident.state,
                        IncidentState::Steering | IncidentState::Monitoring
                    )
                {
                    next.cascade_links.insert(alert.link.clone());
                    next.cascade_pending = true;
                    tracing::warn!(incident = %id, link = %alert.link, "protection path degraded");
                }
            }
            CorrelationRule::SameLink | CorrelationRule::AdjacentNode
                if incident.state == IncidentState::Detecting =>
            {
                next.degraded_links.insert(alert.link.clone());
                next.degraded_nodes.insert(alert.a_node.clone());
                next.degraded_nodes.insert(alert.z_node.clone());
            }
            _ => {}
        }

        self.persist(next).await?;
        self.triage.admit(id, alert, flap);
        self.emitter
            .emit(
                id,
                self.clock.now(),
                EventKind::AlertCorrelated {
                    alert: alert.id.clone(),
                    rule: rule.as_str().to_string(),
                },
            )
            .await;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Run one step
    pub(crate) async fn dispatch(&self, request: &TaskRequest) -> Result<TaskResult, EngineError> {
        let id = request.incident_id;
        let _guard = self.lock(id).await;
        let incident = self.store.load(id).await?;
        if incident.state != request.task_type.expected_state() {
            return Err(EngineError::TaskStateMismatch {
                incident: id,
                task: request.task_type,
                state: incident.state,
            });
        }
        let incident = self.drain_teardown(incident).await?;

        let from = incident.state;
        let (record, detail) = match request.task_type {
            TaskType::Detect => self.detect(incident).await?,
            TaskType::ResumeDetection => self.resume_detection(incident).await?,
            TaskType::AssessImpact => self.assess(incident).await?,
            TaskType::ComputePath => self.compute(incident).await?,
            TaskType::ProvisionTunnel => self.provision(incident).await?,
            TaskType::SteerTraffic => self.steer(incident).await?,
            TaskType::MonitorRestoration => self.monitor(incident).await?,
            TaskType::Restore => self.restore(incident).await?,
            TaskType::ResolveEscalation => self.resolve(incident, &request.payload).await?,
        };

        tracing::debug!(incident = %id, task = %request.task_type, %detail, "task complete");
        Ok(TaskResult {
            incident_id: id,
            task_type: request.task_type,
            from,
            to: record.state,
            detail,
        })
    }

    async fn lookup_impact(
        &self,
        links: &BTreeSet<LinkId>,
    ) -> Result<Vec<AffectedService>, CollaboratorError> {
        let (impact, timeout) = (&self.impact, self.config.call_timeout());
        self.config
            .retry
            .run("affected_services", move |_| {
                with_timeout("service-impact", timeout, impact.affected_services(links))
            })
            .await
    }

    async fn detect(&self, incident: Incident) -> StepResult {
        let now = self.clock.now();
        let damped = incident
            .degraded_links
            .iter()
            .filter_map(|l| self.triage.damped_until(l, now))
            .max();
        if let Some(until) = damped {
            let mut next = incident;
            next.dampen_until = Some(until);
            let stored = self
                .advance(next, IncidentState::Dampening, "link flapping")
                .await?;
            return Ok((stored, format!("damped until {until}")));
        }

        let services = self.lookup_impact(&incident.degraded_links).await?;
        if services.is_empty() {
            let mut next = incident;
            next.outcome = Some(Outcome::NoImpact);
            let stored = self
                .advance(next, IncidentState::Closed, "no impacted services")
                .await?;
            return Ok((stored, "no impacted services".into()));
        }

        let count = services.len();
        let mut next = incident;
        next.affected_services = services;
        let stored = self
            .advance(next, IncidentState::Assessing, "impacted services found")
            .await?;
        Ok((stored, format!("{count} services impacted")))
    }

    async fn resume_detection(&self, incident: Incident) -> StepResult {
        self.not_before(&incident, incident.dampen_until)?;
        let mut next = incident;
        next.dampen_until = None;
        let stored = self
            .advance(next, IncidentState::Detecting, "damping elapsed")
            .await?;
        Ok((stored, "damping elapsed".into()))
    }

    async fn assess(&self, incident: Incident) -> StepResult {
        let mut services = incident.affected_services.clone();
        services.sort_by(|a, b| a.tier.cmp(&b.tier).then_with(|| a.id.cmp(&b.id)));

        let unknown: Vec<String> = services
            .iter()
            .filter_map(|s| {
                let raw = s.technology.as_deref()?;
                raw.parse::<TeTechnology>()
                    .err()
                    .map(|e| format!("service {}: {e}", s.id))
            })
            .collect();
        if !unknown.is_empty() {
            return self
                .escalate(incident, EscalationReason::UnknownTechnology, unknown)
                .await;
        }

        let Some(primary) = services.first() else {
            return Err(EngineError::inconsistent(incident.id, "no affected services"));
        };
        let summary = ImpactSummary {
            primary: primary.id.clone(),
            governing_tier: primary.tier,
            service_count: services.len(),
            requirements: primary.requirements,
            technology: primary
                .technology
                .as_deref()
                .and_then(|t| t.parse().ok()),
        };
        let detail = format!(
            "{} services, primary {} ({})",
            summary.service_count, summary.primary, summary.governing_tier
        );

        let mut next = incident;
        next.affected_services = services;
        next.impact = Some(summary);
        let stored = self
            .advance(next, IncidentState::Computing, "impact assessed")
            .await?;
        Ok((stored, detail))
    }

    fn plan_request(&self, incident: &Incident) -> Result<PlanRequest, EngineError> {
        let (Some(impact), Some(primary)) = (&incident.impact, incident.primary_service()) else {
            return Err(EngineError::inconsistent(incident.id, "impact not assessed"));
        };
        Ok(
            PlanRequest::new(primary.endpoints.clone(), incident.causal_links())
                .with_avoid_nodes(incident.avoid_nodes.clone())
                .with_requirements(impact.requirements)
                .with_technology(impact.technology),
        )
    }

    async fn compute(&self, incident: Incident) -> StepResult {
        let request = self.plan_request(&incident)?;
        match self.planner.plan(&request).await {
            Ok(planned) => {
                let (hops, delay_ms) = (planned.path.hop_count(), planned.path.total_delay_ms());
                let links: Vec<LinkId> = planned.path.links().cloned().collect();
                let mut next = incident;
                next.plan_attempts = planned.attempts;
                next.path = Some(planned.path);
                let stored = self
                    .advance(
                        next,
                        IncidentState::Provisioning,
                        format!("path found at rung {}", planned.rung),
                    )
                    .await?;
                self.triage.protect(stored.id, links);
                self.emitter
                    .emit(
                        stored.id,
                        self.clock.now(),
                        EventKind::PathComputed {
                            rung: planned.rung,
                            hops,
                            delay_ms,
                        },
                    )
                    .await;
                Ok((stored, format!("{hops} hops, {delay_ms:.1}ms")))
            }
            Err(e) => {
                let trace = e.trace();
                let mut next = incident;
                next.plan_attempts = e.attempts().to_vec();
                self.escalate(next, EscalationReason::NoPath, trace).await
            }
        }
    }

    async fn provision(&self, incident: Incident) -> StepResult {
        let rounds = incident.retries.steering_rounds;
        if rounds > self.config.max_steering_rounds {
            let trace = vec![format!(
                "traffic steering failed {rounds} times (limit {})",
                self.config.max_steering_rounds
            )];
            return self
                .escalate(incident, EscalationReason::ProvisionExhausted, trace)
                .await;
        }

        let (Some(path), Some(primary)) = (incident.path.clone(), incident.primary_service()) else {
            return Err(EngineError::inconsistent(incident.id, "no path to provision"));
        };
        let request = ProvisionRequest {
            owner: incident.id,
            endpoints: primary.endpoints.clone(),
            path,
            objective: incident
                .plan_attempts
                .last()
                .map_or(PathObjective::default(), |a| a.constraints.objective),
            service_technology: primary.technology.clone(),
        };

        let mut next = incident;
        next.retries.provision_rounds += 1;
        match self.tunnels.provision(&request).await {
            Ok(tunnel) => {
                next.tunnel = Some(tunnel.clone());
                let stored = match self
                    .advance(next, IncidentState::Steering, "tunnel up")
                    .await
                {
                    Ok(stored) => stored,
                    Err(e) => {
                        if let Err(cleanup) = self.tunnels.delete(&tunnel).await {
                            tracing::error!(
                                tunnel = %tunnel.id,
                                "tunnel leaked after failed commit: {}",
                                cleanup
                            );
                        }
                        return Err(e);
                    }
                };
                self.emitter
                    .emit(
                        stored.id,
                        self.clock.now(),
                        EventKind::TunnelProvisioned {
                            tunnel: tunnel.id.clone(),
                            binding: tunnel.binding.to_string(),
                            technology: tunnel.technology,
                        },
                    )
                    .await;
                Ok((stored, format!("tunnel {} up, binding {}", tunnel.id, tunnel.binding)))
            }
            Err(e @ TunnelError::UnknownTechnology { .. }) => {
                self.escalate(next, EscalationReason::UnknownTechnology, vec![e.to_string()])
                    .await
            }
            Err(e) => {
                self.escalate(next, EscalationReason::ProvisionExhausted, vec![e.to_string()])
                    .await
            }
        }
    }

    async fn steer(&self, incident: Incident) -> StepResult {
        let Some(tunnel) = incident.tunnel.clone() else {
            // Torn down by an earlier attempt of this step
            let stored = self
                .advance(incident, IncidentState::Provisioning, "tunnel already removed")
                .await?;
            return Ok((stored, "re-provisioning".into()));
        };
        match self
            .tunnels
            .set_weights(&tunnel, WeightSplit::FULL_PROTECTION)
            .await
        {
            Ok(()) => {
                let mut next = incident;
                if let Some(t) = next.tunnel.as_mut() {
                    t.weight = WeightSplit::FULL_PROTECTION;
                }
                next.hold_timer = None;
                next.cutover = None;
                next.last_poll_at = None;
                let stored = self
                    .advance(next, IncidentState::Monitoring, "traffic steered")
                    .await?;
                self.emitter
                    .emit(
                        stored.id,
                        self.clock.now(),
                        EventKind::TrafficSteered {
                            tunnel: tunnel.id.clone(),
                            protection_weight: WeightSplit::FULL_PROTECTION.protection(),
                        },
                    )
                    .await;
                Ok((stored, format!("traffic on {}", tunnel.id)))
            }
            Err(e) => {
                tracing::warn!(incident = %incident.id, tunnel = %tunnel.id, "steering failed: {}", e);
                let mut next = incident;
                next.retries.steering_rounds += 1;
                let stored = self
                    .advance_and_teardown(
                        next,
                        IncidentState::Provisioning,
                        format!("steering failed: {e}"),
                    )
                    .await?;
                Ok((stored, "tunnel removed, re-provisioning".into()))
            }
        }
    }

    async fn monitor(&self, incident: Incident) -> StepResult {
        if incident.cascade_pending {
            return self.handle_cascade(incident).await;
        }
        self.not_before(&incident, self.restoration.next_poll_at(&incident))?;

        let outcome = match self.restoration.poll(&incident).await {
            Ok(outcome) => outcome,
            Err(RestorationError::SlaUnavailable(e)) => {
                tracing::warn!(incident = %incident.id, "restoration poll failed: {}", e);
                let mut next = incident;
                next.last_poll_at = Some(self.clock.now());
                let stored = self
                    .advance(next, IncidentState::Monitoring, "sla unavailable")
                    .await?;
                return Ok((stored, format!("poll failed: {e}")));
            }
            Err(e) => return Err(e.into()),
        };

        let previous = incident.hold_timer;
        let decision = outcome.decision;
        let mut next = incident;
        next.last_poll_at = Some(outcome.polled_at);
        next.retries.polls += 1;
        next.hold_timer = decision.next_timer(previous);

        if decision == PollDecision::Stable {
            let stored = self
                .advance(next, IncidentState::Restoring, "recovery confirmed")
                .await?;
            return Ok((stored, "stable".into()));
        }

        let stored = self
            .advance(next, IncidentState::Monitoring, decision.as_str())
            .await?;
        let event = match &decision {
            PollDecision::HoldStarted { timer } | PollDecision::HoldRestarted { timer } => {
                Some(EventKind::HoldTimerStarted {
                    expires_at: timer.expires_at,
                })
            }
            PollDecision::HoldCancelled { .. } => Some(EventKind::HoldTimerCancelled {
                restarts: previous.map_or(0, |t| t.restarts),
            }),
            _ => None,
        };
        if let Some(kind) = event {
            self.emitter.emit(stored.id, outcome.polled_at, kind).await;
        }
        Ok((stored, decision.as_str().into()))
    }

    async fn handle_cascade(&self, incident: Incident) -> StepResult {
        let links: Vec<String> = incident.cascade_links.iter().map(ToString::to_string).collect();
        match self.config.cascade_policy {
            CascadePolicy::Recompute => {
                let mut next = incident;
                clear_protection(&mut next);
                next.cascade_pending = false;
                let stored = self
                    .advance_and_teardown(
                        next,
                        IncidentState::Computing,
                        format!("protection path degraded on {}", links.join(",")),
                    )
                    .await?;
                self.triage.unprotect(stored.id);
                Ok((stored, "recomputing around degraded protection path".into()))
            }
            CascadePolicy::Escalate => {
                let trace = vec![format!("protection path links degraded: {}", links.join(", "))];
                let mut next = incident;
                next.cascade_pending = false;
                self.escalate(next, EscalationReason::CascadingDegradation, trace)
                    .await
            }
        }
    }

    async fn restore(&self, incident: Incident) -> StepResult {
        self.not_before(&incident, self.restoration.next_stage_at(&incident))?;
        let plan = self.restoration.plan(&incident);
        if incident.cutover.is_some_and(|p| plan.is_complete(&p)) {
            return self.finish_restore(incident).await;
        }

        match self.restoration.apply_stage(&incident).await {
            Ok(stage) => {
                let progress = stage.progress;
                let mut next = incident;
                next.cutover = Some(progress);
                if let Some(t) = next.tunnel.as_mut() {
                    t.weight = WeightSplit::protection_share(progress.protection_weight);
                }
                let stored = self
                    .advance(
                        next,
                        IncidentState::Restoring,
                        format!("cutover stage {}", progress.stages_applied),
                    )
                    .await?;
                self.emitter
                    .emit(
                        stored.id,
                        self.clock.now(),
                        EventKind::CutoverStage {
                            stage: progress.stages_applied,
                            protection_weight: progress.protection_weight,
                        },
                    )
                    .await;
                if stage.complete {
                    return self.finish_restore(stored).await;
                }
                Ok((
                    stored,
                    format!("{}% restored", progress.percent_restored()),
                ))
            }
            Err(e) if e.is_cutover_unstable() => {
                self.escalate(incident, EscalationReason::CutoverUnstable, vec![e.to_string()])
                    .await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn finish_restore(&self, incident: Incident) -> StepResult {
        let mut next = self.teardown_in_place(incident).await?;
        next.outcome = Some(Outcome::Restored);
        let stored = self
            .advance(next, IncidentState::Closed, "cutover complete, tunnel removed")
            .await?;
        Ok((stored, "restored".into()))
    }

    async fn resolve(&self, incident: Incident, payload: &TaskPayload) -> StepResult {
        let resolution = match payload {
            TaskPayload::Resolution(r) => r.clone(),
            TaskPayload::None => Resolution::new("operator", ""),
        };
        let mut next = if resolution.keep_tunnel {
            incident
        } else {
            self.teardown_in_place(incident).await?
        };
        next.outcome = Some(Outcome::ResolvedByOperator);
        let trigger = if resolution.note.is_empty() {
            format!("resolved by {}", resolution.operator)
        } else {
            format!("resolved by {}: {}", resolution.operator, resolution.note)
        };
        let stored = self.advance(next, IncidentState::Closed, trigger).await?;
        Ok((stored, format!("resolved by {}", resolution.operator)))
    }

    // ------------------------------------------------------------------
    // Escalation
    // ------------------------------------------------------------------

    async fn escalate(
        &self,
        mut next: Incident,
        reason: EscalationReason,
        trace: Vec<String>,
    ) -> StepResult {
        let raised_from = next.state;
        let context = EscalationContext {
            incident: next.id,
            reason,
            raised_from,
            trace: trace.clone(),
            tier: next.governing_tier(),
            recoveries_used: next.retries.escalation_recoveries,
            has_tunnel: next.tunnel.is_some(),
        };
        let proposed = self.policy.decide(&context).await;
        let Arbitrated {
            decision,
            coerced_from,
        } = arbitrate(&context, proposed, self.config.max_escalation_recoveries);
        let action = decision.action;

        tracing::warn!(
            incident = %next.id,
            reason = reason.as_str(),
            action = action.as_str(),
            from = raised_from.as_str(),
            "incident escalated"
        );
        metrics::counter!(
            "reroute_escalations_total",
            "reason" => reason.as_str(),
            "action" => action.as_str()
        )
        .increment(1);

        let now = self.clock.now();
        next.escalation = Some(EscalationRecord {
            reason,
            raised_from,
            trace,
            decision: decision.clone(),
            coerced_from,
            raised_at: now,
        });

        let trigger = format!("{reason}: {action}");
        let target = match action {
            RecoveryAction::Retry => {
                next.retries.escalation_recoveries += 1;
                next.retries.steering_rounds = 0;
                raised_from
            }
            RecoveryAction::TryAlternatePath => {
                if let Some(path) = &next.path {
                    next.avoid_nodes.extend(path.transit_nodes());
                }
                clear_protection(&mut next);
                next.retries.escalation_recoveries += 1;
                next.retries.steering_rounds = 0;
                IncidentState::Computing
            }
            RecoveryAction::HoldDegraded => IncidentState::Escalated,
            RecoveryAction::CloseUnresolved => {
                detach_tunnel(&mut next);
                IncidentState::Escalated
            }
        };

        let stored = self.advance(next, target, trigger.clone()).await?;
        self.emitter
            .emit(
                stored.id,
                now,
                EventKind::Escalated {
                    reason,
                    action,
                    justification: decision.justification,
                    decided_by: decision.decided_by,
                    coerced: coerced_from.is_some(),
                },
            )
            .await;

        let (stored, torn_down) = self.settle_teardown(stored).await;
        if matches!(
            action,
            RecoveryAction::TryAlternatePath | RecoveryAction::CloseUnresolved
        ) {
            self.triage.unprotect(stored.id);
        }
        if action == RecoveryAction::CloseUnresolved {
            if !torn_down {
                return Ok((stored, format!("{trigger}, tunnel teardown pending")));
            }
            let mut closing = stored;
            closing.outcome = Some(Outcome::Unresolved);
            let closed = self
                .advance(closing, IncidentState::Closed, "closed unresolved")
                .await?;
            return Ok((closed, trigger));
        }
        Ok((stored, trigger))
    }
}
