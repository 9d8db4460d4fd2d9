//! The persisted incident record
//!
//! One record per incident, owned by the orchestrator. Every field a step
//! needs to resume after a restart lives here:
//! - lifecycle state and transition history
//! - the degraded links that caused the incident
//! - the chosen protection path and tunnel
//! - retry counters, hold timer and cutover progress
//! - the escalation record, when one was raised

use crate::alert::{Alert, Severity};
use crate::ids::{AlertId, IncidentId, LinkId, NodeId, ServiceId};
use crate::path::{ComputedPath, PlanAttempt};
use crate::sla::{AffectedService, ServiceRequirements, SlaTier};
use crate::tunnel::{TeTechnology, Tunnel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Lifecycle state of an incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentState {
    /// Alert accepted, impact not yet known
    Detecting,
    /// Link is flapping; processing deferred
    Dampening,
    /// Impact known, deriving requirements
    Assessing,
    /// Computing a protection path
    Computing,
    /// Creating the protection tunnel
    Provisioning,
    /// Moving traffic onto the tunnel
    Steering,
    /// Waiting for the original path to recover
    Monitoring,
    /// Moving traffic back
    Restoring,
    /// Waiting for an operator
    Escalated,
    /// Terminal
    Closed,
}

impl IncidentState {
    /// Every state, in lifecycle order
    pub const ALL: [Self; 10] = [
        Self::Detecting,
        Self::Dampening,
        Self::Assessing,
        Self::Computing,
        Self::Provisioning,
        Self::Steering,
        Self::Monitoring,
        Self::Restoring,
        Self::Escalated,
        Self::Closed,
    ];

    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Closed
    }

    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Detecting => "detecting",
            Self::Dampening => "dampening",
            Self::Assessing => "assessing",
            Self::Computing => "computing",
            Self::Provisioning => "provisioning",
            Self::Steering => "steering",
            Self::Monitoring => "monitoring",
            Self::Restoring => "restoring",
            Self::Escalated => "escalated",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for IncidentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a closed incident ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Traffic moved back to the recovered original path
    Restored,
    /// No service was affected
    NoImpact,
    /// Closed by the escalation hook without recovery
    Unresolved,
    /// Closed by an operator
    ResolvedByOperator,
}

/// Why automated handling stopped. This set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// Relaxation ladder exhausted
    NoPath,
    /// Tunnel creation retries exhausted
    ProvisionExhausted,
    /// The protection path degraded too
    CascadingDegradation,
    /// Technology could not be determined
    UnknownTechnology,
    /// SLA failed during gradual cutover
    CutoverUnstable,
}

impl EscalationReason {
    /// Every reason code
    pub const ALL: [Self; 5] = [
        Self::NoPath,
        Self::ProvisionExhausted,
        Self::CascadingDegradation,
        Self::UnknownTechnology,
        Self::CutoverUnstable,
    ];

    /// Stable reason code
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoPath => "no_path",
            Self::ProvisionExhausted => "provision_exhausted",
            Self::CascadingDegradation => "cascading_degradation",
            Self::UnknownTechnology => "unknown_technology",
            Self::CutoverUnstable => "cutover_unstable",
        }
    }
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recovery action chosen for an escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Re-run the failed step
    Retry,
    /// Compute a path avoiding the failed one
    TryAlternatePath,
    /// Leave traffic where it is and wait for an operator
    HoldDegraded,
    /// Close without recovery
    CloseUnresolved,
}

impl RecoveryAction {
    /// Every action on the menu
    pub const ALL: [Self; 4] = [
        Self::Retry,
        Self::TryAlternatePath,
        Self::HoldDegraded,
        Self::CloseUnresolved,
    ];

    /// Whether the action keeps the incident under automated handling
    #[inline]
    #[must_use]
    pub fn is_automated(self) -> bool {
        matches!(self, Self::Retry | Self::TryAlternatePath)
    }

    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::TryAlternatePath => "try_alternate_path",
            Self::HoldDegraded => "hold_degraded",
            Self::CloseUnresolved => "close_unresolved",
        }
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who made a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Static rule table
    RuleBased,
    /// External reasoning service
    Assisted,
    /// Operator
    Human,
}

/// Decision returned by the escalation hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationDecision {
    /// Chosen action
    pub action: RecoveryAction,
    /// Free-text justification, kept for audit
    pub justification: String,
    /// Decision maker
    pub decided_by: DecisionSource,
}

impl EscalationDecision {
    /// Create a decision
    #[inline]
    #[must_use]
    pub fn new(
        action: RecoveryAction,
        justification: impl Into<String>,
        decided_by: DecisionSource,
    ) -> Self {
        Self {
            action,
            justification: justification.into(),
            decided_by,
        }
    }
}

/// Persisted record of the last escalation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRecord {
    /// Reason code
    pub reason: EscalationReason,
    /// State the incident was in when it escalated
    pub raised_from: IncidentState,
    /// Diagnostic trace, most relevant first
    pub trace: Vec<String>,
    /// Effective decision
    pub decision: EscalationDecision,
    /// Action originally proposed, if the engine overrode it
    pub coerced_from: Option<RecoveryAction>,
    /// When it was raised
    pub raised_at: DateTime<Utc>,
}

/// Hold timer guarding restoration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldTimer {
    /// Tier whose hold time applies
    pub tier: SlaTier,
    /// When recovery was first observed
    pub recovery_observed_at: DateTime<Utc>,
    /// When the timer fires
    pub expires_at: DateTime<Utc>,
    /// Restarts after a failed stability check
    pub restarts: u32,
}

impl HoldTimer {
    /// Whether the timer has fired at `now`
    #[inline]
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// How traffic moves back from the protection tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutoverMode {
    /// Single weight change
    Immediate,
    /// Staged weight changes with verification between stages
    #[default]
    Gradual,
}

/// Persisted cutover position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutoverProgress {
    /// Mode in use
    pub mode: CutoverMode,
    /// Stages applied so far
    pub stages_applied: usize,
    /// Protection share currently applied
    pub protection_weight: u8,
    /// When the last stage was applied
    pub last_stage_at: Option<DateTime<Utc>>,
}

impl CutoverProgress {
    /// Fresh progress with all traffic still on the tunnel
    #[inline]
    #[must_use]
    pub fn start(mode: CutoverMode) -> Self {
        Self {
            mode,
            stages_applied: 0,
            protection_weight: 100,
            last_stage_at: None,
        }
    }

    /// Percent of traffic already moved back
    #[inline]
    #[must_use]
    pub fn percent_restored(&self) -> u8 {
        100 - self.protection_weight.min(100)
    }
}

/// Retry bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetryCounters {
    /// Provisioning rounds started
    pub provision_rounds: u32,
    /// Steering rounds that failed and went back to provisioning
    pub steering_rounds: u32,
    /// Automated recoveries granted by the escalation hook
    pub escalation_recoveries: u32,
    /// SLA polls performed while monitoring
    pub polls: u64,
}

/// Derived impact summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactSummary {
    /// Service that drives path requirements
    pub primary: ServiceId,
    /// Highest tier among affected services
    pub governing_tier: SlaTier,
    /// Number of affected services
    pub service_count: usize,
    /// Requirements of the primary service
    pub requirements: ServiceRequirements,
    /// Technology of the primary service, when it reported one
    pub technology: Option<TeTechnology>,
}

/// One applied state transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Previous state
    pub from: IncidentState,
    /// New state
    pub to: IncidentState,
    /// What caused it
    pub trigger: String,
    /// When
    pub at: DateTime<Utc>,
}

/// The incident record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Incident id
    pub id: IncidentId,
    /// Commit version, bumped on every persist
    pub version: u64,
    /// Current state
    pub state: IncidentState,
    /// Highest severity seen
    pub severity: Severity,
    /// Links that caused the incident
    pub degraded_links: BTreeSet<LinkId>,
    /// Endpoint nodes of the degraded links
    pub degraded_nodes: BTreeSet<NodeId>,
    /// Protection-path links that degraded later
    pub cascade_links: BTreeSet<LinkId>,
    /// Transit nodes of failed protection attempts
    pub avoid_nodes: BTreeSet<NodeId>,
    /// Alerts attached to this incident
    pub alert_ids: Vec<AlertId>,
    /// Services riding on the degraded links
    pub affected_services: Vec<AffectedService>,
    /// Impact summary, once assessed
    pub impact: Option<ImpactSummary>,
    /// Chosen protection path
    pub path: Option<ComputedPath>,
    /// Attempts of the last path computation
    pub plan_attempts: Vec<PlanAttempt>,
    /// Provisioned protection tunnel
    pub tunnel: Option<Tunnel>,
    /// Tunnel detached from the incident whose remote deletion has not been
    /// confirmed yet
    #[serde(default)]
    pub pending_teardown: Option<Tunnel>,
    /// Retry bookkeeping
    pub retries: RetryCounters,
    /// Pending hold timer
    pub hold_timer: Option<HoldTimer>,
    /// Cutover position
    pub cutover: Option<CutoverProgress>,
    /// End of flap damping
    pub dampen_until: Option<DateTime<Utc>>,
    /// Last SLA poll
    pub last_poll_at: Option<DateTime<Utc>>,
    /// A protection-path link degraded and has not been handled yet
    pub cascade_pending: bool,
    /// Last escalation
    pub escalation: Option<EscalationRecord>,
    /// Applied transitions
    pub history: Vec<TransitionRecord>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last persisted change
    pub updated_at: DateTime<Utc>,
    /// Close time
    pub closed_at: Option<DateTime<Utc>>,
    /// Final outcome
    pub outcome: Option<Outcome>,
}

impl Incident {
    /// New incident in `Detecting` for the alert that opened it
    #[must_use]
    pub fn open(id: IncidentId, alert: &Alert, at: DateTime<Utc>) -> Self {
        Self {
            id,
            version: 0,
            state: IncidentState::Detecting,
            severity: alert.severity,
            degraded_links: BTreeSet::from([alert.link.clone()]),
            degraded_nodes: BTreeSet::from([alert.a_node.clone(), alert.z_node.clone()]),
            cascade_links: BTreeSet::new(),
            avoid_nodes: BTreeSet::new(),
            alert_ids: vec![alert.id.clone()],
            affected_services: Vec::new(),
            impact: None,
            path: None,
            plan_attempts: Vec::new(),
            tunnel: None,
            pending_teardown: None,
            retries: RetryCounters::default(),
            hold_timer: None,
            cutover: None,
            dampen_until: None,
            last_poll_at: None,
            cascade_pending: false,
            escalation: None,
            history: Vec::new(),
            created_at: at,
            updated_at: at,
            closed_at: None,
            outcome: None,
        }
    }

    /// Links no protection path may use: degraded plus cascaded links
    #[must_use]
    pub fn causal_links(&self) -> BTreeSet<LinkId> {
        self.degraded_links
            .union(&self.cascade_links)
            .cloned()
            .collect()
    }

    /// Highest tier among affected services
    #[must_use]
    pub fn governing_tier(&self) -> Option<SlaTier> {
        self.impact
            .as_ref()
            .map(|i| i.governing_tier)
            .or_else(|| self.affected_services.iter().map(|s| s.tier).min())
    }

    /// Service whose endpoints and requirements drive the incident
    #[must_use]
    pub fn primary_service(&self) -> Option<&AffectedService> {
        let primary = &self.impact.as_ref()?.primary;
        self.affected_services.iter().find(|s| &s.id == primary)
    }

    /// Whether the incident is closed
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether `link` is carried by this incident's protection path
    #[must_use]
    pub fn protection_uses(&self, link: &LinkId) -> bool {
        self.path.as_ref().is_some_and(|p| p.traverses_link(link))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sla::EndpointPair;
    use pretty_assertions::assert_eq;

    fn alert() -> Alert {
        Alert::raise(
            "a-1",
            "L1",
            "R1",
            "R2",
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        )
    }

    #[test]
    fn open_records_link_and_endpoints() {
        let alert = alert();
        let incident = Incident::open(IncidentId::new(), &alert, alert.observed_at);
        assert_eq!(incident.state, IncidentState::Detecting);
        assert!(incident.degraded_links.contains(&LinkId::from("L1")));
        assert_eq!(incident.degraded_nodes.len(), 2);
        assert_eq!(incident.alert_ids, vec![AlertId::from("a-1")]);
    }

    #[test]
    fn causal_links_include_cascade() {
        let alert = alert();
        let mut incident = Incident::open(IncidentId::new(), &alert, alert.observed_at);
        incident.cascade_links.insert(LinkId::from("L7"));
        assert_eq!(incident.causal_links().len(), 2);
    }

    #[test]
    fn governing_tier_falls_back_to_services() {
        let alert = alert();
        let mut incident = Incident::open(IncidentId::new(), &alert, alert.observed_at);
        assert_eq!(incident.governing_tier(), None);
        incident.affected_services = vec![
            AffectedService::new("s1", SlaTier::Silver, EndpointPair::new("A", "B")),
            AffectedService::new("s2", SlaTier::Gold, EndpointPair::new("A", "C")),
        ];
        assert_eq!(incident.governing_tier(), Some(SlaTier::Gold));
    }

    #[test]
    fn cutover_progress_reports_restored_share() {
        let mut progress = CutoverProgress::start(CutoverMode::Gradual);
        assert_eq!(progress.percent_restored(), 0);
        progress.protection_weight = 25;
        assert_eq!(progress.percent_restored(), 75);
    }

    #[test]
    fn only_closed_is_terminal() {
        for state in IncidentState::ALL {
            assert_eq!(state.is_terminal(), state == IncidentState::Closed);
        }
    }
}
