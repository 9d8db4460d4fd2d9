//! Escalation hook
//!
//! The engine picks the reason code; the policy only picks an action from the
//! fixed menu. [`arbitrate`] then enforces what the policy may not decide:
//! - actions that make no sense for the reason are coerced to `HoldDegraded`
//! - automated actions past the recovery budget are coerced to `HoldDegraded`

use crate::config::EscalationRules;
use async_trait::async_trait;
use reroute_model::{
    with_timeout, CollaboratorError, DecisionSource, EscalationDecision, EscalationReason,
    IncidentId, IncidentState, RecoveryAction, SlaTier,
};
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;

/// What a policy sees when deciding
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationContext {
    /// Incident
    pub incident: IncidentId,
    /// Reason code chosen by the engine
    pub reason: EscalationReason,
    /// State the incident was in
    pub raised_from: IncidentState,
    /// Diagnostic trace
    pub trace: Vec<String>,
    /// Governing tier, when known
    pub tier: Option<SlaTier>,
    /// Automated recoveries already granted
    pub recoveries_used: u32,
    /// Whether a protection tunnel exists
    pub has_tunnel: bool,
}

/// Pluggable decision function
#[async_trait]
pub trait EscalationPolicy: Send + Sync + Debug {
    /// Choose a recovery action
    async fn decide(&self, context: &EscalationContext) -> EscalationDecision;
}

/// Static rule table
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleTablePolicy {
    rules: EscalationRules,
}

impl RuleTablePolicy {
    /// Create a policy over `rules`
    #[inline]
    #[must_use]
    pub fn new(rules: EscalationRules) -> Self {
        Self { rules }
    }

    /// Decision without going through the async trait
    #[must_use]
    pub fn lookup(&self, reason: EscalationReason) -> EscalationDecision {
        let action = self.rules.action_for(reason);
        EscalationDecision::new(
            action,
            format!("rule table: {reason} -> {action}"),
            DecisionSource::RuleBased,
        )
    }
}

#[async_trait]
impl EscalationPolicy for RuleTablePolicy {
    async fn decide(&self, context: &EscalationContext) -> EscalationDecision {
        self.lookup(context.reason)
    }
}

/// Opaque external reasoning service
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Recommend an action with a justification
    async fn recommend(
        &self,
        context: &EscalationContext,
    ) -> Result<(RecoveryAction, String), CollaboratorError>;
}

/// Policy backed by a [`Reasoner`], falling back to the rule table
#[derive(Clone)]
pub struct ReasonerPolicy {
    reasoner: Arc<dyn Reasoner>,
    fallback: RuleTablePolicy,
    timeout: Duration,
}

impl fmt::Debug for ReasonerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReasonerPolicy")
            .field("fallback", &self.fallback)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ReasonerPolicy {
    /// Create a policy
    #[must_use]
    pub fn new(reasoner: Arc<dyn Reasoner>, fallback: RuleTablePolicy, timeout: Duration) -> Self {
        Self {
            reasoner,
            fallback,
            timeout,
        }
    }
}

#[async_trait]
impl EscalationPolicy for ReasonerPolicy {
    async fn decide(&self, context: &EscalationContext) -> EscalationDecision {
        match with_timeout("reasoner", self.timeout, self.reasoner.recommend(context)).await {
            Ok((action, justification)) => {
                EscalationDecision::new(action, justification, DecisionSource::Assisted)
            }
            Err(e) => {
                tracing::warn!(
                    incident = %context.incident,
                    reason = %context.reason,
                    "reasoner failed, using rule table: {}",
                    e
                );
                let mut decision = self.fallback.lookup(context.reason);
                decision.justification = format!("{} (reasoner failed: {e})", decision.justification);
                decision
            }
        }
    }
}

/// Whether `action` can address `reason`
#[must_use]
pub fn is_applicable(reason: EscalationReason, action: RecoveryAction) -> bool {
    use RecoveryAction::*;
    match reason {
        EscalationReason::NoPath => matches!(action, Retry | HoldDegraded | CloseUnresolved),
        EscalationReason::ProvisionExhausted => true,
        EscalationReason::CascadingDegradation => {
            matches!(action, TryAlternatePath | HoldDegraded | CloseUnresolved)
        }
        EscalationReason::UnknownTechnology | EscalationReason::CutoverUnstable => {
            matches!(action, HoldDegraded | CloseUnresolved)
        }
    }
}

/// Effective action after enforcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arbitrated {
    /// Decision to apply
    pub decision: EscalationDecision,
    /// Proposed action, when it was overridden
    pub coerced_from: Option<RecoveryAction>,
}

/// Enforce applicability and the recovery budget on a proposed decision
#[must_use]
pub fn arbitrate(
    context: &EscalationContext,
    proposed: EscalationDecision,
    max_recoveries: u32,
) -> Arbitrated {
    let action = proposed.action;
    let note = if !is_applicable(context.reason, action) {
        Some(format!("{action} does not apply to {}", context.reason))
    } else if action.is_automated() && context.recoveries_used >= max_recoveries {
        Some(format!(
            "recovery budget spent ({}/{max_recoveries})",
            context.recoveries_used
        ))
    } else {
        None
    };

    match note {
        None => Arbitrated {
            decision: proposed,
            coerced_from: None,
        },
        Some(note) => Arbitrated {
            decision: EscalationDecision {
                action: RecoveryAction::HoldDegraded,
                justification: format!("{}; coerced to hold_degraded: {note}", proposed.justification),
                decided_by: proposed.decided_by,
            },
            coerced_from: Some(action),
        },
    }
}
