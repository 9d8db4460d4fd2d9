//! Lifecycle events delivered to audit and notification sinks

use crate::alert::Severity;
use crate::ids::{AlertId, EventId, IncidentId, LinkId, TunnelId};
use crate::incident::{DecisionSource, EscalationReason, IncidentState, Outcome, RecoveryAction};
use crate::path::RelaxationRung;
use crate::tunnel::TeTechnology;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Something that happened to an incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Event id
    pub event_id: EventId,
    /// Incident the event belongs to
    pub incident_id: IncidentId,
    /// When it happened
    pub at: DateTime<Utc>,
    /// Payload
    pub kind: EventKind,
}

impl LifecycleEvent {
    /// Create an event with a fresh id
    #[inline]
    #[must_use]
    pub fn new(incident_id: IncidentId, at: DateTime<Utc>, kind: EventKind) -> Self {
        Self {
            event_id: EventId::new(),
            incident_id,
            at,
            kind,
        }
    }
}

/// Event payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A new incident was opened
    IncidentCreated {
        /// Degraded links
        links: BTreeSet<LinkId>,
        /// Severity of the opening alert
        severity: Severity,
    },
    /// An alert was attached to an existing incident
    AlertCorrelated {
        /// Alert id
        alert: AlertId,
        /// Correlation rule that matched
        rule: String,
    },
    /// The incident changed state
    StateChanged {
        /// Previous state
        from: IncidentState,
        /// New state
        to: IncidentState,
        /// Cause
        trigger: String,
    },
    /// A protection path was selected
    PathComputed {
        /// Rung that produced it
        rung: RelaxationRung,
        /// Hop count
        hops: usize,
        /// Total delay
        delay_ms: f64,
    },
    /// The protection tunnel is up
    TunnelProvisioned {
        /// Tunnel id
        tunnel: TunnelId,
        /// Binding id as configured on the head-end
        binding: String,
        /// Technology
        technology: TeTechnology,
    },
    /// Traffic share on the protection tunnel changed
    TrafficSteered {
        /// Tunnel id
        tunnel: TunnelId,
        /// Protection share in percent
        protection_weight: u8,
    },
    /// Recovery observed, hold timer armed
    HoldTimerStarted {
        /// Fire time
        expires_at: DateTime<Utc>,
    },
    /// Hold timer disarmed by renewed degradation
    HoldTimerCancelled {
        /// Restart count at cancellation
        restarts: u32,
    },
    /// One cutover stage applied
    CutoverStage {
        /// Stage number, starting at one
        stage: usize,
        /// Protection share after the stage
        protection_weight: u8,
    },
    /// Automated handling escalated
    Escalated {
        /// Reason code
        reason: EscalationReason,
        /// Effective action
        action: RecoveryAction,
        /// Justification from the decision maker
        justification: String,
        /// Decision maker
        decided_by: DecisionSource,
        /// Whether the engine overrode the proposed action
        coerced: bool,
    },
    /// The incident closed
    Closed {
        /// Outcome
        outcome: Outcome,
    },
}

impl EventKind {
    /// Stable event name
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::IncidentCreated { .. } => "incident_created",
            Self::AlertCorrelated { .. } => "alert_correlated",
            Self::StateChanged { .. } => "state_changed",
            Self::PathComputed { .. } => "path_computed",
            Self::TunnelProvisioned { .. } => "tunnel_provisioned",
            Self::TrafficSteered { .. } => "traffic_steered",
            Self::HoldTimerStarted { .. } => "hold_timer_started",
            Self::HoldTimerCancelled { .. } => "hold_timer_cancelled",
            Self::CutoverStage { .. } => "cutover_stage",
            Self::Escalated { .. } => "escalated",
            Self::Closed { .. } => "closed",
        }
    }

    /// Whether the event is also sent to the notification sink
    #[must_use]
    pub fn is_notification(&self) -> bool {
        match self {
            Self::IncidentCreated { .. } | Self::Escalated { .. } | Self::Closed { .. } => true,
            Self::TrafficSteered {
                protection_weight, ..
            } => *protection_weight == 100,
            _ => false,
        }
    }
}
