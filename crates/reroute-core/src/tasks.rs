//! Typed task requests
//!
//! Every task maps onto exactly one lifecycle state; dispatching a task for
//! any other state is refused.

use reroute_model::{IncidentId, IncidentState};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Step of the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Look up impacted services
    Detect,
    /// Leave flap damping
    ResumeDetection,
    /// Rank impacted services and derive requirements
    AssessImpact,
    /// Compute a protection path
    ComputePath,
    /// Create the protection tunnel
    ProvisionTunnel,
    /// Move traffic onto the tunnel
    SteerTraffic,
    /// Poll the original path
    MonitorRestoration,
    /// Apply one cutover stage
    Restore,
    /// Operator resolution of an escalated incident
    ResolveEscalation,
}

impl TaskType {
    /// Task that advances an incident in `state`; `None` when closed
    #[must_use]
    pub fn for_state(state: IncidentState) -> Option<Self> {
        match state {
            IncidentState::Detecting => Some(Self::Detect),
            IncidentState::Dampening => Some(Self::ResumeDetection),
            IncidentState::Assessing => Some(Self::AssessImpact),
            IncidentState::Computing => Some(Self::ComputePath),
            IncidentState::Provisioning => Some(Self::ProvisionTunnel),
            IncidentState::Steering => Some(Self::SteerTraffic),
            IncidentState::Monitoring => Some(Self::MonitorRestoration),
            IncidentState::Restoring => Some(Self::Restore),
            IncidentState::Escalated => Some(Self::ResolveEscalation),
            IncidentState::Closed => None,
        }
    }

    /// State the task applies to
    #[must_use]
    pub fn expected_state(self) -> IncidentState {
        match self {
            Self::Detect => IncidentState::Detecting,
            Self::ResumeDetection => IncidentState::Dampening,
            Self::AssessImpact => IncidentState::Assessing,
            Self::ComputePath => IncidentState::Computing,
            Self::ProvisionTunnel => IncidentState::Provisioning,
            Self::SteerTraffic => IncidentState::Steering,
            Self::MonitorRestoration => IncidentState::Monitoring,
            Self::Restore => IncidentState::Restoring,
            Self::ResolveEscalation => IncidentState::Escalated,
        }
    }

    /// Whether a driver may run the task without operator input
    #[inline]
    #[must_use]
    pub fn is_automated(self) -> bool {
        self != Self::ResolveEscalation
    }

    /// Stable lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Detect => "detect",
            Self::ResumeDetection => "resume_detection",
            Self::AssessImpact => "assess_impact",
            Self::ComputePath => "compute_path",
            Self::ProvisionTunnel => "provision_tunnel",
            Self::SteerTraffic => "steer_traffic",
            Self::MonitorRestoration => "monitor_restoration",
            Self::Restore => "restore",
            Self::ResolveEscalation => "resolve_escalation",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator resolution of an escalated incident
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Who resolved it
    pub operator: String,
    /// Free-text note for the audit trail
    pub note: String,
    /// Leave the protection tunnel in place
    pub keep_tunnel: bool,
}

impl Resolution {
    /// Resolution that removes the protection tunnel
    #[must_use]
    pub fn new(operator: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            note: note.into(),
            keep_tunnel: false,
        }
    }

    /// Keep the protection tunnel
    #[inline]
    #[must_use]
    pub fn keeping_tunnel(mut self) -> Self {
        self.keep_tunnel = true;
        self
    }
}

/// Task input
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    /// No input
    #[default]
    None,
    /// Operator resolution
    Resolution(Resolution),
}

/// Request to run one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Target incident
    pub incident_id: IncidentId,
    /// Step
    pub task_type: TaskType,
    /// Input
    #[serde(default)]
    pub payload: TaskPayload,
}

impl TaskRequest {
    /// Request without payload
    #[inline]
    #[must_use]
    pub fn new(incident_id: IncidentId, task_type: TaskType) -> Self {
        Self {
            incident_id,
            task_type,
            payload: TaskPayload::None,
        }
    }

    /// Operator resolution request
    #[must_use]
    pub fn resolve(incident_id: IncidentId, resolution: Resolution) -> Self {
        Self {
            incident_id,
            task_type: TaskType::ResolveEscalation,
            payload: TaskPayload::Resolution(resolution),
        }
    }
}

/// Result of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Incident
    pub incident_id: IncidentId,
    /// Step that ran
    pub task_type: TaskType,
    /// State before
    pub from: IncidentState,
    /// State after
    pub to: IncidentState,
    /// What happened
    pub detail: String,
}

impl TaskResult {
    /// Whether the step moved the incident to another state
    #[inline]
    #[must_use]
    pub fn changed_state(&self) -> bool {
        self.from != self.to
    }
}
