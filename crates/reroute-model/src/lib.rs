//! reroute model - shared types for the incident lifecycle engine
//!
//! Everything the other crates exchange lives here:
//! - Identifiers for links, nodes, services, tunnels and incidents
//! - Alerts and their deduplication fingerprint
//! - The persisted incident record and its lifecycle vocabulary
//! - Paths, constraint sets and planning records
//! - Tunnels, binding ids and traffic splits
//! - Lifecycle events for audit and notification
//! - Clock and retry primitives
//! - Collaborator traits for the external systems

#![warn(unreachable_pub)]

pub mod alert;
pub mod clock;
pub mod collaborators;
pub mod events;
pub mod ids;
pub mod incident;
pub mod path;
pub mod retry;
pub mod sla;
pub mod tunnel;

// Re-exports for convenience
pub use alert::{Alert, AlertKind, AlertSource, Fingerprint, MetricKind, MetricSample, Severity};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{
    with_timeout, AuditSink, CollaboratorError, NotificationSink, ProvisioningApi,
    ServiceImpactOracle, SlaOracle, TopologyOracle,
};
pub use events::{EventKind, LifecycleEvent};
pub use ids::{AlertId, EventId, IncidentId, LinkId, NodeId, ServiceId, SrlgId, TunnelId};
pub use incident::{
    CutoverMode, CutoverProgress, DecisionSource, EscalationDecision, EscalationReason,
    EscalationRecord, HoldTimer, ImpactSummary, Incident, IncidentState, Outcome, RecoveryAction,
    RetryCounters, TransitionRecord,
};
pub use path::{
    AttemptOutcome, ComputedPath, PathConstraintSet, PathHop, PathObjective, PlanAttempt,
    RelaxationRung,
};
pub use retry::{RetryPolicy, Retryable};
pub use sla::{AffectedService, EndpointPair, ServiceRequirements, SlaThresholds, SlaTier};
pub use tunnel::{
    BindingId, TeTechnology, Tunnel, TunnelSpec, TunnelStatus, UnknownTechnology, WeightSplit,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
