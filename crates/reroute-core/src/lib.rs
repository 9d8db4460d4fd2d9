//! reroute core - incident lifecycle engine
//!
//! Drives SLA-degradation incidents from the first alert to closure:
//! - Alert intake with deduplication, correlation and flap damping
//! - A persisted, versioned state machine with one task per state
//! - Protection path computation, tunnel provisioning and traffic steering
//! - Hold-timer guarded restoration with staged cutover
//! - Escalation through a pluggable policy with engine-side enforcement
//! - Audit and notification events for every step
//!
//! # Example
//!
//! ```rust,ignore
//! use reroute_core::{EngineConfig, LifecycleEngine};
//!
//! # async fn example(alert: reroute_model::Alert) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = LifecycleEngine::builder(EngineConfig::default())
//!     .with_topology(topology)
//!     .with_impact(impact)
//!     .with_provisioning(provisioning)
//!     .with_sla(sla)
//!     .build()?;
//!
//! let outcome = engine.ingest_alert(alert).await?;
//! println!("alert landed on {:?}", outcome.incident());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod config;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod escalation;
mod orchestrator;
pub mod state_machine;
pub mod store;
pub mod tasks;

// Re-exports for convenience
pub use config::{CascadePolicy, ConfigError, EngineConfig, EscalationRules, OrchestratorConfig};
pub use emitter::{EventEmitter, LogSink};
pub use engine::{EngineStats, IngestOutcome, IntakeStats, LifecycleEngine, LifecycleEngineBuilder};
pub use error::{EngineError, ErrorClass, StoreError};
pub use escalation::{
    arbitrate, is_applicable, Arbitrated, EscalationContext, EscalationPolicy, Reasoner,
    ReasonerPolicy, RuleTablePolicy,
};
pub use state_machine::{allowed_transitions, validate_transition, TransitionError};
pub use store::{InMemoryIncidentStore, IncidentStore};
pub use tasks::{Resolution, TaskPayload, TaskRequest, TaskResult, TaskType};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
