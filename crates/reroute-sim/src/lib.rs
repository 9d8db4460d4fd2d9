//! reroute sim - in-memory collaborators
//!
//! Stand-ins for the external systems the engine talks to, used by the
//! integration tests and the `simulate` command:
//! - [`SimTopology`]: constrained shortest paths over a petgraph view
//! - [`SimImpact`]: link to service inventory
//! - [`SimProvisioning`]: tunnel controller with scripted failures
//! - [`SimSla`]: scripted SLA samples
//! - [`RecordingSink`]: audit and notification capture
//! - [`TokioClock`]: wall clock that follows paused tokio time

#![warn(unreachable_pub)]

pub mod clock;
pub mod fixtures;
pub mod impact;
pub mod provisioning;
pub mod sinks;
pub mod sla;
pub mod topology;

// Re-exports for convenience
pub use clock::TokioClock;
pub use impact::SimImpact;
pub use provisioning::{SimProvisioning, SimTunnel};
pub use sinks::RecordingSink;
pub use sla::SimSla;
pub use topology::{SimLink, SimTopology};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
