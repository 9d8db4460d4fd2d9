//! reroute tunnel - protection tunnel lifecycle
//!
//! Provides:
//! - Technology selection (service, head-end capability, default)
//! - Binding-id pools per head-end and technology
//! - Tunnel creation with verification, retry and cleanup
//! - Idempotent deletion and traffic-split updates

#![warn(unreachable_pub)]

pub mod binding;
pub mod controller;
pub mod error;
pub mod technology;

// Re-exports for convenience
pub use binding::{
    BindingHolder, BindingPool, BindingPoolStats, BindingRange, BindingRanges, InMemoryBindingPool,
    PoolError,
};
pub use controller::{ProvisionRequest, TunnelConfig, TunnelController};
pub use error::TunnelError;
pub use technology::{TechnologySelection, TechnologySelector, TechnologySource};
