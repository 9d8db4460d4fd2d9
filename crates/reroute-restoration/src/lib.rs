//! reroute restoration - getting traffic back onto the original path
//!
//! - Per-tier hold timers started on observed recovery, cancelled on
//!   recurrence and confirmed by a stability check
//! - Immediate or gradual cutover with verification before every stage

#![warn(unreachable_pub)]

pub mod config;
pub mod controller;
pub mod cutover;
pub mod error;
pub mod hold;

// Re-exports for convenience
pub use config::{RestorationConfig, TierPolicy, TierTable};
pub use controller::{PollOutcome, RestorationController, StageOutcome};
pub use cutover::CutoverPlan;
pub use error::RestorationError;
pub use hold::{Assessment, HoldEvaluator, PollDecision};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
