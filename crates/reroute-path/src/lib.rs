//! reroute path - protection path planning
//!
//! Builds a constraint set from the incident, asks the topology oracle for a
//! path, validates the answer and relaxes constraints step by step when no
//! acceptable path exists:
//! 1. drop shared-risk group avoidance
//! 2. raise the hop ceiling
//! 3. switch to the IGP objective and drop the delay ceiling
//! 4. drop node avoidance
//!
//! Links that cause the degradation are never relaxed.

#![warn(unreachable_pub)]

pub mod constraints;
pub mod error;
pub mod planner;
pub mod validate;

// Re-exports for convenience
pub use constraints::{ConstraintBuilder, PlanRequest, PlannerConfig};
pub use error::PlannerError;
pub use planner::{PathPlanner, PlannedPath};
pub use validate::{validate, Violation};
