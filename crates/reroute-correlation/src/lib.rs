//! reroute correlation - alert intake filtering
//!
//! Turns a raw alert stream into incident-worthy events:
//! - Suppresses alerts for links under flap damping
//! - Drops duplicates by (link, violated metrics) fingerprint
//! - Attaches related alerts to open incidents
//! - Detects flapping links and computes exponential damping
//!
//! Flap records sit behind the [`FlapStore`] trait so deployments can share
//! them; the dedup and correlation indexes are process-local.

#![warn(unreachable_pub)]

pub mod correlator;
pub mod dedup;
pub mod flap;
pub mod triage;

// Re-exports for convenience
pub use correlator::{CorrelationMatch, CorrelationRule, Correlator};
pub use dedup::{DedupHit, DedupIndex};
pub use flap::{FlapConfig, FlapDetector, FlapRecord, FlapStore, FlapVerdict, InMemoryFlapStore};
pub use triage::{AlertTriage, CorrelationConfig, Triage, TriageStats};
