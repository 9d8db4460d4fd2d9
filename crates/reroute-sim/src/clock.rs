//! Clock bound to the tokio timer
//!
//! With a paused runtime, wall time and `tokio::time::sleep` advance
//! together, so hold timers and stage intervals line up with the sleeps
//! that wait for them.

use chrono::{DateTime, Utc};
use reroute_model::clock::to_delta;
use reroute_model::Clock;
use tokio::time::Instant;

/// Wall clock derived from the tokio instant
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    base: DateTime<Utc>,
    anchor: Instant,
}

impl TokioClock {
    /// Clock reading `base` now
    #[must_use]
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            base,
            anchor: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + to_delta(Instant::now().duration_since(self.anchor))
    }
}
