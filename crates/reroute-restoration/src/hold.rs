//! Hold-timer evaluation
//!
//! Pure decisions over the persisted timer, a fresh sample and the current
//! time. The controller performs the SLA queries; nothing here does I/O.

use crate::config::TierPolicy;
use chrono::{DateTime, Utc};
use reroute_model::clock::{remaining, to_delta};
use reroute_model::{HoldTimer, MetricKind, MetricSample, SlaTier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// What a poll concluded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PollDecision {
    /// Still outside thresholds, no timer pending
    StillDegraded {
        /// Violated metrics
        violations: BTreeSet<MetricKind>,
    },
    /// Degradation recurred while the timer was pending
    HoldCancelled {
        /// Violated metrics
        violations: BTreeSet<MetricKind>,
    },
    /// Recovery first observed
    HoldStarted {
        /// New timer
        timer: HoldTimer,
    },
    /// Recovered, timer still running
    HoldPending {
        /// Time left
        remaining: Duration,
    },
    /// Timer fired and the stability check failed
    HoldRestarted {
        /// Restarted timer
        timer: HoldTimer,
    },
    /// Timer fired and the stability check passed
    Stable,
}

impl PollDecision {
    /// Timer to persist after this decision
    #[must_use]
    pub fn next_timer(&self, current: Option<HoldTimer>) -> Option<HoldTimer> {
        match self {
            Self::StillDegraded { .. } | Self::HoldCancelled { .. } | Self::Stable => None,
            Self::HoldStarted { timer } | Self::HoldRestarted { timer } => Some(*timer),
            Self::HoldPending { .. } => current,
        }
    }

    /// Short label for logs and triggers
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StillDegraded { .. } => "still_degraded",
            Self::HoldCancelled { .. } => "hold_cancelled",
            Self::HoldStarted { .. } => "hold_started",
            Self::HoldPending { .. } => "hold_pending",
            Self::HoldRestarted { .. } => "hold_restarted",
            Self::Stable => "stable",
        }
    }
}

/// First-stage verdict on a poll sample
#[derive(Debug, Clone, PartialEq)]
pub enum Assessment {
    /// Final without a second sample
    Decided(PollDecision),
    /// Timer fired; a stability sample decides
    NeedsStabilityCheck(HoldTimer),
}

/// Evaluates polls for one tier
#[derive(Debug, Clone, Copy)]
pub struct HoldEvaluator {
    tier: SlaTier,
    policy: TierPolicy,
}

impl HoldEvaluator {
    /// Evaluator for `tier` under `policy`
    #[inline]
    #[must_use]
    pub fn new(tier: SlaTier, policy: TierPolicy) -> Self {
        Self { tier, policy }
    }

    /// Judge a poll sample against the pending timer
    #[must_use]
    pub fn assess(
        &self,
        timer: Option<&HoldTimer>,
        sample: &MetricSample,
        now: DateTime<Utc>,
    ) -> Assessment {
        let violations = self.policy.thresholds.violations(sample);
        let decision = if !violations.is_empty() {
            if timer.is_some() {
                PollDecision::HoldCancelled { violations }
            } else {
                PollDecision::StillDegraded { violations }
            }
        } else {
            match timer {
                None => PollDecision::HoldStarted {
                    timer: HoldTimer {
                        tier: self.tier,
                        recovery_observed_at: now,
                        expires_at: now + to_delta(self.policy.hold()),
                        restarts: 0,
                    },
                },
                Some(timer) if timer.is_expired(now) => {
                    return Assessment::NeedsStabilityCheck(*timer)
                }
                Some(timer) => PollDecision::HoldPending {
                    remaining: remaining(now, timer.expires_at),
                },
            }
        };
        Assessment::Decided(decision)
    }

    /// Judge the stability sample taken after the timer fired
    #[must_use]
    pub fn confirm(&self, timer: &HoldTimer, sample: &MetricSample, now: DateTime<Utc>) -> PollDecision {
        if self.policy.thresholds.is_met_by(sample) {
            PollDecision::Stable
        } else {
            PollDecision::HoldRestarted {
                timer: HoldTimer {
                    expires_at: now + to_delta(self.policy.hold()),
                    restarts: timer.restarts + 1,
                    ..*timer
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierTable;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn platinum() -> HoldEvaluator {
        HoldEvaluator::new(SlaTier::Platinum, *TierTable::default().for_tier(SlaTier::Platinum))
    }

    const GOOD: MetricSample = MetricSample {
        latency_ms: 4.0,
        jitter_ms: 0.5,
        loss_pct: 0.0,
    };
    const BAD: MetricSample = MetricSample {
        latency_ms: 40.0,
        jitter_ms: 0.5,
        loss_pct: 5.0,
    };

    fn decided(a: Assessment) -> PollDecision {
        match a {
            Assessment::Decided(d) => d,
            Assessment::NeedsStabilityCheck(_) => panic!("expected a decision"),
        }
    }

    #[test]
    fn recovery_starts_tier_timer() {
        let d = decided(platinum().assess(None, &GOOD, t(0)));
        let PollDecision::HoldStarted { timer } = d else {
            panic!("expected start, got {d:?}");
        };
        assert_eq!(timer.expires_at, t(30));
        assert_eq!(timer.recovery_observed_at, t(0));
    }

    #[test]
    fn recurrence_cancels_pending_timer() {
        let eval = platinum();
        let PollDecision::HoldStarted { timer } = decided(eval.assess(None, &GOOD, t(0))) else {
            unreachable!()
        };
        let d = decided(eval.assess(Some(&timer), &BAD, t(10)));
        assert!(matches!(d, PollDecision::HoldCancelled { .. }));
        assert_eq!(d.next_timer(Some(timer)), None);

        let d = decided(eval.assess(None, &BAD, t(20)));
        assert!(matches!(d, PollDecision::StillDegraded { ref violations } if violations.len() == 2));
    }

    #[test]
    fn pending_then_stability_check() {
        let eval = platinum();
        let PollDecision::HoldStarted { timer } = decided(eval.assess(None, &GOOD, t(0))) else {
            unreachable!()
        };
        assert_eq!(
            decided(eval.assess(Some(&timer), &GOOD, t(20))),
            PollDecision::HoldPending {
                remaining: Duration::from_secs(10)
            }
        );
        assert_eq!(
            eval.assess(Some(&timer), &GOOD, t(30)),
            Assessment::NeedsStabilityCheck(timer)
        );
        assert_eq!(eval.confirm(&timer, &GOOD, t(30)), PollDecision::Stable);

        let PollDecision::HoldRestarted { timer: restarted } = eval.confirm(&timer, &BAD, t(30))
        else {
            panic!("expected restart");
        };
        assert_eq!(restarted.restarts, 1);
        assert_eq!(restarted.expires_at, t(60));
        assert_eq!(restarted.recovery_observed_at, t(0));
    }
}
