//! Hold-timer properties
//!
//! Tenet: a poll only concludes `Stable` when every sample over the last
//! hold period, and the stability sample itself, met the thresholds.

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use reroute_model::{MetricSample, SlaTier};
use reroute_restoration::{Assessment, HoldEvaluator, PollDecision, TierTable};

const POLL_SECS: i64 = 10;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap_or_default()
}

fn sample(good: bool) -> MetricSample {
    if good {
        MetricSample::new(3.0, 0.5, 0.0)
    } else {
        MetricSample::new(60.0, 8.0, 2.0)
    }
}

fn tier() -> impl Strategy<Value = SlaTier> {
    prop::sample::select(SlaTier::ALL.to_vec())
}

proptest! {
    #[test]
    fn stable_requires_a_clean_hold_period(
        tier in tier(),
        polls in prop::collection::vec(any::<bool>(), 1..80),
        checks in prop::collection::vec(any::<bool>(), 80),
    ) {
        let policy = *TierTable::default().for_tier(tier);
        let hold = i64::try_from(policy.hold_secs).unwrap_or(i64::MAX);
        let eval = HoldEvaluator::new(tier, policy);
        let mut timer = None;

        for (i, good) in polls.iter().enumerate() {
            let now_secs = i64::try_from(i).unwrap_or(0) * POLL_SECS;
            let now = at(now_secs);
            let decision = match eval.assess(timer.as_ref(), &sample(*good), now) {
                Assessment::Decided(d) => d,
                Assessment::NeedsStabilityCheck(t) => eval.confirm(&t, &sample(checks[i]), now),
            };

            if decision == PollDecision::Stable {
                prop_assert!(checks[i]);
                let first = usize::try_from((now_secs - hold).max(0) / POLL_SECS).unwrap_or(0);
                prop_assert!(polls[first..=i].iter().all(|g| *g));
                break;
            }
            if let PollDecision::HoldPending { remaining } = &decision {
                prop_assert!(remaining.as_secs() <= policy.hold_secs);
            }
            timer = decision.next_timer(timer);
        }
    }
}
