//! Restoration settings
//!
//! Hold times and recovery thresholds are set per SLA tier. Higher tiers
//! get shorter hold times and tighter thresholds.

use crate::error::RestorationError;
use reroute_model::{CutoverMode, RetryPolicy, SlaThresholds, SlaTier};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hold time and thresholds for one tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierPolicy {
    /// Seconds recovery must hold before cutover
    pub hold_secs: u64,
    /// Thresholds a sample must meet to count as recovered
    pub thresholds: SlaThresholds,
}

impl TierPolicy {
    fn defaults(tier: SlaTier) -> Self {
        let hold_secs = match tier {
            SlaTier::Platinum => 30,
            SlaTier::Gold => 120,
            SlaTier::Silver => 180,
            SlaTier::Bronze => 300,
        };
        Self {
            hold_secs,
            thresholds: SlaThresholds::for_tier(tier),
        }
    }

    /// Hold duration
    #[inline]
    #[must_use]
    pub fn hold(&self) -> Duration {
        Duration::from_secs(self.hold_secs)
    }
}

/// Policy per tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierTable {
    /// Platinum
    pub platinum: TierPolicy,
    /// Gold
    pub gold: TierPolicy,
    /// Silver
    pub silver: TierPolicy,
    /// Bronze
    pub bronze: TierPolicy,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            platinum: TierPolicy::defaults(SlaTier::Platinum),
            gold: TierPolicy::defaults(SlaTier::Gold),
            silver: TierPolicy::defaults(SlaTier::Silver),
            bronze: TierPolicy::defaults(SlaTier::Bronze),
        }
    }
}

impl TierTable {
    /// Policy for `tier`
    #[inline]
    #[must_use]
    pub fn for_tier(&self, tier: SlaTier) -> &TierPolicy {
        match tier {
            SlaTier::Platinum => &self.platinum,
            SlaTier::Gold => &self.gold,
            SlaTier::Silver => &self.silver,
            SlaTier::Bronze => &self.bronze,
        }
    }
}

/// Restoration controller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestorationConfig {
    /// Seconds between monitoring polls
    pub poll_interval_secs: u64,
    /// Seconds between gradual cutover stages
    pub stage_interval_secs: u64,
    /// Cutover mode for new cutovers
    pub cutover_mode: CutoverMode,
    /// Protection shares applied by a gradual cutover, in order
    pub gradual_ladder: Vec<u8>,
    /// Per-tier policy
    pub tiers: TierTable,
    /// Retry policy for SLA queries
    pub retry: RetryPolicy,
    /// Deadline for one SLA query
    pub call_timeout_secs: u64,
}

impl Default for RestorationConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            stage_interval_secs: 60,
            cutover_mode: CutoverMode::Gradual,
            gradual_ladder: vec![75, 50, 25, 0],
            tiers: TierTable::default(),
            retry: RetryPolicy::default(),
            call_timeout_secs: 30,
        }
    }
}

impl RestorationConfig {
    /// Poll interval
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Stage interval
    #[inline]
    #[must_use]
    pub fn stage_interval(&self) -> Duration {
        Duration::from_secs(self.stage_interval_secs)
    }

    /// Check the settings
    ///
    /// # Errors
    /// `RestorationError::InvalidConfig` if the poll interval is zero or the
    /// gradual ladder is not strictly descending to zero.
    pub fn validate(&self) -> Result<(), RestorationError> {
        if self.poll_interval_secs == 0 {
            return Err(RestorationError::InvalidConfig(
                "poll_interval_secs must be positive".into(),
            ));
        }
        let ladder = &self.gradual_ladder;
        if ladder.last() != Some(&0) {
            return Err(RestorationError::InvalidConfig(
                "gradual_ladder must end at 0".into(),
            ));
        }
        if ladder.iter().any(|w| *w > 100) || ladder.windows(2).any(|w| w[0] <= w[1]) {
            return Err(RestorationError::InvalidConfig(format!(
                "gradual_ladder must descend strictly within 0..=100, got {ladder:?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_tiers_hold_shorter() {
        let table = TierTable::default();
        let holds: Vec<u64> = SlaTier::ALL
            .iter()
            .map(|t| table.for_tier(*t).hold_secs)
            .collect();
        assert_eq!(holds, vec![30, 120, 180, 300]);
    }

    #[test]
    fn ladder_must_descend_to_zero() {
        let mut config = RestorationConfig::default();
        assert!(config.validate().is_ok());

        config.gradual_ladder = vec![50, 75, 0];
        assert!(config.validate().is_err());
        config.gradual_ladder = vec![75, 50];
        assert!(config.validate().is_err());
        config.gradual_ladder = vec![0];
        assert!(config.validate().is_ok());
    }
}
