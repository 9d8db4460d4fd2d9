//! Cutover planning
//!
//! A cutover is a fixed list of protection shares. Immediate mode has the
//! single stage `0`; gradual mode walks the configured ladder. Progress is
//! persisted after every stage, so the plan only ever answers "what next"
//! from a stored [`CutoverProgress`].

use chrono::{DateTime, Utc};
use reroute_model::clock::to_delta;
use reroute_model::{CutoverMode, CutoverProgress};
use std::time::Duration;

/// Stage list for one cutover
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CutoverPlan {
    mode: CutoverMode,
    stages: Vec<u8>,
}

impl CutoverPlan {
    /// Plan for `mode` using `ladder` when gradual
    #[must_use]
    pub fn new(mode: CutoverMode, ladder: &[u8]) -> Self {
        let stages = match mode {
            CutoverMode::Immediate => vec![0],
            CutoverMode::Gradual => ladder.to_vec(),
        };
        Self { mode, stages }
    }

    /// Mode
    #[inline]
    #[must_use]
    pub fn mode(&self) -> CutoverMode {
        self.mode
    }

    /// Protection shares in order
    #[inline]
    #[must_use]
    pub fn stages(&self) -> &[u8] {
        &self.stages
    }

    /// Protection share of the next stage, if any remain
    #[must_use]
    pub fn next_weight(&self, progress: &CutoverProgress) -> Option<u8> {
        self.stages.get(progress.stages_applied).copied()
    }

    /// Whether every stage has been applied
    #[must_use]
    pub fn is_complete(&self, progress: &CutoverProgress) -> bool {
        progress.stages_applied >= self.stages.len()
    }

    /// Progress after applying the next stage at `at`
    #[must_use]
    pub fn advance(&self, progress: &CutoverProgress, at: DateTime<Utc>) -> Option<CutoverProgress> {
        let weight = self.next_weight(progress)?;
        Some(CutoverProgress {
            stages_applied: progress.stages_applied + 1,
            protection_weight: weight,
            last_stage_at: Some(at),
            ..*progress
        })
    }

    /// When the next stage may run; `None` means now
    #[must_use]
    pub fn next_stage_at(
        &self,
        progress: &CutoverProgress,
        interval: Duration,
    ) -> Option<DateTime<Utc>> {
        if self.is_complete(progress) {
            return None;
        }
        progress.last_stage_at.map(|at| at + to_delta(interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn gradual_walks_the_ladder() {
        let plan = CutoverPlan::new(CutoverMode::Gradual, &[75, 50, 25, 0]);
        let mut progress = CutoverProgress::start(CutoverMode::Gradual);
        let mut applied = Vec::new();
        let mut at = 0;
        while let Some(next) = plan.advance(&progress, t(at)) {
            applied.push(next.protection_weight);
            progress = next;
            at += 60;
        }
        assert_eq!(applied, vec![75, 50, 25, 0]);
        assert!(plan.is_complete(&progress));
        assert_eq!(progress.percent_restored(), 100);
    }

    #[test]
    fn immediate_is_one_stage() {
        let plan = CutoverPlan::new(CutoverMode::Immediate, &[75, 50, 25, 0]);
        let progress = CutoverProgress::start(CutoverMode::Immediate);
        assert_eq!(plan.next_weight(&progress), Some(0));
        let done = plan.advance(&progress, t(0)).unwrap();
        assert!(plan.is_complete(&done));
    }

    #[test]
    fn stages_are_spaced_by_interval() {
        let plan = CutoverPlan::new(CutoverMode::Gradual, &[75, 50, 25, 0]);
        let start = CutoverProgress::start(CutoverMode::Gradual);
        assert_eq!(plan.next_stage_at(&start, Duration::from_secs(60)), None);
        let first = plan.advance(&start, t(0)).unwrap();
        assert_eq!(
            plan.next_stage_at(&first, Duration::from_secs(60)),
            Some(t(60))
        );
    }
}
