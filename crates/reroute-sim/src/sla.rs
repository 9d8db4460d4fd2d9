//! Simulated SLA measurement source

use async_trait::async_trait;
use parking_lot::Mutex;
use reroute_model::{CollaboratorError, EndpointPair, MetricSample, SlaOracle};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Returns scripted samples, then a steady value per endpoint pair
#[derive(Debug)]
pub struct SimSla {
    scripted: Mutex<HashMap<EndpointPair, VecDeque<MetricSample>>>,
    steady: Mutex<HashMap<EndpointPair, MetricSample>>,
    default: MetricSample,
    failures: AtomicU32,
    calls: AtomicU64,
}

impl SimSla {
    /// Every endpoint pair reports `default` until told otherwise
    #[must_use]
    pub fn new(default: MetricSample) -> Self {
        Self {
            scripted: Mutex::new(HashMap::new()),
            steady: Mutex::new(HashMap::new()),
            default,
            failures: AtomicU32::new(0),
            calls: AtomicU64::new(0),
        }
    }

    /// Queue samples returned before the steady value
    pub fn push(&self, endpoints: &EndpointPair, samples: impl IntoIterator<Item = MetricSample>) {
        self.scripted
            .lock()
            .entry(endpoints.clone())
            .or_default()
            .extend(samples);
    }

    /// Replace the steady value and drop queued samples
    pub fn set_steady(&self, endpoints: &EndpointPair, sample: MetricSample) {
        self.scripted.lock().remove(endpoints);
        self.steady.lock().insert(endpoints.clone(), sample);
    }

    /// Fail the next `n` queries
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Queries served so far
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SlaOracle for SimSla {
    async fn current_metrics(
        &self,
        endpoints: &EndpointPair,
    ) -> Result<MetricSample, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CollaboratorError::unavailable("sla", "probe unreachable"));
        }
        if let Some(sample) = self
            .scripted
            .lock()
            .get_mut(endpoints)
            .and_then(VecDeque::pop_front)
        {
            return Ok(sample);
        }
        Ok(self
            .steady
            .lock()
            .get(endpoints)
            .copied()
            .unwrap_or(self.default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_samples_precede_steady_value() {
        let pair = EndpointPair::new("PE1", "PE2");
        let sla = SimSla::new(MetricSample::new(5.0, 1.0, 0.0));
        sla.push(&pair, [MetricSample::new(80.0, 9.0, 2.0)]);
        assert_eq!(sla.current_metrics(&pair).await.unwrap().latency_ms, 80.0);
        assert_eq!(sla.current_metrics(&pair).await.unwrap().latency_ms, 5.0);
        assert_eq!(sla.calls(), 2);
    }
}
