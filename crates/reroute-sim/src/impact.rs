//! Simulated service inventory

use async_trait::async_trait;
use dashmap::DashMap;
use reroute_model::{AffectedService, CollaboratorError, LinkId, ServiceImpactOracle};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};

/// Maps links to the services riding them
#[derive(Debug, Default)]
pub struct SimImpact {
    services: DashMap<LinkId, Vec<AffectedService>>,
    failures: AtomicU32,
}

impl SimImpact {
    /// Empty inventory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `service` on every link in `links`
    #[must_use]
    pub fn with_service(self, service: AffectedService, links: &[&str]) -> Self {
        for link in links {
            self.services
                .entry(LinkId::from(*link))
                .or_default()
                .push(service.clone());
        }
        self
    }

    /// Fail the next `n` lookups
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ServiceImpactOracle for SimImpact {
    async fn affected_services(
        &self,
        links: &BTreeSet<LinkId>,
    ) -> Result<Vec<AffectedService>, CollaboratorError> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CollaboratorError::unavailable("service-impact", "simulated outage"));
        }

        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for link in links {
            if let Some(services) = self.services.get(link) {
                for service in services.iter() {
                    if seen.insert(service.id.clone()) {
                        out.push(service.clone());
                    }
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reroute_model::{EndpointPair, SlaTier};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn services_are_reported_once() {
        let svc = AffectedService::new("svc-1", SlaTier::Gold, EndpointPair::new("PE1", "PE2"));
        let impact = SimImpact::new().with_service(svc, &["L1", "L2"]);
        let links = BTreeSet::from([LinkId::from("L1"), LinkId::from("L2")]);
        assert_eq!(impact.affected_services(&links).await.unwrap().len(), 1);
        assert!(impact
            .affected_services(&BTreeSet::from([LinkId::from("L9")]))
            .await
            .unwrap()
            .is_empty());
    }
}
