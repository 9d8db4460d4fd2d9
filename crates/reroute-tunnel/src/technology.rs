//! Traffic-engineering technology selection

use crate::error::TunnelError;
use reroute_model::{with_timeout, NodeId, ProvisioningApi, RetryPolicy, TeTechnology};
use std::time::Duration;

/// Where the selected technology came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TechnologySource {
    /// Reported by the service inventory
    Service,
    /// Advertised by the head-end
    Capability,
    /// Configured default
    Default,
}

/// Selected technology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TechnologySelection {
    /// Technology to provision with
    pub technology: TeTechnology,
    /// How it was chosen
    pub source: TechnologySource,
}

/// Picks the technology for a protection tunnel
///
/// Order: the service's own technology, then the head-end's advertised
/// capabilities (SRv6, SR-MPLS, RSVP-TE), then the configured default.
#[derive(Debug, Clone, Copy)]
pub struct TechnologySelector {
    default: Option<TeTechnology>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl TechnologySelector {
    /// Create a selector
    #[inline]
    #[must_use]
    pub fn new(default: Option<TeTechnology>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            default,
            retry,
            timeout,
        }
    }

    /// Select a technology for a tunnel at `head_end`
    ///
    /// # Errors
    /// `TunnelError::UnknownTechnology` if the service names an unknown
    /// technology, or nothing can be determined and no default is set.
    pub async fn select(
        &self,
        service_technology: Option<&str>,
        head_end: &NodeId,
        api: &dyn ProvisioningApi,
    ) -> Result<TechnologySelection, TunnelError> {
        if let Some(raw) = service_technology {
            return raw
                .parse::<TeTechnology>()
                .map(|technology| TechnologySelection {
                    technology,
                    source: TechnologySource::Service,
                })
                .map_err(|e| TunnelError::UnknownTechnology {
                    head_end: head_end.clone(),
                    detail: e.to_string(),
                });
        }

        let timeout = self.timeout;
        match self
            .retry
            .run("capabilities", move |_| {
                with_timeout("provisioning", timeout, api.capabilities(head_end))
            })
            .await
        {
            Ok(advertised) => {
                if let Some(technology) = TeTechnology::PREFERENCE
                    .into_iter()
                    .find(|t| advertised.contains(t))
                {
                    return Ok(TechnologySelection {
                        technology,
                        source: TechnologySource::Capability,
                    });
                }
            }
            Err(e) => {
                tracing::warn!(head_end = %head_end, "capability query failed: {}", e);
            }
        }

        self.default
            .map(|technology| TechnologySelection {
                technology,
                source: TechnologySource::Default,
            })
            .ok_or_else(|| TunnelError::UnknownTechnology {
                head_end: head_end.clone(),
                detail: "no service technology, no advertised capability, no default".into(),
            })
    }
}
