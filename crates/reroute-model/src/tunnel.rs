//! Protection tunnels and their traffic-engineering technology

use crate::ids::{IncidentId, NodeId, TunnelId};
use crate::path::{ComputedPath, PathObjective};
use crate::sla::EndpointPair;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Traffic-engineering technology used to realise a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TeTechnology {
    /// Segment routing over MPLS
    #[serde(rename = "sr-mpls")]
    SrMpls,
    /// Segment routing over IPv6
    #[serde(rename = "srv6")]
    Srv6,
    /// RSVP-TE signalled LSP
    #[serde(rename = "rsvp-te")]
    RsvpTe,
}

impl TeTechnology {
    /// Capability preference when the service does not name a technology
    pub const PREFERENCE: [Self; 3] = [Self::Srv6, Self::SrMpls, Self::RsvpTe];

    /// Canonical name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SrMpls => "sr-mpls",
            Self::Srv6 => "srv6",
            Self::RsvpTe => "rsvp-te",
        }
    }
}

impl fmt::Display for TeTechnology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Technology name not recognised
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown traffic-engineering technology: {0}")]
pub struct UnknownTechnology(pub String);

impl FromStr for TeTechnology {
    type Err = UnknownTechnology;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "sr-mpls" | "srmpls" | "sr" => Ok(Self::SrMpls),
            "srv6" | "sr-v6" => Ok(Self::Srv6),
            "rsvp-te" | "rsvp" => Ok(Self::RsvpTe),
            _ => Err(UnknownTechnology(s.to_string())),
        }
    }
}

/// Binding identifier reserved for a tunnel at its head-end
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BindingId {
    /// Technology whose range this value comes from
    pub technology: TeTechnology,
    /// Numeric value within the range
    pub value: u32,
}

impl BindingId {
    /// Create a binding id
    #[inline]
    #[must_use]
    pub fn new(technology: TeTechnology, value: u32) -> Self {
        Self { technology, value }
    }
}

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.technology {
            TeTechnology::Srv6 => write!(f, "fc00:0:ffff::{:x}", self.value),
            TeTechnology::SrMpls | TeTechnology::RsvpTe => write!(f, "{}", self.value),
        }
    }
}

/// Operational status reported by the provisioning system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelStatus {
    /// Forwarding
    Up,
    /// Not forwarding
    Down,
    /// Status not yet known
    Unknown,
}

/// Share of traffic carried by the protection tunnel, in percent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct WeightSplit {
    protection: u8,
}

impl WeightSplit {
    /// All traffic on the protection tunnel
    pub const FULL_PROTECTION: Self = Self { protection: 100 };
    /// All traffic on the original path
    pub const ORIGINAL_ONLY: Self = Self { protection: 0 };

    /// Split with `protection` percent on the tunnel, capped at 100
    #[inline]
    #[must_use]
    pub fn protection_share(protection: u8) -> Self {
        Self {
            protection: protection.min(100),
        }
    }

    /// Percent on the protection tunnel
    #[inline]
    #[must_use]
    pub fn protection(self) -> u8 {
        self.protection
    }

    /// Percent on the original path
    #[inline]
    #[must_use]
    pub fn original(self) -> u8 {
        100 - self.protection
    }
}

impl fmt::Display for WeightSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.protection, self.original())
    }
}

/// Request sent to the provisioning system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelSpec {
    /// Incident that owns the tunnel
    pub owner: IncidentId,
    /// Technology to realise it with
    pub technology: TeTechnology,
    /// Head-end and tail-end
    pub endpoints: EndpointPair,
    /// Explicit path
    pub path: ComputedPath,
    /// Reserved binding id
    pub binding: BindingId,
    /// Objective the path was computed for
    pub objective: PathObjective,
}

/// A provisioned protection tunnel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tunnel {
    /// Provisioning-system id
    pub id: TunnelId,
    /// Owning incident
    pub owner: IncidentId,
    /// Technology
    pub technology: TeTechnology,
    /// Endpoints
    pub endpoints: EndpointPair,
    /// Reserved binding id
    pub binding: BindingId,
    /// Last observed status
    pub status: TunnelStatus,
    /// Current traffic split
    pub weight: WeightSplit,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Tunnel {
    /// Head-end node the binding id is scoped to
    #[inline]
    #[must_use]
    pub fn head_end(&self) -> &NodeId {
        &self.endpoints.head
    }
}
