//! Degradation alerts
//!
//! An alert reports that a single link crossed (or fell back under) one or
//! more SLA thresholds. Alerts are the only input that creates incidents.

use crate::ids::{AlertId, LinkId, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

/// SLA metric that an alert can report as violated
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// One-way latency
    Latency,
    /// Delay variation
    Jitter,
    /// Packet loss
    Loss,
}

impl MetricKind {
    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Latency => "latency",
            Self::Jitter => "jitter",
            Self::Loss => "loss",
        }
    }
}

/// A point-in-time measurement of a link or endpoint pair
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricSample {
    /// Latency in milliseconds
    pub latency_ms: f64,
    /// Jitter in milliseconds
    pub jitter_ms: f64,
    /// Loss in percent
    pub loss_pct: f64,
}

impl MetricSample {
    /// Create a sample
    #[inline]
    #[must_use]
    pub fn new(latency_ms: f64, jitter_ms: f64, loss_pct: f64) -> Self {
        Self {
            latency_ms,
            jitter_ms,
            loss_pct,
        }
    }
}

/// Alert severity, ordered from least to most severe
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational degradation
    Warning,
    /// Minor degradation
    Minor,
    /// Major degradation
    #[default]
    Major,
    /// Service-affecting degradation
    Critical,
}

/// Where the alert came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSource {
    /// Active measurement probes
    #[default]
    Probe,
    /// Network controller telemetry
    Controller,
    /// Predictive degradation signal
    Proactive,
}

/// Direction of the threshold crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Link entered a degraded state
    #[default]
    Raise,
    /// Link left the degraded state
    Clear,
}

/// Deduplication key: the link plus the set of violated metrics
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash length kept, in hex characters
    const LEN: usize = 16;

    /// Compute the fingerprint for a link and violated metric set
    #[must_use]
    pub fn compute(link: &LinkId, violated: &BTreeSet<MetricKind>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(link.as_str().as_bytes());
        for metric in violated {
            hasher.update(b"|");
            hasher.update(metric.as_str().as_bytes());
        }
        let mut hex = hex::encode(hasher.finalize());
        hex.truncate(Self::LEN);
        Self(hex)
    }

    /// Borrow the hex form
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A degradation alert for one link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Source-assigned alert id
    pub id: AlertId,
    /// Alert origin
    pub source: AlertSource,
    /// Raise or clear
    pub kind: AlertKind,
    /// Degraded link
    pub link: LinkId,
    /// Link endpoint A
    pub a_node: NodeId,
    /// Link endpoint Z
    pub z_node: NodeId,
    /// Metrics that crossed their threshold
    pub violated: BTreeSet<MetricKind>,
    /// Measured values
    pub metrics: MetricSample,
    /// Reported severity
    pub severity: Severity,
    /// Observation timestamp
    pub observed_at: DateTime<Utc>,
}

impl Alert {
    /// Create a raise alert with no violated metrics recorded yet
    #[must_use]
    pub fn raise(
        id: impl Into<AlertId>,
        link: impl Into<LinkId>,
        a_node: impl Into<NodeId>,
        z_node: impl Into<NodeId>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            source: AlertSource::default(),
            kind: AlertKind::Raise,
            link: link.into(),
            a_node: a_node.into(),
            z_node: z_node.into(),
            violated: BTreeSet::new(),
            metrics: MetricSample::default(),
            severity: Severity::default(),
            observed_at,
        }
    }

    /// Create a clear alert
    #[must_use]
    pub fn clear(
        id: impl Into<AlertId>,
        link: impl Into<LinkId>,
        a_node: impl Into<NodeId>,
        z_node: impl Into<NodeId>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: AlertKind::Clear,
            ..Self::raise(id, link, a_node, z_node, observed_at)
        }
    }

    /// Add a violated metric
    #[inline]
    #[must_use]
    pub fn with_violation(mut self, metric: MetricKind) -> Self {
        self.violated.insert(metric);
        self
    }

    /// Set the measured values
    #[inline]
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricSample) -> Self {
        self.metrics = metrics;
        self
    }

    /// Set the severity
    #[inline]
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Set the source
    #[inline]
    #[must_use]
    pub fn with_source(mut self, source: AlertSource) -> Self {
        self.source = source;
        self
    }

    /// Deduplication fingerprint
    #[inline]
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(&self.link, &self.violated)
    }

    /// Whether this alert reports a degradation (as opposed to a clear)
    #[inline]
    #[must_use]
    pub fn is_raise(&self) -> bool {
        self.kind == AlertKind::Raise
    }

    /// Whether the alerted link terminates on `node`
    #[inline]
    #[must_use]
    pub fn touches(&self, node: &NodeId) -> bool {
        &self.a_node == node || &self.z_node == node
    }
}
