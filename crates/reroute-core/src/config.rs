//! Engine configuration
//!
//! One TOML document with a table per component. Every table and field is
//! optional; missing values take their defaults. Durations are whole
//! seconds in `*_secs` fields.

use reroute_correlation::CorrelationConfig;
use reroute_model::{EscalationReason, RecoveryAction, RetryPolicy, SlaTier};
use reroute_path::PlannerConfig;
use reroute_restoration::RestorationConfig;
use reroute_tunnel::TunnelConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// File
        path: PathBuf,
        /// Cause
        #[source]
        source: std::io::Error,
    },

    /// Not valid TOML for this schema
    #[error("invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Could not render the configuration
    #[error("cannot render configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Values parse but cannot work together
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// A required collaborator or component was not supplied
    #[error("missing {0}")]
    Missing(&'static str),
}

/// What to do when an incident's own protection path degrades
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadePolicy {
    /// Tear the tunnel down and compute a new path around both failures
    Recompute,
    /// Hand the incident to the escalation hook
    #[default]
    Escalate,
}

impl CascadePolicy {
    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recompute => "recompute",
            Self::Escalate => "escalate",
        }
    }
}

/// Static escalation rule table, one action per reason code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationRules {
    /// Relaxation ladder exhausted
    pub no_path: RecoveryAction,
    /// Tunnel creation retries exhausted
    pub provision_exhausted: RecoveryAction,
    /// Protection path degraded
    pub cascading_degradation: RecoveryAction,
    /// Technology could not be determined
    pub unknown_technology: RecoveryAction,
    /// Cutover verification failed
    pub cutover_unstable: RecoveryAction,
}

impl Default for EscalationRules {
    fn default() -> Self {
        Self {
            no_path: RecoveryAction::HoldDegraded,
            provision_exhausted: RecoveryAction::TryAlternatePath,
            cascading_degradation: RecoveryAction::HoldDegraded,
            unknown_technology: RecoveryAction::HoldDegraded,
            cutover_unstable: RecoveryAction::HoldDegraded,
        }
    }
}

impl EscalationRules {
    /// Action for `reason`
    #[inline]
    #[must_use]
    pub fn action_for(&self, reason: EscalationReason) -> RecoveryAction {
        match reason {
            EscalationReason::NoPath => self.no_path,
            EscalationReason::ProvisionExhausted => self.provision_exhausted,
            EscalationReason::CascadingDegradation => self.cascading_degradation,
            EscalationReason::UnknownTechnology => self.unknown_technology,
            EscalationReason::CutoverUnstable => self.cutover_unstable,
        }
    }

    /// Set the action for `reason`
    #[must_use]
    pub fn with_rule(mut self, reason: EscalationReason, action: RecoveryAction) -> Self {
        let slot = match reason {
            EscalationReason::NoPath => &mut self.no_path,
            EscalationReason::ProvisionExhausted => &mut self.provision_exhausted,
            EscalationReason::CascadingDegradation => &mut self.cascading_degradation,
            EscalationReason::UnknownTechnology => &mut self.unknown_technology,
            EscalationReason::CutoverUnstable => &mut self.cutover_unstable,
        };
        *slot = action;
        self
    }
}

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Failed steering rounds tolerated before escalating
    pub max_steering_rounds: u32,
    /// Automated recoveries the escalation hook may grant per incident
    pub max_escalation_recoveries: u32,
    /// Handling of a degraded protection path
    pub cascade_policy: CascadePolicy,
    /// Rule table used by the default escalation policy
    pub escalation_rules: EscalationRules,
    /// Retry policy for service-impact queries
    pub retry: RetryPolicy,
    /// Deadline for one collaborator call
    pub call_timeout_secs: u64,
    /// Start a driver for every new incident
    pub auto_drive: bool,
    /// Retries of a failed step before a driver gives up
    pub driver_step_retries: u32,
    /// How long closed incidents stay queryable
    pub archive_ttl_secs: u64,
    /// Closed incidents kept at most
    pub archive_capacity: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steering_rounds: 2,
            max_escalation_recoveries: 1,
            cascade_policy: CascadePolicy::default(),
            escalation_rules: EscalationRules::default(),
            retry: RetryPolicy::default(),
            call_timeout_secs: 30,
            auto_drive: true,
            driver_step_retries: 3,
            archive_ttl_secs: 86_400,
            archive_capacity: 10_000,
        }
    }
}

impl OrchestratorConfig {
    /// Collaborator call deadline
    #[inline]
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Archive time-to-live
    #[inline]
    #[must_use]
    pub fn archive_ttl(&self) -> Duration {
        Duration::from_secs(self.archive_ttl_secs)
    }

    /// Backoff used by drivers between failed steps
    #[inline]
    #[must_use]
    pub fn driver_retry(&self) -> RetryPolicy {
        self.retry.with_max_retries(self.driver_step_retries)
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Dedup, correlation and flap damping
    pub correlation: CorrelationConfig,
    /// Path planning
    pub planner: PlannerConfig,
    /// Tunnel provisioning
    pub tunnel: TunnelConfig,
    /// Hold timers and cutover
    pub restoration: RestorationConfig,
    /// State machine and drivers
    pub orchestrator: OrchestratorConfig,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document and validate it
    ///
    /// # Errors
    /// `ConfigError::Parse` for malformed input, `ConfigError::Invalid` for
    /// values that fail [`EngineConfig::validate`].
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io` if the file cannot be read, otherwise as
    /// [`EngineConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// `ConfigError::Serialize` if rendering fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// With correlation settings
    #[inline]
    #[must_use]
    pub fn with_correlation(mut self, correlation: CorrelationConfig) -> Self {
        self.correlation = correlation;
        self
    }

    /// With planner settings
    #[inline]
    #[must_use]
    pub fn with_planner(mut self, planner: PlannerConfig) -> Self {
        self.planner = planner;
        self
    }

    /// With tunnel settings
    #[inline]
    #[must_use]
    pub fn with_tunnel(mut self, tunnel: TunnelConfig) -> Self {
        self.tunnel = tunnel;
        self
    }

    /// With restoration settings
    #[inline]
    #[must_use]
    pub fn with_restoration(mut self, restoration: RestorationConfig) -> Self {
        self.restoration = restoration;
        self
    }

    /// With orchestrator settings
    #[inline]
    #[must_use]
    pub fn with_orchestrator(mut self, orchestrator: OrchestratorConfig) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    /// With cascade policy
    #[inline]
    #[must_use]
    pub fn with_cascade_policy(mut self, policy: CascadePolicy) -> Self {
        self.orchestrator.cascade_policy = policy;
        self
    }

    /// Check values that cannot work
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        let c = &self.correlation;
        if c.dedup_window_secs == 0 || c.correlation_window_secs == 0 || c.flap.window_secs == 0 {
            return invalid("correlation windows must be positive".into());
        }
        if c.flap.threshold < 2 {
            return invalid(format!(
                "flap.threshold must be at least 2, got {}",
                c.flap.threshold
            ));
        }
        if c.flap.initial_dampen_secs > c.flap.max_dampen_secs {
            return invalid(format!(
                "flap.initial_dampen_secs ({}) exceeds flap.max_dampen_secs ({})",
                c.flap.initial_dampen_secs, c.flap.max_dampen_secs
            ));
        }

        if self.planner.default_max_hops == 0 {
            return invalid("planner.default_max_hops must be positive".into());
        }

        let ranges = &self.tunnel.binding_ranges;
        for (name, range) in [
            ("sr_mpls", ranges.sr_mpls),
            ("srv6", ranges.srv6),
            ("rsvp_te", ranges.rsvp_te),
        ] {
            if range.is_empty() {
                return invalid(format!(
                    "binding range {name} is empty: {}..={}",
                    range.first, range.last
                ));
            }
        }

        self.restoration
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let holds: Vec<u64> = SlaTier::ALL
            .iter()
            .map(|t| self.restoration.tiers.for_tier(*t).hold_secs)
            .collect();
        if holds.windows(2).any(|w| w[0] > w[1]) {
            return invalid(format!(
                "tier hold times must not decrease from platinum to bronze, got {holds:?}"
            ));
        }

        if self.orchestrator.call_timeout_secs == 0 {
            return invalid("orchestrator.call_timeout_secs must be positive".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reroute_model::CutoverMode;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [orchestrator]
            cascade_policy = "recompute"

            [restoration]
            cutover_mode = "immediate"

            [orchestrator.escalation_rules]
            no_path = "close_unresolved"
            "#,
        )
        .unwrap();
        assert_eq!(config.orchestrator.cascade_policy, CascadePolicy::Recompute);
        assert_eq!(config.restoration.cutover_mode, CutoverMode::Immediate);
        assert_eq!(
            config.orchestrator.escalation_rules.action_for(EscalationReason::NoPath),
            RecoveryAction::CloseUnresolved
        );
        assert_eq!(
            config
                .orchestrator
                .escalation_rules
                .action_for(EscalationReason::ProvisionExhausted),
            RecoveryAction::TryAlternatePath
        );
        assert_eq!(config.correlation.dedup_window_secs, 300);
    }

    #[test]
    fn rejects_low_flap_threshold() {
        let err = EngineConfig::from_toml_str("[correlation.flap]\nthreshold = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_initial_dampen_above_max() {
        let mut config = EngineConfig::default();
        config.correlation.flap.initial_dampen_secs = 7_200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_binding_range() {
        let mut config = EngineConfig::default();
        config.tunnel.binding_ranges.rsvp_te.first = 2_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rsvp_te"));
    }

    #[test]
    fn rejects_inverted_tier_holds() {
        let mut config = EngineConfig::default();
        config.restoration.tiers.platinum.hold_secs = 600;
        assert!(config.validate().is_err());
    }

    #[test]
    fn renders_and_reparses() {
        let config = EngineConfig::default().with_cascade_policy(CascadePolicy::Recompute);
        let text = config.to_toml_string().unwrap();
        assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), config);
    }
}
