//! Allocation engine configuration.
//!
//! # Responsibility
//! - Hold the integrator-chosen knobs of the allocation engine.
//! - Load them from JSON supplied by the host and reject invalid values.
//!
//! # Invariants
//! - Missing fields fall back to defaults; unknown fields are rejected.
//! - `tolerance_percent` is finite and within `[0, 100)`.

use crate::model::allocation::BASIS_POINTS_PER_PERCENT;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Allowed slack, in percentage points, when checking that shares total 100.
pub const DEFAULT_TOLERANCE_PERCENT: f64 = 0.5;

/// How multi-link redistributions are written to the link store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// One all-or-nothing batch when the store supports it, else sequential.
    #[default]
    Atomic,
    /// One write at a time; a mid-way failure is reported as partial.
    Sequential,
}

/// What happens to the remaining links after a beneficiary is removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    /// Equal-split the remaining beneficiaries again.
    #[default]
    Redistribute,
    /// Leave remaining shares untouched, in the store and in session state;
    /// the container may need rebalancing.
    KeepRemaining,
}

/// When session edits reach the link store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitTiming {
    /// Every linking action and manual edit is written right away.
    Immediate,
    /// Edits stay in session state until an explicit save.
    #[default]
    Deferred,
}

/// Integrator configuration for one allocation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AllocationConfig {
    pub tolerance_percent: f64,
    pub write_mode: WriteMode,
    pub removal_policy: RemovalPolicy,
    pub commit_timing: CommitTiming,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            tolerance_percent: DEFAULT_TOLERANCE_PERCENT,
            write_mode: WriteMode::default(),
            removal_policy: RemovalPolicy::default(),
            commit_timing: CommitTiming::default(),
        }
    }
}

impl AllocationConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let tolerance = self.tolerance_percent;
        if !tolerance.is_finite() || !(0.0..100.0).contains(&tolerance) {
            return Err(ConfigError::InvalidTolerance(tolerance));
        }
        Ok(())
    }

    /// Tolerance converted to basis points (rounded).
    pub fn tolerance_basis_points(&self) -> u64 {
        (self.tolerance_percent * f64::from(BASIS_POINTS_PER_PERCENT)).round() as u64
    }
}

/// Configuration loading errors.
#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    InvalidTolerance(f64),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid allocation config: {err}"),
            Self::InvalidTolerance(value) => write!(
                f,
                "tolerance_percent must be finite and within [0, 100), got {value}"
            ),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::InvalidTolerance(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AllocationConfig, CommitTiming, ConfigError, RemovalPolicy, WriteMode};

    #[test]
    fn empty_document_uses_defaults() {
        let config = AllocationConfig::from_json_str("{}").unwrap();
        assert_eq!(config, AllocationConfig::default());
        assert_eq!(config.tolerance_basis_points(), 50);
        assert_eq!(config.write_mode, WriteMode::Atomic);
        assert_eq!(config.removal_policy, RemovalPolicy::Redistribute);
        assert_eq!(config.commit_timing, CommitTiming::Deferred);
    }

    #[test]
    fn parses_snake_case_fields() {
        let config = AllocationConfig::from_json_str(
            r#"{
                "tolerance_percent": 1.25,
                "write_mode": "sequential",
                "removal_policy": "keep_remaining",
                "commit_timing": "immediate"
            }"#,
        )
        .unwrap();
        assert_eq!(config.tolerance_basis_points(), 125);
        assert_eq!(config.write_mode, WriteMode::Sequential);
        assert_eq!(config.removal_policy, RemovalPolicy::KeepRemaining);
        assert_eq!(config.commit_timing, CommitTiming::Immediate);
    }

    #[test]
    fn rejects_out_of_range_tolerance() {
        let err = AllocationConfig::from_json_str(r#"{"tolerance_percent": -1}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTolerance(value) if value == -1.0));

        let err = AllocationConfig::from_json_str(r#"{"tolerance_percent": 100}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTolerance(_)));
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = AllocationConfig::from_json_str(r#"{"epsilon": 0.5}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
