//! Allocation total checks.
//!
//! # Responsibility
//! - Decide whether a container's shares are acceptable before a dependent
//!   action (wizard step advance, save) proceeds.
//!
//! # Invariants
//! - Read-only: validation never mutates state.
//! - A container with no positive share is rejected before the total check.

use crate::allocation::state::AllocationState;
use crate::config::AllocationConfig;
use crate::model::allocation::{
    total_basis_points, Percentage, BASIS_POINTS_PER_PERCENT, FULL_BASIS_POINTS,
};
use crate::model::container::ContainerId;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Why a container's allocation was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// No beneficiary holds a share above zero (includes an empty container).
    NoPositiveShare,
    /// Shares total too far from 100.
    NotHundred { total_basis_points: u64 },
}

impl ValidationError {
    /// Stable reason code surfaced to the host.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NoPositiveShare => "no_positive_share",
            Self::NotHundred { .. } => "not_100",
        }
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPositiveShare => write!(f, "at least one beneficiary needs a share above 0%"),
            Self::NotHundred { total_basis_points } => {
                let per_percent = u64::from(BASIS_POINTS_PER_PERCENT);
                write!(
                    f,
                    "allocations must total 100%, currently {}.{:02}%",
                    total_basis_points / per_percent,
                    total_basis_points % per_percent
                )
            }
        }
    }
}

impl Error for ValidationError {}

/// Checks "at least one positive share, total 100 within tolerance".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationValidator {
    tolerance_basis_points: u64,
}

impl Default for AllocationValidator {
    fn default() -> Self {
        Self::from_config(&AllocationConfig::default())
    }
}

impl AllocationValidator {
    pub fn new(tolerance_basis_points: u64) -> Self {
        Self {
            tolerance_basis_points,
        }
    }

    pub fn from_config(config: &AllocationConfig) -> Self {
        Self::new(config.tolerance_basis_points())
    }

    pub fn tolerance_basis_points(&self) -> u64 {
        self.tolerance_basis_points
    }

    /// Validates the session entry of `container`.
    pub fn validate(
        &self,
        state: &AllocationState,
        container: ContainerId,
    ) -> Result<(), ValidationError> {
        match state.entry(container) {
            Some(entry) => self.validate_shares(entry.shares().iter().map(|(_, share)| *share)),
            None => Err(ValidationError::NoPositiveShare),
        }
    }

    /// Validates a bare list of shares.
    pub fn validate_shares<I>(&self, shares: I) -> Result<(), ValidationError>
    where
        I: IntoIterator<Item = Percentage>,
        I::IntoIter: Clone,
    {
        let shares = shares.into_iter();
        if !shares.clone().any(Percentage::is_positive) {
            return Err(ValidationError::NoPositiveShare);
        }

        let total = total_basis_points(shares);
        if total.abs_diff(u64::from(FULL_BASIS_POINTS)) > self.tolerance_basis_points {
            return Err(ValidationError::NotHundred {
                total_basis_points: total,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{AllocationValidator, ValidationError};
    use crate::allocation::state::AllocationState;
    use crate::model::allocation::Percentage;
    use crate::model::beneficiary::BeneficiaryKey;
    use crate::model::container::ContainerId;
    use uuid::Uuid;

    fn shares(values: &[f64]) -> Vec<Percentage> {
        values.iter().copied().map(Percentage::from_f64).collect()
    }

    #[test]
    fn total_of_97_is_rejected() {
        let validator = AllocationValidator::default();
        let err = validator.validate_shares(shares(&[50.0, 47.0])).unwrap_err();
        assert_eq!(
            err,
            ValidationError::NotHundred {
                total_basis_points: 9_700
            }
        );
        assert_eq!(err.reason(), "not_100");
    }

    #[test]
    fn total_of_99_7_is_within_tolerance() {
        let validator = AllocationValidator::default();
        assert_eq!(validator.validate_shares(shares(&[33.3, 33.3, 33.1])), Ok(()));
    }

    #[test]
    fn tolerance_boundary_is_inclusive() {
        let validator = AllocationValidator::default();
        assert_eq!(validator.validate_shares(shares(&[60.0, 40.5])), Ok(()));
        assert!(validator.validate_shares(shares(&[60.0, 40.51])).is_err());
    }

    #[test]
    fn all_zero_shares_have_no_positive_share() {
        let validator = AllocationValidator::default();
        let err = validator.validate_shares(shares(&[0.0, 0.0])).unwrap_err();
        assert_eq!(err, ValidationError::NoPositiveShare);
        assert_eq!(err.reason(), "no_positive_share");
    }

    #[test]
    fn tolerance_is_configurable() {
        let strict = AllocationValidator::new(0);
        assert!(strict.validate_shares(shares(&[99.99])).is_err());
        let loose = AllocationValidator::new(500);
        assert_eq!(loose.validate_shares(shares(&[96.0])), Ok(()));
    }

    #[test]
    fn unknown_container_is_rejected() {
        let validator = AllocationValidator::default();
        let state = AllocationState::new();
        assert_eq!(
            validator.validate(&state, ContainerId::asset(Uuid::new_v4())),
            Err(ValidationError::NoPositiveShare)
        );
    }

    #[test]
    fn validation_reads_session_entry() {
        let validator = AllocationValidator::default();
        let mut state = AllocationState::new();
        let container = ContainerId::policy(Uuid::new_v4());
        let key = BeneficiaryKey::new_draft();
        state.on_allocation_inputs_changed(container, &[key, BeneficiaryKey::new_draft()]);
        assert_eq!(validator.validate(&state, container), Ok(()));

        state
            .set_one(container, key, Percentage::from_basis_points(1000))
            .unwrap();
        assert!(matches!(
            validator.validate(&state, container),
            Err(ValidationError::NotHundred { total_basis_points: 6_000 })
        ));
    }
}
