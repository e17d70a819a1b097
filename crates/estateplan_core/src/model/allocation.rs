//! Percentage shares and persisted allocation links.
//!
//! # Responsibility
//! - Provide an exact percentage type so sums can be compared without drift.
//! - Define the persisted link record between a container and a beneficiary.
//!
//! # Invariants
//! - `Percentage` is always within `0..=100` with two decimal places.
//! - Conversions from floats or user text clamp instead of failing.

use crate::model::beneficiary::BeneficiaryId;
use crate::model::container::ContainerId;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of one persisted link row.
pub type LinkId = Uuid;

/// Basis points in one percentage point.
pub const BASIS_POINTS_PER_PERCENT: u32 = 100;

/// Basis points representing a whole (100%) container.
pub const FULL_BASIS_POINTS: u32 = 100 * BASIS_POINTS_PER_PERCENT;

/// Percentage share with two decimal places, stored as basis points.
///
/// Serialized as a plain float (`33.33`) so external schemas keep the
/// `allocation_percentage` number shape.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(from = "f64", into = "f64")]
pub struct Percentage(u32);

impl Percentage {
    pub const ZERO: Self = Self(0);
    pub const FULL: Self = Self(FULL_BASIS_POINTS);

    /// Builds a percentage from basis points, clamping to 100%.
    pub fn from_basis_points(basis_points: u32) -> Self {
        Self(basis_points.min(FULL_BASIS_POINTS))
    }

    /// Builds a percentage from a float.
    ///
    /// Non-finite values map to zero; finite values are clamped to `[0, 100]`
    /// and rounded to two decimal places.
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() {
            return Self::ZERO;
        }
        let clamped = value.clamp(0.0, 100.0);
        Self::from_basis_points((clamped * f64::from(BASIS_POINTS_PER_PERCENT)).round() as u32)
    }

    /// Parses free-form user input.
    ///
    /// Accepts surrounding whitespace and one trailing `%`. Anything that is
    /// not a finite number becomes zero.
    pub fn parse_lenient(raw: &str) -> Self {
        let trimmed = raw.trim();
        let numeric = trimmed.strip_suffix('%').unwrap_or(trimmed).trim_end();
        numeric
            .parse::<f64>()
            .map(Self::from_f64)
            .unwrap_or(Self::ZERO)
    }

    pub fn basis_points(self) -> u32 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / f64::from(BASIS_POINTS_PER_PERCENT)
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl From<f64> for Percentage {
    fn from(value: f64) -> Self {
        Self::from_f64(value)
    }
}

impl From<Percentage> for f64 {
    fn from(value: Percentage) -> Self {
        value.as_f64()
    }
}

impl Display for Percentage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let whole = self.0 / BASIS_POINTS_PER_PERCENT;
        let fraction = self.0 % BASIS_POINTS_PER_PERCENT;
        if fraction == 0 {
            write!(f, "{whole}")
        } else if fraction % 10 == 0 {
            write!(f, "{whole}.{}", fraction / 10)
        } else {
            write!(f, "{whole}.{fraction:02}")
        }
    }
}

/// Sums shares exactly, in basis points.
pub fn total_basis_points<I>(shares: I) -> u64
where
    I: IntoIterator<Item = Percentage>,
{
    shares
        .into_iter()
        .map(|share| u64::from(share.basis_points()))
        .sum()
}

/// How a link's percentage was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationType {
    /// Computed by the equal split rule.
    EqualSplit,
    /// Entered manually as a percentage.
    Percentage,
    /// Derived from a fixed amount entered elsewhere; stored as a percentage.
    SpecificAmount,
}

impl AllocationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EqualSplit => "equal_split",
            Self::Percentage => "percentage",
            Self::SpecificAmount => "specific_amount",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "equal_split" => Some(Self::EqualSplit),
            "percentage" => Some(Self::Percentage),
            "specific_amount" => Some(Self::SpecificAmount),
            _ => None,
        }
    }
}

/// Persisted association between one container and one beneficiary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLink {
    pub link_id: LinkId,
    pub container: ContainerId,
    pub beneficiary: BeneficiaryId,
    #[serde(rename = "allocation_percentage")]
    pub percentage: Percentage,
    pub allocation_type: AllocationType,
}
