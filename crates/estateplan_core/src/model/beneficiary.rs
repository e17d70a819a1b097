//! Beneficiary identity as seen by the allocation engine.
//!
//! # Responsibility
//! - Distinguish beneficiaries that only exist in the current editing session
//!   from beneficiaries persisted by the store.
//!
//! # Invariants
//! - A key never changes variant in place. Promotion of a draft produces a new
//!   `Persisted` key that the session swaps in explicitly.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Store-issued beneficiary identifier.
pub type BeneficiaryId = Uuid;

/// Session-local identifier of a beneficiary that has not been saved yet.
pub type DraftId = Uuid;

/// Key of one beneficiary inside an allocation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "id", rename_all = "snake_case")]
pub enum BeneficiaryKey {
    /// Entered in the current session, known only locally.
    Draft(DraftId),
    /// Persisted by the store with a stable id.
    Persisted(BeneficiaryId),
}

impl BeneficiaryKey {
    /// Creates a key for a freshly entered draft beneficiary.
    pub fn new_draft() -> Self {
        Self::Draft(Uuid::new_v4())
    }

    pub fn is_draft(&self) -> bool {
        matches!(self, Self::Draft(_))
    }

    /// Returns the store id when this key refers to a persisted beneficiary.
    pub fn persisted_id(&self) -> Option<BeneficiaryId> {
        match self {
            Self::Persisted(id) => Some(*id),
            Self::Draft(_) => None,
        }
    }
}

impl From<BeneficiaryId> for BeneficiaryKey {
    fn from(value: BeneficiaryId) -> Self {
        Self::Persisted(value)
    }
}

impl Display for BeneficiaryKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft(id) => write!(f, "draft:{id}"),
            Self::Persisted(id) => write!(f, "persisted:{id}"),
        }
    }
}
