//! Allocation engine errors.

use crate::allocation::validator::ValidationError;
use crate::model::beneficiary::{BeneficiaryId, BeneficiaryKey};
use crate::model::container::ContainerId;
use crate::repo::link_repo::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type AllocationResult<T> = Result<T, AllocationError>;

/// Errors returned by allocation operations.
#[derive(Debug)]
pub enum AllocationError {
    /// A link store call failed before anything was written.
    Store(StoreError),
    /// Some writes of a sequential redistribution succeeded, then one failed.
    ///
    /// The container's shares may not total 100 until it is rebalanced.
    PartialRedistribution {
        container: ContainerId,
        applied: usize,
        planned: usize,
        source: StoreError,
    },
    /// Totals are not acceptable for the requested action.
    Validation(ValidationError),
    /// Container has no session entry.
    UnknownContainer(ContainerId),
    /// Beneficiary is not part of the container's session entry.
    UnknownBeneficiary {
        container: ContainerId,
        key: BeneficiaryKey,
    },
    /// Beneficiary already has a link to the container.
    AlreadyLinked {
        container: ContainerId,
        beneficiary: BeneficiaryId,
    },
    /// Beneficiary has no link to the container.
    NotLinked {
        container: ContainerId,
        beneficiary: BeneficiaryId,
    },
    /// Promoting a draft would duplicate an existing key.
    KeyConflict {
        container: ContainerId,
        key: BeneficiaryKey,
    },
    /// Save was requested while a draft beneficiary is still unpersisted.
    UnsavedDraft {
        container: ContainerId,
        key: BeneficiaryKey,
    },
}

impl AllocationError {
    /// Stable machine-readable code for host UIs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Store(_) => "store_error",
            Self::PartialRedistribution { .. } => "partial_redistribution",
            Self::Validation(err) => err.reason(),
            Self::UnknownContainer(_) => "unknown_container",
            Self::UnknownBeneficiary { .. } => "unknown_beneficiary",
            Self::AlreadyLinked { .. } => "already_linked",
            Self::NotLinked { .. } => "not_linked",
            Self::KeyConflict { .. } => "key_conflict",
            Self::UnsavedDraft { .. } => "unsaved_draft",
        }
    }
}

impl Display for AllocationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::PartialRedistribution {
                container,
                applied,
                planned,
                source,
            } => write!(
                f,
                "redistribution of {container} stopped after {applied} of {planned} writes: {source}"
            ),
            Self::Validation(err) => write!(f, "{err}"),
            Self::UnknownContainer(container) => {
                write!(f, "container {container} is not being edited")
            }
            Self::UnknownBeneficiary { container, key } => {
                write!(f, "beneficiary {key} is not allocated in {container}")
            }
            Self::AlreadyLinked {
                container,
                beneficiary,
            } => write!(
                f,
                "beneficiary {beneficiary} is already linked to {container}"
            ),
            Self::NotLinked {
                container,
                beneficiary,
            } => write!(f, "beneficiary {beneficiary} is not linked to {container}"),
            Self::KeyConflict { container, key } => {
                write!(f, "beneficiary {key} already present in {container}")
            }
            Self::UnsavedDraft { container, key } => write!(
                f,
                "draft beneficiary {key} in {container} must be saved first"
            ),
        }
    }
}

impl Error for AllocationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::PartialRedistribution { source, .. } => Some(source),
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for AllocationError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<ValidationError> for AllocationError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}
