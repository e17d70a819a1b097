//! Manual percentage overrides.
//!
//! # Invariants
//! - Only the edited key changes; no recompute, no link store access.
//! - Input is coerced, never rejected: garbage becomes 0, out-of-range values
//!   are clamped to `[0, 100]`.
//! - The override lasts until the container's beneficiary set changes.

use crate::allocation::error::AllocationResult;
use crate::allocation::state::AllocationState;
use crate::model::allocation::Percentage;
use crate::model::beneficiary::BeneficiaryKey;
use crate::model::container::ContainerId;
use log::debug;

/// Entry point for user-typed percentages.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualOverrideGate;

impl ManualOverrideGate {
    pub fn new() -> Self {
        Self
    }

    /// Parses `raw_input` and stores it as `key`'s share in `container`.
    ///
    /// Returns the value actually stored. Fails only when the container or
    /// key is not part of the session state.
    pub fn set_percentage(
        &self,
        state: &mut AllocationState,
        container: ContainerId,
        key: BeneficiaryKey,
        raw_input: &str,
    ) -> AllocationResult<Percentage> {
        let value = Percentage::parse_lenient(raw_input);
        state.set_one(container, key, value)?;
        debug!(
            "event=manual_override module=allocation status=ok container={} key={} value={}",
            container, key, value
        );
        Ok(value)
    }
}
