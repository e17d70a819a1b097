//! In-memory allocation state for containers under edit.
//!
//! # Responsibility
//! - Hold each edited container's ordered shares between store round trips.
//! - Decide when an automatic recompute is due via an explicit
//!   inputs-changed event.
//!
//! # Invariants
//! - A container entry never holds the same key twice.
//! - Recompute happens only when the *set* of keys changes; a pure reorder
//!   keeps every share (including manual overrides) and adopts the new order.
//! - Manual overrides are dropped whenever the entry is recomputed.

use crate::allocation::equal_split::equal_split;
use crate::allocation::error::{AllocationError, AllocationResult};
use crate::model::allocation::{total_basis_points, Percentage};
use crate::model::beneficiary::{BeneficiaryId, BeneficiaryKey, DraftId};
use crate::model::container::ContainerId;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Order-insensitive identity of a container's beneficiary set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputsSignature(BTreeSet<BeneficiaryKey>);

impl InputsSignature {
    pub fn of<'a>(keys: impl IntoIterator<Item = &'a BeneficiaryKey>) -> Self {
        Self(keys.into_iter().copied().collect())
    }

    /// Whether `self` lost keys relative to `before` and gained none.
    pub fn is_removal_from(&self, before: &Self) -> bool {
        self.0.len() < before.0.len() && self.0.is_subset(&before.0)
    }

    /// Keys of `self` missing from `other`.
    pub fn missing_from<'a>(
        &'a self,
        other: &'a Self,
    ) -> impl Iterator<Item = BeneficiaryKey> + 'a {
        self.0.difference(&other.0).copied()
    }
}

/// Result of an inputs-changed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputeOutcome {
    /// Beneficiary set changed; shares were re-split equally.
    Recomputed,
    /// Same set as before; existing shares were kept.
    Unchanged,
    /// Beneficiaries were removed; the remaining shares were kept.
    Retained,
}

/// Session entry for one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationEntry {
    shares: Vec<(BeneficiaryKey, Percentage)>,
    signature: InputsSignature,
    overrides: BTreeSet<BeneficiaryKey>,
    needs_rebalance: bool,
}

impl AllocationEntry {
    fn from_shares(shares: Vec<(BeneficiaryKey, Percentage)>) -> Self {
        let shares = dedup_shares(shares);
        Self {
            signature: InputsSignature::of(shares.iter().map(|(key, _)| key)),
            shares,
            overrides: BTreeSet::new(),
            needs_rebalance: false,
        }
    }

    /// Ordered `(key, share)` pairs.
    pub fn shares(&self) -> &[(BeneficiaryKey, Percentage)] {
        &self.shares
    }

    pub fn share_of(&self, key: BeneficiaryKey) -> Option<Percentage> {
        self.shares
            .iter()
            .find(|(current, _)| *current == key)
            .map(|(_, share)| *share)
    }

    pub fn keys(&self) -> impl Iterator<Item = BeneficiaryKey> + '_ {
        self.shares.iter().map(|(key, _)| *key)
    }

    pub fn signature(&self) -> &InputsSignature {
        &self.signature
    }

    pub fn is_overridden(&self, key: BeneficiaryKey) -> bool {
        self.overrides.contains(&key)
    }

    pub fn has_overrides(&self) -> bool {
        !self.overrides.is_empty()
    }

    pub fn first_draft(&self) -> Option<BeneficiaryKey> {
        self.keys().find(BeneficiaryKey::is_draft)
    }

    pub fn needs_rebalance(&self) -> bool {
        self.needs_rebalance
    }

    /// Exact total in basis points; may exceed 100% after manual edits.
    pub fn total_basis_points(&self) -> u64 {
        total_basis_points(self.shares.iter().map(|(_, share)| *share))
    }
}

/// Allocation entries for every container currently under edit.
#[derive(Debug, Clone, Default)]
pub struct AllocationState {
    entries: HashMap<ContainerId, AllocationEntry>,
}

impl AllocationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordered shares of `container`; empty when the container is not edited.
    pub fn get(&self, container: ContainerId) -> Vec<(BeneficiaryKey, Percentage)> {
        self.entries
            .get(&container)
            .map(|entry| entry.shares.clone())
            .unwrap_or_default()
    }

    pub fn entry(&self, container: ContainerId) -> Option<&AllocationEntry> {
        self.entries.get(&container)
    }

    pub fn contains(&self, container: ContainerId) -> bool {
        self.entries.contains_key(&container)
    }

    pub fn containers(&self) -> impl Iterator<Item = ContainerId> + '_ {
        self.entries.keys().copied()
    }

    /// Replaces a container's shares after a recompute or store refresh.
    ///
    /// Clears manual overrides and the rebalance indicator.
    pub fn set_all(&mut self, container: ContainerId, shares: Vec<(BeneficiaryKey, Percentage)>) {
        self.entries
            .insert(container, AllocationEntry::from_shares(shares));
    }

    /// Sets one beneficiary's share without touching any other key.
    pub fn set_one(
        &mut self,
        container: ContainerId,
        key: BeneficiaryKey,
        value: Percentage,
    ) -> AllocationResult<()> {
        let entry = self
            .entries
            .get_mut(&container)
            .ok_or(AllocationError::UnknownContainer(container))?;
        let slot = entry
            .shares
            .iter_mut()
            .find(|(current, _)| *current == key)
            .ok_or(AllocationError::UnknownBeneficiary { container, key })?;
        slot.1 = value;
        entry.overrides.insert(key);
        Ok(())
    }

    /// Drops a container's entry, e.g. when it is deselected.
    pub fn remove(&mut self, container: ContainerId) -> Option<AllocationEntry> {
        self.entries.remove(&container)
    }

    /// Signals that a container's beneficiary list changed.
    ///
    /// Recomputes an equal split over `ordered` when the set of keys differs
    /// from the stored signature (or no entry exists yet). Otherwise only the
    /// order is updated and every share is kept.
    pub fn on_allocation_inputs_changed(
        &mut self,
        container: ContainerId,
        ordered: &[BeneficiaryKey],
    ) -> RecomputeOutcome {
        let ordered = dedup_keys(ordered);
        let signature = InputsSignature::of(&ordered);

        if let Some(entry) = self.entries.get_mut(&container) {
            if entry.signature == signature {
                let mut reordered = Vec::with_capacity(ordered.len());
                for key in &ordered {
                    if let Some(share) = entry.share_of(*key) {
                        reordered.push((*key, share));
                    }
                }
                entry.shares = reordered;
                return RecomputeOutcome::Unchanged;
            }
        }

        self.set_all(container, equal_split(&ordered));
        RecomputeOutcome::Recomputed
    }

    /// Narrows a container's entry to `ordered` without recomputing.
    ///
    /// Every surviving key keeps its share and override flag; the entry
    /// adopts the order of `ordered`. Fails when `ordered` holds a key the
    /// entry does not have.
    pub fn retain_keys(
        &mut self,
        container: ContainerId,
        ordered: &[BeneficiaryKey],
    ) -> AllocationResult<()> {
        let entry = self
            .entries
            .get_mut(&container)
            .ok_or(AllocationError::UnknownContainer(container))?;
        let ordered = dedup_keys(ordered);
        let mut kept = Vec::with_capacity(ordered.len());
        for key in &ordered {
            let share = entry
                .share_of(*key)
                .ok_or(AllocationError::UnknownBeneficiary {
                    container,
                    key: *key,
                })?;
            kept.push((*key, share));
        }

        entry.signature = InputsSignature::of(&ordered);
        entry.overrides.retain(|key| ordered.contains(key));
        entry.shares = kept;
        Ok(())
    }

    /// Puts back an entry taken out with [`Self::entry`] and cloned.
    pub(crate) fn restore(&mut self, container: ContainerId, entry: AllocationEntry) {
        self.entries.insert(container, entry);
    }

    /// Swaps a draft key for its persisted key, keeping position, share and
    /// override flag.
    pub fn replace_key(
        &mut self,
        container: ContainerId,
        draft: DraftId,
        persisted: BeneficiaryId,
    ) -> AllocationResult<()> {
        let entry = self
            .entries
            .get_mut(&container)
            .ok_or(AllocationError::UnknownContainer(container))?;
        let old_key = BeneficiaryKey::Draft(draft);
        let new_key = BeneficiaryKey::Persisted(persisted);

        if entry.share_of(new_key).is_some() {
            return Err(AllocationError::KeyConflict {
                container,
                key: new_key,
            });
        }
        let slot = entry
            .shares
            .iter_mut()
            .find(|(current, _)| *current == old_key)
            .ok_or(AllocationError::UnknownBeneficiary {
                container,
                key: old_key,
            })?;
        slot.0 = new_key;

        entry.signature.0.remove(&old_key);
        entry.signature.0.insert(new_key);
        if entry.overrides.remove(&old_key) {
            entry.overrides.insert(new_key);
        }
        Ok(())
    }

    /// Flags a container whose persisted shares are known to be inconsistent.
    pub fn mark_needs_rebalance(&mut self, container: ContainerId) {
        self.entries.entry(container).or_default().needs_rebalance = true;
    }

    pub fn needs_rebalance(&self, container: ContainerId) -> bool {
        self.entries
            .get(&container)
            .is_some_and(AllocationEntry::needs_rebalance)
    }
}

/// Removes repeated keys, keeping the first occurrence.
pub(crate) fn dedup_keys(keys: &[BeneficiaryKey]) -> Vec<BeneficiaryKey> {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.iter().copied().filter(|key| seen.insert(*key)).collect()
}

fn dedup_shares(shares: Vec<(BeneficiaryKey, Percentage)>) -> Vec<(BeneficiaryKey, Percentage)> {
    let mut seen = HashSet::with_capacity(shares.len());
    shares
        .into_iter()
        .filter(|(key, _)| seen.insert(*key))
        .collect()
}
