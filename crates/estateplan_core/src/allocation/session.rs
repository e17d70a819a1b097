//! Allocation use-case service driven by the host UI.
//!
//! # Responsibility
//! - Translate wizard/editor events into state recomputes, manual overrides,
//!   validation and store writes.
//! - Apply the configured commit timing: `immediate` writes through the
//!   coordinator as soon as the beneficiary set changes, `deferred` waits for
//!   an explicit `save`.
//!
//! # Invariants
//! - Input keys are normalized before they reach state: beneficiaries already
//!   linked come first in store link order, the rest follow in caller order.
//! - Drafts never reach the link store.
//! - `save` runs only on a valid allocation.

use crate::allocation::coordinator::{RedistributionCoordinator, RedistributionReport};
use crate::allocation::error::{AllocationError, AllocationResult};
use crate::allocation::override_gate::ManualOverrideGate;
use crate::allocation::state::{dedup_keys, AllocationState, InputsSignature, RecomputeOutcome};
use crate::allocation::validator::{AllocationValidator, ValidationError};
use crate::config::{AllocationConfig, CommitTiming, RemovalPolicy};
use crate::model::allocation::{AllocationLink, Percentage};
use crate::model::beneficiary::{BeneficiaryId, BeneficiaryKey, DraftId};
use crate::model::container::ContainerId;
use crate::repo::link_repo::LinkStore;
use log::{error, info};

/// Stateful facade over the allocation engine for one host session.
pub struct AllocationSession<S: LinkStore> {
    coordinator: RedistributionCoordinator<S>,
    gate: ManualOverrideGate,
    validator: AllocationValidator,
    commit_timing: CommitTiming,
    removal_policy: RemovalPolicy,
    state: AllocationState,
}

impl<S: LinkStore> AllocationSession<S> {
    pub fn new(store: S, config: &AllocationConfig) -> Self {
        Self::with_state(store, config, AllocationState::new())
    }

    /// Resumes a session from state kept by the caller between calls.
    pub fn with_state(store: S, config: &AllocationConfig, state: AllocationState) -> Self {
        Self {
            coordinator: RedistributionCoordinator::new(store, config),
            gate: ManualOverrideGate::new(),
            validator: AllocationValidator::from_config(config),
            commit_timing: config.commit_timing,
            removal_policy: config.removal_policy,
            state,
        }
    }

    pub fn into_state(self) -> AllocationState {
        self.state
    }

    pub fn state(&self) -> &AllocationState {
        &self.state
    }

    pub fn coordinator(&self) -> &RedistributionCoordinator<S> {
        &self.coordinator
    }

    pub fn allocation(&self, container: ContainerId) -> Vec<(BeneficiaryKey, Percentage)> {
        self.state.get(container)
    }

    pub fn needs_rebalance(&self, container: ContainerId) -> bool {
        self.state.needs_rebalance(container)
    }

    /// Populates a container's entry when the user opens it.
    ///
    /// Uses the stored shares when `keys` is exactly the linked set, and an
    /// equal split over the normalized order otherwise.
    pub fn on_container_selected(
        &mut self,
        container: ContainerId,
        keys: &[BeneficiaryKey],
    ) -> AllocationResult<Vec<(BeneficiaryKey, Percentage)>> {
        let links = self.list(container)?;
        let ordered = normalize_order(&links, keys);

        let stored: Vec<(BeneficiaryKey, Percentage)> = links
            .iter()
            .map(|link| (BeneficiaryKey::Persisted(link.beneficiary), link.percentage))
            .collect();
        let fully_linked = !stored.is_empty()
            && InputsSignature::of(stored.iter().map(|(key, _)| key))
                == InputsSignature::of(&ordered);

        if fully_linked {
            self.state.set_all(container, stored);
        } else {
            self.state.remove(container);
            self.state.on_allocation_inputs_changed(container, &ordered);
        }
        info!(
            "event=container_selected module=allocation status=ok container={} beneficiaries={} source={}",
            container,
            ordered.len(),
            if fully_linked { "store" } else { "equal_split" }
        );
        Ok(self.state.get(container))
    }

    /// Handles an added, removed or reordered beneficiary list.
    ///
    /// With immediate timing, persisted beneficiaries that left or joined the
    /// list are unlinked or linked right away. State is recomputed only when
    /// the set of keys changed.
    ///
    /// Under [`RemovalPolicy::KeepRemaining`], dropping linked beneficiaries
    /// (and nothing else) keeps the remaining shares instead of re-splitting,
    /// whatever the commit timing.
    pub fn on_beneficiary_set_changed(
        &mut self,
        container: ContainerId,
        keys: &[BeneficiaryKey],
    ) -> AllocationResult<RecomputeOutcome> {
        let Some(before) = self
            .state
            .entry(container)
            .map(|entry| entry.signature().clone())
        else {
            self.on_container_selected(container, keys)?;
            return Ok(RecomputeOutcome::Recomputed);
        };

        let keys = dedup_keys(keys);
        let mut links = self.list(container)?;
        let kept_entry = if self.keeps_remaining(&before, &keys, &links) {
            self.state.entry(container).cloned()
        } else {
            None
        };

        if self.commit_timing == CommitTiming::Immediate {
            let wanted: Vec<BeneficiaryId> =
                keys.iter().filter_map(BeneficiaryKey::persisted_id).collect();
            let removed: Vec<BeneficiaryId> = links
                .iter()
                .map(|link| link.beneficiary)
                .filter(|id| !wanted.contains(id))
                .collect();
            let added: Vec<BeneficiaryId> = wanted
                .iter()
                .copied()
                .filter(|id| !links.iter().any(|link| link.beneficiary == *id))
                .collect();

            for beneficiary in &removed {
                self.coordinator
                    .remove_beneficiary(&mut self.state, container, *beneficiary)?;
            }
            for beneficiary in &added {
                self.coordinator
                    .add_beneficiary(&mut self.state, container, *beneficiary)?;
            }
            if !removed.is_empty() || !added.is_empty() {
                links = self.list(container)?;
            }
        }

        let ordered = normalize_order(&links, &keys);
        if let Some(entry) = kept_entry {
            self.state.restore(container, entry);
            self.state.retain_keys(container, &ordered)?;
            info!(
                "event=beneficiaries_changed module=allocation status=ok container={} beneficiaries={} source=kept",
                container,
                ordered.len()
            );
            return Ok(RecomputeOutcome::Retained);
        }
        let outcome = self.state.on_allocation_inputs_changed(container, &ordered);
        if before == InputsSignature::of(&ordered) {
            return Ok(RecomputeOutcome::Unchanged);
        }
        Ok(match outcome {
            RecomputeOutcome::Unchanged => RecomputeOutcome::Recomputed,
            recomputed => recomputed,
        })
    }

    /// Stores a user-typed percentage for one beneficiary.
    ///
    /// With immediate timing the value is also written to the beneficiary's
    /// link, when one exists.
    pub fn on_manual_edit(
        &mut self,
        container: ContainerId,
        key: BeneficiaryKey,
        raw_input: &str,
    ) -> AllocationResult<Percentage> {
        let value = self
            .gate
            .set_percentage(&mut self.state, container, key, raw_input)?;

        if self.commit_timing == CommitTiming::Immediate {
            if let Some(beneficiary) = key.persisted_id() {
                let linked = self
                    .list(container)?
                    .iter()
                    .any(|link| link.beneficiary == beneficiary);
                if linked {
                    self.coordinator.update_share(container, beneficiary, value)?;
                }
            }
        }
        Ok(value)
    }

    /// Checks whether the wizard may move past this container.
    pub fn on_step_advance_requested(&self, container: ContainerId) -> Result<(), ValidationError> {
        let result = self.validator.validate(&self.state, container);
        if let Err(err) = &result {
            info!(
                "event=step_advance module=allocation status=blocked container={} reason={}",
                container,
                err.reason()
            );
        }
        result
    }

    /// Forgets a container's entry. Returns whether one existed.
    pub fn on_container_deselected(&mut self, container: ContainerId) -> bool {
        self.state.remove(container).is_some()
    }

    /// Re-keys a draft beneficiary once the host has saved it.
    ///
    /// Share and override flag carry over. The link itself is written on the
    /// next `save`.
    pub fn promote_draft(
        &mut self,
        container: ContainerId,
        draft: DraftId,
        persisted: BeneficiaryId,
    ) -> AllocationResult<()> {
        self.state.replace_key(container, draft, persisted)
    }

    /// Validates the container and writes its shares to the link store.
    pub fn save(&mut self, container: ContainerId) -> AllocationResult<RedistributionReport> {
        self.validator.validate(&self.state, container)?;
        self.coordinator.sync_container(&mut self.state, container)
    }

    /// Re-splits a container flagged after a partial redistribution.
    pub fn retry_rebalance(
        &mut self,
        container: ContainerId,
    ) -> AllocationResult<RedistributionReport> {
        self.coordinator.rebalance(&mut self.state, container)
    }

    /// Removes all links of a deleted asset or policy.
    pub fn delete_container(&mut self, container: ContainerId) -> AllocationResult<usize> {
        self.coordinator.delink_container(&mut self.state, container)
    }

    /// Unlinks a deleted beneficiary everywhere.
    pub fn delete_beneficiary(
        &mut self,
        beneficiary: BeneficiaryId,
    ) -> AllocationResult<Vec<RedistributionReport>> {
        self.coordinator.delink_beneficiary(&mut self.state, beneficiary)
    }

    /// Whether the change from `before` to `keys` only drops linked
    /// beneficiaries while the removal policy keeps the rest.
    fn keeps_remaining(
        &self,
        before: &InputsSignature,
        keys: &[BeneficiaryKey],
        links: &[AllocationLink],
    ) -> bool {
        let after = InputsSignature::of(keys);
        self.removal_policy == RemovalPolicy::KeepRemaining
            && after.is_removal_from(before)
            && before.missing_from(&after).all(|key| {
                key.persisted_id()
                    .is_some_and(|id| links.iter().any(|link| link.beneficiary == id))
            })
    }

    fn list(&self, container: ContainerId) -> AllocationResult<Vec<AllocationLink>> {
        self.coordinator.store().list_links(container).map_err(|err| {
            error!(
                "event=list_links module=allocation status=error container={} error={}",
                container, err
            );
            AllocationError::Store(err)
        })
    }
}

/// Orders `keys` as linked beneficiaries (store order) followed by the rest
/// (caller order). Duplicates are dropped.
pub fn normalize_order(links: &[AllocationLink], keys: &[BeneficiaryKey]) -> Vec<BeneficiaryKey> {
    let keys = dedup_keys(keys);
    let is_linked = |key: &BeneficiaryKey| {
        key.persisted_id()
            .is_some_and(|id| links.iter().any(|link| link.beneficiary == id))
    };

    let mut ordered: Vec<BeneficiaryKey> = links
        .iter()
        .map(|link| BeneficiaryKey::Persisted(link.beneficiary))
        .filter(|key| keys.contains(key))
        .collect();
    ordered.extend(keys.iter().copied().filter(|key| !is_linked(key)));
    ordered
}

#[cfg(test)]
mod tests {
    use super::normalize_order;
    use crate::model::allocation::{AllocationLink, AllocationType, Percentage};
    use crate::model::beneficiary::BeneficiaryKey;
    use crate::model::container::ContainerId;
    use uuid::Uuid;

    fn link(container: ContainerId, beneficiary: Uuid) -> AllocationLink {
        AllocationLink {
            link_id: Uuid::new_v4(),
            container,
            beneficiary,
            percentage: Percentage::from_basis_points(5000),
            allocation_type: AllocationType::EqualSplit,
        }
    }

    #[test]
    fn linked_keys_come_first_in_store_order() {
        let container = ContainerId::asset(Uuid::new_v4());
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let draft = BeneficiaryKey::new_draft();
        let links = vec![link(container, a), link(container, b)];

        let ordered = normalize_order(
            &links,
            &[
                draft,
                BeneficiaryKey::Persisted(c),
                BeneficiaryKey::Persisted(b),
                BeneficiaryKey::Persisted(a),
            ],
        );

        assert_eq!(
            ordered,
            vec![
                BeneficiaryKey::Persisted(a),
                BeneficiaryKey::Persisted(b),
                draft,
                BeneficiaryKey::Persisted(c),
            ]
        );
    }

    #[test]
    fn unlisted_links_are_left_out() {
        let container = ContainerId::policy(Uuid::new_v4());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let links = vec![link(container, a), link(container, b)];

        let keys = [BeneficiaryKey::Persisted(b), BeneficiaryKey::Persisted(b)];
        let ordered = normalize_order(&links, &keys);

        assert_eq!(ordered, vec![BeneficiaryKey::Persisted(b)]);
    }
}
