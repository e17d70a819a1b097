//! Redistribution of persisted shares when a container's beneficiaries change.
//!
//! # Responsibility
//! - Turn add/remove/rebalance requests into ordered link store writes.
//! - Refresh session state from the shares that were written.
//!
//! # Invariants
//! - Existing links keep their store order; a newly linked beneficiary is
//!   appended last and therefore absorbs the equal split remainder.
//! - Writes of one run are issued one after another, never concurrently.
//! - In atomic mode (store permitting) a run writes everything or nothing.
//! - In sequential mode a failure after the first write is reported as
//!   `PartialRedistribution` and the container is flagged for rebalancing.

use crate::allocation::equal_split::equal_split;
use crate::allocation::error::{AllocationError, AllocationResult};
use crate::allocation::state::AllocationState;
use crate::config::{AllocationConfig, RemovalPolicy, WriteMode};
use crate::model::allocation::{AllocationLink, AllocationType, LinkId, Percentage};
use crate::model::beneficiary::{BeneficiaryId, BeneficiaryKey};
use crate::model::container::ContainerId;
use crate::repo::link_repo::{LinkStore, LinkWrite, StoreError};
use log::{error, info, warn};
use std::time::Instant;

/// Outcome of one successful redistribution run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedistributionReport {
    pub container: ContainerId,
    /// Shares now persisted, in link order.
    pub shares: Vec<(BeneficiaryId, Percentage)>,
    /// Links created by this run.
    pub created: Vec<LinkId>,
    /// Number of store writes issued.
    pub writes: usize,
    /// Whether the writes were applied as one atomic batch.
    pub atomic: bool,
}

/// Keeps the link store and session state consistent across set changes.
pub struct RedistributionCoordinator<S: LinkStore> {
    store: S,
    write_mode: WriteMode,
    removal_policy: RemovalPolicy,
}

impl<S: LinkStore> RedistributionCoordinator<S> {
    pub fn new(store: S, config: &AllocationConfig) -> Self {
        Self {
            store,
            write_mode: config.write_mode,
            removal_policy: config.removal_policy,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Links `beneficiary` to `container` and re-splits every share equally.
    ///
    /// Issues one `create` for the new link followed by one `update` per
    /// existing link whose share changed.
    pub fn add_beneficiary(
        &self,
        state: &mut AllocationState,
        container: ContainerId,
        beneficiary: BeneficiaryId,
    ) -> AllocationResult<RedistributionReport> {
        let links = self.list(container, "add")?;
        if links.iter().any(|link| link.beneficiary == beneficiary) {
            return Err(AllocationError::AlreadyLinked {
                container,
                beneficiary,
            });
        }

        let mut ordered: Vec<BeneficiaryId> = links.iter().map(|link| link.beneficiary).collect();
        ordered.push(beneficiary);
        let shares = equal_split(&ordered);

        let mut plan = Vec::with_capacity(shares.len());
        if let Some((_, share)) = shares.last() {
            plan.push(LinkWrite::Create {
                beneficiary,
                percentage: *share,
                allocation_type: AllocationType::EqualSplit,
            });
        }
        plan.extend(equal_split_updates(&links, &shares));

        self.execute(state, container, "add", plan, shares)
    }

    /// Unlinks `beneficiary` from `container`.
    ///
    /// With [`RemovalPolicy::Redistribute`] the remaining links are re-split
    /// equally; with [`RemovalPolicy::KeepRemaining`] they are left as stored.
    pub fn remove_beneficiary(
        &self,
        state: &mut AllocationState,
        container: ContainerId,
        beneficiary: BeneficiaryId,
    ) -> AllocationResult<RedistributionReport> {
        let links = self.list(container, "remove")?;
        if !links.iter().any(|link| link.beneficiary == beneficiary) {
            return Err(AllocationError::NotLinked {
                container,
                beneficiary,
            });
        }

        let remaining: Vec<AllocationLink> = links
            .into_iter()
            .filter(|link| link.beneficiary != beneficiary)
            .collect();

        let mut plan = vec![LinkWrite::Delete { beneficiary }];
        let shares = match self.removal_policy {
            RemovalPolicy::Redistribute => {
                let ordered: Vec<BeneficiaryId> =
                    remaining.iter().map(|link| link.beneficiary).collect();
                let shares = equal_split(&ordered);
                plan.extend(equal_split_updates(&remaining, &shares));
                shares
            }
            RemovalPolicy::KeepRemaining => stored_shares(&remaining),
        };

        self.execute(state, container, "remove", plan, shares)
    }

    /// Re-splits the current links equally, e.g. after a partial failure.
    pub fn rebalance(
        &self,
        state: &mut AllocationState,
        container: ContainerId,
    ) -> AllocationResult<RedistributionReport> {
        let links = self.list(container, "rebalance")?;
        let ordered: Vec<BeneficiaryId> = links.iter().map(|link| link.beneficiary).collect();
        let shares = equal_split(&ordered);
        let plan = equal_split_updates(&links, &shares);

        self.execute(state, container, "rebalance", plan, shares)
    }

    /// Writes an explicit share map to every existing link.
    ///
    /// Linked beneficiaries missing from `shares` get 0; entries for
    /// beneficiaries without a link are ignored.
    pub fn apply_shares(
        &self,
        state: &mut AllocationState,
        container: ContainerId,
        shares: &[(BeneficiaryId, Percentage)],
    ) -> AllocationResult<RedistributionReport> {
        let links = self.list(container, "apply")?;
        let mut plan = Vec::new();
        let mut applied = Vec::with_capacity(links.len());

        for link in &links {
            let target = shares
                .iter()
                .find(|(beneficiary, _)| *beneficiary == link.beneficiary)
                .map_or(Percentage::ZERO, |(_, share)| *share);
            if target != link.percentage || link.allocation_type != AllocationType::Percentage {
                plan.push(LinkWrite::Update {
                    beneficiary: link.beneficiary,
                    percentage: target,
                    allocation_type: AllocationType::Percentage,
                });
            }
            applied.push((link.beneficiary, target));
        }

        self.execute(state, container, "apply", plan, applied)
    }

    /// Writes one manually chosen share. Session state is not touched.
    pub fn update_share(
        &self,
        container: ContainerId,
        beneficiary: BeneficiaryId,
        percentage: Percentage,
    ) -> AllocationResult<()> {
        self.store
            .update_link(container, beneficiary, percentage, AllocationType::Percentage)
            .map_err(|source| store_failure(container, "update_share", source))
    }

    /// Reconciles the store with the container's session entry.
    ///
    /// Deletes links absent from the entry, updates changed shares and creates
    /// links for newly added beneficiaries (appended in entry order). Fails
    /// with `UnsavedDraft` while the entry still holds a draft key.
    ///
    /// Manually edited shares are written as `percentage`; unchanged shares
    /// keep their stored type.
    pub fn sync_container(
        &self,
        state: &mut AllocationState,
        container: ContainerId,
    ) -> AllocationResult<RedistributionReport> {
        let entry = state
            .entry(container)
            .ok_or(AllocationError::UnknownContainer(container))?;
        if let Some(key) = entry.first_draft() {
            return Err(AllocationError::UnsavedDraft { container, key });
        }

        let changed_type = if entry.has_overrides() {
            AllocationType::Percentage
        } else {
            AllocationType::EqualSplit
        };
        let targets: Vec<(BeneficiaryId, Percentage, bool)> = entry
            .shares()
            .iter()
            .filter_map(|(key, share)| {
                key.persisted_id()
                    .map(|id| (id, *share, entry.is_overridden(*key)))
            })
            .collect();

        let links = self.list(container, "sync")?;
        let mut plan = Vec::new();
        for link in &links {
            if !targets.iter().any(|(id, _, _)| *id == link.beneficiary) {
                plan.push(LinkWrite::Delete {
                    beneficiary: link.beneficiary,
                });
            }
        }
        for (beneficiary, share, overridden) in &targets {
            let link = links.iter().find(|link| link.beneficiary == *beneficiary);
            // An untouched share keeps the type it was stored with.
            let allocation_type = match link {
                _ if *overridden => AllocationType::Percentage,
                Some(link) if link.percentage == *share => link.allocation_type,
                _ => changed_type,
            };
            match link {
                Some(link)
                    if link.percentage == *share && link.allocation_type == allocation_type => {}
                Some(_) => plan.push(LinkWrite::Update {
                    beneficiary: *beneficiary,
                    percentage: *share,
                    allocation_type,
                }),
                None => plan.push(LinkWrite::Create {
                    beneficiary: *beneficiary,
                    percentage: *share,
                    allocation_type,
                }),
            }
        }
        let targets: Vec<(BeneficiaryId, Percentage)> = targets
            .into_iter()
            .map(|(id, share, _)| (id, share))
            .collect();

        // Persisted order: surviving links first, then new links in entry order.
        let mut shares: Vec<(BeneficiaryId, Percentage)> = links
            .iter()
            .filter_map(|link| {
                targets
                    .iter()
                    .find(|(id, _)| *id == link.beneficiary)
                    .copied()
            })
            .collect();
        shares.extend(
            targets
                .iter()
                .filter(|(id, _)| !links.iter().any(|link| link.beneficiary == *id))
                .copied(),
        );

        let overrides: Vec<BeneficiaryKey> = state
            .entry(container)
            .map(|entry| entry.keys().filter(|key| entry.is_overridden(*key)).collect())
            .unwrap_or_default();
        let report = self.execute(state, container, "sync", plan, shares)?;
        for key in overrides {
            let share = state.entry(container).and_then(|entry| entry.share_of(key));
            if let Some(share) = share {
                state.set_one(container, key, share)?;
            }
        }
        Ok(report)
    }

    /// Removes every link of a deleted asset or policy.
    pub fn delink_container(
        &self,
        state: &mut AllocationState,
        container: ContainerId,
    ) -> AllocationResult<usize> {
        let removed = self
            .store
            .delete_all_links(container)
            .map_err(|source| store_failure(container, "delink_container", source))?;
        state.remove(container);
        info!(
            "event=delink_container module=allocation status=ok container={} removed={}",
            container, removed
        );
        Ok(removed)
    }

    /// Unlinks a deleted beneficiary from every container.
    ///
    /// Each affected container is handled like [`Self::remove_beneficiary`].
    /// Stops at the first failing container; earlier containers stay updated.
    pub fn delink_beneficiary(
        &self,
        state: &mut AllocationState,
        beneficiary: BeneficiaryId,
    ) -> AllocationResult<Vec<RedistributionReport>> {
        let containers = self.store.list_containers_for(beneficiary).map_err(|source| {
            error!(
                "event=delink_beneficiary module=allocation status=error beneficiary={} error={}",
                beneficiary, source
            );
            AllocationError::Store(source)
        })?;

        containers
            .into_iter()
            .map(|container| self.remove_beneficiary(state, container, beneficiary))
            .collect()
    }

    fn list(
        &self,
        container: ContainerId,
        op: &'static str,
    ) -> AllocationResult<Vec<AllocationLink>> {
        self.store
            .list_links(container)
            .map_err(|source| store_failure(container, op, source))
    }

    fn execute(
        &self,
        state: &mut AllocationState,
        container: ContainerId,
        op: &'static str,
        plan: Vec<LinkWrite>,
        shares: Vec<(BeneficiaryId, Percentage)>,
    ) -> AllocationResult<RedistributionReport> {
        let started_at = Instant::now();
        let atomic = self.write_mode == WriteMode::Atomic && self.store.supports_atomic_batch();
        if self.write_mode == WriteMode::Atomic && !atomic && plan.len() > 1 {
            warn!(
                "event=redistribute module=allocation status=fallback op={} container={} reason=batch_unsupported",
                op, container
            );
        }

        let created = if plan.is_empty() {
            Vec::new()
        } else if atomic {
            self.store
                .apply_batch(container, &plan)
                .map_err(|source| store_failure(container, op, source))?
        } else {
            self.apply_sequential(state, container, op, &plan)?
        };

        state.set_all(
            container,
            shares
                .iter()
                .map(|(id, share)| (BeneficiaryKey::Persisted(*id), *share))
                .collect(),
        );
        info!(
            "event=redistribute module=allocation status=ok op={} container={} writes={} atomic={} duration_ms={}",
            op,
            container,
            plan.len(),
            atomic,
            started_at.elapsed().as_millis()
        );

        Ok(RedistributionReport {
            container,
            shares,
            created,
            writes: plan.len(),
            atomic,
        })
    }

    fn apply_sequential(
        &self,
        state: &mut AllocationState,
        container: ContainerId,
        op: &'static str,
        plan: &[LinkWrite],
    ) -> AllocationResult<Vec<LinkId>> {
        let mut created = Vec::new();
        for (index, write) in plan.iter().enumerate() {
            let result = match *write {
                LinkWrite::Create {
                    beneficiary,
                    percentage,
                    allocation_type,
                } => self
                    .store
                    .create_link(container, beneficiary, percentage, allocation_type)
                    .map(|link_id| created.push(link_id)),
                LinkWrite::Update {
                    beneficiary,
                    percentage,
                    allocation_type,
                } => self
                    .store
                    .update_link(container, beneficiary, percentage, allocation_type),
                LinkWrite::Delete { beneficiary } => self.store.delete_link(container, beneficiary),
            };

            let Err(source) = result else {
                continue;
            };
            if index == 0 {
                return Err(store_failure(container, op, source));
            }

            error!(
                "event=redistribute module=allocation status=partial op={} container={} applied={} planned={} failed_write={} error={}",
                op,
                container,
                index,
                plan.len(),
                write.label(),
                source
            );
            // Show what actually landed; keep the session view if even that fails.
            if let Ok(links) = self.store.list_links(container) {
                state.set_all(
                    container,
                    links
                        .iter()
                        .map(|link| (BeneficiaryKey::Persisted(link.beneficiary), link.percentage))
                        .collect(),
                );
            }
            state.mark_needs_rebalance(container);
            return Err(AllocationError::PartialRedistribution {
                container,
                applied: index,
                planned: plan.len(),
                source,
            });
        }
        Ok(created)
    }
}

/// Updates for existing links whose share differs from the equal split.
fn equal_split_updates(
    links: &[AllocationLink],
    shares: &[(BeneficiaryId, Percentage)],
) -> Vec<LinkWrite> {
    links
        .iter()
        .filter_map(|link| {
            let (_, share) = shares
                .iter()
                .find(|(beneficiary, _)| *beneficiary == link.beneficiary)?;
            (*share != link.percentage).then_some(LinkWrite::Update {
                beneficiary: link.beneficiary,
                percentage: *share,
                allocation_type: AllocationType::EqualSplit,
            })
        })
        .collect()
}

fn stored_shares(links: &[AllocationLink]) -> Vec<(BeneficiaryId, Percentage)> {
    links
        .iter()
        .map(|link| (link.beneficiary, link.percentage))
        .collect()
}

fn store_failure(container: ContainerId, op: &'static str, source: StoreError) -> AllocationError {
    error!(
        "event=redistribute module=allocation status=error op={} container={} error={}",
        op, container, source
    );
    AllocationError::Store(source)
}
