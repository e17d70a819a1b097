use estateplan_core::db::open_db_in_memory;
use estateplan_core::{
    AllocationType, ContainerId, LinkStore, LinkWrite, Percentage, SqliteLinkStore, StoreError,
};
use uuid::Uuid;

fn pct(basis_points: u32) -> Percentage {
    Percentage::from_basis_points(basis_points)
}

#[test]
fn create_then_list_returns_links_in_creation_order() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteLinkStore::try_new(&conn).unwrap();
    let container = ContainerId::asset(Uuid::new_v4());
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let link_c = store
        .create_link(container, c, pct(2000), AllocationType::Percentage)
        .unwrap();
    store
        .create_link(container, a, pct(5000), AllocationType::EqualSplit)
        .unwrap();
    store
        .create_link(container, b, pct(3000), AllocationType::Percentage)
        .unwrap();

    let links = store.list_links(container).unwrap();
    let order: Vec<Uuid> = links.iter().map(|link| link.beneficiary).collect();
    assert_eq!(order, vec![c, a, b]);
    assert_eq!(links[0].link_id, link_c);
    assert_eq!(links[0].container, container);
    assert_eq!(links[1].percentage, pct(5000));
    assert_eq!(links[1].allocation_type, AllocationType::EqualSplit);
}

#[test]
fn asset_and_policy_with_same_uuid_are_separate_containers() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteLinkStore::try_new(&conn).unwrap();
    let uuid = Uuid::new_v4();
    let beneficiary = Uuid::new_v4();

    for container in [ContainerId::asset(uuid), ContainerId::policy(uuid)] {
        store
            .create_link(container, beneficiary, pct(10_000), AllocationType::EqualSplit)
            .unwrap();
    }

    assert_eq!(store.list_links(ContainerId::asset(uuid)).unwrap().len(), 1);
    assert_eq!(store.list_links(ContainerId::policy(uuid)).unwrap().len(), 1);
    assert_eq!(
        store.list_containers_for(beneficiary).unwrap(),
        vec![ContainerId::asset(uuid), ContainerId::policy(uuid)]
    );
}

#[test]
fn duplicate_link_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteLinkStore::try_new(&conn).unwrap();
    let container = ContainerId::policy(Uuid::new_v4());
    let beneficiary = Uuid::new_v4();

    store
        .create_link(container, beneficiary, pct(10_000), AllocationType::EqualSplit)
        .unwrap();
    let err = store
        .create_link(container, beneficiary, pct(5000), AllocationType::EqualSplit)
        .unwrap_err();

    assert!(matches!(err, StoreError::DuplicateLink { .. }));
}

#[test]
fn update_and_delete_report_missing_links() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteLinkStore::try_new(&conn).unwrap();
    let container = ContainerId::asset(Uuid::new_v4());
    let stranger = Uuid::new_v4();

    let err = store
        .update_link(container, stranger, pct(100), AllocationType::Percentage)
        .unwrap_err();
    assert!(matches!(err, StoreError::LinkNotFound { beneficiary, .. } if beneficiary == stranger));

    let err = store.delete_link(container, stranger).unwrap_err();
    assert!(matches!(err, StoreError::LinkNotFound { .. }));
}

#[test]
fn update_changes_share_and_type() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteLinkStore::try_new(&conn).unwrap();
    let container = ContainerId::asset(Uuid::new_v4());
    let beneficiary = Uuid::new_v4();
    store
        .create_link(container, beneficiary, pct(10_000), AllocationType::EqualSplit)
        .unwrap();

    store
        .update_link(container, beneficiary, pct(4250), AllocationType::Percentage)
        .unwrap();

    let link = &store.list_links(container).unwrap()[0];
    assert_eq!(link.percentage, pct(4250));
    assert_eq!(link.allocation_type, AllocationType::Percentage);
}

#[test]
fn delete_all_links_removes_only_that_container() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteLinkStore::try_new(&conn).unwrap();
    let doomed = ContainerId::asset(Uuid::new_v4());
    let kept = ContainerId::asset(Uuid::new_v4());
    for _ in 0..3 {
        store
            .create_link(doomed, Uuid::new_v4(), pct(3333), AllocationType::EqualSplit)
            .unwrap();
    }
    store
        .create_link(kept, Uuid::new_v4(), pct(10_000), AllocationType::EqualSplit)
        .unwrap();

    assert_eq!(store.delete_all_links(doomed).unwrap(), 3);
    assert!(store.list_links(doomed).unwrap().is_empty());
    assert_eq!(store.list_links(kept).unwrap().len(), 1);
}

#[test]
fn batch_applies_writes_in_order() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteLinkStore::try_new(&conn).unwrap();
    let container = ContainerId::policy(Uuid::new_v4());
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    store
        .create_link(container, a, pct(10_000), AllocationType::EqualSplit)
        .unwrap();

    assert!(store.supports_atomic_batch());
    let created = store
        .apply_batch(
            container,
            &[
                LinkWrite::Create {
                    beneficiary: b,
                    percentage: pct(5000),
                    allocation_type: AllocationType::EqualSplit,
                },
                LinkWrite::Update {
                    beneficiary: a,
                    percentage: pct(5000),
                    allocation_type: AllocationType::EqualSplit,
                },
            ],
        )
        .unwrap();

    assert_eq!(created.len(), 1);
    let links = store.list_links(container).unwrap();
    assert_eq!(links.len(), 2);
    assert!(links.iter().all(|link| link.percentage == pct(5000)));
    assert_eq!(links[1].link_id, created[0]);
}

#[test]
fn failed_batch_leaves_store_unchanged() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteLinkStore::try_new(&conn).unwrap();
    let container = ContainerId::asset(Uuid::new_v4());
    let (a, newcomer, missing) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    store
        .create_link(container, a, pct(10_000), AllocationType::EqualSplit)
        .unwrap();

    let err = store
        .apply_batch(
            container,
            &[
                LinkWrite::Create {
                    beneficiary: newcomer,
                    percentage: pct(5000),
                    allocation_type: AllocationType::EqualSplit,
                },
                LinkWrite::Update {
                    beneficiary: missing,
                    percentage: pct(5000),
                    allocation_type: AllocationType::EqualSplit,
                },
            ],
        )
        .unwrap_err();

    assert!(matches!(err, StoreError::LinkNotFound { beneficiary, .. } if beneficiary == missing));
    let links = store.list_links(container).unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].beneficiary, a);
    assert_eq!(links[0].percentage, pct(10_000));

    // Connection stays usable after the rollback.
    store
        .create_link(container, newcomer, pct(0), AllocationType::Percentage)
        .unwrap();
}
