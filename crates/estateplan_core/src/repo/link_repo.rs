//! Link store contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist `(container, beneficiary) -> percentage` links.
//! - Offer an all-or-nothing batch write for multi-link redistributions.
//!
//! # Invariants
//! - At most one link exists per `(container, beneficiary)` pair.
//! - `list_links` returns links in creation order; that order drives the
//!   equal split remainder assignment.
//! - A failed `apply_batch` on the SQLite store leaves no partial writes.

use crate::db::{ensure_schema_ready, DbError};
use crate::model::allocation::{
    AllocationLink, AllocationType, LinkId, Percentage, FULL_BASIS_POINTS,
};
use crate::model::beneficiary::BeneficiaryId;
use crate::model::container::{ContainerId, ContainerKind};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const LINK_TABLE: &str = "allocation_links";

const LINK_SELECT_SQL: &str = "SELECT
    link_uuid,
    container_kind,
    container_uuid,
    beneficiary_uuid,
    allocation_bps,
    allocation_type
FROM allocation_links";

pub type StoreResult<T> = Result<T, StoreError>;

/// Link store failures.
#[derive(Debug)]
pub enum StoreError {
    /// SQLite/bootstrap failure.
    Db(DbError),
    /// No link exists for the pair.
    LinkNotFound {
        container: ContainerId,
        beneficiary: BeneficiaryId,
    },
    /// A link already exists for the pair.
    DuplicateLink {
        container: ContainerId,
        beneficiary: BeneficiaryId,
    },
    /// Persisted row cannot be converted to a valid link.
    InvalidData(String),
    /// Adapter-level failure of a remote store.
    Unavailable(String),
    /// The store cannot apply writes atomically.
    BatchUnsupported,
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::LinkNotFound {
                container,
                beneficiary,
            } => write!(f, "no link between {container} and beneficiary {beneficiary}"),
            Self::DuplicateLink {
                container,
                beneficiary,
            } => write!(
                f,
                "beneficiary {beneficiary} is already linked to {container}"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted link data: {message}"),
            Self::Unavailable(message) => write!(f, "link store unavailable: {message}"),
            Self::BatchUnsupported => write!(f, "link store does not support atomic batches"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// One write inside a redistribution plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkWrite {
    Create {
        beneficiary: BeneficiaryId,
        percentage: Percentage,
        allocation_type: AllocationType,
    },
    Update {
        beneficiary: BeneficiaryId,
        percentage: Percentage,
        allocation_type: AllocationType,
    },
    Delete {
        beneficiary: BeneficiaryId,
    },
}

impl LinkWrite {
    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Persistence contract for allocation links.
///
/// Implementations may be local (SQLite) or remote document stores. Calls are
/// blocking and issued one at a time by the caller.
pub trait LinkStore {
    /// Creates one link and returns its id.
    fn create_link(
        &self,
        container: ContainerId,
        beneficiary: BeneficiaryId,
        percentage: Percentage,
        allocation_type: AllocationType,
    ) -> StoreResult<LinkId>;
    /// Overwrites the percentage and derivation of an existing link.
    fn update_link(
        &self,
        container: ContainerId,
        beneficiary: BeneficiaryId,
        percentage: Percentage,
        allocation_type: AllocationType,
    ) -> StoreResult<()>;
    /// Removes one link.
    fn delete_link(&self, container: ContainerId, beneficiary: BeneficiaryId) -> StoreResult<()>;
    /// Lists a container's links in creation order.
    fn list_links(&self, container: ContainerId) -> StoreResult<Vec<AllocationLink>>;
    /// Lists every container a beneficiary is linked to.
    fn list_containers_for(&self, beneficiary: BeneficiaryId) -> StoreResult<Vec<ContainerId>>;
    /// Removes every link of a container and returns how many were removed.
    fn delete_all_links(&self, container: ContainerId) -> StoreResult<usize>;

    /// Whether [`LinkStore::apply_batch`] is all-or-nothing for this store.
    fn supports_atomic_batch(&self) -> bool {
        false
    }

    /// Applies `writes` in order as one unit and returns ids of created links.
    fn apply_batch(
        &self,
        _container: ContainerId,
        _writes: &[LinkWrite],
    ) -> StoreResult<Vec<LinkId>> {
        Err(StoreError::BatchUnsupported)
    }
}

impl<S: LinkStore + ?Sized> LinkStore for &S {
    fn create_link(
        &self,
        container: ContainerId,
        beneficiary: BeneficiaryId,
        percentage: Percentage,
        allocation_type: AllocationType,
    ) -> StoreResult<LinkId> {
        (**self).create_link(container, beneficiary, percentage, allocation_type)
    }

    fn update_link(
        &self,
        container: ContainerId,
        beneficiary: BeneficiaryId,
        percentage: Percentage,
        allocation_type: AllocationType,
    ) -> StoreResult<()> {
        (**self).update_link(container, beneficiary, percentage, allocation_type)
    }

    fn delete_link(&self, container: ContainerId, beneficiary: BeneficiaryId) -> StoreResult<()> {
        (**self).delete_link(container, beneficiary)
    }

    fn list_links(&self, container: ContainerId) -> StoreResult<Vec<AllocationLink>> {
        (**self).list_links(container)
    }

    fn list_containers_for(&self, beneficiary: BeneficiaryId) -> StoreResult<Vec<ContainerId>> {
        (**self).list_containers_for(beneficiary)
    }

    fn delete_all_links(&self, container: ContainerId) -> StoreResult<usize> {
        (**self).delete_all_links(container)
    }

    fn supports_atomic_batch(&self) -> bool {
        (**self).supports_atomic_batch()
    }

    fn apply_batch(
        &self,
        container: ContainerId,
        writes: &[LinkWrite],
    ) -> StoreResult<Vec<LinkId>> {
        (**self).apply_batch(container, writes)
    }
}

/// SQLite-backed link store.
pub struct SqliteLinkStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteLinkStore<'conn> {
    /// Creates a store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_schema_ready(conn, &[LINK_TABLE])?;
        Ok(Self { conn })
    }
}

impl LinkStore for SqliteLinkStore<'_> {
    fn create_link(
        &self,
        container: ContainerId,
        beneficiary: BeneficiaryId,
        percentage: Percentage,
        allocation_type: AllocationType,
    ) -> StoreResult<LinkId> {
        insert_link(self.conn, container, beneficiary, percentage, allocation_type)
    }

    fn update_link(
        &self,
        container: ContainerId,
        beneficiary: BeneficiaryId,
        percentage: Percentage,
        allocation_type: AllocationType,
    ) -> StoreResult<()> {
        update_link_row(self.conn, container, beneficiary, percentage, allocation_type)
    }

    fn delete_link(&self, container: ContainerId, beneficiary: BeneficiaryId) -> StoreResult<()> {
        delete_link_row(self.conn, container, beneficiary)
    }

    fn list_links(&self, container: ContainerId) -> StoreResult<Vec<AllocationLink>> {
        let mut stmt = self.conn.prepare(&format!(
            "{LINK_SELECT_SQL}
             WHERE container_kind = ?1
               AND container_uuid = ?2
             ORDER BY link_order ASC, link_uuid ASC;"
        ))?;
        let mut rows = stmt.query(params![
            container.kind.as_str(),
            container.uuid.to_string()
        ])?;

        let mut links = Vec::new();
        while let Some(row) = rows.next()? {
            links.push(parse_link_row(row)?);
        }
        Ok(links)
    }

    fn list_containers_for(&self, beneficiary: BeneficiaryId) -> StoreResult<Vec<ContainerId>> {
        let mut stmt = self.conn.prepare(
            "SELECT container_kind, container_uuid
             FROM allocation_links
             WHERE beneficiary_uuid = ?1
             ORDER BY container_kind ASC, container_uuid ASC;",
        )?;
        let mut rows = stmt.query([beneficiary.to_string()])?;

        let mut containers = Vec::new();
        while let Some(row) = rows.next()? {
            let kind_text: String = row.get(0)?;
            let uuid_text: String = row.get(1)?;
            containers.push(parse_container(&kind_text, &uuid_text)?);
        }
        Ok(containers)
    }

    fn delete_all_links(&self, container: ContainerId) -> StoreResult<usize> {
        let removed = self.conn.execute(
            "DELETE FROM allocation_links
             WHERE container_kind = ?1
               AND container_uuid = ?2;",
            params![container.kind.as_str(), container.uuid.to_string()],
        )?;
        Ok(removed)
    }

    fn supports_atomic_batch(&self) -> bool {
        true
    }

    fn apply_batch(
        &self,
        container: ContainerId,
        writes: &[LinkWrite],
    ) -> StoreResult<Vec<LinkId>> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut created = Vec::new();

        for write in writes {
            match *write {
                LinkWrite::Create {
                    beneficiary,
                    percentage,
                    allocation_type,
                } => {
                    created.push(insert_link(
                        &tx,
                        container,
                        beneficiary,
                        percentage,
                        allocation_type,
                    )?);
                }
                LinkWrite::Update {
                    beneficiary,
                    percentage,
                    allocation_type,
                } => update_link_row(&tx, container, beneficiary, percentage, allocation_type)?,
                LinkWrite::Delete { beneficiary } => delete_link_row(&tx, container, beneficiary)?,
            }
        }

        tx.commit()?;
        debug!(
            "event=link_batch module=repo status=ok container={} writes={}",
            container,
            writes.len()
        );
        Ok(created)
    }
}

fn insert_link(
    conn: &Connection,
    container: ContainerId,
    beneficiary: BeneficiaryId,
    percentage: Percentage,
    allocation_type: AllocationType,
) -> StoreResult<LinkId> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT link_uuid
             FROM allocation_links
             WHERE container_kind = ?1
               AND container_uuid = ?2
               AND beneficiary_uuid = ?3;",
            params![
                container.kind.as_str(),
                container.uuid.to_string(),
                beneficiary.to_string()
            ],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Err(StoreError::DuplicateLink {
            container,
            beneficiary,
        });
    }

    let link_order: i64 = conn.query_row(
        "SELECT COALESCE(MAX(link_order), -1) + 1
         FROM allocation_links
         WHERE container_kind = ?1
           AND container_uuid = ?2;",
        params![container.kind.as_str(), container.uuid.to_string()],
        |row| row.get(0),
    )?;

    let link_id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO allocation_links (
            link_uuid,
            container_kind,
            container_uuid,
            beneficiary_uuid,
            allocation_bps,
            allocation_type,
            link_order
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
        params![
            link_id.to_string(),
            container.kind.as_str(),
            container.uuid.to_string(),
            beneficiary.to_string(),
            i64::from(percentage.basis_points()),
            allocation_type.as_str(),
            link_order,
        ],
    )?;

    Ok(link_id)
}

fn update_link_row(
    conn: &Connection,
    container: ContainerId,
    beneficiary: BeneficiaryId,
    percentage: Percentage,
    allocation_type: AllocationType,
) -> StoreResult<()> {
    let changed = conn.execute(
        "UPDATE allocation_links
         SET
            allocation_bps = ?4,
            allocation_type = ?5,
            updated_at = (strftime('%s', 'now') * 1000)
         WHERE container_kind = ?1
           AND container_uuid = ?2
           AND beneficiary_uuid = ?3;",
        params![
            container.kind.as_str(),
            container.uuid.to_string(),
            beneficiary.to_string(),
            i64::from(percentage.basis_points()),
            allocation_type.as_str(),
        ],
    )?;

    if changed == 0 {
        return Err(StoreError::LinkNotFound {
            container,
            beneficiary,
        });
    }
    Ok(())
}

fn delete_link_row(
    conn: &Connection,
    container: ContainerId,
    beneficiary: BeneficiaryId,
) -> StoreResult<()> {
    let changed = conn.execute(
        "DELETE FROM allocation_links
         WHERE container_kind = ?1
           AND container_uuid = ?2
           AND beneficiary_uuid = ?3;",
        params![
            container.kind.as_str(),
            container.uuid.to_string(),
            beneficiary.to_string()
        ],
    )?;

    if changed == 0 {
        return Err(StoreError::LinkNotFound {
            container,
            beneficiary,
        });
    }
    Ok(())
}

fn parse_link_row(row: &Row<'_>) -> StoreResult<AllocationLink> {
    let link_text: String = row.get("link_uuid")?;
    let kind_text: String = row.get("container_kind")?;
    let container_text: String = row.get("container_uuid")?;
    let beneficiary_text: String = row.get("beneficiary_uuid")?;

    let basis_points = row.get::<_, i64>("allocation_bps")?;
    let percentage = u32::try_from(basis_points)
        .ok()
        .filter(|value| *value <= FULL_BASIS_POINTS)
        .map(Percentage::from_basis_points)
        .ok_or_else(|| {
            StoreError::InvalidData(format!(
                "invalid allocation `{basis_points}` in allocation_links.allocation_bps"
            ))
        })?;

    let type_text: String = row.get("allocation_type")?;
    let allocation_type = AllocationType::parse(&type_text).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid allocation type `{type_text}` in allocation_links.allocation_type"
        ))
    })?;

    Ok(AllocationLink {
        link_id: parse_uuid(&link_text, "allocation_links.link_uuid")?,
        container: parse_container(&kind_text, &container_text)?,
        beneficiary: parse_uuid(&beneficiary_text, "allocation_links.beneficiary_uuid")?,
        percentage,
        allocation_type,
    })
}

fn parse_container(kind_text: &str, uuid_text: &str) -> StoreResult<ContainerId> {
    let kind = ContainerKind::parse(kind_text).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid container kind `{kind_text}` in allocation_links.container_kind"
        ))
    })?;
    Ok(ContainerId::new(
        kind,
        parse_uuid(uuid_text, "allocation_links.container_uuid")?,
    ))
}

fn parse_uuid(value: &str, column: &'static str) -> StoreResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| StoreError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}
