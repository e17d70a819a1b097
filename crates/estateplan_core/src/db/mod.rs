//! SQLite storage bootstrap and schema checks for the link store.
//!
//! # Responsibility
//! - Open and configure SQLite connections backing the link store.
//! - Apply schema migrations in deterministic order.
//! - Let store constructors verify a connection before using it.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Link data must not be read or written before migrations succeed.

use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Storage bootstrap errors.
#[derive(Debug)]
pub enum DbError {
    /// Underlying SQLite failure.
    Sqlite(rusqlite::Error),
    /// Database was written by a newer build.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// Connection was not opened through [`open_db`] / [`open_db_in_memory`].
    SchemaNotReady { expected: u32, actual: u32 },
    /// Migrated schema lacks a table the store relies on.
    MissingTable(&'static str),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::SchemaNotReady { expected, actual } => write!(
                f,
                "link store requires schema version {expected}, got {actual}"
            ),
            Self::MissingTable(table) => write!(f, "link store requires table `{table}`"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Verifies that `conn` is migrated to the latest version and has `tables`.
pub fn ensure_schema_ready(conn: &Connection, tables: &[&'static str]) -> DbResult<()> {
    let expected = migrations::latest_version();
    let actual = migrations::current_version(conn)?;
    if actual != expected {
        return Err(DbError::SchemaNotReady { expected, actual });
    }

    for table in tables {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(DbError::MissingTable(table));
        }
    }

    Ok(())
}
