//! SQLite storage bootstrap, schema migration and entity table DDL.
//!
//! # Responsibility
//! - Open and configure SQLite connections for a record stack.
//! - Apply framework migrations in deterministic order.
//! - Create and verify per-entity tables on registration.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Entity tables are only created through `schema::register_entity`.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;
pub mod schema;

pub use open::{connect, open_store, StoreTarget};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// The store already holds an entity table with a different shape.
    EntitySchemaMismatch {
        entity: String,
        stored: String,
        declared: String,
    },
    /// The store registered the same table under a name that differs only in case.
    EntityNameCollision { entity: String, stored: String },
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
            Self::EntitySchemaMismatch {
                entity,
                stored,
                declared,
            } => write!(
                f,
                "entity `{entity}` is stored as {stored} but declared as {declared}"
            ),
            Self::EntityNameCollision { entity, stored } => write!(
                f,
                "entity `{entity}` collides with stored entity `{stored}`; table names ignore case"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
            Self::EntitySchemaMismatch { .. } | Self::EntityNameCollision { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
