//! Store-level schema: the tables vinyl itself owns, versioned by `user_version`.
//!
//! # Responsibility
//! - Bring a fresh or older store up to the registry layout this build expects.
//! - Refuse stores written by a newer build.
//!
//! # Invariants
//! - Steps run in ascending version order inside one transaction; a failing
//!   step leaves the store at its previous version.
//! - `PRAGMA user_version` equals the last applied step.
//! - Entity tables are never created here; `schema::register_entity` owns them.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "entity_registry",
        sql: include_str!("0001_entity_registry.sql"),
    },
    Migration {
        version: 2,
        name: "entity_names_nocase",
        sql: include_str!("0002_entity_names_nocase.sql"),
    },
];

/// Registry layout version written by this build.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Applies every step newer than the store's `user_version`.
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the store is ahead of this build.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let stored = stored_version(conn)?;
    let latest = latest_version();
    if stored > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: stored,
            latest_supported: latest,
        });
    }

    let pending = MIGRATIONS
        .iter()
        .filter(|migration| migration.version > stored)
        .collect::<Vec<_>>();
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in &pending {
        tx.execute_batch(migration.sql)?;
        tx.pragma_update(None, "user_version", migration.version)?;
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from={} to={} steps={}",
        stored,
        latest,
        pending
            .iter()
            .map(|migration| migration.name)
            .collect::<Vec<_>>()
            .join(",")
    );
    Ok(())
}

fn stored_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get::<_, u32>(0))?)
}

#[cfg(test)]
mod tests {
    use super::{apply_migrations, latest_version, MIGRATIONS};
    use rusqlite::Connection;

    #[test]
    fn versions_are_strictly_increasing() {
        let versions = MIGRATIONS
            .iter()
            .map(|migration| migration.version)
            .collect::<Vec<_>>();
        assert!(versions.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(versions.first(), Some(&1));
    }

    #[test]
    fn upgrades_a_version_one_registry_in_place() {
        let mut conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(MIGRATIONS[0].sql).expect("v1 layout");
        conn.execute_batch(
            "PRAGMA user_version = 1;
             INSERT INTO vinyl_entities (name, primary_key, signature) VALUES ('Person', 'remote_id', '{}');",
        )
        .expect("seed v1 row");

        apply_migrations(&mut conn).expect("upgrade");

        let version: u32 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .expect("version");
        assert_eq!(version, latest_version());
        let name: String = conn
            .query_row(
                "SELECT name FROM vinyl_entities WHERE name = 'PERSON';",
                [],
                |row| row.get(0),
            )
            .expect("row kept and matched without case");
        assert_eq!(name, "Person");
    }
}
