//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file stores and named shared-cache memory stores.
//! - Configure connection pragmas required by context behavior.
//! - Trigger framework migrations before a store is handed to a stack.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON` and a busy timeout.
//! - File stores run in WAL mode so readers never block a writing context.
//! - Every connection of one shared in-memory store uses the same URI.

use super::migrations::apply_migrations;
use super::{DbError, DbResult};
use log::{error, info};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Physical location of a store, resolved once per stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    File(PathBuf),
    /// Named shared-cache in-memory database; lives while one connection is open.
    SharedMemory { uri: String },
}

impl StoreTarget {
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self::File(path.as_ref().to_path_buf())
    }

    /// Returns a fresh in-memory target that no other stack can reach.
    pub fn unique_memory() -> Self {
        Self::SharedMemory {
            uri: format!(
                "file:vinyl-{}?mode=memory&cache=shared",
                Uuid::new_v4().simple()
            ),
        }
    }

    fn mode(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::SharedMemory { .. } => "memory",
        }
    }

    fn open_raw(&self) -> rusqlite::Result<Connection> {
        match self {
            Self::File(path) => Connection::open(path),
            Self::SharedMemory { uri } => Connection::open_with_flags(
                uri,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            ),
        }
    }
}

/// Opens the store behind `target` and applies all pending migrations.
///
/// Used once per stack, for the connection that keeps the store alive.
pub fn open_store(target: &StoreTarget, busy_timeout: Duration) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!(
        "event=db_open module=db status=start mode={} migrate=true",
        target.mode()
    );

    let opened = target
        .open_raw()
        .map_err(DbError::from)
        .and_then(|mut conn| {
            configure_connection(&conn, matches!(target, StoreTarget::File(_)), busy_timeout)?;
            apply_migrations(&mut conn)?;
            Ok(conn)
        });
    log_open_outcome(target.mode(), started_at, opened)
}

/// Opens an additional connection to an already migrated store.
///
/// Each execution context owns one of these.
pub fn connect(target: &StoreTarget, busy_timeout: Duration) -> DbResult<Connection> {
    let started_at = Instant::now();
    let opened = target.open_raw().map_err(DbError::from).and_then(|conn| {
        configure_connection(&conn, matches!(target, StoreTarget::File(_)), busy_timeout)?;
        Ok(conn)
    });

    match opened {
        Ok(conn) => Ok(conn),
        Err(err) => {
            error!(
                "event=db_connect module=db status=error mode={} duration_ms={} error={}",
                target.mode(),
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn configure_connection(conn: &Connection, wal: bool, busy_timeout: Duration) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(busy_timeout)?;
    if wal {
        let _mode: String =
            conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    }
    Ok(())
}

fn log_open_outcome(
    mode: &str,
    started_at: Instant,
    opened: DbResult<Connection>,
) -> DbResult<Connection> {
    match opened {
        Ok(conn) => {
            info!(
                "event=db_open module=db status=ok mode={} duration_ms={}",
                mode,
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_bootstrap_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}
