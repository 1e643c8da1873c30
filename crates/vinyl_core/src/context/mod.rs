//! Execution contexts: transactional scope and thread affinity.
//!
//! # Responsibility
//! - Own one SQLite connection and the managed objects loaded through it.
//! - Keep pending changes in an open write transaction until `save`.
//! - Flush edited objects before every fetch so queries see in-context state.
//!
//! # Invariants
//! - A `Context` is `!Send`: it and its objects stay on the creating thread.
//! - The identity map holds at most one handle per (entity type, row).
//! - Nothing here commits implicitly; `save` is the only commit path.
//! - Entries leave the identity map only through `rollback`, `reset` or
//!   `release_clean`; a held `Managed` handle is never released.
//! - Persistence errors are returned as-is; no retry, no automatic rollback.

mod managed;
pub mod stack;

pub use managed::Managed;

use crate::db::schema::{insert_sql, select_sql, update_sql};
use crate::db::{connect, DbError};
use crate::import::ImportState;
use crate::model::entity::{Entity, OBJECT_ID_COLUMN};
use crate::model::value::AttributeError;
use crate::repo::record_repo::SqliteRecordRepository;
use log::{debug, error, info, warn};
use managed::{column_values, decode_row, RegisteredObject};
use rusqlite::{params_from_iter, Connection, Row};
use stack::Stack;
use std::any::TypeId;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

pub type ContextResult<T> = Result<T, ContextError>;

/// Store row id of a managed object. `Copy + Send`, so it may cross threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(i64);

impl ObjectId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for ContextId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a context is the stack's UI-bound main context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextRole {
    Main,
    Background,
}

impl ContextRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Background => "background",
        }
    }
}

/// Request counters; stand-in for fetch instrumentation of the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextStats {
    pub fetch_requests: u64,
    pub count_requests: u64,
    pub inserted_objects: u64,
    pub saves: u64,
}

#[derive(Debug)]
pub enum ContextError {
    Db(DbError),
    UnregisteredEntity(&'static str),
    ForeignObject {
        entity: &'static str,
        object_id: ObjectId,
        owner: ContextId,
        context: ContextId,
    },
    Attribute(AttributeError),
}

impl Display for ContextError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::UnregisteredEntity(entity) => {
                write!(f, "entity `{entity}` is not registered with this stack")
            }
            Self::ForeignObject {
                entity,
                object_id,
                owner,
                context,
            } => write!(
                f,
                "{entity} object {object_id} belongs to context {owner}, not context {context}"
            ),
            Self::Attribute(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ContextError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Attribute(err) => Some(err),
            Self::UnregisteredEntity(_) | Self::ForeignObject { .. } => None,
        }
    }
}

impl From<DbError> for ContextError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for ContextError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<AttributeError> for ContextError {
    fn from(value: AttributeError) -> Self {
        Self::Attribute(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ObjectKey {
    entity: TypeId,
    object_id: ObjectId,
}

impl ObjectKey {
    fn of<T: Entity>(object_id: ObjectId) -> Self {
        Self {
            entity: TypeId::of::<T>(),
            object_id,
        }
    }
}

/// Unit of transactional scope bound to one thread.
pub struct Context {
    id: ContextId,
    role: ContextRole,
    stack: Stack,
    conn: Connection,
    objects: RefCell<HashMap<ObjectKey, Box<dyn RegisteredObject>>>,
    inserted: RefCell<Vec<ObjectKey>>,
    flushed: RefCell<HashSet<ObjectKey>>,
    stats: Cell<ContextStats>,
    pub(crate) import: RefCell<Option<ImportState>>,
    pub(crate) next_import_id: Cell<u64>,
}

impl Context {
    pub(crate) fn new(id: ContextId, role: ContextRole, stack: Stack) -> ContextResult<Self> {
        let conn = connect(stack.target(), stack.busy_timeout())?;
        info!(
            "event=context_open module=context status=ok context_id={} role={}",
            id,
            role.as_str()
        );
        Ok(Self {
            id,
            role,
            stack,
            conn,
            objects: RefCell::new(HashMap::new()),
            inserted: RefCell::new(Vec::new()),
            flushed: RefCell::new(HashSet::new()),
            stats: Cell::new(ContextStats::default()),
            import: RefCell::new(None),
            next_import_id: Cell::new(1),
        })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn role(&self) -> ContextRole {
        self.role
    }

    pub fn is_main(&self) -> bool {
        self.role == ContextRole::Main
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    /// Record helper for entity type `T` bound to this context.
    pub fn repository<T: Entity>(&self) -> SqliteRecordRepository<'_, T> {
        SqliteRecordRepository::new(self)
    }

    pub fn stats(&self) -> ContextStats {
        self.stats.get()
    }

    /// Number of objects currently registered in the identity map.
    pub fn registered_objects(&self) -> usize {
        self.objects.borrow().len()
    }

    /// Whether `save` would write anything.
    pub fn has_changes(&self) -> bool {
        !self.conn.is_autocommit() || self.objects.borrow().values().any(|object| object.is_dirty())
    }

    /// Fails unless `object` was created or fetched by this context.
    pub fn ensure_owned<T: Entity>(&self, object: &Managed<T>) -> ContextResult<()> {
        if object.context_id() == self.id {
            return Ok(());
        }
        Err(ContextError::ForeignObject {
            entity: T::DESCRIPTOR.name,
            object_id: object.object_id(),
            owner: object.context_id(),
            context: self.id,
        })
    }

    /// Resolves a row id in this context, e.g. one handed over from another thread.
    pub fn existing_object<T: Entity>(&self, object_id: ObjectId) -> ContextResult<Option<Managed<T>>> {
        self.ensure_registered::<T>()?;
        if let Some(object) = self.lookup_registered::<T>(object_id) {
            return Ok(Some(object));
        }

        self.flush_pending()?;
        let sql = format!(
            "{} WHERE {} = ?1;",
            select_sql(&T::DESCRIPTOR),
            OBJECT_ID_COLUMN
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([object_id.get()])?;
        let found = match rows.next()? {
            Some(row) => Some(self.materialize::<T>(row)?),
            None => None,
        };
        self.bump(|stats| stats.fetch_requests += 1);
        Ok(found)
    }

    /// Flushes edits and commits the open transaction.
    ///
    /// On failure the transaction stays open; the caller decides whether to
    /// retry or `rollback`.
    pub fn save(&self) -> ContextResult<()> {
        let started_at = Instant::now();
        let result = self.flush_pending().and_then(|()| {
            if !self.conn.is_autocommit() {
                self.conn.execute_batch("COMMIT;")?;
            }
            Ok(())
        });

        match result {
            Ok(()) => {
                let inserted = self.inserted.borrow_mut().drain(..).count();
                self.flushed.borrow_mut().clear();
                self.bump(|stats| stats.saves += 1);
                info!(
                    "event=context_save module=context status=ok context_id={} inserted={} duration_ms={}",
                    self.id,
                    inserted,
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=context_save module=context status=error context_id={} duration_ms={} error={}",
                    self.id,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Discards pending changes.
    ///
    /// Objects inserted since the last save leave the identity map; edited
    /// objects are reloaded from the store. Handles to discarded inserts must
    /// not be used afterwards.
    pub fn rollback(&self) -> ContextResult<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK;")?;
        }

        let mut objects = self.objects.borrow_mut();
        let discarded = self.inserted.borrow_mut().drain(..).collect::<Vec<_>>();
        for key in &discarded {
            objects.remove(key);
        }

        let flushed = std::mem::take(&mut *self.flushed.borrow_mut());
        let mut vanished = Vec::new();
        for (key, object) in objects.iter() {
            let stale = object.is_dirty() || flushed.contains(key);
            if stale && !object.reload(&self.conn)? {
                vanished.push(*key);
            }
        }
        for key in &vanished {
            objects.remove(key);
        }

        info!(
            "event=context_rollback module=context status=ok context_id={} discarded={} vanished={}",
            self.id,
            discarded.len(),
            vanished.len()
        );
        Ok(())
    }

    /// Drops identity map entries nobody else holds.
    ///
    /// Only clean objects with no pending insert or flushed edit are released;
    /// a later fetch materializes them again. Returns the number released.
    pub fn release_clean(&self) -> usize {
        let inserted = self.inserted.borrow();
        let flushed = self.flushed.borrow();
        let mut objects = self.objects.borrow_mut();
        let before = objects.len();
        objects.retain(|key, object| {
            object.is_dirty()
                || object.is_shared()
                || flushed.contains(key)
                || inserted.contains(key)
        });
        let released = before - objects.len();

        if released > 0 {
            debug!(
                "event=context_release module=context status=ok context_id={} released={} kept={}",
                self.id,
                released,
                objects.len()
            );
        }
        released
    }

    /// Rolls back and forgets every registered object.
    pub fn reset(&self) -> ContextResult<()> {
        self.rollback()?;
        self.objects.borrow_mut().clear();
        debug!(
            "event=context_reset module=context status=ok context_id={}",
            self.id
        );
        Ok(())
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn ensure_registered<T: Entity>(&self) -> ContextResult<()> {
        match self.stack.registered_descriptor(T::DESCRIPTOR.name) {
            Some(descriptor) if descriptor == T::DESCRIPTOR => Ok(()),
            _ => Err(ContextError::UnregisteredEntity(T::DESCRIPTOR.name)),
        }
    }

    /// Inserts `state` as a new row inside the open write transaction.
    pub(crate) fn insert_object<T: Entity>(&self, state: T) -> ContextResult<Managed<T>> {
        self.ensure_registered::<T>()?;
        self.begin_write()?;

        self.conn.execute(
            &insert_sql(&T::DESCRIPTOR),
            params_from_iter(column_values(&state)),
        )?;
        let object_id = ObjectId(self.conn.last_insert_rowid());

        let object = Managed::new(object_id, self.id, state);
        let key = ObjectKey::of::<T>(object_id);
        self.objects
            .borrow_mut()
            .insert(key, Box::new(object.clone()));
        self.inserted.borrow_mut().push(key);
        self.bump(|stats| stats.inserted_objects += 1);

        debug!(
            "event=object_insert module=context status=ok context_id={} entity={} object_id={}",
            self.id,
            T::DESCRIPTOR.name,
            object_id
        );
        Ok(object)
    }

    /// Writes every dirty object into the open transaction.
    pub(crate) fn flush_pending(&self) -> ContextResult<()> {
        let objects = self.objects.borrow();
        let mut flushed = 0usize;
        for (key, object) in objects.iter().filter(|(_, object)| object.is_dirty()) {
            self.begin_write()?;
            let descriptor = object.descriptor();
            let mut values = object.column_values();
            values.push(rusqlite::types::Value::Integer(object.object_id().get()));
            self.conn
                .execute(&update_sql(&descriptor), params_from_iter(values))?;
            object.mark_clean();
            self.flushed.borrow_mut().insert(*key);
            flushed += 1;
        }

        if flushed > 0 {
            debug!(
                "event=context_flush module=context status=ok context_id={} objects={}",
                self.id, flushed
            );
        }
        Ok(())
    }

    /// Returns the registered handle for the row, creating it from `row` if new.
    ///
    /// `row` must come from `schema::select_sql` for `T`.
    pub(crate) fn materialize<T: Entity>(&self, row: &Row<'_>) -> ContextResult<Managed<T>> {
        let object_id = ObjectId(row.get(0)?);
        if let Some(object) = self.lookup_registered::<T>(object_id) {
            return Ok(object);
        }

        let object = Managed::new(object_id, self.id, decode_row::<T>(row)?);
        self.objects
            .borrow_mut()
            .insert(ObjectKey::of::<T>(object_id), Box::new(object.clone()));
        Ok(object)
    }

    pub(crate) fn record_fetch(&self) {
        self.bump(|stats| stats.fetch_requests += 1);
    }

    pub(crate) fn record_count(&self) {
        self.bump(|stats| stats.count_requests += 1);
    }

    fn lookup_registered<T: Entity>(&self, object_id: ObjectId) -> Option<Managed<T>> {
        self.objects
            .borrow()
            .get(&ObjectKey::of::<T>(object_id))
            .and_then(|object| object.as_any().downcast_ref::<Managed<T>>())
            .cloned()
    }

    fn begin_write(&self) -> ContextResult<()> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        }
        Ok(())
    }

    fn bump(&self, update: impl FnOnce(&mut ContextStats)) {
        let mut stats = self.stats.get();
        update(&mut stats);
        self.stats.set(stats);
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if !self.conn.is_autocommit() {
            warn!(
                "event=context_close module=context status=discarded context_id={} reason=unsaved_changes",
                self.id
            );
        }
        if self.role == ContextRole::Main {
            self.stack.release_main();
        }
    }
}
