//! Import scope on a context and the session handle given to import work.
//!
//! # Responsibility
//! - Install a fresh import state for the duration of one unit of work.
//! - Populate the cache from the store or from caller-supplied objects.
//! - Route repository primary-key lookups through the active cache.
//!
//! # Invariants
//! - The previous import state is restored on return, error and unwind.
//! - A session only acts while its own import is the active one.

use super::{CacheLookup, ImportError, ImportId, ImportResult, ImportState, ImportStats};
use crate::context::{Context, Managed};
use crate::model::entity::Entity;
use crate::model::value::KeyValue;
use crate::repo::record_repo::{
    primary_key_attribute, RecordError, RecordRepository, SqliteRecordRepository,
};
use log::{debug, error, info, warn};
use rusqlite::types::Value;

impl Context {
    /// Runs `work` inside a new import operation on this context.
    ///
    /// The cache starts empty. Whatever `work` left uncommitted stays in the
    /// context; call `save` or `rollback` afterwards.
    pub fn perform_import<R, E>(
        &self,
        work: impl FnOnce(&ImportSession<'_>) -> Result<R, E>,
    ) -> Result<R, E> {
        let raw_id = self.next_import_id.get();
        self.next_import_id.set(raw_id + 1);
        let state = ImportState::new(raw_id);
        let id = state.id;
        let previous = self.import.borrow_mut().replace(state);

        info!(
            "event=import_begin module=import status=start context_id={} import_id={} nested={}",
            self.id(),
            id,
            previous.is_some()
        );

        let mut scope = ImportScope {
            context: self,
            previous,
            outcome: Outcome::Panicked,
        };
        let session = ImportSession { context: self, id };
        let result = work(&session);
        scope.outcome = if result.is_ok() {
            Outcome::Ok
        } else {
            Outcome::Error
        };
        drop(scope);
        result
    }

    /// Identifier of the import currently running on this context.
    pub fn current_import(&self) -> Option<ImportId> {
        self.import.borrow().as_ref().map(|state| state.id)
    }

    pub(crate) fn import_lookup<T: Entity>(&self, key: &KeyValue) -> CacheLookup<T> {
        match self.import.borrow_mut().as_mut() {
            Some(state) => state.cache.lookup::<T>(key),
            None => CacheLookup::Disengaged,
        }
    }

    /// Caches an object the repository just created after a cache miss.
    pub(crate) fn import_remember<T: Entity>(&self, key: KeyValue, object: Managed<T>) {
        if let Some(state) = self.import.borrow_mut().as_mut() {
            state.cache.insert(key, object);
            state.cache.record_created();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Ok,
    Error,
    Panicked,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Panicked => "panicked",
        }
    }
}

struct ImportScope<'ctx> {
    context: &'ctx Context,
    previous: Option<ImportState>,
    outcome: Outcome,
}

impl Drop for ImportScope<'_> {
    fn drop(&mut self) {
        let finished = self.context.import.replace(self.previous.take());
        let Some(finished) = finished else {
            return;
        };

        let stats = finished.cache.stats();
        let duration_ms = finished.started_at.elapsed().as_millis();
        match self.outcome {
            Outcome::Ok => info!(
                "event=import_end module=import status=ok context_id={} import_id={} hits={} misses={} created={} duration_ms={}",
                self.context.id(),
                finished.id,
                stats.hits,
                stats.misses,
                stats.created,
                duration_ms
            ),
            outcome => error!(
                "event=import_end module=import status={} context_id={} import_id={} hits={} misses={} created={} duration_ms={}",
                outcome.as_str(),
                self.context.id(),
                finished.id,
                stats.hits,
                stats.misses,
                stats.created,
                duration_ms
            ),
        }
    }
}

/// Handle to the active import, passed to the work of `perform_import`.
pub struct ImportSession<'ctx> {
    context: &'ctx Context,
    id: ImportId,
}

impl<'ctx> ImportSession<'ctx> {
    pub fn id(&self) -> ImportId {
        self.id
    }

    pub fn context(&self) -> &'ctx Context {
        self.context
    }

    /// Record helper on the session's context; it consults the same cache.
    pub fn repository<T: Entity>(&self) -> SqliteRecordRepository<'ctx, T> {
        self.context.repository::<T>()
    }

    /// Fetches every `T` and caches it by primary key.
    ///
    /// Returns the number of objects cached. After this call, lookups of `T`
    /// during this import never touch the store.
    pub fn cache_all_objects<T: Entity>(&self) -> ImportResult<usize> {
        self.ensure_cacheable::<T>()?;
        let objects = self.context.repository::<T>().all(&[])?;
        self.populate(&objects, "all")
    }

    /// Caches exactly `objects` for `T`.
    ///
    /// Keys absent from `objects` are treated as "does not exist" for the rest
    /// of the import, so an incomplete set produces duplicate inserts.
    pub fn cache_objects<T: Entity>(&self, objects: &[Managed<T>]) -> ImportResult<usize> {
        self.ensure_cacheable::<T>()?;
        self.context.ensure_registered::<T>()?;
        for object in objects {
            self.context.ensure_owned(object)?;
        }
        self.populate(objects, "explicit")
    }

    /// Find-or-create through the session's cache.
    pub fn object_with_primary_key<T: Entity>(
        &self,
        value: Value,
        create_new: bool,
    ) -> ImportResult<Option<Managed<T>>> {
        self.ensure_active()?;
        Ok(self
            .context
            .repository::<T>()
            .object_with_primary_key(value, create_new)?)
    }

    /// Whether lookups of `T` are answered by the cache.
    pub fn is_cached<T: Entity>(&self) -> bool {
        self.with_state(|state| state.cache.is_engaged::<T>())
            .unwrap_or(false)
    }

    /// Number of `T` objects in the cache.
    pub fn cached_count<T: Entity>(&self) -> usize {
        self.with_state(|state| state.cache.len::<T>()).unwrap_or(0)
    }

    pub fn stats(&self) -> ImportStats {
        self.with_state(|state| state.cache.stats())
            .unwrap_or_default()
    }

    pub(crate) fn ensure_active(&self) -> ImportResult<()> {
        match self.context.current_import() {
            Some(current) if current == self.id => Ok(()),
            _ => Err(ImportError::SessionNotActive(self.id)),
        }
    }

    fn ensure_cacheable<T: Entity>(&self) -> ImportResult<()> {
        self.ensure_active()?;
        if self.context.is_main() {
            warn!(
                "event=cache_populate module=import status=error context_id={} entity={} reason=main_context",
                self.context.id(),
                T::DESCRIPTOR.name
            );
            return Err(ImportError::MainContext {
                entity: T::DESCRIPTOR.name,
            });
        }
        primary_key_attribute::<T>()?;
        Ok(())
    }

    fn populate<T: Entity>(&self, objects: &[Managed<T>], source: &str) -> ImportResult<usize> {
        let mut keyed = Vec::with_capacity(objects.len());
        let mut skipped = 0usize;
        for object in objects {
            match object.primary_key().map_err(RecordError::from)? {
                Some(key) => keyed.push((key, object.clone())),
                None => {
                    skipped += 1;
                    warn!(
                        "event=cache_populate module=import status=skipped context_id={} entity={} object_id={} reason=null_primary_key",
                        self.context.id(),
                        T::DESCRIPTOR.name,
                        object.object_id()
                    );
                }
            }
        }

        let (cached, duplicates) = self.with_state(|state| {
            state.cache.engage::<T>();
            let mut cached = 0usize;
            let mut duplicates = 0usize;
            for (key, object) in keyed {
                if state.cache.insert(key, object) {
                    cached += 1;
                } else {
                    duplicates += 1;
                }
            }
            (cached, duplicates)
        })?;

        if duplicates > 0 {
            debug!(
                "event=cache_populate module=import status=duplicates context_id={} entity={} duplicates={}",
                self.context.id(),
                T::DESCRIPTOR.name,
                duplicates
            );
        }
        info!(
            "event=cache_populate module=import status=ok context_id={} import_id={} entity={} source={} cached={} skipped={}",
            self.context.id(),
            self.id,
            T::DESCRIPTOR.name,
            source,
            cached,
            skipped
        );
        Ok(cached)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ImportState) -> R) -> ImportResult<R> {
        match self.context.import.borrow_mut().as_mut() {
            Some(state) if state.id == self.id => Ok(f(state)),
            _ => Err(ImportError::SessionNotActive(self.id)),
        }
    }
}
