//! Per-import object cache keyed by entity type and primary key.
//!
//! # Responsibility
//! - Map `(entity type, primary key) -> managed object` for one import.
//! - Count hits, misses and cache-populating creates.
//!
//! # Invariants
//! - A type is either engaged (present, possibly empty) or disengaged.
//! - The first object cached for a key wins.

use crate::context::Managed;
use crate::model::entity::Entity;
use crate::model::value::KeyValue;
use std::any::{Any, TypeId};
use std::collections::HashMap;

/// Import cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub hits: u64,
    pub misses: u64,
    pub created: u64,
    pub cached_objects: u64,
}

/// Result of consulting the cache for one key.
pub(crate) enum CacheLookup<T: Entity> {
    Hit(Managed<T>),
    /// Engaged for the type but the key is absent; treat as "does not exist".
    Miss,
    /// Caching not engaged for the type; the store must be asked.
    Disengaged,
}

#[derive(Default)]
pub(crate) struct ImportCache {
    entities: HashMap<TypeId, Box<dyn Any>>,
    stats: ImportStats,
}

impl ImportCache {
    pub(crate) fn engage<T: Entity>(&mut self) {
        self.table_mut::<T>();
    }

    pub(crate) fn is_engaged<T: Entity>(&self) -> bool {
        self.table::<T>().is_some()
    }

    pub(crate) fn len<T: Entity>(&self) -> usize {
        self.table::<T>().map_or(0, HashMap::len)
    }

    pub(crate) fn lookup<T: Entity>(&mut self, key: &KeyValue) -> CacheLookup<T> {
        let found = match self.table::<T>() {
            None => return CacheLookup::Disengaged,
            Some(table) => table.get(key).cloned(),
        };
        match found {
            Some(object) => {
                self.stats.hits += 1;
                CacheLookup::Hit(object)
            }
            None => {
                self.stats.misses += 1;
                CacheLookup::Miss
            }
        }
    }

    /// Caches `object` under `key`; returns `false` if the key was taken.
    pub(crate) fn insert<T: Entity>(&mut self, key: KeyValue, object: Managed<T>) -> bool {
        let table = self.table_mut::<T>();
        if table.contains_key(&key) {
            return false;
        }
        table.insert(key, object);
        self.stats.cached_objects += 1;
        true
    }

    pub(crate) fn record_created(&mut self) {
        self.stats.created += 1;
    }

    pub(crate) fn stats(&self) -> ImportStats {
        self.stats
    }

    fn table<T: Entity>(&self) -> Option<&HashMap<KeyValue, Managed<T>>> {
        self.entities
            .get(&TypeId::of::<T>())
            .and_then(|table| table.downcast_ref::<HashMap<KeyValue, Managed<T>>>())
    }

    fn table_mut<T: Entity>(&mut self) -> &mut HashMap<KeyValue, Managed<T>> {
        let table = self
            .entities
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(HashMap::<KeyValue, Managed<T>>::new()));
        match table.downcast_mut::<HashMap<KeyValue, Managed<T>>>() {
            Some(table) => table,
            None => unreachable!("import cache tables are keyed by their own TypeId"),
        }
    }
}
