//! Record repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide create/find-or-create/fetch/count helpers for any entity type.
//! - Route primary-key resolution through the active import cache first.
//!
//! # Invariants
//! - Primary-key lookups on an entity without a primary key fail with
//!   `MissingPrimaryKey` and never return an object.
//! - Once the import cache is engaged for a type, it is the only dedup path.
//! - Sorted fetches break ties by `object_id`, i.e. insertion order.
//! - No operation commits; see `Context::save`.

use crate::context::{Context, ContextError, Managed};
use crate::db::schema::{count_sql, quote_ident, select_sql};
use crate::db::DbError;
use crate::import::CacheLookup;
use crate::model::entity::{Attribute, Entity, OBJECT_ID_COLUMN};
use crate::model::value::{AttributeError, KeyValue};
use crate::repo::query::{Query, SortDescriptor};
use log::debug;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;

pub type RecordResult<T> = Result<T, RecordError>;

/// Record helper error.
#[derive(Debug)]
pub enum RecordError {
    /// Primary-key operation on an entity declared without a primary key.
    MissingPrimaryKey(&'static str),
    UnknownSortKey {
        entity: &'static str,
        key: String,
    },
    Attribute(AttributeError),
    Context(ContextError),
}

impl Display for RecordError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingPrimaryKey(entity) => {
                write!(f, "entity `{entity}` has no primary key configured")
            }
            Self::UnknownSortKey { entity, key } => {
                write!(f, "entity `{entity}` cannot be sorted by `{key}`")
            }
            Self::Attribute(err) => write!(f, "{err}"),
            Self::Context(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RecordError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Attribute(err) => Some(err),
            Self::Context(err) => Some(err),
            Self::MissingPrimaryKey(_) | Self::UnknownSortKey { .. } => None,
        }
    }
}

impl From<AttributeError> for RecordError {
    fn from(value: AttributeError) -> Self {
        Self::Attribute(value)
    }
}

impl From<ContextError> for RecordError {
    fn from(value: ContextError) -> Self {
        Self::Context(value)
    }
}

impl From<rusqlite::Error> for RecordError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Context(ContextError::Db(DbError::Sqlite(value)))
    }
}

/// Record helper operations for one entity type.
pub trait RecordRepository<T: Entity> {
    /// Inserts and returns a new default instance.
    fn new_object(&self) -> RecordResult<Managed<T>>;

    /// Returns the object whose primary key equals `value`.
    ///
    /// When none exists, creates one if `create_new` is set, otherwise
    /// returns `None`.
    fn object_with_primary_key(&self, value: Value, create_new: bool) -> RecordResult<Option<Managed<T>>>;

    /// Every object of the type; empty `sort` leaves order unspecified.
    fn all(&self, sort: &[SortDescriptor]) -> RecordResult<Vec<Managed<T>>>;

    /// Objects matching `query`; `None` matches all.
    fn fetch_where(&self, query: Option<&Query>, sort: &[SortDescriptor]) -> RecordResult<Vec<Managed<T>>>;

    /// Number of objects matching `query` without loading them.
    fn count(&self, query: Option<&Query>) -> RecordResult<u64>;
}

/// How a primary-key lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    Cached,
    Fetched,
    Created,
}

/// SQLite-backed record helper bound to one context.
pub struct SqliteRecordRepository<'ctx, T: Entity> {
    context: &'ctx Context,
    _entity: PhantomData<fn() -> T>,
}

impl<'ctx, T: Entity> SqliteRecordRepository<'ctx, T> {
    pub fn new(context: &'ctx Context) -> Self {
        Self {
            context,
            _entity: PhantomData,
        }
    }

    pub fn context(&self) -> &'ctx Context {
        self.context
    }

    /// Find-or-create that also reports where the object came from.
    pub(crate) fn resolve(
        &self,
        value: Value,
        create_new: bool,
    ) -> RecordResult<Option<(Managed<T>, Resolution)>> {
        let attribute = primary_key_attribute::<T>()?;
        self.context.ensure_registered::<T>()?;
        let key = KeyValue::coerce(&value, attribute.kind, T::DESCRIPTOR.name, attribute.name)?
            .ok_or_else(|| AttributeError::InvalidKey {
                entity: T::DESCRIPTOR.name,
                attribute: attribute.name,
                reason: "null cannot identify an object".to_string(),
            })?;

        let lookup = self.context.import_lookup::<T>(&key);
        match &lookup {
            CacheLookup::Hit(object) => return Ok(Some((object.clone(), Resolution::Cached))),
            CacheLookup::Miss => {}
            CacheLookup::Disengaged => {
                if let Some(object) = self.fetch_by_key(attribute, &key)? {
                    return Ok(Some((object, Resolution::Fetched)));
                }
            }
        }

        if !create_new {
            return Ok(None);
        }

        let mut state = T::default();
        state.set_value(attribute.name, key.clone().into())?;
        let object = self.context.insert_object(state)?;
        if matches!(lookup, CacheLookup::Miss) {
            self.context.import_remember::<T>(key, object.clone());
        }
        Ok(Some((object, Resolution::Created)))
    }

    fn fetch_by_key(&self, attribute: &Attribute, key: &KeyValue) -> RecordResult<Option<Managed<T>>> {
        let query = Query::eq(attribute.name, key.clone());
        let sort = [SortDescriptor::ascending(OBJECT_ID_COLUMN)];
        let mut found = self.fetch(Some(&query), &sort, Some(1))?;
        Ok(found.pop())
    }

    fn fetch(
        &self,
        query: Option<&Query>,
        sort: &[SortDescriptor],
        limit: Option<u32>,
    ) -> RecordResult<Vec<Managed<T>>> {
        self.context.ensure_registered::<T>()?;
        let order_by = order_by_clause::<T>(sort)?;
        self.context.flush_pending()?;

        let mut sql = select_sql(&T::DESCRIPTOR);
        let mut params = Vec::new();
        if let Some(query) = query {
            sql.push_str(" WHERE ");
            sql.push_str(query.clause());
            params.extend(query.params().iter().cloned());
        }
        sql.push_str(&order_by);
        if let Some(limit) = limit {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(i64::from(limit)));
        }

        let conn = self.context.connection();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut objects = Vec::new();
        while let Some(row) = rows.next()? {
            objects.push(self.context.materialize::<T>(row)?);
        }
        self.context.record_fetch();

        debug!(
            "event=fetch module=repo status=ok context_id={} entity={} filtered={} rows={}",
            self.context.id(),
            T::DESCRIPTOR.name,
            query.is_some(),
            objects.len()
        );
        Ok(objects)
    }
}

impl<T: Entity> RecordRepository<T> for SqliteRecordRepository<'_, T> {
    fn new_object(&self) -> RecordResult<Managed<T>> {
        Ok(self.context.insert_object(T::default())?)
    }

    fn object_with_primary_key(&self, value: Value, create_new: bool) -> RecordResult<Option<Managed<T>>> {
        Ok(self
            .resolve(value, create_new)?
            .map(|(object, _resolution)| object))
    }

    fn all(&self, sort: &[SortDescriptor]) -> RecordResult<Vec<Managed<T>>> {
        self.fetch(None, sort, None)
    }

    fn fetch_where(&self, query: Option<&Query>, sort: &[SortDescriptor]) -> RecordResult<Vec<Managed<T>>> {
        self.fetch(query, sort, None)
    }

    fn count(&self, query: Option<&Query>) -> RecordResult<u64> {
        self.context.ensure_registered::<T>()?;
        self.context.flush_pending()?;

        let mut sql = count_sql(&T::DESCRIPTOR);
        let mut params = Vec::new();
        if let Some(query) = query {
            sql.push_str(" WHERE ");
            sql.push_str(query.clause());
            params.extend(query.params().iter().cloned());
        }

        let count: i64 = self
            .context
            .connection()
            .query_row(&sql, params_from_iter(params), |row| row.get(0))?;
        self.context.record_count();
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

pub(crate) fn primary_key_attribute<T: Entity>() -> RecordResult<&'static Attribute> {
    T::DESCRIPTOR
        .primary_key_attribute()
        .ok_or(RecordError::MissingPrimaryKey(T::DESCRIPTOR.name))
}

fn order_by_clause<T: Entity>(sort: &[SortDescriptor]) -> RecordResult<String> {
    if sort.is_empty() {
        return Ok(String::new());
    }

    let mut terms = Vec::with_capacity(sort.len() + 1);
    for descriptor in sort {
        if !T::DESCRIPTOR.is_sort_key(&descriptor.key) {
            return Err(RecordError::UnknownSortKey {
                entity: T::DESCRIPTOR.name,
                key: descriptor.key.clone(),
            });
        }
        let direction = if descriptor.ascending { "ASC" } else { "DESC" };
        terms.push(format!("{} {direction}", quote_ident(&descriptor.key)));
    }
    if !sort.iter().any(|descriptor| descriptor.key == OBJECT_ID_COLUMN) {
        terms.push(format!("{OBJECT_ID_COLUMN} ASC"));
    }

    Ok(format!(" ORDER BY {}", terms.join(", ")))
}
