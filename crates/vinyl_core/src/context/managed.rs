//! Managed object handles and the context identity map entry.
//!
//! # Responsibility
//! - Give callers a shared, context-owned handle to one stored row.
//! - Track edits so the owning context can flush them before queries and saves.
//!
//! # Invariants
//! - A handle is `!Send`; it never leaves the thread of its context.
//! - One row has at most one live handle per context.
//! - `edit`/`set_value` always mark the object dirty.

use crate::context::{ContextError, ContextId, ContextResult, ObjectId};
use crate::db::schema::select_sql;
use crate::model::entity::{primary_key_of, Entity, EntityDescriptor, OBJECT_ID_COLUMN};
use crate::model::value::{AttributeError, KeyValue};
use rusqlite::types::Value;
use rusqlite::{Connection, Row};
use std::any::Any;
use std::cell::{Cell, Ref, RefCell};
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

struct ManagedCell<T> {
    object_id: ObjectId,
    context_id: ContextId,
    state: RefCell<T>,
    dirty: Cell<bool>,
}

/// Shared handle to an entity instance owned by one context.
pub struct Managed<T: Entity> {
    inner: Rc<ManagedCell<T>>,
}

impl<T: Entity> Managed<T> {
    pub(crate) fn new(object_id: ObjectId, context_id: ContextId, state: T) -> Self {
        Self {
            inner: Rc::new(ManagedCell {
                object_id,
                context_id,
                state: RefCell::new(state),
                dirty: Cell::new(false),
            }),
        }
    }

    pub fn object_id(&self) -> ObjectId {
        self.inner.object_id
    }

    pub fn context_id(&self) -> ContextId {
        self.inner.context_id
    }

    /// Borrows the current state.
    ///
    /// # Panics
    /// Panics if called while an `edit` closure on the same object is running.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.inner.state.borrow()
    }

    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.state.borrow())
    }

    /// Mutates the object; the change is written on the next flush or save.
    pub fn edit<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = f(&mut self.inner.state.borrow_mut());
        self.inner.dirty.set(true);
        result
    }

    pub fn value(&self, attribute: &str) -> Option<Value> {
        self.inner.state.borrow().value(attribute)
    }

    pub fn set_value(&self, attribute: &str, value: Value) -> Result<(), AttributeError> {
        self.inner
            .state
            .borrow_mut()
            .set_value(attribute, value)?;
        self.inner.dirty.set(true);
        Ok(())
    }

    /// Current primary-key value, or `None` if the entity has no key or it is null.
    pub fn primary_key(&self) -> Result<Option<KeyValue>, AttributeError> {
        match T::DESCRIPTOR.primary_key_attribute() {
            Some(attribute) => primary_key_of(&*self.inner.state.borrow(), attribute),
            None => Ok(None),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    /// Whether both handles point at the same managed object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Entity + Clone> Managed<T> {
    pub fn snapshot(&self) -> T {
        self.inner.state.borrow().clone()
    }
}

impl<T: Entity> Clone for Managed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Entity> PartialEq for Managed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: Entity> Eq for Managed<T> {}

impl<T: Entity> Debug for Managed<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Managed")
            .field("entity", &T::DESCRIPTOR.name)
            .field("object_id", &self.inner.object_id)
            .field("context_id", &self.inner.context_id)
            .field("dirty", &self.inner.dirty.get())
            .finish()
    }
}

/// Type-erased identity map entry.
pub(crate) trait RegisteredObject {
    fn as_any(&self) -> &dyn Any;
    fn descriptor(&self) -> EntityDescriptor;
    fn object_id(&self) -> ObjectId;
    fn is_dirty(&self) -> bool;
    /// Whether any handle besides the identity map entry is alive.
    fn is_shared(&self) -> bool;
    /// Attribute values in descriptor order.
    fn column_values(&self) -> Vec<Value>;
    fn mark_clean(&self);
    /// Replaces in-memory state with the stored row; `false` if the row is gone.
    fn reload(&self, conn: &Connection) -> ContextResult<bool>;
}

impl<T: Entity> RegisteredObject for Managed<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn descriptor(&self) -> EntityDescriptor {
        T::DESCRIPTOR
    }

    fn object_id(&self) -> ObjectId {
        self.inner.object_id
    }

    fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    fn is_shared(&self) -> bool {
        Rc::strong_count(&self.inner) > 1
    }

    fn column_values(&self) -> Vec<Value> {
        column_values(&*self.inner.state.borrow())
    }

    fn mark_clean(&self) {
        self.inner.dirty.set(false);
    }

    fn reload(&self, conn: &Connection) -> ContextResult<bool> {
        let sql = format!(
            "{} WHERE {} = ?1;",
            select_sql(&T::DESCRIPTOR),
            OBJECT_ID_COLUMN
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([self.inner.object_id.get()])?;
        match rows.next()? {
            Some(row) => {
                *self.inner.state.borrow_mut() = decode_row::<T>(row)?;
                self.inner.dirty.set(false);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

pub(crate) fn column_values<T: Entity>(state: &T) -> Vec<Value> {
    T::DESCRIPTOR
        .attributes
        .iter()
        .map(|attribute| state.value(attribute.name).unwrap_or(Value::Null))
        .collect()
}

/// Builds an entity from a row produced by `schema::select_sql`.
pub(crate) fn decode_row<T: Entity>(row: &Row<'_>) -> ContextResult<T> {
    let mut state = T::default();
    for (index, attribute) in T::DESCRIPTOR.attributes.iter().enumerate() {
        let value: Value = row.get(index + 1)?;
        state
            .set_value(attribute.name, value)
            .map_err(ContextError::Attribute)?;
    }
    Ok(state)
}
