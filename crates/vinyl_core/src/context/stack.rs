//! Persistence stack: store location, entity registry and context factory.
//!
//! # Responsibility
//! - Open (and migrate) the store once; keep in-memory stores alive.
//! - Validate and register entity types before any context touches them.
//! - Hand out one main context at a time and any number of background ones.
//!
//! # Invariants
//! - `Stack` is `Clone + Send + Sync`; contexts are opened per thread.
//! - An entity name maps to exactly one descriptor for the stack lifetime;
//!   names are compared without case, like SQLite table names.
//! - Descriptor problems surface at `register`, never on first lookup.

use crate::config::{ConfigError, StackConfig, StoreLocation};
use crate::context::{Context, ContextError, ContextId, ContextRole};
use crate::db::schema::{register_entity, Registration};
use crate::db::{open_store, DbError, StoreTarget};
use crate::model::entity::{Entity, EntityConfigError, EntityDescriptor};
use log::{error, info};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

pub type StackResult<T> = Result<T, StackError>;

#[derive(Debug)]
pub enum StackError {
    Config(ConfigError),
    Db(DbError),
    Entity(EntityConfigError),
    /// Another descriptor was already registered under the same name.
    EntityConflict(&'static str),
    MainContextOpen,
    Context(ContextError),
}

impl Display for StackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Entity(err) => write!(f, "{err}"),
            Self::EntityConflict(entity) => write!(
                f,
                "entity `{entity}` is already registered with a different descriptor"
            ),
            Self::MainContextOpen => write!(f, "the main context is already open"),
            Self::Context(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StackError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Entity(err) => Some(err),
            Self::Context(err) => Some(err),
            Self::EntityConflict(_) | Self::MainContextOpen => None,
        }
    }
}

impl From<ConfigError> for StackError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<DbError> for StackError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<EntityConfigError> for StackError {
    fn from(value: EntityConfigError) -> Self {
        Self::Entity(value)
    }
}

impl From<ContextError> for StackError {
    fn from(value: ContextError) -> Self {
        Self::Context(value)
    }
}

struct StackInner {
    target: StoreTarget,
    busy_timeout: Duration,
    /// Keeps shared in-memory stores alive and runs registration DDL.
    keeper: Mutex<Connection>,
    /// Keyed by lowercase entity name.
    entities: RwLock<BTreeMap<String, EntityDescriptor>>,
    main_open: AtomicBool,
    next_context_id: AtomicU64,
}

/// Shared handle to one store and its registered entity types.
#[derive(Clone)]
pub struct Stack {
    inner: Arc<StackInner>,
}

impl Stack {
    pub fn open(config: &StackConfig) -> StackResult<Self> {
        config.validate()?;
        let target = match &config.store {
            StoreLocation::File { path } => StoreTarget::file(path),
            StoreLocation::Memory => StoreTarget::unique_memory(),
        };
        let busy_timeout = config.busy_timeout();
        let keeper = open_store(&target, busy_timeout)?;

        Ok(Self {
            inner: Arc::new(StackInner {
                target,
                busy_timeout,
                keeper: Mutex::new(keeper),
                entities: RwLock::new(BTreeMap::new()),
                main_open: AtomicBool::new(false),
                next_context_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn open_file(path: impl AsRef<Path>) -> StackResult<Self> {
        Self::open(&StackConfig::file(path))
    }

    pub fn open_in_memory() -> StackResult<Self> {
        Self::open(&StackConfig::memory())
    }

    /// Validates `T`'s descriptor and creates its table if needed.
    ///
    /// Registering the same type twice is a no-op.
    ///
    /// # Errors
    /// - `Entity` when the descriptor breaks a naming or primary-key rule.
    /// - `EntityConflict` when another descriptor already uses the name, in any case.
    /// - `Db(EntitySchemaMismatch)` when the store holds a different shape.
    /// - `Db(EntityNameCollision)` when the store registered the name in another case.
    pub fn register<T: Entity>(&self) -> StackResult<()> {
        let descriptor = T::DESCRIPTOR;
        if let Err(err) = descriptor.validate() {
            error!(
                "event=entity_register module=stack status=error entity={} error={}",
                descriptor.name, err
            );
            return Err(err.into());
        }

        let mut entities = self
            .inner
            .entities
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let registry_key = descriptor.name.to_ascii_lowercase();
        if let Some(existing) = entities.get(&registry_key) {
            if *existing == descriptor {
                return Ok(());
            }
            error!(
                "event=entity_register module=stack status=error entity={} conflicts_with={}",
                descriptor.name, existing.name
            );
            return Err(StackError::EntityConflict(descriptor.name));
        }

        let registration = {
            let mut keeper = self
                .inner
                .keeper
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            register_entity(&mut keeper, &descriptor)?
        };
        entities.insert(registry_key, descriptor);

        info!(
            "event=entity_register module=stack status=ok entity={} primary_key={} table={}",
            descriptor.name,
            descriptor.primary_key.unwrap_or("-"),
            match registration {
                Registration::Created => "created",
                Registration::Existing => "existing",
            }
        );
        Ok(())
    }

    pub fn is_registered<T: Entity>(&self) -> bool {
        self.registered_descriptor(T::DESCRIPTOR.name) == Some(T::DESCRIPTOR)
    }

    /// Registered entity names, sorted without case.
    pub fn registered_entities(&self) -> Vec<&'static str> {
        self.inner
            .entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|descriptor| descriptor.name)
            .collect()
    }

    /// Opens the stack's main context.
    ///
    /// # Errors
    /// - `MainContextOpen` while another main context is alive.
    pub fn open_main_context(&self) -> StackResult<Context> {
        if self
            .inner
            .main_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StackError::MainContextOpen);
        }

        match Context::new(self.next_context_id(), ContextRole::Main, self.clone()) {
            Ok(context) => Ok(context),
            Err(err) => {
                self.release_main();
                Err(err.into())
            }
        }
    }

    /// Opens a context for background work such as bulk imports.
    pub fn new_background_context(&self) -> StackResult<Context> {
        Ok(Context::new(
            self.next_context_id(),
            ContextRole::Background,
            self.clone(),
        )?)
    }

    pub fn busy_timeout(&self) -> Duration {
        self.inner.busy_timeout
    }

    pub(crate) fn target(&self) -> &StoreTarget {
        &self.inner.target
    }

    pub(crate) fn registered_descriptor(&self, name: &str) -> Option<EntityDescriptor> {
        self.inner
            .entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name.to_ascii_lowercase())
            .copied()
    }

    pub(crate) fn release_main(&self) {
        self.inner.main_open.store(false, Ordering::Release);
    }

    fn next_context_id(&self) -> ContextId {
        ContextId::new(self.inner.next_context_id.fetch_add(1, Ordering::Relaxed))
    }
}
