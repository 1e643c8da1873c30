//! Bulk import support: the per-import object cache and its collaborators.
//!
//! # Responsibility
//! - Scope one import operation to one context (`Context::perform_import`).
//! - Let find-or-create resolve primary keys from memory instead of the store.
//! - Map flat JSON records onto entities, in one pass or in saved batches.
//!
//! # Invariants
//! - At most one import state is active per context; a nested import shadows
//!   the outer one until it returns.
//! - The cache is never populated on the main context.
//! - Import state is restored on every exit path, including unwinding.

pub mod batch;
mod cache;
pub mod mapping;
mod session;

pub use cache::ImportStats;
pub use session::ImportSession;

pub(crate) use cache::{CacheLookup, ImportCache};

use crate::context::ContextError;
use crate::repo::record_repo::RecordError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

pub type ImportResult<T> = Result<T, ImportError>;

/// Identifier of one import operation, unique per context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImportId(u64);

impl ImportId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for ImportId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Active import on a context.
pub(crate) struct ImportState {
    pub(crate) id: ImportId,
    pub(crate) cache: ImportCache,
    pub(crate) started_at: Instant,
}

impl ImportState {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id: ImportId(id),
            cache: ImportCache::default(),
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug)]
pub enum ImportError {
    /// Cache population attempted on the main context.
    MainContext { entity: &'static str },
    /// The session handle outlived its import, or a nested import shadows it.
    SessionNotActive(ImportId),
    /// A source record could not be mapped onto the entity.
    InvalidRecord { index: usize, message: String },
    InvalidBatchSize,
    Record(RecordError),
}

impl Display for ImportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MainContext { entity } => write!(
                f,
                "cannot cache `{entity}` objects on the main context; use a background context"
            ),
            Self::SessionNotActive(id) => write!(f, "import {id} is not the active import"),
            Self::InvalidRecord { index, message } => {
                write!(f, "record {index} cannot be imported: {message}")
            }
            Self::InvalidBatchSize => write!(f, "batch size must be greater than zero"),
            Self::Record(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ImportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Record(err) => Some(err),
            Self::MainContext { .. }
            | Self::SessionNotActive(_)
            | Self::InvalidRecord { .. }
            | Self::InvalidBatchSize => None,
        }
    }
}

impl From<RecordError> for ImportError {
    fn from(value: RecordError) -> Self {
        Self::Record(value)
    }
}

impl From<ContextError> for ImportError {
    fn from(value: ContextError) -> Self {
        Self::Record(RecordError::Context(value))
    }
}
