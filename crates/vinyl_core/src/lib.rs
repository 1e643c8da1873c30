//! Active-record helpers and a bulk-import cache over SQLite.
//! Entities describe themselves with `Entity`; contexts own the transactions.

pub mod config;
pub mod context;
pub mod db;
pub mod import;
pub mod logging;
pub mod model;
pub mod repo;

pub use config::{ConfigError, StackConfig, StoreLocation};
pub use context::stack::{Stack, StackError, StackResult};
pub use context::{
    Context, ContextError, ContextId, ContextResult, ContextRole, ContextStats, Managed, ObjectId,
};
pub use db::{DbError, DbResult};
pub use import::batch::{import_in_batches, BatchImportSummary};
pub use import::mapping::{ImportMapping, ImportSummary, UnknownKeyPolicy};
pub use import::{ImportError, ImportId, ImportResult, ImportSession, ImportStats};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::entity::{Attribute, Entity, EntityConfigError, EntityDescriptor};
pub use model::value::{AttributeError, AttributeKind, KeyValue};
pub use repo::query::{Query, SortDescriptor};
pub use repo::record_repo::{RecordError, RecordRepository, RecordResult, SqliteRecordRepository};
pub use rusqlite::types::Value;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
