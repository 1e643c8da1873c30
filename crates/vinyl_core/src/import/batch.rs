//! Batched JSON import with one saved transaction per batch.
//!
//! # Responsibility
//! - Split a record list into fixed-size batches.
//! - Give each batch a complete cache: every stored object whose key occurs in
//!   the batch, fetched in key slices that stay under SQLite's bound-variable limit.
//! - Release the batch's objects from the context once it is saved.
//!
//! # Invariants
//! - Each batch runs in its own import and is saved before the next starts.
//! - Record indexes in errors are positions in the full input.
//! - A failed batch is left unsaved in the context; earlier batches stay committed.

use super::mapping::{record_key, ImportMapping, ImportSummary};
use super::{ImportError, ImportResult};
use crate::context::Context;
use crate::model::entity::Entity;
use crate::model::value::KeyValue;
use crate::repo::query::Query;
use crate::repo::record_repo::{primary_key_attribute, RecordRepository};
use log::{error, info};
use rusqlite::types::Value;
use std::time::Instant;

/// Keys bound per prefetch query.
const PREFETCH_KEYS_PER_QUERY: usize = 500;

/// Totals across every batch of one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchImportSummary {
    pub batches: usize,
    pub records: usize,
    pub created: usize,
    pub updated: usize,
}

/// Imports `records` into `T` in saved batches of `batch_size`.
///
/// Must run on a background context; the main context cannot host a cache.
pub fn import_in_batches<T: Entity>(
    context: &Context,
    records: &[serde_json::Value],
    batch_size: usize,
    mapping: &ImportMapping,
) -> ImportResult<BatchImportSummary> {
    if batch_size == 0 {
        return Err(ImportError::InvalidBatchSize);
    }
    let key_attribute = primary_key_attribute::<T>()?;
    let started_at = Instant::now();
    let mut total = BatchImportSummary::default();

    for (batch_index, chunk) in records.chunks(batch_size).enumerate() {
        let offset = batch_index * batch_size;
        let outcome = context
            .perform_import(|session| -> ImportResult<ImportSummary> {
                let mut keys = Vec::with_capacity(chunk.len());
                for (position, record) in chunk.iter().enumerate() {
                    let index = offset + position;
                    let raw = record_key::<T>(index, record, mapping)?;
                    let key = KeyValue::coerce(
                        &raw,
                        key_attribute.kind,
                        T::DESCRIPTOR.name,
                        key_attribute.name,
                    )
                    .map_err(|err| ImportError::InvalidRecord {
                        index,
                        message: err.to_string(),
                    })?;
                    keys.extend(key.map(Value::from));
                }

                let repository = session.repository::<T>();
                let mut existing = Vec::new();
                for slice in keys.chunks(PREFETCH_KEYS_PER_QUERY) {
                    let query = Query::any_of(key_attribute.name, slice.iter().cloned());
                    existing.extend(repository.fetch_where(Some(&query), &[])?);
                }
                session.cache_objects(&existing)?;
                session
                    .import_records::<T>(chunk, mapping)
                    .map_err(|err| shift_index(err, offset))
            })
            .and_then(|summary| {
                context.save()?;
                context.release_clean();
                Ok(summary)
            });

        let summary = match outcome {
            Ok(summary) => summary,
            Err(err) => {
                error!(
                    "event=batch_import module=import status=error context_id={} entity={} batch={} error={}",
                    context.id(),
                    T::DESCRIPTOR.name,
                    batch_index,
                    err
                );
                return Err(err);
            }
        };

        total.batches += 1;
        total.records += summary.records;
        total.created += summary.created;
        total.updated += summary.updated;
        info!(
            "event=batch_import module=import status=ok context_id={} entity={} batch={} records={} created={} updated={}",
            context.id(),
            T::DESCRIPTOR.name,
            batch_index,
            summary.records,
            summary.created,
            summary.updated
        );
    }

    info!(
        "event=batch_import module=import status=complete context_id={} entity={} batches={} records={} created={} updated={} duration_ms={}",
        context.id(),
        T::DESCRIPTOR.name,
        total.batches,
        total.records,
        total.created,
        total.updated,
        started_at.elapsed().as_millis()
    );
    Ok(total)
}

fn shift_index(err: ImportError, offset: usize) -> ImportError {
    match err {
        ImportError::InvalidRecord { index, message } => ImportError::InvalidRecord {
            index: index + offset,
            message,
        },
        other => other,
    }
}
