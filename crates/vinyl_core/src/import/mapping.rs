//! Flat JSON record mapping for imports.
//!
//! # Responsibility
//! - Translate one JSON object per record into attribute assignments.
//! - Upsert each record by primary key through the active import.
//!
//! # Invariants
//! - A record is validated completely before any object is touched.
//! - Only the key field sets the primary-key attribute; a second source for it
//!   is an invalid record.
//! - Nested arrays and objects are rejected; there is no key-path language.

use super::{ImportError, ImportResult, ImportSession};
use crate::model::entity::Entity;
use crate::repo::record_repo::{primary_key_attribute, Resolution};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What to do with a source key that names no attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownKeyPolicy {
    #[default]
    Ignore,
    Reject,
}

/// How source records map onto one entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMapping {
    /// Source field carrying the primary key; defaults to the key attribute's name.
    #[serde(default)]
    pub primary_key_field: Option<String>,
    /// `source key -> attribute name`.
    #[serde(default)]
    pub renames: BTreeMap<String, String>,
    #[serde(default)]
    pub unknown_keys: UnknownKeyPolicy,
}

impl ImportMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_primary_key_field(mut self, field: impl Into<String>) -> Self {
        self.primary_key_field = Some(field.into());
        self
    }

    pub fn rename(mut self, source: impl Into<String>, attribute: impl Into<String>) -> Self {
        self.renames.insert(source.into(), attribute.into());
        self
    }

    pub fn reject_unknown_keys(mut self) -> Self {
        self.unknown_keys = UnknownKeyPolicy::Reject;
        self
    }

    /// Source field that carries the primary key of `T`.
    pub fn key_field<T: Entity>(&self) -> Option<&str> {
        match &self.primary_key_field {
            Some(field) => Some(field.as_str()),
            None => T::DESCRIPTOR.primary_key,
        }
    }

    fn attribute_for<'a>(&'a self, source: &'a str) -> &'a str {
        self.renames
            .get(source)
            .map(String::as_str)
            .unwrap_or(source)
    }
}

/// Outcome of mapping a list of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub records: usize,
    pub created: usize,
    pub updated: usize,
}

/// Converts a scalar JSON value; arrays and objects have no column form.
pub fn json_to_value(value: &serde_json::Value) -> Result<Value, String> {
    match value {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(flag) => Ok(Value::Integer(i64::from(*flag))),
        serde_json::Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                Ok(Value::Integer(integer))
            } else if let Some(real) = number.as_f64() {
                Ok(Value::Real(real))
            } else {
                Err(format!("number `{number}` is out of range"))
            }
        }
        serde_json::Value::String(text) => Ok(Value::Text(text.clone())),
        serde_json::Value::Array(_) => Err("arrays cannot be imported".to_string()),
        serde_json::Value::Object(_) => Err("nested objects cannot be imported".to_string()),
    }
}

/// Extracts the primary-key value of one record.
pub(crate) fn record_key<T: Entity>(
    index: usize,
    record: &serde_json::Value,
    mapping: &ImportMapping,
) -> ImportResult<Value> {
    let field = match mapping.key_field::<T>() {
        Some(field) => field,
        None => primary_key_attribute::<T>()?.name,
    };
    let fields = record.as_object().ok_or_else(|| invalid(index, "expected a JSON object"))?;
    let raw = fields
        .get(field)
        .ok_or_else(|| invalid(index, format!("missing key field `{field}`")))?;
    let value = json_to_value(raw).map_err(|message| invalid(index, message))?;
    if value == Value::Null {
        return Err(invalid(index, format!("key field `{field}` is null")));
    }
    Ok(value)
}

impl ImportSession<'_> {
    /// Upserts every record into `T` by primary key.
    ///
    /// Stops at the first invalid record; objects touched before it stay
    /// pending in the context.
    pub fn import_records<T: Entity>(
        &self,
        records: &[serde_json::Value],
        mapping: &ImportMapping,
    ) -> ImportResult<ImportSummary> {
        self.ensure_active()?;
        let key_attribute = primary_key_attribute::<T>()?;
        let key_field = mapping.key_field::<T>().unwrap_or(key_attribute.name);
        let repository = self.repository::<T>();

        let mut summary = ImportSummary::default();
        for (index, record) in records.iter().enumerate() {
            let key = record_key::<T>(index, record, mapping)?;
            let assignments =
                assignments::<T>(index, record, mapping, key_field, key_attribute.name)?;

            let (object, resolution) = repository
                .resolve(key, true)?
                .ok_or_else(|| invalid(index, "record could not be resolved"))?;
            for (attribute, value) in assignments {
                object
                    .set_value(attribute, value)
                    .map_err(|err| invalid(index, err.to_string()))?;
            }

            summary.records += 1;
            match resolution {
                Resolution::Created => summary.created += 1,
                Resolution::Cached | Resolution::Fetched => summary.updated += 1,
            }
        }
        Ok(summary)
    }
}

fn assignments<T: Entity>(
    index: usize,
    record: &serde_json::Value,
    mapping: &ImportMapping,
    key_field: &str,
    key_attribute: &str,
) -> ImportResult<Vec<(&'static str, Value)>> {
    let fields = record.as_object().ok_or_else(|| invalid(index, "expected a JSON object"))?;
    let mut assignments = Vec::with_capacity(fields.len());
    for (source, raw) in fields {
        if source == key_field {
            continue;
        }
        let Some(attribute) = T::DESCRIPTOR.attribute(mapping.attribute_for(source)) else {
            match mapping.unknown_keys {
                UnknownKeyPolicy::Ignore => continue,
                UnknownKeyPolicy::Reject => {
                    return Err(invalid(index, format!("unknown key `{source}`")))
                }
            }
        };
        if attribute.name == key_attribute {
            return Err(invalid(
                index,
                format!(
                    "`{source}` would overwrite primary key `{key_attribute}`, which is read from `{key_field}`"
                ),
            ));
        }
        let value = json_to_value(raw).map_err(|message| invalid(index, message))?;
        assignments.push((attribute.name, value));
    }
    Ok(assignments)
}

fn invalid(index: usize, message: impl Into<String>) -> ImportError {
    ImportError::InvalidRecord {
        index,
        message: message.into(),
    }
}
