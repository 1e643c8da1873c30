//! Attribute value vocabulary and primary-key values.
//!
//! # Responsibility
//! - Name the storage kinds an entity attribute can have.
//! - Convert loosely typed `Value`s into typed Rust fields.
//! - Coerce caller-supplied lookup values into typed primary keys.
//!
//! # Invariants
//! - `KeyValue` equality is value equality of the declared key kind:
//!   `5`, `5.0` and `"5"` are the same integer key.
//! - Integer conversion never truncates a fractional value.

use rusqlite::types::Value;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Storage kind of one entity attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Integer,
    Real,
    Text,
    /// Stored as `0`/`1` integers.
    Boolean,
}

impl AttributeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "text",
            Self::Boolean => "boolean",
        }
    }

    pub(crate) fn sql_type(self) -> &'static str {
        match self {
            Self::Integer | Self::Boolean => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
        }
    }

    /// Whether values of this kind can identify an object.
    pub fn is_key_kind(self) -> bool {
        matches!(self, Self::Integer | Self::Text)
    }
}

impl Display for AttributeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hashable primary-key value used for lookups and import caching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyValue {
    Integer(i64),
    Text(String),
}

impl KeyValue {
    /// Coerces `value` into a key of the given kind.
    ///
    /// Returns `None` for `NULL`, which never identifies an object.
    pub fn coerce(
        value: &Value,
        kind: AttributeKind,
        entity: &'static str,
        attribute: &'static str,
    ) -> Result<Option<Self>, AttributeError> {
        let invalid = |reason: String| AttributeError::InvalidKey {
            entity,
            attribute,
            reason,
        };

        match (kind, value) {
            (_, Value::Null) => Ok(None),
            (AttributeKind::Integer, Value::Integer(number)) => Ok(Some(Self::Integer(*number))),
            (AttributeKind::Integer, Value::Real(number)) => integral(*number)
                .map(|number| Some(Self::Integer(number)))
                .ok_or_else(|| invalid(format!("{number} is not an integer"))),
            (AttributeKind::Integer, Value::Text(text)) => text
                .trim()
                .parse::<i64>()
                .map(|number| Some(Self::Integer(number)))
                .map_err(|_| invalid(format!("`{text}` is not an integer"))),
            (AttributeKind::Text, Value::Text(text)) => Ok(Some(Self::Text(text.clone()))),
            (AttributeKind::Text, Value::Integer(number)) => {
                Ok(Some(Self::Text(number.to_string())))
            }
            (AttributeKind::Integer | AttributeKind::Text, other) => Err(invalid(format!(
                "{} values cannot be {kind} keys",
                value_type_name(other)
            ))),
            (_, _) => Err(invalid(format!("{kind} attributes cannot be primary keys"))),
        }
    }
}

impl From<KeyValue> for Value {
    fn from(value: KeyValue) -> Self {
        match value {
            KeyValue::Integer(number) => Value::Integer(number),
            KeyValue::Text(text) => Value::Text(text),
        }
    }
}

impl Display for KeyValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(number) => write!(f, "{number}"),
            Self::Text(text) => write!(f, "{text:?}"),
        }
    }
}

/// Attribute access or conversion failure.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeError {
    UnknownAttribute {
        entity: &'static str,
        attribute: String,
    },
    TypeMismatch {
        entity: &'static str,
        attribute: String,
        expected: AttributeKind,
        found: &'static str,
    },
    InvalidKey {
        entity: &'static str,
        attribute: &'static str,
        reason: String,
    },
}

impl Display for AttributeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownAttribute { entity, attribute } => {
                write!(f, "entity `{entity}` has no attribute `{attribute}`")
            }
            Self::TypeMismatch {
                entity,
                attribute,
                expected,
                found,
            } => write!(
                f,
                "attribute `{entity}.{attribute}` expects {expected}, found {found}"
            ),
            Self::InvalidKey {
                entity,
                attribute,
                reason,
            } => write!(f, "invalid primary key for `{entity}.{attribute}`: {reason}"),
        }
    }
}

impl Error for AttributeError {}

/// Returns a short name for the dynamic type of `value`.
pub fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Integer(_) => "integer",
        Value::Real(_) => "real",
        Value::Text(_) => "text",
        Value::Blob(_) => "blob",
    }
}

/// Reads a non-null integer attribute.
pub fn expect_integer(value: Value, entity: &'static str, attribute: &str) -> Result<i64, AttributeError> {
    match value {
        Value::Integer(number) => Ok(number),
        Value::Real(number) => {
            integral(number).ok_or_else(|| mismatch(entity, attribute, AttributeKind::Integer, "real"))
        }
        other => Err(mismatch(
            entity,
            attribute,
            AttributeKind::Integer,
            value_type_name(&other),
        )),
    }
}

pub fn expect_optional_integer(
    value: Value,
    entity: &'static str,
    attribute: &str,
) -> Result<Option<i64>, AttributeError> {
    match value {
        Value::Null => Ok(None),
        other => expect_integer(other, entity, attribute).map(Some),
    }
}

/// Reads a non-null real attribute; integers widen.
pub fn expect_real(value: Value, entity: &'static str, attribute: &str) -> Result<f64, AttributeError> {
    match value {
        Value::Real(number) => Ok(number),
        Value::Integer(number) => Ok(number as f64),
        other => Err(mismatch(
            entity,
            attribute,
            AttributeKind::Real,
            value_type_name(&other),
        )),
    }
}

pub fn expect_optional_real(
    value: Value,
    entity: &'static str,
    attribute: &str,
) -> Result<Option<f64>, AttributeError> {
    match value {
        Value::Null => Ok(None),
        other => expect_real(other, entity, attribute).map(Some),
    }
}

pub fn expect_text(value: Value, entity: &'static str, attribute: &str) -> Result<String, AttributeError> {
    match value {
        Value::Text(text) => Ok(text),
        other => Err(mismatch(
            entity,
            attribute,
            AttributeKind::Text,
            value_type_name(&other),
        )),
    }
}

pub fn expect_optional_text(
    value: Value,
    entity: &'static str,
    attribute: &str,
) -> Result<Option<String>, AttributeError> {
    match value {
        Value::Null => Ok(None),
        other => expect_text(other, entity, attribute).map(Some),
    }
}

/// Reads a boolean stored as `0`/`1`.
pub fn expect_bool(value: Value, entity: &'static str, attribute: &str) -> Result<bool, AttributeError> {
    match value {
        Value::Integer(0) => Ok(false),
        Value::Integer(1) => Ok(true),
        other => Err(mismatch(
            entity,
            attribute,
            AttributeKind::Boolean,
            value_type_name(&other),
        )),
    }
}

fn mismatch(
    entity: &'static str,
    attribute: &str,
    expected: AttributeKind,
    found: &'static str,
) -> AttributeError {
    AttributeError::TypeMismatch {
        entity,
        attribute: attribute.to_string(),
        expected,
        found,
    }
}

fn integral(number: f64) -> Option<i64> {
    if number.is_finite() && number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
        Some(number as i64)
    } else {
        None
    }
}
