//! Entity metadata contract.
//!
//! # Responsibility
//! - Describe a persistent model type: name, attributes, optional primary key.
//! - Validate descriptors before any table is created for them.
//! - Define the key-value access trait every model type implements.
//!
//! # Invariants
//! - Entity and attribute names are plain SQL identifiers.
//! - `object_id` is reserved for the store row id.
//! - A primary key, when configured, names an `integer` or `text` attribute.

use crate::model::value::{AttributeError, AttributeKind, KeyValue};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value;
use serde::Serialize;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Column holding the store row id of every entity table.
pub const OBJECT_ID_COLUMN: &str = "object_id";

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// One declared attribute of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Attribute {
    pub name: &'static str,
    pub kind: AttributeKind,
}

/// Static description of an entity type.
///
/// Declared as an associated constant of [`Entity`], using struct literals so
/// the attribute slice is promoted to `'static`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub name: &'static str,
    pub attributes: &'static [Attribute],
    pub primary_key: Option<&'static str>,
}

#[derive(Serialize)]
struct Signature<'a> {
    attributes: &'a [Attribute],
    primary_key: Option<&'a str>,
}

impl EntityDescriptor {
    pub fn attribute(&self, name: &str) -> Option<&'static Attribute> {
        let attributes: &'static [Attribute] = self.attributes;
        attributes.iter().find(|attribute| attribute.name == name)
    }

    /// Returns the primary-key attribute, or `None` when the entity has none.
    pub fn primary_key_attribute(&self) -> Option<&'static Attribute> {
        self.primary_key.and_then(|key| self.attribute(key))
    }

    /// Whether `key` can appear in a sort descriptor for this entity.
    pub fn is_sort_key(&self, key: &str) -> bool {
        key == OBJECT_ID_COLUMN || self.attribute(key).is_some()
    }

    /// Checks every naming and primary-key rule.
    pub fn validate(&self) -> Result<(), EntityConfigError> {
        if !IDENTIFIER_RE.is_match(self.name) {
            return Err(EntityConfigError::InvalidIdentifier {
                entity: self.name,
                identifier: self.name,
            });
        }
        if self.name.starts_with("vinyl_") {
            return Err(EntityConfigError::ReservedName {
                entity: self.name,
                name: self.name,
            });
        }
        if self.attributes.is_empty() {
            return Err(EntityConfigError::NoAttributes { entity: self.name });
        }

        let mut seen = BTreeSet::new();
        for attribute in self.attributes {
            if !IDENTIFIER_RE.is_match(attribute.name) {
                return Err(EntityConfigError::InvalidIdentifier {
                    entity: self.name,
                    identifier: attribute.name,
                });
            }
            if attribute.name.eq_ignore_ascii_case(OBJECT_ID_COLUMN) {
                return Err(EntityConfigError::ReservedName {
                    entity: self.name,
                    name: attribute.name,
                });
            }
            if !seen.insert(attribute.name.to_ascii_lowercase()) {
                return Err(EntityConfigError::DuplicateAttribute {
                    entity: self.name,
                    attribute: attribute.name,
                });
            }
        }

        if let Some(key) = self.primary_key {
            let attribute =
                self.attribute(key)
                    .ok_or(EntityConfigError::UnknownPrimaryKey {
                        entity: self.name,
                        attribute: key,
                    })?;
            if !attribute.kind.is_key_kind() {
                return Err(EntityConfigError::UnsupportedPrimaryKeyKind {
                    entity: self.name,
                    attribute: key,
                    kind: attribute.kind,
                });
            }
        }

        Ok(())
    }

    /// Stable textual form of the table shape, stored in `vinyl_entities`.
    pub fn signature(&self) -> String {
        serde_json::to_string(&Signature {
            attributes: self.attributes,
            primary_key: self.primary_key,
        })
        .unwrap_or_else(|_| format!("{:?}/{:?}", self.attributes, self.primary_key))
    }
}

/// A persistent model type.
///
/// Implementations map attribute names onto their fields. `set_value` must
/// accept every value `value` returns for the same attribute.
pub trait Entity: Default + 'static {
    const DESCRIPTOR: EntityDescriptor;

    /// Returns the current value of `attribute`, or `None` if undeclared.
    fn value(&self, attribute: &str) -> Option<Value>;

    /// Replaces the value of `attribute`.
    fn set_value(&mut self, attribute: &str, value: Value) -> Result<(), AttributeError>;
}

/// Reads the primary-key value of `entity` as a typed key.
pub(crate) fn primary_key_of<T: Entity>(
    entity: &T,
    attribute: &'static Attribute,
) -> Result<Option<KeyValue>, AttributeError> {
    let value = entity
        .value(attribute.name)
        .ok_or_else(|| AttributeError::UnknownAttribute {
            entity: T::DESCRIPTOR.name,
            attribute: attribute.name.to_string(),
        })?;
    KeyValue::coerce(&value, attribute.kind, T::DESCRIPTOR.name, attribute.name)
}

/// Descriptor rule violation, reported at registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityConfigError {
    InvalidIdentifier {
        entity: &'static str,
        identifier: &'static str,
    },
    ReservedName {
        entity: &'static str,
        name: &'static str,
    },
    NoAttributes {
        entity: &'static str,
    },
    DuplicateAttribute {
        entity: &'static str,
        attribute: &'static str,
    },
    UnknownPrimaryKey {
        entity: &'static str,
        attribute: &'static str,
    },
    UnsupportedPrimaryKeyKind {
        entity: &'static str,
        attribute: &'static str,
        kind: AttributeKind,
    },
}

impl Display for EntityConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIdentifier { entity, identifier } => {
                write!(f, "entity `{entity}`: `{identifier}` is not a valid identifier")
            }
            Self::ReservedName { entity, name } => {
                write!(f, "entity `{entity}`: `{name}` is a reserved name")
            }
            Self::NoAttributes { entity } => {
                write!(f, "entity `{entity}` declares no attributes")
            }
            Self::DuplicateAttribute { entity, attribute } => {
                write!(f, "entity `{entity}` declares `{attribute}` more than once")
            }
            Self::UnknownPrimaryKey { entity, attribute } => write!(
                f,
                "entity `{entity}`: primary key `{attribute}` is not a declared attribute"
            ),
            Self::UnsupportedPrimaryKeyKind {
                entity,
                attribute,
                kind,
            } => write!(
                f,
                "entity `{entity}`: primary key `{attribute}` has unsupported kind {kind}"
            ),
        }
    }
}

impl Error for EntityConfigError {}
