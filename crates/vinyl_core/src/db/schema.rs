//! Entity table DDL and statement text.
//!
//! # Responsibility
//! - Create one table per registered entity plus its primary-key index.
//! - Record entity signatures in `vinyl_entities` and detect shape drift.
//! - Build the SELECT/INSERT/UPDATE text shared by contexts and repositories.
//!
//! # Invariants
//! - Identifiers are always double-quoted; descriptors are validated first.
//! - Column order in every statement follows `EntityDescriptor::attributes`.
//! - The primary-key index is not unique: duplicate keys are representable.

use crate::db::{DbError, DbResult};
use crate::model::entity::{EntityDescriptor, OBJECT_ID_COLUMN};
use log::info;
use rusqlite::{params, Connection, OptionalExtension};

/// Outcome of registering an entity against a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    Existing,
}

/// Quotes one SQL identifier.
pub fn quote_ident(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Creates the entity table if needed and checks it against the stored signature.
pub fn register_entity(conn: &mut Connection, descriptor: &EntityDescriptor) -> DbResult<Registration> {
    let declared = descriptor.signature();
    let tx = conn.transaction()?;

    // `name` is NOCASE, matching how SQLite resolves table names.
    let stored: Option<(String, String)> = tx
        .query_row(
            "SELECT name, signature FROM vinyl_entities WHERE name = ?1;",
            [descriptor.name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    if let Some((stored_name, stored)) = stored {
        if stored_name != descriptor.name {
            return Err(DbError::EntityNameCollision {
                entity: descriptor.name.to_string(),
                stored: stored_name,
            });
        }
        if stored != declared {
            return Err(DbError::EntitySchemaMismatch {
                entity: descriptor.name.to_string(),
                stored,
                declared,
            });
        }
        return Ok(Registration::Existing);
    }

    tx.execute_batch(&create_table_sql(descriptor))?;
    if let Some(index_sql) = primary_key_index_sql(descriptor) {
        tx.execute_batch(&index_sql)?;
    }
    tx.execute(
        "INSERT INTO vinyl_entities (name, primary_key, signature) VALUES (?1, ?2, ?3);",
        params![descriptor.name, descriptor.primary_key, declared],
    )?;
    tx.commit()?;

    info!(
        "event=entity_table_create module=db status=ok entity={} attributes={}",
        descriptor.name,
        descriptor.attributes.len()
    );
    Ok(Registration::Created)
}

pub(crate) fn create_table_sql(descriptor: &EntityDescriptor) -> String {
    let columns = descriptor
        .attributes
        .iter()
        .map(|attribute| {
            format!(
                "{} {}",
                quote_ident(attribute.name),
                attribute.kind.sql_type()
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({} INTEGER PRIMARY KEY AUTOINCREMENT, {columns});",
        quote_ident(descriptor.name),
        OBJECT_ID_COLUMN
    )
}

fn primary_key_index_sql(descriptor: &EntityDescriptor) -> Option<String> {
    descriptor.primary_key.map(|key| {
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({});",
            quote_ident(&format!("idx_{}_{}", descriptor.name, key)),
            quote_ident(descriptor.name),
            quote_ident(key)
        )
    })
}

/// `SELECT object_id, <attributes...> FROM <table>` without a trailing clause.
pub(crate) fn select_sql(descriptor: &EntityDescriptor) -> String {
    let mut columns = vec![OBJECT_ID_COLUMN.to_string()];
    columns.extend(
        descriptor
            .attributes
            .iter()
            .map(|attribute| quote_ident(attribute.name)),
    );
    format!(
        "SELECT {} FROM {}",
        columns.join(", "),
        quote_ident(descriptor.name)
    )
}

pub(crate) fn count_sql(descriptor: &EntityDescriptor) -> String {
    format!("SELECT COUNT(*) FROM {}", quote_ident(descriptor.name))
}

pub(crate) fn insert_sql(descriptor: &EntityDescriptor) -> String {
    let columns = descriptor
        .attributes
        .iter()
        .map(|attribute| quote_ident(attribute.name))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=descriptor.attributes.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({columns}) VALUES ({placeholders});",
        quote_ident(descriptor.name)
    )
}

/// Updates every attribute; the object id is bound last.
pub(crate) fn update_sql(descriptor: &EntityDescriptor) -> String {
    let assignments = descriptor
        .attributes
        .iter()
        .enumerate()
        .map(|(index, attribute)| format!("{} = ?{}", quote_ident(attribute.name), index + 1))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {assignments} WHERE {} = ?{};",
        quote_ident(descriptor.name),
        OBJECT_ID_COLUMN,
        descriptor.attributes.len() + 1
    )
}

#[cfg(test)]
mod tests {
    use super::{insert_sql, quote_ident, select_sql, update_sql};
    use crate::model::entity::{Attribute, EntityDescriptor};
    use crate::model::value::AttributeKind;

    const TAG: EntityDescriptor = EntityDescriptor {
        name: "Tag",
        attributes: &[
            Attribute {
                name: "name",
                kind: AttributeKind::Text,
            },
            Attribute {
                name: "weight",
                kind: AttributeKind::Real,
            },
        ],
        primary_key: Some("name"),
    };

    #[test]
    fn quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn statements_follow_attribute_order() {
        assert_eq!(
            select_sql(&TAG),
            "SELECT object_id, \"name\", \"weight\" FROM \"Tag\""
        );
        assert_eq!(
            insert_sql(&TAG),
            "INSERT INTO \"Tag\" (\"name\", \"weight\") VALUES (?1, ?2);"
        );
        assert_eq!(
            update_sql(&TAG),
            "UPDATE \"Tag\" SET \"name\" = ?1, \"weight\" = ?2 WHERE object_id = ?3;"
        );
    }
}
