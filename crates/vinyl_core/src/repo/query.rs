//! Fetch filters and sort criteria.
//!
//! # Responsibility
//! - Carry a SQLite `WHERE` expression plus its bound parameters.
//! - Compose filters without re-numbering placeholders.
//!
//! # Invariants
//! - Clauses use anonymous `?` placeholders only, so `and`/`or` can concatenate
//!   parameter lists in order.
//! - Values are always bound, never spliced into SQL text.

use crate::db::schema::quote_ident;
use rusqlite::types::Value;

/// Filter expression evaluated by SQLite.
///
/// Matching semantics (comparison, `AND`/`OR`/`NOT`, `LIKE`/`GLOB` patterns)
/// are SQLite's own.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    clause: String,
    params: Vec<Value>,
}

impl Query {
    /// Raw clause, e.g. `Query::new("age >= ? AND name LIKE ?", [..])`.
    pub fn new(clause: impl Into<String>, params: impl IntoIterator<Item = Value>) -> Self {
        Self {
            clause: clause.into(),
            params: params.into_iter().collect(),
        }
    }

    /// `attribute = value`.
    pub fn eq(attribute: &str, value: impl Into<Value>) -> Self {
        Self::new(format!("{} = ?", quote_ident(attribute)), [value.into()])
    }

    /// `attribute IN (values...)`; an empty list matches nothing.
    pub fn any_of(attribute: &str, values: impl IntoIterator<Item = Value>) -> Self {
        let params = values.into_iter().collect::<Vec<_>>();
        if params.is_empty() {
            return Self::new("0", Vec::new());
        }
        let placeholders = vec!["?"; params.len()].join(", ");
        Self {
            clause: format!("{} IN ({placeholders})", quote_ident(attribute)),
            params,
        }
    }

    pub fn and(self, other: Query) -> Self {
        self.combine("AND", other)
    }

    pub fn or(self, other: Query) -> Self {
        self.combine("OR", other)
    }

    pub fn clause(&self) -> &str {
        &self.clause
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    fn combine(mut self, operator: &str, other: Query) -> Self {
        self.clause = format!("({}) {operator} ({})", self.clause, other.clause);
        self.params.extend(other.params);
        self
    }
}

/// One sort criterion; several are applied in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDescriptor {
    pub key: String,
    pub ascending: bool,
}

impl SortDescriptor {
    pub fn ascending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ascending: true,
        }
    }

    pub fn descending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ascending: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Query;
    use rusqlite::types::Value;

    #[test]
    fn composition_keeps_parameter_order() {
        let query = Query::eq("name", "ada".to_string())
            .and(Query::new("age > ?", [Value::Integer(30)]));
        assert_eq!(query.clause(), "(\"name\" = ?) AND (age > ?)");
        assert_eq!(
            query.params(),
            &[Value::Text("ada".to_string()), Value::Integer(30)]
        );
    }

    #[test]
    fn empty_any_of_matches_nothing() {
        let query = Query::any_of("remote_id", Vec::new());
        assert_eq!(query.clause(), "0");
        assert!(query.params().is_empty());
    }

    #[test]
    fn any_of_binds_every_value() {
        let query = Query::any_of("remote_id", [Value::Integer(1), Value::Integer(2)]);
        assert_eq!(query.clause(), "\"remote_id\" IN (?, ?)");
        assert_eq!(query.params().len(), 2);
    }
}
