//! Relational data model: columns, schemas, rows, foreign keys.
//!
//! The data plane is stringly typed: every cell value is a `String`, and a
//! row is a map from column name to value. A row need not carry every
//! schema column; absent columns take the column default on read.

use std::collections::HashMap;

/// One column of a table schema.
///
/// Type names from `CREATE TABLE` are accepted by the parser but not stored
/// here; the engine treats all values as strings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Column {
    pub name: String,
    pub primary_key: bool,
    pub unique: bool,
    pub not_null: bool,
    /// Default value substituted for absent cells on read. Empty string
    /// means "no default".
    pub default: String,
}

impl Column {
    /// A plain unconstrained column.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Whether this column must be present in every inserted row.
    ///
    /// `primary_key` implies `unique` and `not_null`.
    pub const fn required(&self) -> bool {
        self.primary_key || self.not_null
    }
}

/// Ordered sequence of column descriptors. Column names are unique within
/// a schema; the parser rejects duplicates.
pub type Schema = Vec<Column>;

/// A row: mapping from column name to string value.
pub type Row = HashMap<String, String>;

/// Foreign-key declaration, stored as metadata on the owning table.
/// Enforcement is best-effort at insert time only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_key_is_required() {
        let col = Column {
            name: "id".to_owned(),
            primary_key: true,
            ..Column::default()
        };
        assert!(col.required());
        assert!(!Column::plain("v").required());
    }
}
