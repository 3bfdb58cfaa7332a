//! Schema Introspection Module
//!
//! The schema AST every engine produces: table -> column -> column facts.
//! Keys are kept in `BTreeMap`s so the canonical serialization (and therefore
//! the schema digest) does not depend on introspection order.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Column facts as reported by the information schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    #[serde(rename = "type")]
    pub data_type: String,
    pub length: Option<i64>,
    pub precision: Option<i64>,
    pub scale: Option<i64>,
    pub nullable: bool,
    pub default: Option<String>,
}

impl ColumnInfo {
    /// A nullable column of the given type with no modifiers
    pub fn new(data_type: impl Into<String>) -> Self {
        Self {
            data_type: data_type.into(),
            length: None,
            precision: None,
            scale: None,
            nullable: true,
            default: None,
        }
    }

    pub fn with_length(mut self, length: i64) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_precision(mut self, precision: i64, scale: Option<i64>) -> Self {
        self.precision = Some(precision);
        self.scale = scale;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Columns of one table, keyed by column name
pub type TableColumns = BTreeMap<String, ColumnInfo>;

/// Complete schema snapshot of one database
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaAst {
    tables: BTreeMap<String, TableColumns>,
}

impl SchemaAst {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a column, creating the table entry on first sight
    pub fn insert_column(&mut self, table: &str, column: &str, info: ColumnInfo) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(column.to_string(), info);
    }

    /// Builder form of `insert_column`, handy for fixtures
    pub fn with_column(mut self, table: &str, column: &str, info: ColumnInfo) -> Self {
        self.insert_column(table, column, info);
        self
    }

    pub fn table(&self, name: &str) -> Option<&TableColumns> {
        self.tables.get(name)
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Table names in lexicographic order
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Compute checksum from the canonical (sorted-key) serialization
    pub fn compute_checksum(&self) -> String {
        // BTreeMap keys serialize in order, so this JSON is canonical.
        let canonical = serde_json::to_string(&self.tables).unwrap_or_default();
        sha256_hex(canonical.as_bytes())
    }
}

/// Hex-encoded SHA-256 digest
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
