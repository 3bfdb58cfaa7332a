//! Database Engine Module
//!
//! The capability interface the core consumes: introspection, dumps, script
//! replay, database lifecycle and the dialect-specific SQL generators used by
//! the planner. The planner and the fingerprint engine only ever see
//! `dyn Engine`; concrete variants live in the submodules.

pub mod command;
#[cfg(test)]
pub mod memory;
pub mod mysql;
pub mod postgres;

use crate::config::Settings;
use crate::error::DblResult;
use crate::introspection::{ColumnInfo, SchemaAst};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use mysql::MysqlEngine;
pub use postgres::PostgresEngine;

/// Supported database products
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Postgres,
    Mysql,
}

impl EngineKind {
    pub fn default_port(&self) -> u16 {
        match self {
            EngineKind::Postgres => 5432,
            EngineKind::Mysql => 3306,
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Postgres => write!(f, "postgres"),
            EngineKind::Mysql => write!(f, "mysql"),
        }
    }
}

/// Dialect-specific SQL text generation
pub trait Dialect {
    /// Normalized type signature (length/precision/scale folded in)
    fn format_type(&self, column: &ColumnInfo) -> String;

    fn quote_ident(&self, name: &str) -> String;

    fn add_column_sql(&self, table: &str, column: &str, column_type: &str) -> String;

    fn alter_column_type_sql(&self, table: &str, column: &str, new_type: &str) -> String;

    fn set_not_null_sql(&self, table: &str, column: &str, column_type: &str) -> String;

    fn drop_column_sql(&self, table: &str, column: &str) -> String;

    fn drop_table_sql(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {};", self.quote_ident(table))
    }

    fn truncate_sql(&self, table: &str) -> String {
        format!("TRUNCATE TABLE {};", self.quote_ident(table))
    }
}

/// Introspection, DDL and DML primitives for one database product
#[async_trait]
pub trait Engine: Dialect + Send + Sync {
    /// Base tables of the database, sorted
    async fn get_tables(&self, db: &str) -> DblResult<Vec<String>>;

    async fn inspect(&self, db: &str) -> DblResult<SchemaAst>;

    /// Idempotent `CREATE TABLE IF NOT EXISTS` text for one table
    async fn dump_create(&self, db: &str, table: &str) -> DblResult<String>;

    /// Table contents as insert statements
    async fn dump_data(&self, db: &str, table: &str) -> DblResult<String>;

    /// Primary key columns in key order; empty when the table has none
    async fn get_primary_keys(&self, db: &str, table: &str) -> DblResult<Vec<String>>;

    /// All rows ordered by `order_by`, one serialized line per row
    async fn select_ordered(&self, db: &str, table: &str, order_by: &[String])
        -> DblResult<Vec<String>>;

    /// Run a SQL script (layer file, snapshot) stopping at the first error
    async fn execute_script(&self, db: &str, sql: &str) -> DblResult<()>;

    async fn drop_db(&self, db: &str) -> DblResult<()>;

    async fn create_db(&self, db: &str) -> DblResult<()>;

    /// Fast server-side clone; `target` must not exist
    async fn clone_db(&self, source: &str, target: &str) -> DblResult<()>;

    /// Slow path: dump `source` and restore it into the existing `target`
    async fn copy_via_dump(&self, source: &str, target: &str) -> DblResult<()>;
}

/// Build the engine named in the settings
pub fn connect(settings: &Settings) -> DblResult<Arc<dyn Engine>> {
    match settings.engine {
        EngineKind::Postgres => Ok(Arc::new(PostgresEngine::new(settings)?)),
        EngineKind::Mysql => Ok(Arc::new(MysqlEngine::new(settings))),
    }
}

/// One row as a JSON array of text values, `null` for SQL NULL
pub(crate) fn row_line<'a>(values: impl IntoIterator<Item = Option<&'a str>>) -> String {
    serde_json::Value::Array(
        values
            .into_iter()
            .map(|value| value.map_or(serde_json::Value::Null, |v| v.into()))
            .collect(),
    )
    .to_string()
}

/// Shared `numeric(p,s)` style formatting
pub(crate) fn with_precision(base: &str, column: &ColumnInfo) -> String {
    match (column.precision, column.scale) {
        (Some(p), Some(s)) => format!("{}({},{})", base, p, s),
        (Some(p), None) => format!("{}({})", base, p),
        _ => base.to_string(),
    }
}
