//! In-memory engine for tests
//!
//! Databases are maps of tables holding column facts, a primary key and text
//! rows. Scripts are recorded rather than interpreted.

use super::{postgres, row_line, Dialect, Engine};
use crate::error::{DblError, DblResult};
use crate::introspection::{ColumnInfo, SchemaAst, TableColumns};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemTable {
    pub columns: TableColumns,
    pub primary_key: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

type Database = BTreeMap<String, MemTable>;

#[derive(Default)]
struct State {
    databases: BTreeMap<String, Database>,
    scripts: Vec<(String, String)>,
    failing_tables: HashSet<String>,
    fail_fast_clone: bool,
    fail_inspect: bool,
    /// Wrap data dumps in a per-call `\restrict` pair, as recent pg_dump does
    restrict_banner: bool,
    dumps_taken: usize,
}

#[derive(Default)]
pub struct MemoryEngine {
    state: Mutex<State>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    read_delay: Option<Duration>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every row read sleep, so concurrent reads overlap
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn create_table(&self, db: &str, table: &str, columns: &[(&str, ColumnInfo)], pk: &[&str]) {
        let mut state = self.state();
        let database = state.databases.entry(db.to_string()).or_default();
        database.insert(
            table.to_string(),
            MemTable {
                columns: columns
                    .iter()
                    .map(|(name, info)| (name.to_string(), info.clone()))
                    .collect(),
                primary_key: pk.iter().map(|c| c.to_string()).collect(),
                rows: Vec::new(),
            },
        );
    }

    pub fn add_column(&self, db: &str, table: &str, column: &str, info: ColumnInfo) {
        let mut state = self.state();
        let table = state
            .databases
            .get_mut(db)
            .and_then(|d| d.get_mut(table))
            .unwrap();
        table.columns.insert(column.to_string(), info);
    }

    pub fn insert_row(&self, db: &str, table: &str, row: &[&str]) {
        let mut state = self.state();
        let table = state
            .databases
            .get_mut(db)
            .and_then(|d| d.get_mut(table))
            .unwrap();
        table.rows.push(row.iter().map(|v| v.to_string()).collect());
    }

    pub fn fail_reads_of(&self, table: &str) {
        self.state().failing_tables.insert(table.to_string());
    }

    pub fn fail_fast_clone(&self) {
        self.state().fail_fast_clone = true;
    }

    pub fn fail_inspect(&self) {
        self.state().fail_inspect = true;
    }

    pub fn emit_restrict_banner(&self) {
        self.state().restrict_banner = true;
    }

    pub fn has_db(&self, db: &str) -> bool {
        self.state().databases.contains_key(db)
    }

    pub fn databases(&self) -> Vec<String> {
        self.state().databases.keys().cloned().collect()
    }

    /// Scripts executed so far, as (database, sql)
    pub fn scripts(&self) -> Vec<(String, String)> {
        self.state().scripts.clone()
    }

    pub fn max_concurrent_reads(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn table(&self, db: &str, table: &str) -> DblResult<MemTable> {
        let state = self.state();
        if state.failing_tables.contains(table) {
            return Err(DblError::Engine {
                command: format!("read {}.{}", db, table),
                diagnostics: "permission denied".to_string(),
            });
        }
        state
            .databases
            .get(db)
            .and_then(|d| d.get(table))
            .cloned()
            .ok_or_else(|| DblError::Engine {
                command: format!("read {}.{}", db, table),
                diagnostics: "no such table".to_string(),
            })
    }

    fn database(&self, db: &str) -> DblResult<Database> {
        self.state()
            .databases
            .get(db)
            .cloned()
            .ok_or_else(|| DblError::Engine {
                command: format!("connect {}", db),
                diagnostics: format!("database \"{}\" does not exist", db),
            })
    }

    async fn track_read(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn render_insert(table: &str, row: &[String]) -> String {
    format!(
        "INSERT INTO {} VALUES ({});",
        table,
        row.iter()
            .map(|v| format!("'{}'", v))
            .collect::<Vec<_>>()
            .join(", ")
    )
}

impl Dialect for MemoryEngine {
    fn format_type(&self, column: &ColumnInfo) -> String {
        postgres::format_type(column)
    }

    fn quote_ident(&self, name: &str) -> String {
        postgres::quote_ident(name)
    }

    fn add_column_sql(&self, table: &str, column: &str, column_type: &str) -> String {
        format!("ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {};", table, column, column_type)
    }

    fn alter_column_type_sql(&self, table: &str, column: &str, new_type: &str) -> String {
        format!("ALTER TABLE {} ALTER COLUMN {} TYPE {};", table, column, new_type)
    }

    fn set_not_null_sql(&self, table: &str, column: &str, _column_type: &str) -> String {
        format!("ALTER TABLE {} ALTER COLUMN {} SET NOT NULL;", table, column)
    }

    fn drop_column_sql(&self, table: &str, column: &str) -> String {
        format!("ALTER TABLE {} DROP COLUMN {};", table, column)
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn get_tables(&self, db: &str) -> DblResult<Vec<String>> {
        Ok(self.database(db)?.keys().cloned().collect())
    }

    async fn inspect(&self, db: &str) -> DblResult<SchemaAst> {
        if self.state().fail_inspect {
            return Err(DblError::Engine {
                command: format!("inspect {}", db),
                diagnostics: "connection refused".to_string(),
            });
        }
        let mut schema = SchemaAst::new();
        for (name, table) in self.database(db)? {
            for (column, info) in table.columns {
                schema.insert_column(&name, &column, info);
            }
        }
        Ok(schema)
    }

    async fn dump_create(&self, db: &str, table: &str) -> DblResult<String> {
        let table_def = self.table(db, table)?;
        let columns = table_def
            .columns
            .iter()
            .map(|(name, info)| {
                let null = if info.nullable { "" } else { " NOT NULL" };
                format!("    {} {}{}", name, postgres::format_type(info), null)
            })
            .collect::<Vec<_>>()
            .join(",\n");
        Ok(format!("CREATE TABLE IF NOT EXISTS {} (\n{}\n);", table, columns))
    }

    async fn dump_data(&self, db: &str, table: &str) -> DblResult<String> {
        self.track_read().await;
        let table_def = self.table(db, table)?;
        let body = table_def
            .rows
            .iter()
            .map(|row| format!("  {}  ", render_insert(table, row)))
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut state = self.state();
        if !state.restrict_banner {
            return Ok(body);
        }
        state.dumps_taken += 1;
        let key = format!("k{}", state.dumps_taken);
        Ok(format!("\\restrict {}\n{}\n\\unrestrict {}", key, body, key))
    }

    async fn get_primary_keys(&self, db: &str, table: &str) -> DblResult<Vec<String>> {
        Ok(self.table(db, table)?.primary_key)
    }

    async fn select_ordered(
        &self,
        db: &str,
        table: &str,
        order_by: &[String],
    ) -> DblResult<Vec<String>> {
        self.track_read().await;
        let table_def = self.table(db, table)?;
        let names: Vec<&String> = table_def.columns.keys().collect();
        let key_positions: Vec<usize> = order_by
            .iter()
            .filter_map(|k| names.iter().position(|n| *n == k))
            .collect();
        let mut rows = table_def.rows.clone();
        rows.sort_by(|a, b| {
            key_positions
                .iter()
                .map(|&i| a.get(i).cmp(&b.get(i)))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(rows
            .iter()
            .map(|r| row_line(r.iter().map(|v| Some(v.as_str()))))
            .collect())
    }

    async fn execute_script(&self, db: &str, sql: &str) -> DblResult<()> {
        self.database(db)?;
        self.state().scripts.push((db.to_string(), sql.to_string()));
        Ok(())
    }

    async fn drop_db(&self, db: &str) -> DblResult<()> {
        self.state().databases.remove(db);
        Ok(())
    }

    async fn create_db(&self, db: &str) -> DblResult<()> {
        let mut state = self.state();
        if state.databases.contains_key(db) {
            return Err(DblError::Engine {
                command: format!("CREATE DATABASE {}", db),
                diagnostics: format!("database \"{}\" already exists", db),
            });
        }
        state.databases.insert(db.to_string(), Database::new());
        Ok(())
    }

    async fn clone_db(&self, source: &str, target: &str) -> DblResult<()> {
        if self.state().fail_fast_clone {
            return Err(DblError::Engine {
                command: format!("CREATE DATABASE {} WITH TEMPLATE {}", target, source),
                diagnostics: "source database is being accessed by other users".to_string(),
            });
        }
        self.create_db(target).await?;
        self.copy_via_dump(source, target).await
    }

    async fn copy_via_dump(&self, source: &str, target: &str) -> DblResult<()> {
        let copy = self.database(source)?;
        let mut state = self.state();
        let target = state.databases.get_mut(target).ok_or_else(|| DblError::Engine {
            command: format!("restore {}", target),
            diagnostics: "target database does not exist".to_string(),
        })?;
        *target = copy;
        Ok(())
    }
}
