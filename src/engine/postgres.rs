//! PostgreSQL engine
//!
//! Introspection, row reads and database lifecycle go through pooled
//! tokio-postgres connections (one pool per database name). Dumps and script
//! replay use `pg_dump`/`psql`, since layer files are psql scripts.

use super::command::{CommandRunner, Invocation};
use super::{row_line, with_precision, Dialect, Engine};
use crate::config::Settings;
use crate::error::{DblError, DblResult};
use crate::introspection::{ColumnInfo, SchemaAst};
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio_postgres::{NoTls, SimpleQueryMessage};
use tracing::{debug, info};

const ADMIN_DB: &str = "postgres";

static BARE_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("valid identifier pattern"));

/// Connection parameters shared by pooled clients and client tools
#[derive(Debug, Clone)]
struct ConnectionParams {
    host: String,
    port: u16,
    user: String,
    password: String,
}

pub struct PostgresEngine {
    params: ConnectionParams,
    runner: CommandRunner,
    max_pool_size: usize,
    connect_timeout: Duration,
    pools: Mutex<HashMap<String, Pool>>,
}

impl PostgresEngine {
    pub fn new(settings: &Settings) -> DblResult<Self> {
        Ok(Self {
            params: ConnectionParams {
                host: settings.host.clone(),
                port: settings.port,
                user: settings.user.clone(),
                password: settings.password.clone(),
            },
            runner: CommandRunner::new(settings.command_timeout(), settings.container_name.clone()),
            max_pool_size: settings.max_workers.max(1),
            connect_timeout: Duration::from_secs(10),
            pools: Mutex::new(HashMap::new()),
        })
    }

    /// Get (or lazily create) the pool for one database
    fn pool(&self, db: &str) -> DblResult<Pool> {
        let mut pools = self
            .pools
            .lock()
            .map_err(|_| DblError::Config("connection pool registry poisoned".to_string()))?;
        if let Some(pool) = pools.get(db) {
            return Ok(pool.clone());
        }
        let pool = self.create_pool(db)?;
        pools.insert(db.to_string(), pool.clone());
        Ok(pool)
    }

    /// Create a connection pool for the given database
    fn create_pool(&self, db: &str) -> DblResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.params.host.clone());
        cfg.port = Some(self.params.port);
        cfg.user = Some(self.params.user.clone());
        cfg.password = Some(self.params.password.clone());
        cfg.dbname = Some(db.to_string());
        cfg.connect_timeout = Some(self.connect_timeout);
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(self.max_pool_size));

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DblError::Config(format!("Failed to create pool: {}", e)))
    }

    /// Close our own connections to `db` so it can be dropped or used as a template
    fn evict(&self, db: &str) {
        if let Ok(mut pools) = self.pools.lock() {
            if let Some(pool) = pools.remove(db) {
                pool.close();
                debug!("Closed pool for {}", db);
            }
        }
    }

    /// Terminate foreign sessions on `db` (required for DROP)
    async fn terminate_connections(&self, db: &str) -> DblResult<()> {
        let client = self.pool(ADMIN_DB)?.get().await?;
        client
            .execute(
                "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
                 WHERE datname = $1 AND pid <> pg_backend_pid()",
                &[&db],
            )
            .await?;
        Ok(())
    }

    fn tool(&self, program: &str, db: &str) -> Invocation {
        Invocation::new(program)
            .args(["-h", self.params.host.as_str()])
            .args(["-p".to_string(), self.params.port.to_string()])
            .args(["-U", self.params.user.as_str()])
            .env("PGPASSWORD", self.params.password.clone())
            .args(["-d", db])
    }

    fn psql(&self, db: &str) -> Invocation {
        self.tool("psql", db).args(["-q", "-v", "ON_ERROR_STOP=1"])
    }

    fn pg_dump(&self, db: &str) -> Invocation {
        self.tool("pg_dump", db)
    }
}

impl Dialect for PostgresEngine {
    fn format_type(&self, column: &ColumnInfo) -> String {
        format_type(column)
    }

    fn quote_ident(&self, name: &str) -> String {
        quote_ident(name)
    }

    fn add_column_sql(&self, table: &str, column: &str, column_type: &str) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {};",
            quote_ident(table),
            quote_ident(column),
            column_type
        )
    }

    fn alter_column_type_sql(&self, table: &str, column: &str, new_type: &str) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {};",
            quote_ident(table),
            quote_ident(column),
            new_type
        )
    }

    fn set_not_null_sql(&self, table: &str, column: &str, _column_type: &str) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL;",
            quote_ident(table),
            quote_ident(column)
        )
    }

    fn drop_column_sql(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {};",
            quote_ident(table),
            quote_ident(column)
        )
    }
}

#[async_trait]
impl Engine for PostgresEngine {
    async fn get_tables(&self, db: &str) -> DblResult<Vec<String>> {
        let client = self.pool(db)?.get().await?;
        let rows = client
            .query(
                "SELECT tablename::text FROM pg_tables WHERE schemaname = 'public' ORDER BY tablename",
                &[],
            )
            .await?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn inspect(&self, db: &str) -> DblResult<SchemaAst> {
        let client = self.pool(db)?.get().await?;
        let query = r#"
            SELECT
                c.table_name::text,
                c.column_name::text,
                c.data_type::text,
                c.is_nullable::text,
                c.column_default::text,
                c.character_maximum_length::int,
                c.numeric_precision::int,
                c.numeric_scale::int
            FROM information_schema.columns c
            JOIN information_schema.tables t
                ON t.table_schema = c.table_schema
                AND t.table_name = c.table_name
            WHERE c.table_schema = 'public'
              AND t.table_type = 'BASE TABLE'
            ORDER BY c.table_name, c.ordinal_position
        "#;

        let rows = client.query(query, &[]).await?;

        let mut schema = SchemaAst::new();
        for row in &rows {
            let table: String = row.get(0);
            let column: String = row.get(1);
            let info = ColumnInfo {
                data_type: row.get(2),
                nullable: row.get::<_, String>(3) == "YES",
                default: row.get(4),
                length: row.get::<_, Option<i32>>(5).map(i64::from),
                precision: row.get::<_, Option<i32>>(6).map(i64::from),
                scale: row.get::<_, Option<i32>>(7).map(i64::from),
            };
            schema.insert_column(&table, &column, info);
        }

        debug!("Introspected {} tables in {}", schema.len(), db);
        Ok(schema)
    }

    async fn dump_create(&self, db: &str, table: &str) -> DblResult<String> {
        let sql = self
            .runner
            .run(
                self.pg_dump(db)
                    .arg("--schema-only")
                    .arg(format!("--table=public.{}", quote_ident(table))),
            )
            .await?;
        Ok(clean_dump(&sql).replacen("CREATE TABLE ", "CREATE TABLE IF NOT EXISTS ", 1))
    }

    async fn dump_data(&self, db: &str, table: &str) -> DblResult<String> {
        let sql = self
            .runner
            .run(
                self.pg_dump(db)
                    .args(["--data-only", "--column-inserts"])
                    .arg(format!("--table=public.{}", quote_ident(table))),
            )
            .await?;
        Ok(clean_dump(&sql))
    }

    async fn get_primary_keys(&self, db: &str, table: &str) -> DblResult<Vec<String>> {
        let client = self.pool(db)?.get().await?;
        let rows = client
            .query(
                r#"
                SELECT a.attname::text
                FROM pg_index i
                JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
                WHERE i.indrelid = to_regclass($1) AND i.indisprimary
                ORDER BY array_position(i.indkey, a.attnum)
                "#,
                &[&format!("public.{}", quote_ident(table))],
            )
            .await?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn select_ordered(
        &self,
        db: &str,
        table: &str,
        order_by: &[String],
    ) -> DblResult<Vec<String>> {
        let client = self.pool(db)?.get().await?;
        let order = if order_by.is_empty() {
            "1".to_string()
        } else {
            order_by
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let query = format!("SELECT * FROM {} ORDER BY {}", quote_ident(table), order);

        // Simple protocol returns every value as text, whatever its type.
        let messages = client.simple_query(&query).await?;
        let lines = messages
            .iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::Row(row) => Some(row_line((0..row.len()).map(|i| row.get(i)))),
                _ => None,
            })
            .collect();
        Ok(lines)
    }

    async fn execute_script(&self, db: &str, sql: &str) -> DblResult<()> {
        self.runner.run(self.psql(db).stdin(sql)).await?;
        Ok(())
    }

    async fn drop_db(&self, db: &str) -> DblResult<()> {
        self.evict(db);
        self.terminate_connections(db).await?;
        let client = self.pool(ADMIN_DB)?.get().await?;
        client
            .batch_execute(&format!("DROP DATABASE IF EXISTS {}", quote_ident(db)))
            .await?;
        info!("Dropped database {}", db);
        Ok(())
    }

    async fn create_db(&self, db: &str) -> DblResult<()> {
        let client = self.pool(ADMIN_DB)?.get().await?;
        client
            .batch_execute(&format!("CREATE DATABASE {}", quote_ident(db)))
            .await?;
        Ok(())
    }

    /// Fails while other sessions are connected to `source`; the caller falls
    /// back to dump + restore rather than disconnecting them
    async fn clone_db(&self, source: &str, target: &str) -> DblResult<()> {
        info!("Cloning {} -> {}", source, target);
        self.evict(source);
        let client = self.pool(ADMIN_DB)?.get().await?;
        client
            .batch_execute(&format!(
                "CREATE DATABASE {} WITH TEMPLATE {}",
                quote_ident(target),
                quote_ident(source)
            ))
            .await?;
        Ok(())
    }

    async fn copy_via_dump(&self, source: &str, target: &str) -> DblResult<()> {
        let dump = self.runner.run(self.pg_dump(source)).await?;
        self.runner.run(self.psql(target).stdin(dump)).await?;
        Ok(())
    }
}

/// Strip the parts of `pg_dump` output that must not end up in a layer
///
/// psql meta-commands (`\restrict <random key>` and its closing pair) change on
/// every run, and the emptied `search_path` would break every unqualified
/// statement that follows the fragment in the same script.
pub fn clean_dump(sql: &str) -> String {
    sql.lines()
        .filter(|line| {
            let line = line.trim_start();
            !line.starts_with('\\') && !line.contains("set_config('search_path'")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Postgres type signature as it would appear in DDL
pub fn format_type(column: &ColumnInfo) -> String {
    match column.data_type.as_str() {
        "character varying" | "varchar" => match column.length {
            Some(len) => format!("character varying({})", len),
            None => "character varying".to_string(),
        },
        "character" | "char" => match column.length {
            Some(len) => format!("character({})", len),
            None => "character".to_string(),
        },
        "numeric" | "decimal" => with_precision("numeric", column),
        other => other.to_string(),
    }
}

/// Quote an identifier only when Postgres would otherwise fold or reject it
pub fn quote_ident(name: &str) -> String {
    if BARE_IDENT.is_match(name) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}
