//! MySQL engine
//!
//! Everything goes through the `mysql` and `mysqldump` client tools in batch
//! mode (`-N -B`: tab separated, no header). The password travels in
//! `MYSQL_PWD` so it never shows up in a reported command line.

use super::command::{CommandRunner, Invocation};
use super::{row_line, with_precision, Dialect, Engine};
use crate::config::Settings;
use crate::error::DblResult;
use crate::introspection::{ColumnInfo, SchemaAst};
use async_trait::async_trait;
use tracing::{debug, info};

pub struct MysqlEngine {
    host: String,
    port: u16,
    user: String,
    password: String,
    runner: CommandRunner,
}

impl MysqlEngine {
    pub fn new(settings: &Settings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            user: settings.user.clone(),
            password: settings.password.clone(),
            runner: CommandRunner::new(settings.command_timeout(), settings.container_name.clone()),
        }
    }

    fn tool(&self, program: &str) -> Invocation {
        Invocation::new(program)
            .arg(format!("-h{}", self.host))
            .arg(format!("-P{}", self.port))
            .arg(format!("-u{}", self.user))
            .env("MYSQL_PWD", self.password.clone())
    }

    /// Table DDL without the leading `DROP TABLE IF EXISTS` mysqldump adds by default
    fn create_dump(&self, db: &str, table: &str) -> Invocation {
        self.tool("mysqldump").args([
            "--no-data",
            "--skip-add-drop-table",
            "--skip-comments",
            db,
            table,
        ])
    }

    /// One `INSERT` per row, with column names
    fn data_dump(&self, db: &str, table: &str) -> Invocation {
        self.tool("mysqldump").args([
            "--no-create-info",
            "--complete-insert",
            "--skip-extended-insert",
            "--skip-comments",
            db,
            table,
        ])
    }

    /// Run a query and return its tab-separated output lines
    async fn query_lines(&self, db: Option<&str>, query: &str) -> DblResult<Vec<String>> {
        let mut invocation = self.tool("mysql").args(["-N", "-B", "-e", query]);
        if let Some(db) = db {
            invocation = invocation.arg(db);
        }
        let out = self.runner.run(invocation).await?;
        Ok(out
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.trim().is_empty())
            .map(String::from)
            .collect())
    }
}

impl Dialect for MysqlEngine {
    fn format_type(&self, column: &ColumnInfo) -> String {
        format_type(column)
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn add_column_sql(&self, table: &str, column: &str, column_type: &str) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {};",
            self.quote_ident(table),
            self.quote_ident(column),
            column_type
        )
    }

    fn alter_column_type_sql(&self, table: &str, column: &str, new_type: &str) -> String {
        format!(
            "ALTER TABLE {} MODIFY COLUMN {} {};",
            self.quote_ident(table),
            self.quote_ident(column),
            new_type
        )
    }

    fn set_not_null_sql(&self, table: &str, column: &str, column_type: &str) -> String {
        format!(
            "ALTER TABLE {} MODIFY COLUMN {} {} NOT NULL;",
            self.quote_ident(table),
            self.quote_ident(column),
            column_type
        )
    }

    fn drop_column_sql(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {};",
            self.quote_ident(table),
            self.quote_ident(column)
        )
    }
}

#[async_trait]
impl Engine for MysqlEngine {
    async fn get_tables(&self, db: &str) -> DblResult<Vec<String>> {
        let mut tables = self
            .query_lines(Some(db), "SHOW FULL TABLES WHERE Table_type = 'BASE TABLE';")
            .await?;
        for line in &mut tables {
            if let Some((name, _)) = line.split_once('\t') {
                *line = name.to_string();
            }
        }
        tables.sort();
        Ok(tables)
    }

    async fn inspect(&self, db: &str) -> DblResult<SchemaAst> {
        let query = "SELECT TABLE_NAME, COLUMN_NAME, DATA_TYPE, IS_NULLABLE, COLUMN_DEFAULT, \
                     CHARACTER_MAXIMUM_LENGTH, NUMERIC_PRECISION, NUMERIC_SCALE \
                     FROM INFORMATION_SCHEMA.COLUMNS \
                     WHERE TABLE_SCHEMA = DATABASE() \
                     ORDER BY TABLE_NAME, ORDINAL_POSITION;";
        let lines = self.query_lines(Some(db), query).await?;
        let schema = parse_columns(&lines);
        debug!("Introspected {} tables in {}", schema.len(), db);
        Ok(schema)
    }

    async fn dump_create(&self, db: &str, table: &str) -> DblResult<String> {
        let sql = self.runner.run(self.create_dump(db, table)).await?;
        Ok(sql.replacen("CREATE TABLE ", "CREATE TABLE IF NOT EXISTS ", 1))
    }

    async fn dump_data(&self, db: &str, table: &str) -> DblResult<String> {
        self.runner.run(self.data_dump(db, table)).await
    }

    async fn get_primary_keys(&self, db: &str, table: &str) -> DblResult<Vec<String>> {
        let query = format!(
            "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = '{}' AND CONSTRAINT_NAME = 'PRIMARY' \
             ORDER BY ORDINAL_POSITION;",
            table.replace('\'', "''")
        );
        self.query_lines(Some(db), &query).await
    }

    async fn select_ordered(
        &self,
        db: &str,
        table: &str,
        order_by: &[String],
    ) -> DblResult<Vec<String>> {
        let order = if order_by.is_empty() {
            "1".to_string()
        } else {
            order_by
                .iter()
                .map(|c| self.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let query = format!(
            "SELECT * FROM {} ORDER BY {};",
            self.quote_ident(table),
            order
        );
        // Batch mode escapes tabs inside values, so splitting on tab is exact.
        let lines = self.query_lines(Some(db), &query).await?;
        Ok(lines
            .iter()
            .map(|line| row_line(line.split('\t').map(|v| Some(v).filter(|v| *v != "NULL"))))
            .collect())
    }

    async fn execute_script(&self, db: &str, sql: &str) -> DblResult<()> {
        self.runner
            .run(self.tool("mysql").arg(db).stdin(sql))
            .await?;
        Ok(())
    }

    async fn drop_db(&self, db: &str) -> DblResult<()> {
        self.query_lines(None, &format!("DROP DATABASE IF EXISTS {};", self.quote_ident(db)))
            .await?;
        info!("Dropped database {}", db);
        Ok(())
    }

    async fn create_db(&self, db: &str) -> DblResult<()> {
        self.query_lines(None, &format!("CREATE DATABASE {};", self.quote_ident(db)))
            .await?;
        Ok(())
    }

    async fn clone_db(&self, source: &str, target: &str) -> DblResult<()> {
        // MySQL has no template databases; cloning is always dump + restore.
        info!("Cloning {} -> {}", source, target);
        self.create_db(target).await?;
        self.copy_via_dump(source, target).await
    }

    async fn copy_via_dump(&self, source: &str, target: &str) -> DblResult<()> {
        let dump = self
            .runner
            .run(self.tool("mysqldump").arg(source))
            .await?;
        self.execute_script(target, &dump).await
    }
}

/// MySQL type signature as it would appear in DDL
pub fn format_type(column: &ColumnInfo) -> String {
    let data_type = column.data_type.as_str();
    match data_type {
        "varchar" | "char" => match column.length {
            Some(len) => format!("{}({})", data_type, len),
            None => data_type.to_string(),
        },
        "decimal" | "numeric" => with_precision(data_type, column),
        other => other.to_string(),
    }
}

fn parse_optional_int(value: Option<&str>) -> Option<i64> {
    value
        .filter(|v| !v.is_empty() && *v != "NULL")
        .and_then(|v| v.parse().ok())
}

/// Parse `-N -B` output of the information schema query
fn parse_columns(lines: &[String]) -> SchemaAst {
    let mut schema = SchemaAst::new();
    for line in lines {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 8 {
            continue;
        }
        let default = Some(parts[4]).filter(|v| *v != "NULL").map(String::from);
        schema.insert_column(
            parts[0],
            parts[1],
            ColumnInfo {
                data_type: parts[2].to_string(),
                nullable: parts[3] == "YES",
                default,
                length: parse_optional_int(Some(parts[5])),
                precision: parse_optional_int(Some(parts[6])),
                scale: parse_optional_int(Some(parts[7])),
            },
        );
    }
    schema
}
