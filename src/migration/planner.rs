//! Migration Planner
//!
//! Diffs the current schema against a baseline schema and synthesizes
//! phase-annotated SQL. Tables and columns are walked in lexicographic order
//! and the output is grouped as:
//!
//! 1. expand: new tables, then new columns per table
//! 2. type changes (commented, risky)
//! 3. contract: dropped columns, then dropped tables (commented)
//! 4. hardening: deferred `SET NOT NULL` for new non-nullable columns (commented)
//! 5. backfill: `TRUNCATE` + re-insert per changed table, or a warning listing them
//!
//! Anything destructive stays commented until a human uncomments it.

use crate::engine::Engine;
use crate::error::DblResult;
use crate::introspection::SchemaAst;
use crate::snapshot::fingerprint::StateFingerprint;
use chrono::Local;
use tracing::info;

/// Everything the planner needs to diff two states
pub struct PlanRequest<'a> {
    /// Database the new layer is generated from
    pub active_db: &'a str,
    /// Name of the baseline, for the header
    pub baseline_label: &'a str,
    pub current: &'a SchemaAst,
    pub baseline: &'a SchemaAst,
    /// Current and baseline fingerprints, when data should be compared
    pub data: Option<(&'a StateFingerprint, &'a StateFingerprint)>,
    /// Emit backfill statements instead of a warning for changed tables
    pub include_data: bool,
}

/// What a plan contains, for reporting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub new_tables: Vec<String>,
    pub dropped_tables: Vec<String>,
    /// `table.column`
    pub added_columns: Vec<String>,
    pub dropped_columns: Vec<String>,
    pub type_changes: Vec<String>,
    pub hardening: Vec<String>,
    pub changed_data: Vec<String>,
    pub data_included: bool,
}

/// Generated migration text
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub sql: String,
    pub summary: PlanSummary,
}

impl MigrationPlan {
    /// False when the plan is all comments, i.e. nothing to commit
    pub fn has_executable_lines(&self) -> bool {
        has_executable_lines(&self.sql)
    }
}

/// Whether any line is neither blank nor a `--` comment
pub fn has_executable_lines(sql: &str) -> bool {
    sql.lines().any(|line| {
        let line = line.trim();
        !line.is_empty() && !line.starts_with("--")
    })
}

pub struct MigrationPlanner<'a> {
    engine: &'a dyn Engine,
}

impl<'a> MigrationPlanner<'a> {
    pub fn new(engine: &'a dyn Engine) -> Self {
        Self { engine }
    }

    pub async fn plan(&self, request: &PlanRequest<'_>) -> DblResult<MigrationPlan> {
        let engine = self.engine;
        let current = request.current;
        let baseline = request.baseline;
        let mut summary = PlanSummary::default();

        let mut sql = vec![
            format!("-- DBL Migration Layer: {}", Local::now().format("%Y-%m-%d %H:%M:%S")),
            format!("-- From: {} To: {}", request.baseline_label, request.active_db),
            "-- ".to_string(),
            "-- Phases:".to_string(),
            "--   expand:   Add columns/tables (safe, no data loss)".to_string(),
            "--   backfill: Update/populate data (optional)".to_string(),
            "--   contract: Remove/constrain (careful, review)".to_string(),
            String::new(),
        ];
        let mut type_changes = Vec::new();
        let mut contract = Vec::new();
        let mut hardening = Vec::new();

        // 1. New tables
        let new_tables: Vec<&str> = current
            .table_names()
            .filter(|t| !baseline.contains_table(t))
            .collect();
        if !new_tables.is_empty() {
            sql.push("-- [EXPAND PHASE] --".to_string());
            sql.push("-- New tables (safe, no conflicts)".to_string());
            for table in &new_tables {
                sql.push("-- phase: expand".to_string());
                sql.push(engine.dump_create(request.active_db, table).await?);
                sql.push(String::new());
                summary.new_tables.push(table.to_string());
            }
        }

        // 2. Common tables: columns added, dropped, retyped
        for table in current.table_names() {
            let (Some(now), Some(before)) = (current.table(table), baseline.table(table)) else {
                continue;
            };

            let added: Vec<_> = now.iter().filter(|(c, _)| !before.contains_key(*c)).collect();
            if !added.is_empty() {
                sql.push(format!("-- [EXPAND in {}] --", table));
                for (column, info) in added {
                    let column_type = engine.format_type(info);
                    sql.push("-- phase: expand".to_string());
                    sql.push(engine.add_column_sql(table, column, &column_type));
                    summary.added_columns.push(format!("{}.{}", table, column));

                    if !info.nullable {
                        hardening.push(format!("-- [phase: contract] Make {}.{} NOT NULL", table, column));
                        hardening.push(format!(
                            "-- {}",
                            engine.set_not_null_sql(table, column, &column_type)
                        ));
                        summary.hardening.push(format!("{}.{}", table, column));
                    }
                }
                sql.push(String::new());
            }

            for (column, info) in now {
                let Some(old) = before.get(column) else {
                    continue;
                };
                let new_sig = engine.format_type(info);
                let old_sig = engine.format_type(old);
                if new_sig != old_sig {
                    type_changes.push("-- phase: contract (risky type change)".to_string());
                    type_changes.push(format!(
                        "-- [TYPE CHANGE] {}.{}: {} -> {}",
                        table, column, old_sig, new_sig
                    ));
                    type_changes.push(format!(
                        "-- {}",
                        engine.alter_column_type_sql(table, column, &new_sig)
                    ));
                    summary.type_changes.push(format!("{}.{}", table, column));
                }
            }

            let dropped: Vec<&String> = before.keys().filter(|c| !now.contains_key(*c)).collect();
            if !dropped.is_empty() {
                contract.push(format!("-- [CONTRACT in {}] --", table));
                for column in dropped {
                    contract.push("-- phase: contract (dangerous, review)".to_string());
                    contract.push(format!("-- [DANGEROUS] Dropped column: {}", column));
                    contract.push(format!("-- {}", engine.drop_column_sql(table, column)));
                    summary.dropped_columns.push(format!("{}.{}", table, column));
                }
            }
        }

        if !type_changes.is_empty() {
            sql.push("-- [TYPE CHANGES - REVIEW CAREFULLY] --".to_string());
            sql.append(&mut type_changes);
            sql.push(String::new());
        }

        // 3. Removed columns and tables
        if !contract.is_empty() {
            sql.append(&mut contract);
            sql.push(String::new());
        }
        let dropped_tables: Vec<&str> = baseline
            .table_names()
            .filter(|t| !current.contains_table(t))
            .collect();
        if !dropped_tables.is_empty() {
            sql.push("-- [CONTRACT PHASE - DROPPED TABLES] --".to_string());
            for table in dropped_tables {
                sql.push("-- phase: contract (very dangerous)".to_string());
                sql.push(format!("-- [DANGEROUS] Table dropped in active DB: {}", table));
                sql.push(format!("-- {}", engine.drop_table_sql(table)));
                summary.dropped_tables.push(table.to_string());
            }
            sql.push(String::new());
        }

        // 4. Hardening
        if !hardening.is_empty() {
            sql.push("-- [CONTRACT PHASE - HARDENING / CONSTRAINTS] --".to_string());
            sql.push("-- These are deferred constraints. Uncomment after verifying data.".to_string());
            sql.append(&mut hardening);
            sql.push(String::new());
        }

        // 5. Data
        if let Some((now, before)) = request.data {
            let candidates = current.table_names().filter(|t| {
                baseline.contains_table(t)
                    && (now.data_hashes.contains_key(*t) || before.data_hashes.contains_key(*t))
            });
            summary.changed_data = now.changed_tables(before, candidates);
            summary.data_included = request.include_data;

            if !summary.changed_data.is_empty() {
                if request.include_data {
                    sql.push("-- [BACKFILL PHASE - DATA SYNC] --".to_string());
                    sql.push("-- Data operations are destructive (TRUNCATE).".to_string());
                    sql.push("-- Ensure these are lookup/reference tables only.".to_string());
                    for table in &summary.changed_data {
                        sql.push("-- phase: backfill (data-only, optional)".to_string());
                        sql.push(format!("-- Data changed in: {}", table));
                        sql.push(engine.truncate_sql(table));
                        sql.push(engine.dump_data(request.active_db, table).await?);
                        sql.push(String::new());
                    }
                } else {
                    sql.push("-- [DATA CHANGES DETECTED] --".to_string());
                    sql.push("-- The following tables have changed data:".to_string());
                    for table in &summary.changed_data {
                        sql.push(format!("--   {}", table));
                    }
                    sql.push("-- To include data sync, use: dbl commit -m \"msg\" --with-data".to_string());
                    sql.push(String::new());
                }
            }
        }

        info!(
            "Planned {} new table(s), {} new column(s), {} type change(s), {} changed data table(s)",
            summary.new_tables.len(),
            summary.added_columns.len(),
            summary.type_changes.len(),
            summary.changed_data.len()
        );

        Ok(MigrationPlan {
            sql: sql.join("\n"),
            summary,
        })
    }
}
