//! State Diff
//!
//! Compares two fingerprints and classifies every table whose data digest
//! differs. This is what `dbl diff` reports.

use crate::snapshot::fingerprint::{StateFingerprint, READ_ERROR};
use std::collections::BTreeSet;

/// How a table's data differs from the baseline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableChange {
    /// One side could not be read
    ReadFailed,
    /// Tracked in the baseline but gone now
    Dropped,
    /// Tracked now but absent from the baseline
    Added,
    DataChanged { current: String, baseline: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDiff {
    pub table: String,
    pub change: TableChange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDiff {
    pub schema_changed: bool,
    pub current_schema: String,
    pub baseline_schema: String,
    pub tables: Vec<TableDiff>,
}

impl StateDiff {
    pub fn compare(current: &StateFingerprint, baseline: &StateFingerprint) -> Self {
        let names: BTreeSet<&String> = current
            .data_hashes
            .keys()
            .chain(baseline.data_hashes.keys())
            .collect();

        let mut tables = Vec::new();
        for table in names {
            let now = current.data_hash(table);
            let before = baseline.data_hash(table);
            if now == before {
                continue;
            }
            let change = match (now, before) {
                (Some(READ_ERROR), _) | (_, Some(READ_ERROR)) => TableChange::ReadFailed,
                (None, _) => TableChange::Dropped,
                (_, None) => TableChange::Added,
                (Some(now), Some(before)) => TableChange::DataChanged {
                    current: now.to_string(),
                    baseline: before.to_string(),
                },
            };
            tables.push(TableDiff {
                table: table.clone(),
                change,
            });
        }

        Self {
            schema_changed: current.schema_hash != baseline.schema_hash,
            current_schema: current.schema_hash.clone(),
            baseline_schema: baseline.schema_hash.clone(),
            tables,
        }
    }

    pub fn has_changes(&self) -> bool {
        self.schema_changed || !self.tables.is_empty()
    }

    /// e.g. "schema, 2 table(s)"
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if self.schema_changed {
            parts.push("schema".to_string());
        }
        if !self.tables.is_empty() {
            parts.push(format!("{} table(s)", self.tables.len()));
        }
        parts.join(", ")
    }
}

/// First 16 characters of a digest for display
pub fn short_digest(digest: &str) -> &str {
    digest.get(..16).unwrap_or(digest)
}
