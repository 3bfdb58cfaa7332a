//! State Fingerprint Engine
//!
//! Turns a live database into a comparable digest pair: one digest over the
//! canonical schema AST plus one digest per tracked table's contents.
//!
//! Tables are hashed concurrently on a bounded pool of `min(max_workers, n)`
//! permits. Every task owns exactly one table and its result is collected by
//! table name after all tasks have joined, so the map is independent of
//! completion order. A failure while reading one table never aborts the pass:
//! it is recorded as the `read_error` sentinel.

use crate::config::Settings;
use crate::engine::Engine;
use crate::error::{DblError, DblResult};
use crate::introspection::sha256_hex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Sentinel digest for a table that could not be read
pub const READ_ERROR: &str = "read_error";

/// Sentinel digest for a table with no rows
pub const EMPTY: &str = "empty";

/// Default fingerprint worker cap
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Comparable digest pair of one database
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFingerprint {
    #[serde(rename = "schema")]
    pub schema_hash: String,
    /// table -> digest | "read_error" | "empty"
    #[serde(rename = "data", default)]
    pub data_hashes: BTreeMap<String, String>,
    /// Tables hashed from an unordered dump because they lack a primary key
    #[serde(skip)]
    pub tables_without_pk: BTreeSet<String>,
}

impl StateFingerprint {
    pub fn data_hash(&self, table: &str) -> Option<&str> {
        self.data_hashes.get(table).map(String::as_str)
    }

    /// Tables whose data digest differs from `other`, restricted to `candidates`
    pub fn changed_tables<'a>(
        &self,
        other: &StateFingerprint,
        candidates: impl IntoIterator<Item = &'a str>,
    ) -> Vec<String> {
        let mut changed: Vec<String> = candidates
            .into_iter()
            .filter(|t| self.data_hash(t) != other.data_hash(t))
            .map(String::from)
            .collect();
        changed.sort();
        changed.dedup();
        changed
    }
}

/// Which tables get a data digest, and how many are read at once
#[derive(Debug, Clone)]
pub struct TrackingPolicy {
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
    /// Extra restriction (e.g. `dbl diff --tables`)
    pub only: Option<Vec<String>>,
    pub max_workers: usize,
}

impl Default for TrackingPolicy {
    fn default() -> Self {
        Self {
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            only: None,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

impl TrackingPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            whitelist: settings.track_tables.clone(),
            blacklist: settings.ignore_tables.clone(),
            only: None,
            max_workers: settings.max_workers,
        }
    }

    pub fn restrict_to(mut self, tables: Vec<String>) -> Self {
        self.only = Some(tables);
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Whether a single table would be tracked, given that it exists
    pub fn tracks(&self, table: &str) -> bool {
        let listed = if self.whitelist.is_empty() {
            !self.blacklist.iter().any(|t| t == table)
        } else {
            self.whitelist.iter().any(|t| t == table)
        };
        let allowed = self
            .only
            .as_ref()
            .map_or(true, |only| only.iter().any(|t| t == table));
        listed && allowed
    }

    /// Tracked subset of `existing`, sorted and deduplicated
    pub fn resolve<'a>(&self, existing: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut tables: Vec<String> = existing
            .into_iter()
            .filter(|t| self.tracks(t))
            .map(String::from)
            .collect();
        tables.sort();
        tables.dedup();
        tables
    }
}

/// Digest of one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDigest {
    pub digest: String,
    pub has_primary_key: bool,
}

/// Hash one table's logical content
///
/// With a primary key, rows are read in key order and the serialized lines are
/// hashed. Without one, the table's insert dump is normalized (trimmed, blank
/// lines, comments and client meta-commands such as `\restrict <key>` removed)
/// before hashing.
pub async fn hash_table(engine: &dyn Engine, db: &str, table: &str) -> DblResult<TableDigest> {
    let pk = engine.get_primary_keys(db, table).await?;

    if pk.is_empty() {
        let dump = engine.dump_data(db, table).await?;
        let normalized = normalize_dump(&dump);
        let digest = if normalized.is_empty() {
            EMPTY.to_string()
        } else {
            sha256_hex(normalized.as_bytes())
        };
        return Ok(TableDigest {
            digest,
            has_primary_key: false,
        });
    }

    let rows = engine.select_ordered(db, table, &pk).await?;
    let digest = if rows.is_empty() {
        EMPTY.to_string()
    } else {
        sha256_hex(rows.join("\n").as_bytes())
    };
    Ok(TableDigest {
        digest,
        has_primary_key: true,
    })
}

fn normalize_dump(dump: &str) -> String {
    dump.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("--") && !line.starts_with('\\'))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fingerprint a database
///
/// Only a failure of schema introspection is fatal.
pub async fn compute_state(
    engine: Arc<dyn Engine>,
    db: &str,
    policy: &TrackingPolicy,
) -> DblResult<StateFingerprint> {
    info!("Analyzing state of {}", db);

    let schema = engine
        .inspect(db)
        .await
        .map_err(|e| DblError::fingerprint(db, e))?;
    let schema_hash = schema.compute_checksum();
    let existing = engine
        .get_tables(db)
        .await
        .map_err(|e| DblError::fingerprint(db, e))?;
    let tables = policy.resolve(existing.iter().map(String::as_str));

    let workers = policy.max_workers.min(tables.len()).max(1);
    debug!("Hashing {} tables with {} workers", tables.len(), workers);
    let permits = Arc::new(Semaphore::new(workers));

    let mut tasks = Vec::with_capacity(tables.len());
    for table in tables {
        let engine = Arc::clone(&engine);
        let permits = Arc::clone(&permits);
        let db = db.to_string();
        let task_table = table.clone();
        let handle = tokio::spawn(async move {
            // The semaphore is never closed, so acquiring cannot fail.
            let _permit = permits.acquire_owned().await.ok();
            hash_table(engine.as_ref(), &db, &task_table).await
        });
        tasks.push((table, handle));
    }

    let mut fingerprint = StateFingerprint {
        schema_hash,
        ..Default::default()
    };
    for (table, handle) in tasks {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Hashing task for {} aborted: {}", table, e);
                fingerprint.data_hashes.insert(table, READ_ERROR.to_string());
                continue;
            }
        };
        match outcome {
            Ok(TableDigest {
                digest,
                has_primary_key,
            }) => {
                if !has_primary_key {
                    warn!("Table {} has no primary key; hashing an unordered dump", table);
                    fingerprint.tables_without_pk.insert(table.clone());
                }
                fingerprint.data_hashes.insert(table, digest);
            }
            Err(e) => {
                warn!("Could not read {}.{}: {}", db, table, e);
                fingerprint.data_hashes.insert(table, READ_ERROR.to_string());
            }
        }
    }

    Ok(fingerprint)
}
