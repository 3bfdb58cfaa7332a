//! `dbl diff`: compare the live database with its baseline
//!
//! The baseline is the sandbox shadow when a sandbox is active, otherwise the
//! fingerprint recorded in `.dbl/state.json`.

use super::Context;
use crate::error::DblResult;
use crate::snapshot::diff::short_digest;
use crate::snapshot::{compute_state, StateDiff, StateFingerprint, TableChange};
use std::sync::Arc;
use tracing::{info, warn};

/// Returns true when anything changed
pub async fn diff(ctx: &Context, tables: Vec<String>) -> DblResult<bool> {
    let mut policy = ctx.policy();
    if !tables.is_empty() {
        info!("Filtering {} specific tables: {}", tables.len(), tables.join(", "));
        policy = policy.restrict_to(tables);
    }

    let current = compute_state(Arc::clone(&ctx.engine), ctx.db(), &policy).await?;

    let mut baseline = match ctx.sandbox().session()? {
        Some(session) => {
            warn!("Sandbox Active (Backup: {})", session.backup_db);
            compute_state(Arc::clone(&ctx.engine), &session.backup_db, &policy).await?
        }
        None => match ctx.baselines().load()? {
            Some(baseline) => baseline,
            None => {
                println!("No baseline recorded yet. Run 'dbl import', 'dbl reset' or 'dbl sandbox start'.");
                return Ok(false);
            }
        },
    };
    // A stored baseline covers every tracked table, not just the filtered ones
    baseline.data_hashes.retain(|table, _| policy.tracks(table));

    let diff = StateDiff::compare(&current, &baseline);
    print_report(ctx.db(), &current, &diff);
    Ok(diff.has_changes())
}

fn print_report(db: &str, current: &StateFingerprint, diff: &StateDiff) {
    if !diff.has_changes() {
        println!("All clean in {}", db);
        println!("   Schema: {}...", short_digest(&current.schema_hash));
        println!("   Tables tracked: {}", current.data_hashes.len());
        return;
    }

    if diff.schema_changed {
        println!("SCHEMA CHANGE detected");
        println!("   Current:  {}...", short_digest(&diff.current_schema));
        println!("   Baseline: {}...", short_digest(&diff.baseline_schema));
    }
    for table in &diff.tables {
        match &table.change {
            TableChange::ReadFailed => println!("DATA ERROR: {} (read failed)", table.table),
            TableChange::Dropped => println!("TABLE DROPPED: {}", table.table),
            TableChange::Added => println!("TABLE ADDED: {}", table.table),
            TableChange::DataChanged { current, baseline } => {
                println!("DATA CHANGE: {}", table.table);
                println!("   Current:  {}...", short_digest(current));
                println!("   Baseline: {}...", short_digest(baseline));
            }
        }
    }
    println!();
    println!("Summary: Changes in {}", diff.summary());
}
