//! `dbl commit`: capture the sandbox changes as a new layer
//!
//! The planner diffs the live database against the sandbox shadow, the SQL is
//! opened in `$EDITOR` for review, and the result is written as
//! `.dbl/layers/<branch>_<unix>.sql`. The shadow is then re-cloned so the next
//! commit in the same session diffs against this one.

use super::Context;
use crate::error::{DblError, DblResult};
use crate::manifest::{Layer, LayerType};
use crate::migration::{has_executable_lines, MigrationPlanner, PlanRequest};
use crate::project::write_atomic;
use crate::snapshot::compute_state;
use std::fs;
use std::io::Write;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub message: String,
    /// Emit backfill statements for tables whose data changed
    pub with_data: bool,
    /// Skip the editor review
    pub no_edit: bool,
}

/// Returns the recorded layer, or `None` when there was nothing to commit
pub async fn commit(ctx: &Context, options: &CommitOptions) -> DblResult<Option<Layer>> {
    let sandbox = ctx.sandbox();
    let session = sandbox.require_active()?;
    let engine = ctx.engine.as_ref();

    info!("Inspecting schemas...");
    let current = engine
        .inspect(&session.active_db)
        .await
        .map_err(|e| DblError::fingerprint(session.active_db.as_str(), e))?;
    let baseline = engine
        .inspect(&session.backup_db)
        .await
        .map_err(|e| DblError::fingerprint(session.backup_db.as_str(), e))?;

    let policy = ctx.policy();
    let current_state = compute_state(Arc::clone(&ctx.engine), &session.active_db, &policy).await?;
    let baseline_state = compute_state(Arc::clone(&ctx.engine), &session.backup_db, &policy).await?;

    let plan = MigrationPlanner::new(engine)
        .plan(&PlanRequest {
            active_db: &session.active_db,
            baseline_label: &session.backup_db,
            current: &current,
            baseline: &baseline,
            data: Some((&current_state, &baseline_state)),
            include_data: options.with_data,
        })
        .await?;

    if !plan.has_executable_lines() {
        warn!("No structural or data changes detected.");
        return Ok(None);
    }

    let final_sql = if options.no_edit {
        plan.sql.trim().to_string()
    } else {
        review_in_editor(&plan.sql).await?
    };
    if !has_executable_lines(&final_sql) {
        warn!("Commit canceled (empty SQL).");
        return Ok(None);
    }

    let store = ctx.manifests();
    let mut manifest = store.load()?;
    let file = unique_layer_name(ctx, &manifest.current);
    write_atomic(
        &ctx.project.layer_path(&file),
        format!("{}\n{}", message_header(&options.message), final_sql).as_bytes(),
    )?;

    let layer_type = if options.with_data {
        LayerType::SchemaData
    } else {
        LayerType::Schema
    };
    let layer = Layer::new(file, options.message.clone(), layer_type);
    manifest.append_layer(layer.clone())?;
    store.save(&manifest)?;
    println!("Layer saved: {} ({})", layer.file, layer_type);

    sandbox.resync_backup(&session).await?;
    Ok(Some(layer))
}

/// The commit message as SQL comment lines, one `-- ` per message line
fn message_header(message: &str) -> String {
    let lines: Vec<String> = message.lines().map(|line| format!("-- {}", line)).collect();
    if lines.is_empty() {
        "--".to_string()
    } else {
        lines.join("\n")
    }
}

/// `<branch>_<unix seconds>.sql`, bumped past any existing file
fn unique_layer_name(ctx: &Context, branch: &str) -> String {
    let mut ts = chrono::Utc::now().timestamp();
    loop {
        let name = format!("{}_{}.sql", branch, ts);
        if !ctx.project.layer_path(&name).exists() {
            return name;
        }
        ts += 1;
    }
}

/// Open the plan in `$EDITOR` (default `nano`) and return the trimmed result
async fn review_in_editor(sql: &str) -> DblResult<String> {
    let mut file = tempfile::Builder::new().suffix(".sql").tempfile()?;
    file.write_all(sql.as_bytes())?;
    file.flush()?;

    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "nano".to_string());
    let mut parts = editor.split_whitespace();
    let program = parts.next().unwrap_or("nano");
    match tokio::process::Command::new(program)
        .args(parts)
        .arg(file.path())
        .status()
        .await
    {
        Ok(status) if !status.success() => warn!("Editor exited with {}", status),
        Ok(_) => {}
        Err(e) => warn!("Could not launch editor '{}': {}", editor, e),
    }

    Ok(fs::read_to_string(file.path())?.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing;
    use crate::introspection::ColumnInfo;
    use crate::snapshot::TrackingPolicy;

    fn no_edit(message: &str) -> CommitOptions {
        CommitOptions {
            message: message.to_string(),
            with_data: false,
            no_edit: true,
        }
    }

    #[tokio::test]
    async fn test_commit_requires_sandbox() {
        let tp = testing::project();
        assert!(commit(&tp.ctx, &no_edit("x")).await.is_err());
    }

    #[tokio::test]
    async fn test_nothing_to_commit() {
        let tp = testing::project();
        tp.ctx.sandbox().start("shop").await.unwrap();
        assert_eq!(commit(&tp.ctx, &no_edit("x")).await.unwrap(), None);
        assert!(tp.ctx.manifests().load().unwrap().current_layers().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_writes_layer_and_resyncs_shadow() {
        let tp = testing::project();
        let session = tp.ctx.sandbox().start("shop").await.unwrap();
        tp.memory
            .add_column("shop", "users", "email", ColumnInfo::new("text"));

        let layer = commit(&tp.ctx, &no_edit("add email")).await.unwrap().unwrap();
        assert!(layer.file.starts_with("master_"));
        assert_eq!(layer.layer_type, Some(LayerType::Schema));

        let content = fs::read_to_string(tp.ctx.project.layer_path(&layer.file)).unwrap();
        assert!(content.starts_with("-- add email\n"));
        assert!(content.contains("ALTER TABLE users ADD COLUMN IF NOT EXISTS email text;"));

        let manifest = tp.ctx.manifests().load().unwrap();
        assert_eq!(manifest.current_layers().unwrap(), &[layer]);

        // the shadow now matches the live database, so a second commit finds nothing
        let engine: Arc<dyn crate::engine::Engine> = tp.memory.clone();
        let policy = TrackingPolicy::default();
        let live = compute_state(Arc::clone(&engine), "shop", &policy).await.unwrap();
        let shadow = compute_state(engine, &session.backup_db, &policy).await.unwrap();
        assert_eq!(live, shadow);
        assert_eq!(commit(&tp.ctx, &no_edit("again")).await.unwrap(), None);
    }

    #[test]
    fn test_message_header_comments_every_line() {
        assert_eq!(message_header("add email"), "-- add email");
        assert_eq!(
            message_header("add email\nDROP TABLE users;"),
            "-- add email\n-- DROP TABLE users;"
        );
        assert_eq!(message_header(""), "--");
        assert!(!has_executable_lines(&message_header("a\nb\n\nc")));
    }

    #[tokio::test]
    async fn test_multiline_message_stays_commented() {
        let tp = testing::project();
        tp.ctx.sandbox().start("shop").await.unwrap();
        tp.memory
            .add_column("shop", "users", "email", ColumnInfo::new("text"));

        let layer = commit(&tp.ctx, &no_edit("add email\nDELETE FROM users;"))
            .await
            .unwrap()
            .unwrap();
        let content = fs::read_to_string(tp.ctx.project.layer_path(&layer.file)).unwrap();
        assert!(content.starts_with("-- add email\n-- DELETE FROM users;\n"));
        assert!(!content
            .lines()
            .any(|line| line.trim_start().starts_with("DELETE")));
    }

    #[tokio::test]
    async fn test_commit_with_data_backfills() {
        let tp = testing::project();
        tp.ctx.sandbox().start("shop").await.unwrap();
        tp.memory.insert_row("shop", "users", &["2"]);

        let options = CommitOptions {
            with_data: true,
            ..no_edit("seed users")
        };
        let layer = commit(&tp.ctx, &options).await.unwrap().unwrap();
        assert_eq!(layer.layer_type, Some(LayerType::SchemaData));
        let content = fs::read_to_string(tp.ctx.project.layer_path(&layer.file)).unwrap();
        assert!(content.contains("TRUNCATE TABLE users;"));
        assert!(content.contains("INSERT INTO users VALUES ('2');"));
    }
}
