//! `dbl reset`: rebuild the database from the snapshot plus the current branch

use super::Context;
use crate::error::DblResult;
use crate::manifest::Manifest;
use std::fs;
use tracing::{info, warn};

/// Rebuild after confirmation (skipped while a sandbox is active); false if declined
pub async fn reset(ctx: &Context) -> DblResult<bool> {
    let manifest = ctx.manifests().load()?;
    if !ctx.sandbox().is_active()
        && !ctx.confirm(&format!("This will rebuild database '{}'. Continue?", ctx.db()))?
    {
        return Ok(false);
    }
    rebuild(ctx, &manifest).await?;
    Ok(true)
}

/// Drop and recreate the database, replay `snapshot.sql` and every layer of the current branch
pub async fn rebuild(ctx: &Context, manifest: &Manifest) -> DblResult<()> {
    let db = ctx.db();
    warn!("Rebuilding {} on branch {}...", db, manifest.current);
    ctx.engine.drop_db(db).await?;
    ctx.engine.create_db(db).await?;

    let snapshot = ctx.project.snapshot_path();
    if snapshot.exists() {
        ctx.engine
            .execute_script(db, &fs::read_to_string(&snapshot)?)
            .await?;
    }

    for layer in manifest.current_layers()? {
        info!("Applying {}", layer.file);
        ctx.apply_layer(layer).await?;
    }

    ctx.record_baseline().await?;
    println!("State restored.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing;
    use crate::manifest::{Layer, LayerType};

    #[tokio::test]
    async fn test_reset_replays_snapshot_then_layers_in_order() {
        let tp = testing::project();
        fs::write(tp.ctx.project.snapshot_path(), "-- base").unwrap();
        testing::write_layer(&tp.ctx, "master_1.sql", "-- one\nSELECT 1;");
        testing::write_layer(&tp.ctx, "master_2.sql", "-- two\nSELECT 2;");

        let mut manifest = Manifest::default();
        manifest
            .append_layer(Layer::new("master_1.sql", "one", LayerType::Schema))
            .unwrap();
        manifest
            .append_layer(Layer::new("master_2.sql", "two", LayerType::Schema))
            .unwrap();
        tp.ctx.manifests().save(&manifest).unwrap();

        assert!(reset(&tp.ctx).await.unwrap());

        let replayed: Vec<String> = tp.memory.scripts().into_iter().map(|(_, sql)| sql).collect();
        assert_eq!(replayed, vec!["-- base", "-- one\nSELECT 1;", "-- two\nSELECT 2;"]);
        assert!(tp.ctx.baselines().load().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_layer_file_aborts() {
        let tp = testing::project();
        let mut manifest = Manifest::default();
        manifest
            .append_layer(Layer::new("gone.sql", "gone", LayerType::Schema))
            .unwrap();
        tp.ctx.manifests().save(&manifest).unwrap();
        assert!(reset(&tp.ctx).await.is_err());
    }
}
