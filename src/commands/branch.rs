//! Branch commands: `branch`, `checkout`, `merge`, `pull`, `rebase`

use super::reset::rebuild;
use super::Context;
use crate::error::{manifest_error, DblResult};
use crate::manifest::{Manifest, ManifestStore, RebasePlan};
use crate::project::Project;
use tracing::{info, warn};

/// `* name <- parent` lines for `dbl branch`
pub fn branch_lines(manifest: &Manifest) -> Vec<String> {
    manifest
        .branches
        .keys()
        .map(|name| {
            let marker = if *name == manifest.current { '*' } else { ' ' };
            match manifest.metadata.get(name) {
                Some(meta) => format!("{} {} <- {}", marker, name, meta.parent),
                None => format!("{} {}", marker, name),
            }
        })
        .collect()
}

/// List branches, or create `name`, or delete `delete`
pub fn branch(project: &Project, name: Option<&str>, delete: Option<&str>) -> DblResult<()> {
    let store = ManifestStore::new(project.manifest_path());
    let mut manifest = store.load()?;

    if let Some(target) = delete {
        manifest.delete_branch(target)?;
        store.save(&manifest)?;
        println!("Branch {} deleted", target);
    } else if let Some(name) = name {
        manifest.create_branch(name)?;
        store.save(&manifest)?;
        println!("Branch {} created (parent: {})", name, manifest.current);
    } else {
        for line in branch_lines(&manifest) {
            println!("{}", line);
        }
    }
    Ok(())
}

/// Switch branch and rebuild the database from its layers; false if nothing happened
pub async fn checkout(ctx: &Context, target: &str) -> DblResult<bool> {
    ctx.sandbox().ensure_inactive("switching branches")?;

    let store = ctx.manifests();
    let mut manifest = store.load()?;
    if !manifest.checkout(target)? {
        println!("Already on branch '{}'.", target);
        return Ok(false);
    }
    if !ctx.confirm(&format!("This will rebuild database '{}'. Continue?", ctx.db()))? {
        return Ok(false);
    }

    store.save(&manifest)?;
    info!("Switching to branch '{}'...", target);
    rebuild(ctx, &manifest).await?;
    Ok(true)
}

/// Replay layers of `source` missing from the current branch; returns how many were applied
///
/// The manifest is saved once, after every layer applied, so a failed replay
/// records nothing.
async fn replay_from(ctx: &Context, source: &str) -> DblResult<usize> {
    let store = ctx.manifests();
    let mut manifest = store.load()?;
    if !manifest.has_branch(source) {
        return Err(manifest_error(format!("Branch '{}' does not exist", source)));
    }

    let unapplied = manifest.unapplied_from(source)?;
    let count = unapplied.len();
    for layer in unapplied {
        info!("Applying {}", layer.file);
        ctx.apply_layer(&layer).await?;
        manifest.append_layer(layer)?;
    }
    if count > 0 {
        store.save(&manifest)?;
    }
    Ok(count)
}

pub async fn merge(ctx: &Context, target: &str) -> DblResult<usize> {
    let applied = replay_from(ctx, target).await?;
    if applied == 0 {
        println!("Nothing to merge.");
    } else {
        println!("Merge completed: {} layer(s) from '{}'.", applied, target);
    }
    Ok(applied)
}

pub async fn pull(ctx: &Context, source: &str) -> DblResult<usize> {
    let current = ctx.manifests().load()?.current;
    if current == source {
        println!("Already on branch '{}'.", source);
        return Ok(0);
    }
    let applied = replay_from(ctx, source).await?;
    if applied == 0 {
        println!("No new changes from '{}'", source);
    } else {
        println!(
            "Pull from '{}' completed. Branch '{}' updated with {} layer(s).",
            source, current, applied
        );
    }
    Ok(applied)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RebaseOptions {
    pub dry_run: bool,
    pub no_backup: bool,
}

/// Rewrite the current branch as `onto` + its own layers; never touches the database
pub fn rebase(project: &Project, onto: &str, options: RebaseOptions) -> DblResult<RebasePlan> {
    let store = ManifestStore::new(project.manifest_path());
    let mut manifest = store.load()?;
    let plan = manifest.plan_rebase(onto)?;

    if options.dry_run {
        println!("Rebase (dry-run):");
        println!("  Base: {} ({} layers)", onto, plan.base_count);
        println!("  Current: {} ({} layers)", manifest.current, plan.current_count);
        println!("  Result: {} layers", plan.result.len());
        if !plan.skipped.is_empty() {
            warn!("Skipped due to duplicates: {}", plan.skipped.len());
        }
        return Ok(plan);
    }

    let backup = (!options.no_backup).then(|| manifest.backup_branch_name(chrono::Local::now()));
    manifest.apply_rebase(plan.clone(), backup.as_deref())?;
    store.save(&manifest)?;

    if let Some(backup) = backup {
        println!("Backup created: {}", backup);
    }
    println!("Rebase completed: '{}' onto '{}'.", manifest.current, onto);
    println!("Tip: run 'dbl reset' to rebuild the DB.");
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing;
    use crate::manifest::{Layer, LayerType};
    use pretty_assertions::assert_eq;

    fn layer(file: &str) -> Layer {
        Layer::new(file, file, LayerType::Schema)
    }

    fn seed(ctx: &Context, master: &[&str], other: (&str, &[&str])) {
        let mut manifest = Manifest::with_layers(master.iter().map(|f| layer(f)).collect());
        manifest
            .branches
            .insert(other.0.to_string(), other.1.iter().map(|f| layer(f)).collect());
        ctx.manifests().save(&manifest).unwrap();
        for file in master.iter().chain(other.1.iter()) {
            testing::write_layer(ctx, file, &format!("-- {}\nSELECT '{}';", file, file));
        }
    }

    fn current_files(ctx: &Context) -> Vec<String> {
        ctx.manifests()
            .load()
            .unwrap()
            .current_layers()
            .unwrap()
            .iter()
            .map(|l| l.file.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_merge_applies_each_missing_layer_once() {
        let tp = testing::project();
        seed(&tp.ctx, &["L1", "L2"], ("b", &["L2", "L3"]));

        assert_eq!(merge(&tp.ctx, "b").await.unwrap(), 1);
        assert_eq!(current_files(&tp.ctx), vec!["L1", "L2", "L3"]);
        let scripts = tp.memory.scripts();
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].1, "-- L3\nSELECT 'L3';");

        assert_eq!(merge(&tp.ctx, "b").await.unwrap(), 0);
        assert!(merge(&tp.ctx, "nope").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_replay_saves_nothing() {
        let tp = testing::project();
        seed(&tp.ctx, &["L1"], ("b", &["L2", "L3"]));
        std::fs::remove_file(tp.ctx.project.layer_path("L3")).unwrap();

        assert!(pull(&tp.ctx, "b").await.is_err());
        assert_eq!(current_files(&tp.ctx), vec!["L1"]);
    }

    #[tokio::test]
    async fn test_pull_from_self_is_noop() {
        let tp = testing::project();
        seed(&tp.ctx, &["L1"], ("b", &["L2"]));
        assert_eq!(pull(&tp.ctx, "master").await.unwrap(), 0);
        assert!(tp.memory.scripts().is_empty());
    }

    #[tokio::test]
    async fn test_checkout_rebuilds_target_branch() {
        let tp = testing::project();
        seed(&tp.ctx, &["L1"], ("dev", &["L1", "D1"]));

        assert!(checkout(&tp.ctx, "dev").await.unwrap());
        assert_eq!(tp.ctx.manifests().load().unwrap().current, "dev");
        let replayed: Vec<String> = tp.memory.scripts().into_iter().map(|(_, s)| s).collect();
        assert_eq!(replayed, vec!["-- L1\nSELECT 'L1';", "-- D1\nSELECT 'D1';"]);

        assert!(!checkout(&tp.ctx, "dev").await.unwrap());
        assert!(checkout(&tp.ctx, "ghost").await.is_err());
    }

    #[tokio::test]
    async fn test_checkout_refused_in_sandbox() {
        let tp = testing::project();
        seed(&tp.ctx, &[], ("dev", &[]));
        tp.ctx.sandbox().start("shop").await.unwrap();
        assert!(checkout(&tp.ctx, "dev").await.is_err());
        assert_eq!(tp.ctx.manifests().load().unwrap().current, "master");
    }

    #[test]
    fn test_rebase_dry_run_does_not_mutate() {
        let tp = testing::project();
        seed(&tp.ctx, &["L_old", "L_x"], ("base", &["L_old", "L_y"]));

        let plan = rebase(
            &tp.ctx.project,
            "base",
            RebaseOptions {
                dry_run: true,
                no_backup: false,
            },
        )
        .unwrap();
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(current_files(&tp.ctx), vec!["L_old", "L_x"]);

        rebase(&tp.ctx.project, "base", RebaseOptions::default()).unwrap();
        assert_eq!(current_files(&tp.ctx), vec!["L_old", "L_y", "L_x"]);
        let manifest = tp.ctx.manifests().load().unwrap();
        assert_eq!(manifest.branches.len(), 3);
        assert!(tp.memory.scripts().is_empty());
    }

    #[test]
    fn test_branch_lines() {
        let mut manifest = Manifest::default();
        manifest.create_branch("dev").unwrap();
        assert_eq!(branch_lines(&manifest), vec!["  dev <- master", "* master"]);
    }
}
