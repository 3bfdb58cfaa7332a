//! Command surface
//!
//! One function per CLI command. The parser in `main.rs` only maps arguments
//! onto these; everything a command needs at runtime travels in [`Context`].

pub mod branch;
pub mod commit;
pub mod diff;
pub mod init;
pub mod log;
pub mod reset;
pub mod sandbox;
pub mod validate;

use crate::config::Settings;
use crate::engine::{self, Engine};
use crate::error::DblResult;
use crate::manifest::{Layer, ManifestStore};
use crate::project::Project;
use crate::sandbox::SandboxController;
use crate::snapshot::{compute_state, BaselineStore, StateFingerprint, TrackingPolicy};
use std::fs;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::info;

/// Everything a database-touching command needs
pub struct Context {
    pub project: Project,
    pub settings: Settings,
    pub engine: Arc<dyn Engine>,
    /// Skip confirmation prompts (`--yes`)
    pub assume_yes: bool,
}

impl Context {
    pub fn new(
        project: Project,
        settings: Settings,
        engine: Arc<dyn Engine>,
        assume_yes: bool,
    ) -> Self {
        Self {
            project,
            settings,
            engine,
            assume_yes,
        }
    }

    /// Load `dbl.yaml` and build the configured engine
    pub fn load(project: Project, assume_yes: bool) -> DblResult<Self> {
        let settings = Settings::load(&project.config_path())?;
        let engine = engine::connect(&settings)?;
        info!("Using {} database '{}'", settings.engine, settings.db_name);
        Ok(Self::new(project, settings, engine, assume_yes))
    }

    pub fn db(&self) -> &str {
        &self.settings.db_name
    }

    pub fn manifests(&self) -> ManifestStore {
        ManifestStore::new(self.project.manifest_path())
    }

    pub fn sandbox(&self) -> SandboxController {
        SandboxController::new(Arc::clone(&self.engine), self.project.sandbox_path())
    }

    pub fn baselines(&self) -> BaselineStore {
        BaselineStore::new(self.project.state_path())
    }

    pub fn policy(&self) -> TrackingPolicy {
        TrackingPolicy::from_settings(&self.settings)
    }

    /// Ask for a yes/no answer on stdin unless `--yes` was given
    pub fn confirm(&self, prompt: &str) -> DblResult<bool> {
        if self.assume_yes {
            return Ok(true);
        }
        print!("{} [y/N]: ", prompt);
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().read_line(&mut answer)?;
        Ok(matches!(
            answer.trim().to_ascii_lowercase().as_str(),
            "y" | "yes"
        ))
    }

    /// Replay one committed layer against the live database
    pub async fn apply_layer(&self, layer: &Layer) -> DblResult<()> {
        let sql = fs::read_to_string(self.project.layer_path(&layer.file))?;
        self.engine.execute_script(self.db(), &sql).await
    }

    /// Fingerprint the live database and store it as the diff baseline
    pub async fn record_baseline(&self) -> DblResult<StateFingerprint> {
        let state = compute_state(Arc::clone(&self.engine), self.db(), &self.policy()).await?;
        self.baselines().save(&state)?;
        Ok(state)
    }
}
