//! Manifest persistence
//!
//! `.dbl/layers/manifest.json`, written atomically. Legacy documents of the
//! shape `{"layers": [...]}` are migrated to a `master` branch on load.

use crate::error::DblResult;
use crate::manifest::{Layer, Manifest};
use crate::project::write_atomic;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the manifest; a missing file yields an empty `master`
    pub fn load(&self) -> DblResult<Manifest> {
        if !self.path.exists() {
            return Ok(Manifest::default());
        }
        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&self.path)?)?;

        if let Some(layers) = raw.get("layers") {
            warn!("Migrating manifest to branch structure...");
            let layers: Vec<Layer> = serde_json::from_value(layers.clone())?;
            let manifest = Manifest::with_layers(layers);
            self.save(&manifest)?;
            return Ok(manifest);
        }

        let manifest: Manifest = serde_json::from_value(raw)?;
        manifest.check()?;
        Ok(manifest)
    }

    pub fn save(&self, manifest: &Manifest) -> DblResult<()> {
        let json = serde_json::to_string_pretty(manifest)?;
        write_atomic(&self.path, json.as_bytes())?;
        debug!("Saved manifest to {}", self.path.display());
        Ok(())
    }
}
