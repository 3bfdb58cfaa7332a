//! Project layout
//!
//! Everything lives under the project root:
//!
//! ```text
//! dbl.yaml
//! .dbl/snapshot.sql
//! .dbl/state.json
//! .dbl/sandbox.json
//! .dbl/layers/manifest.json
//! .dbl/layers/<branch>_<unix>.sql
//! ```

use crate::error::DblResult;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "dbl.yaml";
pub const DBL_DIR: &str = ".dbl";

#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
}

impl Project {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Project rooted at the working directory
    pub fn current_dir() -> DblResult<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn dbl_dir(&self) -> PathBuf {
        self.root.join(DBL_DIR)
    }

    pub fn layers_dir(&self) -> PathBuf {
        self.dbl_dir().join("layers")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.layers_dir().join("manifest.json")
    }

    pub fn sandbox_path(&self) -> PathBuf {
        self.dbl_dir().join("sandbox.json")
    }

    pub fn state_path(&self) -> PathBuf {
        self.dbl_dir().join("state.json")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dbl_dir().join("snapshot.sql")
    }

    pub fn layer_path(&self, file: &str) -> PathBuf {
        self.layers_dir().join(file)
    }

    pub fn ensure_layout(&self) -> DblResult<()> {
        fs::create_dir_all(self.layers_dir())?;
        Ok(())
    }
}

/// Write through a temp file in the same directory, then rename over `path`
pub fn write_atomic(path: &Path, contents: &[u8]) -> DblResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
