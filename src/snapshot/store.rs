//! Baseline Store
//!
//! Outside a sandbox, `diff` compares against the fingerprint recorded in
//! `.dbl/state.json` by the last import, reset or sandbox apply.

use crate::error::DblResult;
use crate::project::write_atomic;
use crate::snapshot::fingerprint::StateFingerprint;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

pub struct BaselineStore {
    path: PathBuf,
}

impl BaselineStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The recorded baseline, if any
    pub fn load(&self) -> DblResult<Option<StateFingerprint>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub fn save(&self, fingerprint: &StateFingerprint) -> DblResult<()> {
        let json = serde_json::to_string_pretty(fingerprint)?;
        write_atomic(&self.path, json.as_bytes())?;
        debug!(
            "Recorded baseline ({} tables) to {}",
            fingerprint.data_hashes.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::fingerprint::READ_ERROR;

    #[test]
    fn test_missing_baseline_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = BaselineStore::new(dir.path().join("state.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_baseline_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = BaselineStore::new(&path);

        let mut state = StateFingerprint {
            schema_hash: "abc".into(),
            ..Default::default()
        };
        state.data_hashes.insert("users".into(), "d1".into());
        state.data_hashes.insert("logs".into(), READ_ERROR.into());
        store.save(&state).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["schema"], "abc");
        assert_eq!(json["data"]["logs"], "read_error");
        assert_eq!(store.load().unwrap(), Some(state));
    }
}
