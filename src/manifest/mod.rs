//! Layer & Branch Manifest
//!
//! A single versioned document: which branch is current, each branch's ordered
//! layer list and display-only parent metadata. Commands load it, mutate the
//! value in memory and save it back wholesale, so a command either writes its
//! full mutation or nothing.
//!
//! Branches are flat replay lists. Merge, pull and rebase reconcile them by
//! layer filename only; two files with identical SQL under different names
//! are distinct layers.

pub mod store;

pub use store::ManifestStore;

use crate::error::{manifest_error, DblResult};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

pub const DEFAULT_BRANCH: &str = "master";
pub const MANIFEST_VERSION: u32 = 1;

/// What a layer carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerType {
    #[serde(rename = "schema")]
    Schema,
    #[serde(rename = "schema+data")]
    SchemaData,
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerType::Schema => write!(f, "schema"),
            LayerType::SchemaData => write!(f, "schema+data"),
        }
    }
}

/// One committed migration unit; never mutated once written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub file: String,
    #[serde(rename = "msg", default)]
    pub message: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub layer_type: Option<LayerType>,
}

impl Layer {
    pub fn new(file: impl Into<String>, message: impl Into<String>, layer_type: LayerType) -> Self {
        Self {
            file: file.into(),
            message: message.into(),
            layer_type: Some(layer_type),
        }
    }
}

/// Display-only branch ancestry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchMeta {
    pub parent: String,
    pub created_at: String,
}

fn default_version() -> u32 {
    MANIFEST_VERSION
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_version")]
    pub version: u32,
    pub current: String,
    pub branches: BTreeMap<String, Vec<Layer>>,
    #[serde(rename = "_metadata", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, BranchMeta>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::with_layers(Vec::new())
    }
}

/// Outcome of planning a rebase, before anything is mutated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebasePlan {
    pub onto: String,
    pub base_count: usize,
    pub current_count: usize,
    /// The rebased layer list: `onto` followed by current's own layers
    pub result: Vec<Layer>,
    /// Current layers already present in `onto`
    pub skipped: Vec<Layer>,
}

impl Manifest {
    /// A fresh manifest whose only branch is `master`
    pub fn with_layers(layers: Vec<Layer>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            current: DEFAULT_BRANCH.to_string(),
            branches: BTreeMap::from([(DEFAULT_BRANCH.to_string(), layers)]),
            metadata: BTreeMap::new(),
        }
    }

    pub fn has_branch(&self, name: &str) -> bool {
        self.branches.contains_key(name)
    }

    pub fn layers(&self, branch: &str) -> DblResult<&[Layer]> {
        self.branches
            .get(branch)
            .map(Vec::as_slice)
            .ok_or_else(|| manifest_error(format!("Branch '{}' does not exist", branch)))
    }

    pub fn current_layers(&self) -> DblResult<&[Layer]> {
        self.layers(&self.current)
    }

    /// `current` must name an existing branch
    pub fn check(&self) -> DblResult<()> {
        if !self.has_branch(&self.current) {
            return Err(manifest_error(format!(
                "Manifest is corrupt: current branch '{}' does not exist",
                self.current
            )));
        }
        Ok(())
    }

    /// Create `name` as a copy of the current branch's layers
    pub fn create_branch(&mut self, name: &str) -> DblResult<()> {
        if self.has_branch(name) {
            return Err(manifest_error(format!("Branch '{}' already exists", name)));
        }
        let layers = self.current_layers()?.to_vec();
        self.branches.insert(name.to_string(), layers);
        self.metadata.insert(
            name.to_string(),
            BranchMeta {
                parent: self.current.clone(),
                created_at: Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            },
        );
        Ok(())
    }

    pub fn delete_branch(&mut self, name: &str) -> DblResult<()> {
        if name == self.current {
            return Err(manifest_error("You cannot delete the current branch"));
        }
        if self.branches.remove(name).is_none() {
            return Err(manifest_error(format!("Branch '{}' does not exist", name)));
        }
        self.metadata.remove(name);
        Ok(())
    }

    pub fn append_layer(&mut self, layer: Layer) -> DblResult<()> {
        let current = self.current.clone();
        self.branches
            .get_mut(&current)
            .ok_or_else(|| manifest_error(format!("Branch '{}' does not exist", current)))?
            .push(layer);
        Ok(())
    }

    /// Switch the current branch; false when already on it
    pub fn checkout(&mut self, branch: &str) -> DblResult<bool> {
        if !self.has_branch(branch) {
            return Err(manifest_error(format!(
                "Branch '{}' does not exist. Use 'dbl branch <name>' to create it.",
                branch
            )));
        }
        if branch == self.current {
            return Ok(false);
        }
        self.current = branch.to_string();
        Ok(true)
    }

    /// Layers of `other` whose filename is absent from the current branch, in `other`'s order
    pub fn unapplied_from(&self, other: &str) -> DblResult<Vec<Layer>> {
        let theirs = self.layers(other)?;
        let ours: HashSet<&str> = self
            .current_layers()?
            .iter()
            .map(|l| l.file.as_str())
            .collect();
        Ok(theirs
            .iter()
            .filter(|l| !ours.contains(l.file.as_str()))
            .cloned()
            .collect())
    }

    pub fn plan_rebase(&self, onto: &str) -> DblResult<RebasePlan> {
        let base = self.layers(onto)?;
        let current = self.current_layers()?;
        let base_files: HashSet<&str> = base.iter().map(|l| l.file.as_str()).collect();

        let (skipped, own): (Vec<Layer>, Vec<Layer>) = current
            .iter()
            .cloned()
            .partition(|l| base_files.contains(l.file.as_str()));

        let mut result = base.to_vec();
        result.extend(own);

        Ok(RebasePlan {
            onto: onto.to_string(),
            base_count: base.len(),
            current_count: current.len(),
            result,
            skipped,
        })
    }

    /// Replace the current branch's layers, optionally snapshotting the old list first
    pub fn apply_rebase(&mut self, plan: RebasePlan, backup: Option<&str>) -> DblResult<()> {
        let previous = self.current_layers()?.to_vec();
        if let Some(backup) = backup {
            if self.has_branch(backup) {
                return Err(manifest_error(format!("Branch '{}' already exists", backup)));
            }
            self.branches.insert(backup.to_string(), previous);
        }
        self.branches.insert(self.current.clone(), plan.result);
        Ok(())
    }

    /// `<current>_backup_<YYYYmmddHHMMSS>`
    pub fn backup_branch_name(&self, at: DateTime<Local>) -> String {
        format!("{}_backup_{}", self.current, at.format("%Y%m%d%H%M%S"))
    }

    /// `HEAD` (any case) resolves to the current branch; branch names to themselves
    pub fn resolve_ref(&self, reference: &str) -> DblResult<String> {
        if reference.eq_ignore_ascii_case("head") {
            return Ok(self.current.clone());
        }
        if self.has_branch(reference) {
            return Ok(reference.to_string());
        }
        Err(manifest_error(format!("Reference '{}' not found", reference)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn layer(file: &str) -> Layer {
        Layer::new(file, format!("msg {}", file), LayerType::Schema)
    }

    fn files(layers: &[Layer]) -> Vec<&str> {
        layers.iter().map(|l| l.file.as_str()).collect()
    }

    #[test]
    fn test_branch_copies_layers_by_value() {
        let mut m = Manifest::with_layers(vec![layer("L1")]);
        m.create_branch("feature").unwrap();
        m.append_layer(layer("L2")).unwrap();

        assert_eq!(files(m.layers("feature").unwrap()), vec!["L1"]);
        assert_eq!(files(m.layers("master").unwrap()), vec!["L1", "L2"]);
        assert_eq!(m.metadata["feature"].parent, "master");
        assert!(m.create_branch("feature").is_err());
    }

    #[test]
    fn test_cannot_delete_current_branch() {
        let mut m = Manifest::default();
        m.create_branch("feature").unwrap();
        assert!(m.delete_branch("master").is_err());
        m.delete_branch("feature").unwrap();
        assert!(!m.has_branch("feature"));
        assert!(!m.metadata.contains_key("feature"));
        assert!(m.delete_branch("ghost").is_err());
    }

    #[test]
    fn test_merge_set_semantics() {
        let mut m = Manifest::with_layers(vec![layer("L1"), layer("L2")]);
        m.branches
            .insert("b".into(), vec![layer("L2"), layer("L3")]);

        let unapplied = m.unapplied_from("b").unwrap();
        assert_eq!(files(&unapplied), vec!["L3"]);
        for l in unapplied {
            m.append_layer(l).unwrap();
        }
        assert_eq!(files(m.current_layers().unwrap()), vec!["L1", "L2", "L3"]);
        assert!(m.unapplied_from("b").unwrap().is_empty());
    }

    #[test]
    fn test_rebase_suppresses_duplicates() {
        let mut m = Manifest::with_layers(vec![layer("L_old"), layer("L_x")]);
        m.branches
            .insert("base".into(), vec![layer("L_old"), layer("L_y")]);

        let plan = m.plan_rebase("base").unwrap();
        assert_eq!(files(&plan.result), vec!["L_old", "L_y", "L_x"]);
        assert_eq!(files(&plan.skipped), vec!["L_old"]);
        assert_eq!((plan.base_count, plan.current_count), (2, 2));

        m.apply_rebase(plan, Some("master_backup_1")).unwrap();
        assert_eq!(files(m.current_layers().unwrap()), vec!["L_old", "L_y", "L_x"]);
        assert_eq!(files(m.layers("master_backup_1").unwrap()), vec!["L_old", "L_x"]);
    }

    #[test]
    fn test_checkout_and_refs() {
        let mut m = Manifest::default();
        m.create_branch("dev").unwrap();
        assert!(!m.checkout("master").unwrap());
        assert!(m.checkout("dev").unwrap());
        assert!(m.checkout("nope").is_err());

        assert_eq!(m.resolve_ref("HEAD").unwrap(), "dev");
        assert_eq!(m.resolve_ref("head").unwrap(), "dev");
        assert_eq!(m.resolve_ref("master").unwrap(), "master");
        assert!(m.resolve_ref("v1").is_err());
    }

    #[test]
    fn test_backup_branch_name() {
        use chrono::TimeZone;
        let m = Manifest::default();
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(m.backup_branch_name(at), "master_backup_20240309140507");
    }

    #[test]
    fn test_document_layout() {
        let mut m = Manifest::with_layers(vec![Layer::new("master_1.sql", "init", LayerType::SchemaData)]);
        m.create_branch("dev").unwrap();
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["current"], "master");
        assert_eq!(json["branches"]["master"][0]["msg"], "init");
        assert_eq!(json["branches"]["master"][0]["type"], "schema+data");
        assert_eq!(json["_metadata"]["dev"]["parent"], "master");
    }

    #[test]
    fn test_loads_document_without_version_or_type() {
        let m: Manifest = serde_json::from_str(
            r#"{"current":"master","branches":{"master":[{"file":"a.sql","msg":"a"}]}}"#,
        )
        .unwrap();
        assert_eq!(m.version, 1);
        assert_eq!(m.current_layers().unwrap()[0].layer_type, None);
        m.check().unwrap();
    }
}
