//! `dbl log` and `dbl rev-parse`

use crate::error::DblResult;
use crate::introspection::sha256_hex;
use crate::manifest::{Manifest, ManifestStore};
use crate::project::Project;

/// Short layer id: first 7 hex chars of the filename digest
pub fn short_id(file: &str) -> String {
    sha256_hex(file.as_bytes())[..7].to_string()
}

/// History lines, most recent first, limited to the last `limit` layers
pub fn log_lines(
    manifest: &Manifest,
    branch: Option<&str>,
    oneline: bool,
    limit: Option<usize>,
) -> DblResult<Vec<String>> {
    let branch = branch.unwrap_or(&manifest.current);
    let layers = manifest.layers(branch)?;
    let limit = limit.unwrap_or(layers.len()).min(layers.len());

    let mut lines = Vec::new();
    for layer in layers[layers.len() - limit..].iter().rev() {
        if oneline {
            lines.push(format!("{} {}", short_id(&layer.file), layer.message));
        } else {
            let kind = layer
                .layer_type
                .map(|t| format!(" ({})", t))
                .unwrap_or_default();
            lines.push(format!("Layer: {}{}", layer.file, kind));
            lines.push(format!("  Message: {}", layer.message));
        }
    }
    Ok(lines)
}

pub fn log(
    project: &Project,
    branch: Option<&str>,
    oneline: bool,
    limit: Option<usize>,
) -> DblResult<()> {
    let manifest = ManifestStore::new(project.manifest_path()).load()?;
    let lines = log_lines(&manifest, branch, oneline, limit)?;
    if lines.is_empty() {
        println!(
            "No layers in branch '{}'",
            branch.unwrap_or(&manifest.current)
        );
    }
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

pub fn rev_parse(project: &Project, reference: &str) -> DblResult<String> {
    let manifest = ManifestStore::new(project.manifest_path()).load()?;
    let resolved = manifest.resolve_ref(reference)?;
    println!("{}", resolved);
    Ok(resolved)
}
