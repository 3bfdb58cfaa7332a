//! `dbl validate`: report migration-safety anomalies in a branch's layers
//!
//! Reports only. The caller turns a fatal report (strict mode with errors)
//! into a non-zero exit.

use crate::config::load_validate_config;
use crate::error::DblResult;
use crate::manifest::ManifestStore;
use crate::project::Project;
use crate::snapshot::{LayerText, ValidationEngine, ValidationReport};
use std::fs;
use tracing::{info, warn};

pub fn validate(project: &Project, branch: Option<&str>, fix: bool) -> DblResult<ValidationReport> {
    let config = load_validate_config(&project.config_path());
    let manifest = ManifestStore::new(project.manifest_path()).load()?;
    let branch = branch.unwrap_or(&manifest.current);

    let layers: Vec<LayerText> = manifest
        .layers(branch)?
        .iter()
        .map(|layer| LayerText {
            file: layer.file.clone(),
            layer_type: layer.layer_type,
            content: fs::read_to_string(project.layer_path(&layer.file)).ok(),
        })
        .collect();
    if layers.is_empty() {
        println!("Branch '{}' is empty", branch);
    }

    let report = ValidationEngine::new(config).validate(branch, &layers);

    if fix {
        warn!("Autofix not implemented; nothing was changed");
    }
    print_report(&report);
    Ok(report)
}

fn print_report(report: &ValidationReport) {
    if report.is_clean() {
        println!("Branch '{}' valid (no anomalies detected)", report.branch);
        return;
    }

    let errors = report.errors().count();
    let warnings = report.warnings().count();
    if errors > 0 {
        println!("Validation for branch '{}': {} error(s)", report.branch, errors);
    }
    if warnings > 0 {
        println!("Validation for branch '{}': {} warning(s)", report.branch, warnings);
    }
    println!();
    for finding in report.errors().chain(report.warnings()) {
        println!("   {}", finding);
    }
    println!();
    info!("Validate reports, it does not execute.");
}
