//! Validation Engine
//!
//! Static guardrails over committed layer text. Nothing here executes SQL or
//! mutates a layer: each layer is scanned line by line for phase markers
//! (`-- phase: expand|backfill|contract`) and risky statements, and a
//! cross-layer map of the phases seen so far drives the sequencing rules.
//!
//! | Rule | Finding |
//! |------|---------|
//! | V001 | contract with no backfill anywhere before it |
//! | V002 | backfill with no expand before it |
//! | V003 | uncommented DROP |
//! | V004 | SET NOT NULL with no preceding UPDATE/INSERT in the layer |
//! | V005 | TRUNCATE mixed with schema changes |
//! | V006 | TRUNCATE in a layer recorded as `schema` |
//! | V007 | column type change |
//! | V008 | layer file could not be read |

use crate::config::ValidateConfig;
use crate::manifest::LayerType;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

static PHASE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^--\s*phase:\s*(expand|backfill|contract)\b").expect("valid phase regex")
});

/// Migration-safety phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Expand,
    Backfill,
    Contract,
}

impl Phase {
    fn parse(marker: &str) -> Option<Self> {
        match marker.to_ascii_lowercase().as_str() {
            "expand" => Some(Phase::Expand),
            "backfill" => Some(Phase::Backfill),
            "contract" => Some(Phase::Contract),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Expand => write!(f, "expand"),
            Phase::Backfill => write!(f, "backfill"),
            Phase::Contract => write!(f, "contract"),
        }
    }
}

/// Finding severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error, // Fatal only in strict mode
}

/// One anomaly found in one layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub rule_id: &'static str,
    pub severity: Severity,
    pub layer: String,
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(
            f,
            "[{}] {} Layer {}: {}",
            self.rule_id, mark, self.layer, self.message
        )
    }
}

/// A layer as handed to the engine; `content` is `None` when unreadable
#[derive(Debug, Clone)]
pub struct LayerText {
    pub file: String,
    pub layer_type: Option<LayerType>,
    pub content: Option<String>,
}

/// Signals extracted from one layer's text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerScan {
    pub phases: BTreeSet<Phase>,
    pub uncommented_drop: bool,
    pub not_null_without_data_op: bool,
    pub truncate: bool,
    pub alter_table: bool,
    pub type_change: bool,
}

impl LayerScan {
    pub fn scan(content: &str) -> Self {
        let mut scan = LayerScan::default();
        let mut seen_data_op = false;

        for line in content.lines() {
            let stripped = line.trim();
            if let Some(phase) = PHASE_MARKER
                .captures(stripped)
                .and_then(|c| Phase::parse(&c[1]))
            {
                scan.phases.insert(phase);
            }
            if is_comment_line(stripped) {
                continue;
            }

            let upper = stripped.to_ascii_uppercase();
            if upper.contains("UPDATE ") || upper.contains("INSERT INTO") {
                seen_data_op = true;
            }
            if upper.contains("SET NOT NULL") && !seen_data_op {
                scan.not_null_without_data_op = true;
            }
            if upper.contains("DROP TABLE") || upper.contains("DROP COLUMN") {
                scan.uncommented_drop = true;
            }
            if upper.contains("TRUNCATE") {
                scan.truncate = true;
            }
            if upper.contains("ALTER TABLE") {
                scan.alter_table = true;
                let alters_type = upper.contains("ALTER COLUMN")
                    && (upper.contains(" TYPE ") || upper.contains(" SET DATA TYPE "));
                if alters_type || upper.contains(" MODIFY ") {
                    scan.type_change = true;
                }
            }
        }
        scan
    }
}

/// Blank, `--` comment, or a single-line `/* ... */` block
///
/// MySQL dumps wrap session and key toggles in `/*!NNNNN ... */;`, which are
/// conditional comments, not statements of the layer.
fn is_comment_line(line: &str) -> bool {
    line.is_empty()
        || line.starts_with("--")
        || (line.starts_with("/*") && line.trim_end_matches(';').trim_end().ends_with("*/"))
}

/// Result of validating one branch
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub branch: String,
    pub strict: bool,
    pub findings: Vec<Finding>,
    /// phase -> index of the latest layer it was observed in
    pub phases_seen: BTreeMap<Phase, usize>,
}

impl ValidationReport {
    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
    }

    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Strict mode with at least one error-level finding
    pub fn is_fatal(&self) -> bool {
        self.strict && self.errors().next().is_some()
    }
}

pub struct ValidationEngine {
    config: ValidateConfig,
}

impl ValidationEngine {
    pub fn new(config: ValidateConfig) -> Self {
        Self { config }
    }

    /// Validate a branch's layers in branch order
    pub fn validate(&self, branch: &str, layers: &[LayerText]) -> ValidationReport {
        let mut findings = Vec::new();
        let mut phases_seen: BTreeMap<Phase, usize> = BTreeMap::new();

        for (index, layer) in layers.iter().enumerate() {
            let Some(content) = layer.content.as_deref() else {
                findings.push(self.finding(
                    "V008",
                    Severity::Warning,
                    layer,
                    "Could not read layer file",
                ));
                continue;
            };

            let scan = LayerScan::scan(content);
            findings.extend(self.check_layer(layer, &scan, &phases_seen));

            for phase in &scan.phases {
                phases_seen.insert(*phase, index);
            }
        }

        ValidationReport {
            branch: branch.to_string(),
            strict: self.config.strict,
            findings,
            phases_seen,
        }
    }

    fn check_layer(
        &self,
        layer: &LayerText,
        scan: &LayerScan,
        phases_seen: &BTreeMap<Phase, usize>,
    ) -> Vec<Finding> {
        let strict_severity = if self.config.strict {
            Severity::Error
        } else {
            Severity::Warning
        };
        let seen = |phase: Phase| scan.phases.contains(&phase) || phases_seen.contains_key(&phase);
        let mut findings = Vec::new();

        if scan.phases.contains(&Phase::Contract) && !seen(Phase::Backfill) {
            findings.push(self.finding(
                "V001",
                strict_severity,
                layer,
                "Contract without prior backfill",
            ));
        }

        if scan.phases.contains(&Phase::Backfill)
            && !seen(Phase::Expand)
            && !self.config.allow_orphaned
        {
            findings.push(self.finding(
                "V002",
                Severity::Warning,
                layer,
                "Backfill without prior expand",
            ));
        }

        if scan.uncommented_drop {
            let severity = if self.config.strict && self.config.require_comments {
                Severity::Error
            } else {
                Severity::Warning
            };
            findings.push(self.finding("V003", severity, layer, "DROP not commented"));
        }

        if scan.not_null_without_data_op {
            findings.push(self.finding(
                "V004",
                strict_severity,
                layer,
                "SET NOT NULL without prior UPDATE/INSERT",
            ));
        }

        if scan.truncate
            && (scan.alter_table
                || scan.phases.contains(&Phase::Expand)
                || scan.phases.contains(&Phase::Contract))
        {
            findings.push(self.finding(
                "V005",
                Severity::Warning,
                layer,
                "TRUNCATE + ALTER TABLE mixed",
            ));
        }

        if scan.truncate && layer.layer_type == Some(LayerType::Schema) {
            findings.push(self.finding(
                "V006",
                Severity::Warning,
                layer,
                "Has TRUNCATE but marked as 'schema'",
            ));
        }

        if self.config.detect_type_changes && scan.type_change {
            findings.push(self.finding(
                "V007",
                Severity::Warning,
                layer,
                "Column type change detected",
            ));
        }

        findings
    }

    fn finding(
        &self,
        rule_id: &'static str,
        severity: Severity,
        layer: &LayerText,
        message: &str,
    ) -> Finding {
        Finding {
            rule_id,
            severity,
            layer: layer.file.clone(),
            message: message.to_string(),
        }
    }
}
