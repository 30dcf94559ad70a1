//! Integrity validation against expected counts and metrics
//!
//! Checks run against either the raw tree or an assembled [`Table`]. A check
//! failure is recorded, never raised; `skip` marks an absent optional
//! prerequisite and is reported separately from `pass`.

mod probe;
mod table;
mod tree;

pub use probe::{HeaderInfo, HeaderProbe, NiftiHeaderProbe, NiftiVersion, ProbeError};
pub use table::validate_table;
pub use tree::{count_records_in_tree, validate_tree};

use crate::schema::ValidationSpec;
use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Skip,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Fail => "fail",
            CheckStatus::Skip => "skip",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allowed deviation below an expected count
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Tolerance {
    /// Observed must equal expected
    #[default]
    Exact,
    /// Up to `floor(expected * f)` items may be missing
    Fraction(f64),
}

impl Tolerance {
    /// `0.0` means exact
    pub fn from_fraction(f: f64) -> Self {
        if f <= 0.0 {
            Tolerance::Exact
        } else {
            Tolerance::Fraction(f.min(1.0))
        }
    }

    /// Smallest observed count that passes
    pub fn minimum(&self, expected: u64) -> u64 {
        match self {
            Tolerance::Exact => expected,
            Tolerance::Fraction(f) => {
                let allowed_missing = (expected as f64 * f).floor() as u64;
                expected.saturating_sub(allowed_missing)
            },
        }
    }

    pub fn accepts(&self, observed: u64, expected: u64) -> bool {
        match self {
            Tolerance::Exact => observed == expected,
            Tolerance::Fraction(_) => observed >= self.minimum(expected),
        }
    }
}

impl fmt::Display for Tolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tolerance::Exact => f.write_str("exact"),
            Tolerance::Fraction(x) => write!(f, "{:.1}%", x * 100.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub name: String,
    pub expected: String,
    pub observed: String,
    pub tolerance: Tolerance,
    pub status: CheckStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl ValidationCheck {
    pub fn new(
        name: impl Into<String>,
        expected: impl Into<String>,
        observed: impl Into<String>,
        status: CheckStatus,
    ) -> Self {
        Self {
            name: name.into(),
            expected: expected.into(),
            observed: observed.into(),
            tolerance: Tolerance::Exact,
            status,
            message: String::new(),
        }
    }

    pub fn pass_if(
        name: impl Into<String>,
        expected: impl Into<String>,
        observed: impl Into<String>,
        ok: bool,
    ) -> Self {
        let status = if ok { CheckStatus::Pass } else { CheckStatus::Fail };
        Self::new(name, expected, observed, status)
    }

    pub fn skip(name: impl Into<String>, expected: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, expected, "absent", CheckStatus::Skip).with_message(message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Pass
    }
}

/// Compare an observed count with an expected one under a tolerance
pub fn check_count(name: impl Into<String>, observed: u64, expected: u64, tolerance: Tolerance) -> ValidationCheck {
    let expected_text = match tolerance {
        Tolerance::Exact => expected.to_string(),
        Tolerance::Fraction(_) => format!(">= {} (target: {})", tolerance.minimum(expected), expected),
    };
    let mut check = ValidationCheck::pass_if(
        name,
        expected_text,
        observed.to_string(),
        tolerance.accepts(observed, expected),
    );
    check.tolerance = tolerance;
    if let Tolerance::Fraction(_) = tolerance {
        check.message = format!("tolerance {}", tolerance);
    }
    check
}

/// Ordered checks against one target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub target: String,
    pub checks: Vec<ValidationCheck>,
}

impl ValidationResult {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            checks: Vec::new(),
        }
    }

    pub fn add(&mut self, check: ValidationCheck) {
        self.checks.push(check);
    }

    pub fn extend(&mut self, other: ValidationResult) {
        self.checks.extend(other.checks);
    }

    /// True iff no check failed; skips do not count against it
    pub fn all_passed(&self) -> bool {
        self.failed_count() == 0
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    pub fn passed_count(&self) -> usize {
        self.count(CheckStatus::Pass)
    }

    pub fn failed_count(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(CheckStatus::Skip)
    }

    pub fn check(&self, name: &str) -> Option<&ValidationCheck> {
        self.checks.iter().find(|c| c.name == name)
    }

    /// Plain-text per-check report
    pub fn summary(&self) -> String {
        let rule = "=".repeat(60);
        let mut lines = vec![format!("Validation results for: {}", self.target), rule.clone()];
        for check in &self.checks {
            lines.push(format!("[{}] {}", check.status.as_str().to_uppercase(), check.name));
            lines.push(format!("       expected: {}", check.expected));
            lines.push(format!("       observed: {}", check.observed));
            if !check.message.is_empty() {
                lines.push(format!("       details:  {}", check.message));
            }
        }
        lines.push(rule);
        lines.push(format!(
            "{} passed, {} failed, {} skipped",
            self.passed_count(),
            self.failed_count(),
            self.skipped_count()
        ));
        lines.join("\n")
    }
}

/// What to validate
#[derive(Debug, Clone, Copy)]
pub enum ValidationTarget<'a> {
    Tree(&'a Path),
    /// A table, optionally cross-referenced against the tree it came from
    Table {
        table: &'a Table,
        tree: Option<&'a Path>,
    },
}

/// Overrides on top of the schema's `[validation]` block
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    pub tolerance: Option<Tolerance>,
    pub sample_size: Option<usize>,
    pub seed: Option<u64>,
}

impl ValidateOptions {
    /// Explicit tolerance, else the schema default, else exact
    pub fn tolerance_for(&self, spec: &ValidationSpec) -> Tolerance {
        self.tolerance
            .or_else(|| spec.tolerance.map(Tolerance::from_fraction))
            .unwrap_or_default()
    }
}
