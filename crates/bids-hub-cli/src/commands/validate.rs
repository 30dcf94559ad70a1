//! `bids-hub validate` command implementation
//!
//! Exits non-zero when any check fails; skipped checks do not count.

use super::new_table;
use crate::error::{CliError, Result};
use crate::progress::{create_spinner, finish};
use crate::schemas;
use bids_hub_core::validation::{
    CheckStatus, Tolerance, ValidateOptions, ValidationResult, ValidationTarget,
};
use bids_hub_core::{discover, validate};
use colored::Colorize;
use comfy_table::{Cell, Color};
use std::path::Path;

pub fn run(
    root: &Path,
    schema_arg: &str,
    tolerance: Option<f64>,
    sample_size: Option<usize>,
    table: bool,
    json: bool,
) -> Result<()> {
    let schema = schemas::resolve(schema_arg)?;
    let options = ValidateOptions {
        tolerance: tolerance.map(Tolerance::from_fraction),
        sample_size,
        ..Default::default()
    };

    let result = if table {
        let spinner = create_spinner(&format!("Assembling {}", root.display()));
        let discovered = discover(root, &schema)?;
        finish(&spinner, format!("Assembled {} rows", discovered.table.len()));
        validate(
            ValidationTarget::Table {
                table: &discovered.table,
                tree: Some(root),
            },
            &schema,
            &options,
        )
    } else {
        validate(ValidationTarget::Tree(root), &schema, &options)
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    if result.all_passed() {
        Ok(())
    } else {
        Err(CliError::ValidationFailed {
            failed: result.failed_count(),
            total: result.checks.len(),
        })
    }
}

fn status_cell(status: CheckStatus) -> Cell {
    let color = match status {
        CheckStatus::Pass => Color::Green,
        CheckStatus::Fail => Color::Red,
        CheckStatus::Skip => Color::Yellow,
    };
    Cell::new(status.as_str().to_uppercase()).fg(color)
}

fn print_result(result: &ValidationResult) {
    let mut table = new_table();
    table.set_header(vec!["Check", "Status", "Expected", "Observed", "Details"]);
    for check in &result.checks {
        table.add_row(vec![
            Cell::new(&check.name),
            status_cell(check.status),
            Cell::new(&check.expected),
            Cell::new(&check.observed),
            Cell::new(&check.message),
        ]);
    }

    println!("{}", format!("Validation results for: {}", result.target).cyan().bold());
    println!("{table}");

    let tally = format!(
        "{} passed, {} failed, {} skipped",
        result.passed_count(),
        result.failed_count(),
        result.skipped_count()
    );
    if result.all_passed() {
        println!("{}", tally.green());
    } else {
        println!("{}", tally.red().bold());
    }
}
