//! Checks against an assembled Table

use super::tree::count_records_in_tree;
use super::{check_count, ValidateOptions, ValidationCheck, ValidationResult};
use crate::schema::{Schema, Shape};
use crate::table::{Table, Value};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use tracing::{info, warn};

const REPORT_LIMIT: usize = 5;

/// Validate a Table against the schema's layout and `[validation.table]`
/// expectations; cross-reference the tree when one is given
pub fn validate_table(
    table: &Table,
    schema: &Schema,
    tree: Option<&Path>,
    options: &ValidateOptions,
) -> ValidationResult {
    let spec = &schema.validation;
    let tolerance = options.tolerance_for(spec);
    let mut result = ValidationResult::new(format!("table {} ({} rows)", schema.dataset.name, table.len()));

    result.add(check_columns(table, schema));

    if let Some(expected) = spec.expected.rows {
        result.add(check_count("row_count", table.len() as u64, expected, tolerance));
    }

    result.add(check_sequence_defaults(table));

    for (column, expected) in &spec.table.unique {
        let check = match table.column(column) {
            Some(_) => {
                let distinct: HashSet<String> = table
                    .column_values(column)
                    .filter(|v| !v.is_null())
                    .map(Value::to_string)
                    .collect();
                check_count(format!("unique_{}", column), distinct.len() as u64, *expected, tolerance)
            },
            None => unknown_column(format!("unique_{}", column), column),
        };
        result.add(check);
    }

    for (column, expected) in &spec.table.non_null {
        let check = match table.column(column) {
            Some(_) => {
                let observed = table.column_values(column).filter(|v| !v.is_null()).count();
                check_count(format!("non_null_{}", column), observed as u64, *expected, tolerance)
            },
            None => unknown_column(format!("non_null_{}", column), column),
        };
        result.add(check);
    }

    for (column, expected) in &spec.table.non_empty {
        let check = match table.column(column) {
            Some(_) => {
                let observed = table.column_values(column).filter(|v| v.sequence_len() > 0).count();
                check_count(format!("non_empty_{}", column), observed as u64, *expected, tolerance)
            },
            None => unknown_column(format!("non_empty_{}", column), column),
        };
        result.add(check);
    }

    for (column, expected) in &spec.table.total_items {
        let check = match table.column(column) {
            Some(_) => {
                let observed: usize = table.column_values(column).map(Value::sequence_len).sum();
                check_count(format!("total_items_{}", column), observed as u64, *expected, tolerance)
            },
            None => unknown_column(format!("total_items_{}", column), column),
        };
        result.add(check);
    }

    for group in &spec.table.aligned {
        result.add(check_alignment(table, group));
    }

    if let Some(root) = tree {
        let in_tree = count_records_in_tree(root, &schema.records);
        result.add(
            check_count("table_vs_tree_records", table.len() as u64, in_tree as u64, tolerance)
                .with_message(format!("{} record directories under {}", in_tree, root.display())),
        );
    }

    if result.all_passed() {
        info!("Table validation passed ({} checks)", result.checks.len());
    } else {
        warn!("{} of {} table checks failed", result.failed_count(), result.checks.len());
    }
    result
}

fn unknown_column(name: String, column: &str) -> ValidationCheck {
    ValidationCheck::pass_if(name, "column present", "missing", false)
        .with_message(format!("table has no column '{}'", column))
}

fn check_columns(table: &Table, schema: &Schema) -> ValidationCheck {
    let expected: BTreeSet<String> = schema.output_columns().into_iter().map(|c| c.name).collect();
    let actual: BTreeSet<String> = table.column_names().into_iter().map(str::to_string).collect();

    let missing: Vec<_> = expected.difference(&actual).cloned().collect();
    let extra: Vec<_> = actual.difference(&expected).cloned().collect();

    let check = ValidationCheck::pass_if(
        "columns",
        format!("{} columns", expected.len()),
        format!("{} columns", actual.len()),
        missing.is_empty() && extra.is_empty(),
    );
    if missing.is_empty() && extra.is_empty() {
        check
    } else {
        check.with_message(format!("missing: {:?}; extra: {:?}", missing, extra))
    }
}

fn check_sequence_defaults(table: &Table) -> ValidationCheck {
    let offending: Vec<String> = table
        .columns()
        .iter()
        .filter(|c| c.shape == Shape::Sequence)
        .flat_map(|c| {
            table
                .rows()
                .iter()
                .filter(|r| !matches!(r.get(&c.name), Some(Value::List(_))))
                .map(move |r| format!("{} {}", r.key, c.name))
        })
        .collect();

    let check = ValidationCheck::pass_if(
        "sequence_defaults",
        "0 non-list sequence cells",
        offending.len().to_string(),
        offending.is_empty(),
    );
    if offending.is_empty() {
        check
    } else {
        check.with_message(offending.into_iter().take(REPORT_LIMIT).collect::<Vec<_>>().join("; "))
    }
}

fn check_alignment(table: &Table, columns: &[String]) -> ValidationCheck {
    let name = format!("alignment_{}", columns.join("+"));
    let mut misaligned = Vec::new();
    let mut total = 0usize;

    for (i, row) in table.rows().iter().enumerate() {
        let lengths: Vec<usize> = columns
            .iter()
            .map(|c| row.get(c).map(Value::sequence_len).unwrap_or(0))
            .collect();
        if lengths.windows(2).any(|w| w[0] != w[1]) {
            total += 1;
            if misaligned.len() < REPORT_LIMIT {
                let desc: Vec<String> = columns
                    .iter()
                    .zip(&lengths)
                    .map(|(c, n)| format!("{}={}", c, n))
                    .collect();
                misaligned.push(format!("row {} ({}): {}", i, row.key, desc.join(", ")));
            }
        }
    }

    let check = ValidationCheck::pass_if(
        name,
        "all rows aligned",
        format!("{} misaligned rows", total),
        total == 0,
    );
    if total == 0 {
        check
    } else {
        check.with_message(misaligned.join("; "))
    }
}
