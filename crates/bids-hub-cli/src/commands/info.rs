//! `bids-hub info` command implementation
//!
//! Shows a schema's column layout and what validation expects.

use super::new_table;
use crate::error::Result;
use crate::schemas;
use bids_hub_core::schema::{ColumnSource, Schema, Shape};
use colored::Colorize;

pub fn run(schema_arg: &str) -> Result<()> {
    let schema = schemas::resolve(schema_arg)?;

    println!("{}", schema.dataset.name.green().bold());
    if let Some(ref description) = schema.dataset.description {
        println!("{}", description);
    }
    println!();
    println!("  Split:   {}", schema.dataset.split);
    if let Some(ref license) = schema.dataset.license {
        println!("  License: {}", license);
    }
    let levels: Vec<String> = schema
        .records
        .levels
        .iter()
        .map(|l| format!("{}-* -> {}", l.entity, l.column))
        .collect();
    println!("  Records: {}", levels.join(", "));
    if !schema.records.root.is_empty() {
        println!("  Under:   {}/", schema.records.root.trim_end_matches('/'));
    }
    println!();

    println!("{}", "Columns:".cyan().bold());
    println!("{}", columns_table(&schema));

    let expected = &schema.validation.expected;
    println!("{}", "Validation:".cyan().bold());
    for (label, count) in [
        ("subjects", expected.subjects),
        ("sessions", expected.sessions),
        ("rows", expected.rows),
    ] {
        if let Some(count) = count {
            println!("  {:<10} {}", label, count);
        }
    }
    for (modality, expectation) in &schema.validation.modalities {
        println!(
            "  {:<10} {} ({})",
            modality, expectation.expected, expectation.pattern
        );
    }
    if !schema.validation.required_files.is_empty() {
        println!("  required   {}", schema.validation.required_files.join(", "));
    }
    Ok(())
}

fn columns_table(schema: &Schema) -> comfy_table::Table {
    let mut table = new_table();
    table.set_header(vec!["Column", "Type", "Source"]);

    for level in &schema.records.levels {
        table.add_row(vec![
            level.column.clone(),
            "text".to_string(),
            format!("{}-* directory", level.entity),
        ]);
    }
    for column in &schema.columns {
        let dtype = match column.shape {
            Shape::Singleton => column.dtype.as_str().to_string(),
            Shape::Sequence => format!("list<{}>", column.dtype.as_str()),
        };
        table.add_row(vec![column.name.clone(), dtype, describe_source(&column.source)]);
    }
    table
}

fn describe_source(source: &ColumnSource) -> String {
    match source {
        ColumnSource::Files { dir, pattern, .. } => format!("{}/{}", dir, pattern),
        ColumnSource::Partition {
            partition,
            category,
        } => format!("{} = {}", partition, category),
        ColumnSource::Companion { of, suffix, .. } => format!("{} of {}", suffix, of),
        ColumnSource::DerivedEntity { of, entity, .. } => format!("{}- entity of {}", entity, of),
        ColumnSource::Metadata { column } => format!("metadata '{}'", column),
    }
}
