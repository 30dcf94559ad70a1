//! `bids-hub build` command implementation
//!
//! Discovers and assembles a tree, prints per-column coverage and optionally
//! stages the table as JSON Lines shards.

use super::new_table;
use crate::error::Result;
use crate::progress::{create_spinner, finish, format_bytes};
use crate::schemas;
use bids_hub_core::discover;
use bids_hub_core::schema::Shape;
use bids_hub_core::staging::{ShardPlan, Stager, StagingOptions};
use bids_hub_core::Table;
use colored::Colorize;
use std::path::Path;

pub fn run(
    root: &Path,
    schema_arg: &str,
    output: Option<&Path>,
    shards: Option<usize>,
    embed_payloads: bool,
) -> Result<()> {
    let schema = schemas::resolve(schema_arg)?;

    let spinner = create_spinner(&format!("Discovering {}", root.display()));
    let discovered = discover(root, &schema)?;
    finish(
        &spinner,
        format!("Assembled {} rows", discovered.table.len()),
    );

    println!("{}", schema.dataset.name.green().bold());
    println!("  {}", discovered.discovery.summary());
    if discovered.assembly.coercion_failures > 0 {
        println!(
            "  {} metadata values could not be parsed and were stored as null",
            discovered.assembly.coercion_failures.to_string().yellow()
        );
    }
    for rejected in &discovered.assembly.rejected {
        println!("  {} {}: {}", "rejected".red(), rejected.record, rejected.reason);
    }
    println!();
    println!("{}", coverage_table(&discovered.table));

    if let Some(output) = output {
        let options = StagingOptions::for_split(&schema.dataset.split).with_embed_payloads(embed_payloads);
        let plan = ShardPlan::new(discovered.table.len(), shards)?;
        let stager = Stager::new(output, options);
        let info = stager.stage(
            &schema.dataset.name,
            &schema.records.levels,
            &discovered.table,
            &plan,
        )?;

        let total: u64 = info.shards.iter().map(|s| s.bytes).sum();
        println!(
            "Staged {} rows in {} shards ({}) at {}",
            info.row_count,
            info.shard_count,
            format_bytes(total),
            output.display()
        );
    }
    Ok(())
}

/// Rows with a value and total items, per column
fn coverage_table(table: &Table) -> comfy_table::Table {
    let mut out = new_table();
    out.set_header(vec!["Column", "Non-null rows", "Non-empty rows", "Items"]);

    for column in table.columns() {
        let values: Vec<_> = table.column_values(&column.name).collect();
        let non_null = values.iter().filter(|v| !v.is_null()).count();
        let (non_empty, items) = match column.shape {
            Shape::Sequence => (
                values.iter().filter(|v| v.sequence_len() > 0).count().to_string(),
                values.iter().map(|v| v.sequence_len()).sum::<usize>().to_string(),
            ),
            Shape::Singleton => ("-".to_string(), non_null.to_string()),
        };
        out.add_row(vec![
            column.name.clone(),
            format!("{}/{}", non_null, table.len()),
            non_empty,
            items,
        ]);
    }
    out
}
