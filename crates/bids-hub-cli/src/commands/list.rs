//! `bids-hub list` command implementation

use super::new_table;
use crate::error::Result;
use crate::schemas::BUILTIN;
use bids_hub_core::Schema;
use colored::Colorize;

/// Print every built-in schema with its record levels and column count
pub fn run() -> Result<()> {
    let mut table = new_table();
    table.set_header(vec!["Schema", "Records", "Columns", "Description"]);

    for (name, toml) in BUILTIN {
        let schema = Schema::from_toml_str(toml)?;
        let levels: Vec<&str> = schema
            .records
            .levels
            .iter()
            .map(|l| l.entity.as_str())
            .collect();
        table.add_row(vec![
            name.to_string(),
            levels.join("/"),
            schema.columns.len().to_string(),
            schema.dataset.description.clone().unwrap_or_default(),
        ]);
    }

    println!("{}", "Built-in schemas:".cyan().bold());
    println!("{table}");
    println!("Pass a name or a path to a schema TOML file to --schema.");
    Ok(())
}
