//! `bids-hub status` command implementation
//!
//! Shows a session's state and shard ledger without touching the remote.

use super::{colored_state, new_table};
use crate::error::Result;
use crate::progress::format_bytes;
use bids_hub_core::publish::PublishSession;
use colored::Colorize;
use std::path::Path;

pub fn run(session_dir: &Path) -> Result<()> {
    let session = PublishSession::load(session_dir)?;

    println!("{}", format!("Session {}", session.id).cyan().bold());
    println!("  State:       {}", colored_state(session.state));
    println!("  Directory:   {}", session.dir().display());
    if let Some(ref destination) = session.destination {
        println!("  Remote:      {}", destination);
    }
    if let Some(ref manifest) = session.manifest {
        println!(
            "  Dataset:     {} ({} rows, split {})",
            manifest.name, manifest.row_count, manifest.split
        );
    }
    println!(
        "  Shards:      {}/{} confirmed",
        session.confirmed_count(),
        session.shard_count()
    );
    if !session.batch_history.is_empty() {
        let sizes: Vec<String> = session.batch_history.iter().map(|b| b.to_string()).collect();
        println!("  Commits:     {}", sizes.join(", "));
    }
    println!("  Retries:     {}", session.retries_used);
    println!("  Updated:     {}", session.updated_at.to_rfc3339());
    if let Some(ref error) = session.last_error {
        println!("  Last error:  {}", error.red());
    }

    if !session.ledger.is_empty() {
        let mut table = new_table();
        table.set_header(vec!["#", "Path", "Size", "Attempts", "Confirmed"]);
        for entry in &session.ledger {
            table.add_row(vec![
                entry.index.to_string(),
                entry.path_in_repo.clone(),
                format_bytes(entry.bytes),
                entry.attempts.to_string(),
                if entry.confirmed { "yes" } else { "no" }.to_string(),
            ]);
        }
        println!();
        println!("{table}");
    }
    Ok(())
}
