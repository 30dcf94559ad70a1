//! `bids-hub teardown` command implementation
//!
//! Deletes staged shards only after a fresh remote listing shows all of them.

use super::{colored_state, publisher_for};
use crate::config::Config;
use crate::error::{CliError, Result};
use crate::progress::format_bytes;
use crate::TargetArgs;
use bids_hub_core::pipeline;
use bids_hub_core::publish::PublishSession;
use colored::Colorize;
use std::path::Path;

pub async fn run(session_dir: &Path, target: &TargetArgs, yes: bool) -> Result<()> {
    let config = Config::from_env()?.with_revision(target.revision.clone());
    let session = PublishSession::load(session_dir)?;
    let staged_bytes: u64 = session.ledger.iter().map(|e| e.bytes).sum();

    if !yes {
        println!(
            "Session {} is {} with {} staged shards ({}).",
            session.id,
            colored_state(session.state),
            session.shard_count(),
            format_bytes(staged_bytes)
        );
        return Err(CliError::config(
            "teardown deletes staged shards; re-run with --yes to confirm",
        ));
    }

    let destination = target.repo.as_deref().map(|repo| config.destination(repo));
    // teardown only lists, so the repository must already exist
    let publisher = publisher_for(&config, target, None).await?;

    let session = pipeline::teardown(session_dir, destination.as_ref(), &publisher).await?;
    println!(
        "{} {} shards ({}) from {}",
        "Removed".green().bold(),
        session.shard_count(),
        format_bytes(staged_bytes),
        session.dir().display()
    );
    println!("  State: {}", colored_state(session.state));
    Ok(())
}
