//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod build;
pub mod info;
pub mod list;
pub mod publish;
pub mod resume;
pub mod status;
pub mod teardown;
pub mod validate;

use crate::config::Config;
use crate::error::{CliError, Result};
use crate::TargetArgs;
use bids_hub_core::publish::{
    Destination, FolderRegistry, HubClient, PublishSession, Publisher, RemoteRegistry,
    SessionState,
};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use std::sync::Arc;

pub(crate) fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).apply_modifier(UTF8_ROUND_CORNERS);
    table
}

/// The folder registry when `--to-folder` is given, the Hub otherwise.
/// Creates the Hub repository when `destination` is known.
pub(crate) async fn publisher_for(
    config: &Config,
    target: &TargetArgs,
    destination: Option<&Destination>,
) -> Result<Publisher> {
    let registry: Arc<dyn RemoteRegistry> = match target.to_folder {
        Some(ref dir) => Arc::new(FolderRegistry::new(dir.clone())),
        None => {
            let client = HubClient::new(config.hub.clone())?;
            if let Some(destination) = destination {
                client.ensure_repo(destination).await?;
            }
            Arc::new(client)
        },
    };
    Ok(Publisher::new(registry, config.publish.clone()))
}

pub(crate) fn colored_state(state: SessionState) -> String {
    match state {
        SessionState::Published => state.as_str().green().bold().to_string(),
        SessionState::PublishFailed => state.as_str().red().bold().to_string(),
        SessionState::TornDown => state.as_str().dimmed().to_string(),
        _ => state.as_str().yellow().to_string(),
    }
}

/// Print the outcome of publish/resume and turn `PUBLISH_FAILED` into an error
pub(crate) fn report_session(session: &PublishSession) -> Result<()> {
    println!();
    println!("{}", "Session:".cyan().bold());
    println!("  Directory: {}", session.dir().display());
    println!("  State:     {}", colored_state(session.state));
    println!(
        "  Shards:    {}/{} confirmed",
        session.confirmed_count(),
        session.shard_count()
    );
    if let Some(ref destination) = session.destination {
        println!("  Remote:    {}", destination);
    }

    match session.state {
        SessionState::PublishFailed => Err(CliError::publish_failed(
            session.dir().display().to_string(),
            session.last_error.clone().unwrap_or_else(|| "unknown".to_string()),
        )),
        SessionState::Published => {
            println!();
            println!(
                "Staging is kept until you run 'bids-hub teardown {} --yes'.",
                session.dir().display()
            );
            Ok(())
        },
        _ => Ok(()),
    }
}
