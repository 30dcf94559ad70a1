//! BIDS Hub CLI - Main entry point

use bids_hub_cli::{commands, Cli, Commands};
use bids_hub_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use clap::Parser;
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    // .env is optional; real environment variables win
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(level)
        .output(LogOutput::Console)
        .log_file_prefix("bids-hub")
        .build()
        .with_env_overrides();

    // the CLI works without logging
    let _guard = match log_config {
        Ok(config) => init_logging(&config).ok(),
        Err(e) => {
            eprintln!("Ignoring logging environment: {}", e);
            None
        },
    };

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn execute_command(cli: &Cli) -> bids_hub_cli::Result<()> {
    match &cli.command {
        Commands::List => commands::list::run(),

        Commands::Info { schema } => commands::info::run(schema),

        Commands::Build {
            root,
            schema,
            output,
            shards,
            no_embed_payloads,
        } => commands::build::run(root, schema, output.as_deref(), *shards, !*no_embed_payloads),

        Commands::Validate {
            root,
            schema,
            tolerance,
            sample_size,
            table,
            json,
        } => commands::validate::run(root, schema, *tolerance, *sample_size, *table, *json),

        Commands::Publish {
            root,
            schema,
            target,
            shards,
            dry_run,
            staging_dir,
            no_embed_payloads,
            skip_validation,
        } => {
            commands::publish::run(commands::publish::PublishArgs {
                root: root.clone(),
                schema: schema.clone(),
                target: target.clone(),
                shards: *shards,
                dry_run: *dry_run,
                staging_dir: staging_dir.clone(),
                embed_payloads: !*no_embed_payloads,
                skip_validation: *skip_validation,
            })
            .await
        },

        Commands::Resume {
            session_dir,
            target,
        } => commands::resume::run(session_dir, target).await,

        Commands::Teardown {
            session_dir,
            target,
            yes,
        } => commands::teardown::run(session_dir, target, *yes).await,

        Commands::Status { session_dir } => commands::status::run(session_dir),
    }
}
