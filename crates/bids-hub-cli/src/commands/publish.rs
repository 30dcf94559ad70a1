//! `bids-hub publish` command implementation
//!
//! Discover, check the assembled table, stage into a new session and upload.
//! With `--dry-run` the session stops at `STAGED`.

use super::{publisher_for, report_session};
use crate::config::Config;
use crate::error::{CliError, Result};
use crate::progress::{create_spinner, finish};
use crate::schemas;
use crate::TargetArgs;
use bids_hub_core::staging::StagingOptions;
use bids_hub_core::validation::{ValidateOptions, ValidationTarget};
use bids_hub_core::{discover, pipeline, validate};
use colored::Colorize;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct PublishArgs {
    pub root: PathBuf,
    pub schema: String,
    pub target: TargetArgs,
    pub shards: Option<usize>,
    pub dry_run: bool,
    pub staging_dir: Option<PathBuf>,
    pub embed_payloads: bool,
    pub skip_validation: bool,
}

pub async fn run(args: PublishArgs) -> Result<()> {
    let schema = schemas::resolve(&args.schema)?;
    let config = Config::from_env()?
        .with_staging_dir(args.staging_dir.clone())
        .with_revision(args.target.revision.clone());

    let repo = match (args.target.repo.as_deref(), args.dry_run) {
        (Some(repo), _) => Some(repo),
        (None, true) => None,
        (None, false) => {
            return Err(CliError::config(
                "--repo (or BIDS_HUB_REPO) is required unless --dry-run is set",
            ))
        },
    };

    let spinner = create_spinner(&format!("Discovering {}", args.root.display()));
    let discovered = discover(&args.root, &schema)?;
    finish(&spinner, discovered.discovery.summary());

    let checks = validate(
        ValidationTarget::Table {
            table: &discovered.table,
            tree: Some(&args.root),
        },
        &schema,
        &ValidateOptions::default(),
    );
    if !checks.all_passed() {
        if args.skip_validation {
            warn!(
                "Publishing despite {} failed table checks",
                checks.failed_count()
            );
        } else {
            eprintln!("{}", checks.summary());
            return Err(CliError::ValidationFailed {
                failed: checks.failed_count(),
                total: checks.checks.len(),
            });
        }
    }

    let options = StagingOptions::for_split(&schema.dataset.split)
        .with_embed_payloads(args.embed_payloads);

    let Some(repo) = repo.filter(|_| !args.dry_run) else {
        let session = pipeline::stage(
            &discovered.table,
            &schema,
            &config.staging_dir,
            args.shards,
            options,
        )?;
        println!(
            "{} {} rows staged in {} shards (dry run)",
            "Staged".green().bold(),
            discovered.table.len(),
            session.shard_count()
        );
        println!("  Session: {}", session.dir().display());
        println!(
            "  Publish it with 'bids-hub resume {} --repo <namespace/name>'",
            session.dir().display()
        );
        return Ok(());
    };

    let destination = config.destination(repo);
    let mut publisher = publisher_for(&config, &args.target, Some(&destination)).await?;

    let spinner = create_spinner(&format!("Publishing to {}", destination));
    let session = pipeline::publish(
        &discovered.table,
        &schema,
        &destination,
        args.shards,
        &config.staging_dir,
        options,
        &mut publisher,
    )
    .await?;
    finish(&spinner, session.summary());

    report_session(&session)
}
