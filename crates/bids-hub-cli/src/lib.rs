//! BIDS Hub CLI Library
//!
//! Command-line surface over the `bids-hub-core` pipeline.
//!
//! # Overview
//!
//! - **Schemas**: list the built-in dataset schemas and describe one
//!   (`bids-hub list`, `bids-hub info arc`)
//! - **Build**: discover and assemble a tree, optionally staging JSON Lines
//!   shards (`bids-hub build`)
//! - **Validate**: tree or table checks, exit status 1 on any failure
//!   (`bids-hub validate`)
//! - **Publish**: stage, upload, confirm by listing (`bids-hub publish`)
//! - **Sessions**: continue, inspect or tear down a staged session
//!   (`bids-hub resume`, `bids-hub status`, `bids-hub teardown`)

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod commands;
pub mod config;
pub mod error;
pub mod progress;
pub mod schemas;

pub use error::{CliError, Result};

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// BIDS Hub - turn BIDS neuroimaging trees into published datasets
#[derive(Parser, Debug)]
#[command(name = "bids-hub")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the built-in dataset schemas
    List,

    /// Describe a schema's columns and validation expectations
    Info {
        /// Built-in schema name or path to a schema TOML file
        schema: String,
    },

    /// Discover and assemble a dataset, then print a summary
    Build {
        /// Dataset root
        root: PathBuf,

        /// Built-in schema name or path to a schema TOML file
        #[arg(short, long)]
        schema: String,

        /// Stage JSON Lines shards and dataset_info.json into this directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of shards (defaults to one per row)
        #[arg(long)]
        shards: Option<usize>,

        /// Write payload paths instead of inlining their bytes (shards then depend on the source tree)
        #[arg(long)]
        no_embed_payloads: bool,
    },

    /// Validate a dataset tree, or the table assembled from it
    Validate {
        /// Dataset root
        root: PathBuf,

        /// Built-in schema name or path to a schema TOML file
        #[arg(short, long)]
        schema: String,

        /// Allowed missing fraction for count checks (0.0 is exact)
        #[arg(long)]
        tolerance: Option<f64>,

        /// Number of payload headers to probe
        #[arg(long)]
        sample_size: Option<usize>,

        /// Check the assembled table instead of the raw tree
        #[arg(long)]
        table: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stage a dataset and publish it
    Publish {
        /// Dataset root
        root: PathBuf,

        /// Built-in schema name or path to a schema TOML file
        #[arg(short, long)]
        schema: String,

        #[command(flatten)]
        target: TargetArgs,

        /// Number of shards (defaults to one per row)
        #[arg(long)]
        shards: Option<usize>,

        /// Stage only; print the session directory and stop
        #[arg(long)]
        dry_run: bool,

        /// Directory that holds staging sessions
        #[arg(long, env = "BIDS_HUB_STAGING_DIR")]
        staging_dir: Option<PathBuf>,

        /// Write payload paths instead of inlining their bytes (shards then depend on the source tree)
        #[arg(long)]
        no_embed_payloads: bool,

        /// Publish even if table validation fails
        #[arg(long)]
        skip_validation: bool,
    },

    /// Continue a staged, failed or interrupted session
    Resume {
        /// Session directory printed by `publish`
        session_dir: PathBuf,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Delete a published session's staged shards
    Teardown {
        /// Session directory printed by `publish`
        session_dir: PathBuf,

        #[command(flatten)]
        target: TargetArgs,

        /// Confirm deletion
        #[arg(short, long)]
        yes: bool,
    },

    /// Show a session's state and shard ledger
    Status {
        /// Session directory printed by `publish`
        session_dir: PathBuf,
    },
}

/// Where a session publishes to
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Repository id (`namespace/name`); defaults to the session's recorded one
    #[arg(long, env = "BIDS_HUB_REPO")]
    pub repo: Option<String>,

    /// Branch or revision to commit to
    #[arg(long, env = "BIDS_HUB_REVISION")]
    pub revision: Option<String>,

    /// Publish into a local directory instead of the Hub
    #[arg(long, value_name = "DIR")]
    pub to_folder: Option<PathBuf>,
}
