//! BIDS Hub Core Library
//!
//! Turns a BIDS-style directory tree into a flat, typed table and publishes
//! it to a dataset registry without losing shards on the way.
//!
//! # Overview
//!
//! - **Schema**: a TOML document describing record levels, columns,
//!   partitions, companions and validation expectations ([`schema::Schema`])
//! - **Discovery**: walks the tree once per record and fails fast on
//!   ambiguous or lossy layouts ([`discovery::DiscoveryEngine`])
//! - **Assembly**: merges discovered files with the participants registry
//!   into an immutable [`table::Table`]
//! - **Validation**: tolerance-aware checks on the raw tree or the table,
//!   reported per check ([`validation::ValidationResult`])
//! - **Staging**: deterministic JSON Lines shards with a checksummed index
//! - **Publishing**: rate-limited bulk commits that shrink on failure and a
//!   session that is only `PUBLISHED` once a remote listing shows every shard
//!
//! # Example
//!
//! ```no_run
//! use bids_hub_core::pipeline;
//! use bids_hub_core::publish::{Destination, HubClient, PublishConfig, Publisher};
//! use bids_hub_core::schema::Schema;
//! use bids_hub_core::staging::StagingOptions;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let schema = Schema::from_path("schemas/arc.toml")?;
//! let discovered = pipeline::discover(Path::new("/data/ds004884"), &schema)?;
//!
//! let mut publisher = Publisher::new(Arc::new(HubClient::from_env()?), PublishConfig::from_env());
//! let session = pipeline::publish(
//!     &discovered.table,
//!     &schema,
//!     &Destination::new("lab/arc"),
//!     None,
//!     Path::new("/scratch/bids-hub"),
//!     StagingOptions::for_split(&schema.dataset.split),
//!     &mut publisher,
//! )
//! .await?;
//! println!("{}", session.summary());
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod assembler;
pub mod discovery;
pub mod entity;
pub mod error;
pub mod metadata;
pub mod pipeline;
pub mod publish;
pub mod schema;
pub mod staging;
pub mod table;
pub mod validation;

pub use error::{ParseError, PipelineError, Result, TransportError};
pub use pipeline::{discover, publish, resume, stage, teardown, validate, Discovered};
pub use schema::Schema;
pub use table::{EmbeddedPayload, EntityKey, Record, Table, Value};
