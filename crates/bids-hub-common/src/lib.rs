//! BIDS Hub Common Library
//!
//! Shared plumbing for the BIDS Hub workspace members:
//!
//! - **Logging**: `tracing` subscriber bootstrap driven by [`logging::LogConfig`]
//! - **Checksums**: SHA-256 helpers for staged shards and source archives
//! - **Errors**: the small error type those helpers return
//!
//! # Example
//!
//! ```no_run
//! use bids_hub_common::checksum::compute_file_checksum;
//!
//! fn fingerprint(path: &str) -> bids_hub_common::Result<()> {
//!     let digest = compute_file_checksum(path)?;
//!     tracing::info!(%digest, "shard fingerprint");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
