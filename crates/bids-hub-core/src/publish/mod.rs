//! Resilient publishing of staged shards
//!
//! ```text
//! CREATED -> STAGING -> STAGED -> PUBLISHING -> PUBLISHED -> TORN_DOWN
//!                                     ^   |
//!                                     |   v
//!                                 PUBLISH_FAILED
//! ```
//!
//! Staging is only ever removed by an explicit teardown of a `PUBLISHED`
//! session, after a fresh remote listing shows every shard.

mod config;
mod folder;
mod hub;
mod publisher;
mod rate_limit;
mod registry;
mod session;

pub use config::{HubConfig, PublishConfig, TimeoutPolicy};
pub use folder::FolderRegistry;
pub use hub::HubClient;
pub use publisher::Publisher;
pub use rate_limit::CommitRateLimiter;
pub use registry::{
    DatasetManifest, Destination, RemoteRegistry, UploadFile, UploadReport, UploadRequest,
};
pub use session::{
    PublishSession, SessionLease, SessionState, ShardLedgerEntry, LEASE_FILE, SESSION_FILE,
};
