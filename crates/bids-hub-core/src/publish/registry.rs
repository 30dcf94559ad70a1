//! The remote registry seam
//!
//! The publisher only ever talks to a [`RemoteRegistry`]. Implementations may
//! run their own worker pools; a returned `bulk_upload` says nothing about
//! durability, which is why every shard is confirmed through
//! [`RemoteRegistry::list_remote_files`] afterwards.

use crate::error::TransportError;
use crate::schema::{ColumnInfo, DType, Shape};
use crate::staging::StagedDatasetInfo;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Where a dataset is published
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// `namespace/name`
    pub repo_id: String,
    pub revision: String,
}

impl Destination {
    pub fn new(repo_id: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            revision: "main".to_string(),
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repo_id, self.revision)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub local_path: PathBuf,
    pub path_in_repo: String,
    pub size: u64,
}

/// One bulk commit
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub destination: Destination,
    pub files: Vec<UploadFile>,
    pub commit_message: String,
    pub timeout: Duration,
}

impl UploadRequest {
    pub fn largest_file(&self) -> u64 {
        self.files.iter().map(|f| f.size).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub commit_id: Option<String>,
    pub files: Vec<String>,
}

/// Summary the registry shows next to the data (a dataset card for the Hub)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub name: String,
    pub split: String,
    pub row_count: usize,
    pub shard_count: usize,
    pub columns: Vec<ColumnInfo>,
    pub description: Option<String>,
    pub license: Option<String>,
}

impl DatasetManifest {
    pub fn from_staged(info: &StagedDatasetInfo) -> Self {
        Self {
            name: info.name.clone(),
            split: info.split.clone(),
            row_count: info.row_count,
            shard_count: info.shard_count,
            columns: info.columns.clone(),
            description: None,
            license: None,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_license(mut self, license: Option<String>) -> Self {
        self.license = license;
        self
    }

    /// README.md with YAML front matter describing the split and features
    pub fn render_card(&self) -> String {
        let mut card = String::from("---\n");
        if let Some(license) = &self.license {
            card.push_str(&format!("license: {}\n", license));
        }
        card.push_str("dataset_info:\n  features:\n");
        for column in &self.columns {
            card.push_str(&format!("  - name: {}\n", column.name));
            let dtype = match column.dtype {
                DType::Int => "int64",
                DType::Float => "float64",
                DType::Text | DType::Payload => "string",
            };
            match column.shape {
                Shape::Singleton => {
                    card.push_str(&format!("    dtype: {}\n", dtype));
                }
                Shape::Sequence => {
                    card.push_str(&format!("    sequence: {}\n", dtype));
                }
            }
        }
        card.push_str(&format!(
            "  splits:\n  - name: {}\n    num_examples: {}\nconfigs:\n- config_name: default\n  data_files:\n  - split: {}\n    path: data/{}-*\n---\n\n",
            self.split, self.row_count, self.split, self.split
        ));
        card.push_str(&format!("# {}\n\n", self.name));
        if let Some(description) = &self.description {
            card.push_str(description.trim());
            card.push_str("\n\n");
        }
        card.push_str(&format!(
            "{} rows in {} shards.\n",
            self.row_count, self.shard_count
        ));
        card
    }
}

/// A dataset registry that accepts bulk commits and can list what it holds
#[async_trait]
pub trait RemoteRegistry: Send + Sync {
    /// Commit every file of the request in one call
    async fn bulk_upload(&self, request: &UploadRequest) -> Result<UploadReport, TransportError>;

    /// Paths currently visible under the destination, relative to the repo root
    async fn list_remote_files(
        &self,
        destination: &Destination,
    ) -> Result<BTreeSet<String>, TransportError>;

    async fn create_or_update_manifest(
        &self,
        destination: &Destination,
        manifest: &DatasetManifest,
    ) -> Result<(), TransportError>;

    /// A shell command a human can run to list the published shards
    fn listing_hint(&self, destination: &Destination) -> String;
}
