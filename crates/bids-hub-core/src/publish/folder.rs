//! A local directory standing in for a remote registry (dry runs, mirrors)

use super::registry::{DatasetManifest, Destination, RemoteRegistry, UploadReport, UploadRequest};
use crate::error::TransportError;
use crate::staging::DATA_DIR;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Each destination maps to `<root>/<repo_id>/`
#[derive(Debug, Clone)]
pub struct FolderRegistry {
    root: PathBuf,
}

impl FolderRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn repo_dir(&self, destination: &Destination) -> PathBuf {
        self.root.join(&destination.repo_id)
    }

    fn copy_into(repo: &Path, path_in_repo: &str, bytes: &[u8]) -> Result<(), TransportError> {
        let target = repo.join(path_in_repo);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        crate::staging::write_atomic(&target, bytes)?;
        Ok(())
    }
}

#[async_trait]
impl RemoteRegistry for FolderRegistry {
    async fn bulk_upload(&self, request: &UploadRequest) -> Result<UploadReport, TransportError> {
        let repo = self.repo_dir(&request.destination);
        let mut files = Vec::with_capacity(request.files.len());
        for file in &request.files {
            let bytes = tokio::fs::read(&file.local_path).await?;
            Self::copy_into(&repo, &file.path_in_repo, &bytes)?;
            files.push(file.path_in_repo.clone());
        }
        debug!("Copied {} files into {}", files.len(), repo.display());
        Ok(UploadReport {
            commit_id: None,
            files,
        })
    }

    async fn list_remote_files(
        &self,
        destination: &Destination,
    ) -> Result<BTreeSet<String>, TransportError> {
        let repo = self.repo_dir(destination);
        let data = repo.join(DATA_DIR);
        if !data.exists() {
            return Ok(BTreeSet::new());
        }

        let mut listing = BTreeSet::new();
        for entry in WalkDir::new(&data) {
            let entry = entry.map_err(|e| TransportError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            // in-flight atomic writes
            if name.starts_with('.') && name.ends_with(".tmp") {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&repo) {
                let parts: Vec<_> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                listing.insert(parts.join("/"));
            }
        }
        Ok(listing)
    }

    async fn create_or_update_manifest(
        &self,
        destination: &Destination,
        manifest: &DatasetManifest,
    ) -> Result<(), TransportError> {
        let repo = self.repo_dir(destination);
        Self::copy_into(&repo, "README.md", manifest.render_card().as_bytes())
    }

    fn listing_hint(&self, destination: &Destination) -> String {
        format!(
            "find '{}' -name '*.jsonl' | wc -l",
            self.repo_dir(destination).join(DATA_DIR).display()
        )
    }
}
