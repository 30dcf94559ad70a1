//! Shared fixtures for integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use bids_hub_core::publish::{
    DatasetManifest, Destination, RemoteRegistry, UploadReport, UploadRequest,
};
use bids_hub_core::schema::Schema;
use bids_hub_core::TransportError;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Longitudinal layout: subjects with sessions, task partitions and DWI
/// gradient companions
pub const SESSION_SCHEMA: &str = r#"
[dataset]
name = "synthetic-arc"
description = "Synthetic longitudinal dataset"
license = "cc0-1.0"

[records]
levels = [
    { entity = "sub", column = "subject_id" },
    { entity = "ses", column = "session_id" },
]

[metadata]
path = "participants.tsv"

[[partitions]]
name = "bold"
entity = "task"
categories = ["naming40", "rest"]
dir = "func"
pattern = "*_bold.nii.gz"

[[columns]]
name = "t1w"
dtype = "payload"
source = { kind = "files", dir = "anat", pattern = "*_T1w.nii.gz" }

[[columns]]
name = "t2w"
dtype = "payload"
on_ambiguous = "first"
source = { kind = "files", dir = "anat", pattern = "*_T2w.nii.gz" }

[[columns]]
name = "t2w_acquisition"
dtype = "text"
source = { kind = "derived_entity", of = "t2w", entity = "acq", map = { spc3p2 = "space_2x", spc3 = "space_no_accel" } }

[[columns]]
name = "dwi"
shape = "sequence"
dtype = "payload"
source = { kind = "files", dir = "dwi", pattern = "*_dwi.nii.gz" }

[[columns]]
name = "dwi_bvals"
shape = "sequence"
dtype = "text"
aligned_with = "dwi"
source = { kind = "companion", of = "dwi", suffix = ".bval", mode = "content" }

[[columns]]
name = "bold_naming40"
shape = "sequence"
dtype = "payload"
source = { kind = "partition", partition = "bold", category = "naming40" }

[[columns]]
name = "bold_rest"
shape = "sequence"
dtype = "payload"
source = { kind = "partition", partition = "bold", category = "rest" }

[[columns]]
name = "age"
dtype = "float"
source = { kind = "metadata", column = "age" }

[[columns]]
name = "sex"
dtype = "text"
source = { kind = "metadata", column = "sex" }

[validation]
sample_size = 3
required_files = ["participants.tsv"]

[validation.expected]
subjects = 3
sessions = 3

[validation.modalities.t1w]
pattern = "*_T1w.nii.gz"
expected = 3

[validation.table]
unique = { subject_id = 2 }
non_null = { t1w = 3 }
aligned = [["dwi", "dwi_bvals"]]
"#;

pub fn session_schema() -> Schema {
    Schema::from_toml_str(SESSION_SCHEMA).unwrap()
}

pub fn write(root: &Path, rel: &str, bytes: &[u8]) -> PathBuf {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, bytes).unwrap();
    path
}

/// A gzip-compressed NIfTI-1 header the probe accepts
pub fn nifti_gz() -> Vec<u8> {
    let mut header = vec![0u8; 352];
    header[0..4].copy_from_slice(&348i32.to_le_bytes());
    header[40..42].copy_from_slice(&3i16.to_le_bytes());
    for (i, d) in [4i16, 4, 4].iter().enumerate() {
        let at = 42 + i * 2;
        header[at..at + 2].copy_from_slice(&d.to_le_bytes());
    }
    header[344..348].copy_from_slice(b"n+1\0");

    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(&header).unwrap();
    encoder.finish().unwrap()
}

pub fn nifti(root: &Path, rel: &str) -> PathBuf {
    write(root, rel, &nifti_gz())
}

pub fn participants(root: &Path, rows: &[&str]) {
    let mut body = String::from("participant_id\tage\tsex\n");
    for row in rows {
        body.push_str(row);
        body.push('\n');
    }
    write(root, "participants.tsv", body.as_bytes());
}

/// sub-1: two sessions, sub-2: one session, sub-3: no session at all
pub fn build_session_tree(root: &Path) {
    participants(root, &["sub-1\t61\tM", "sub-2\tn/a\tF", "sub-3\t70\tF"]);

    nifti(root, "sub-1/ses-1/anat/sub-1_ses-1_T1w.nii.gz");
    nifti(root, "sub-1/ses-1/anat/sub-1_ses-1_acq-spc3p2_T2w.nii.gz");
    nifti(root, "sub-1/ses-1/dwi/sub-1_ses-1_run-1_dwi.nii.gz");
    write(root, "sub-1/ses-1/dwi/sub-1_ses-1_run-1_dwi.bval", b"0 1000 1000\n");
    nifti(root, "sub-1/ses-1/dwi/sub-1_ses-1_run-2_dwi.nii.gz");
    write(root, "sub-1/ses-1/dwi/sub-1_ses-1_run-2_dwi.bval", b"0 2000\n");
    nifti(root, "sub-1/ses-1/func/sub-1_ses-1_task-rest_bold.nii.gz");
    nifti(root, "sub-1/ses-1/func/sub-1_ses-1_task-naming40_run-1_bold.nii.gz");
    nifti(root, "sub-1/ses-1/func/sub-1_ses-1_task-naming40_run-2_bold.nii.gz");

    nifti(root, "sub-1/ses-2/anat/sub-1_ses-2_T1w.nii.gz");
    nifti(root, "sub-1/ses-2/anat/sub-1_ses-2_acq-tse3_T2w.nii.gz");

    nifti(root, "sub-2/ses-1/anat/sub-2_ses-1_T1w.nii.gz");
    nifti(root, "sub-2/ses-1/dwi/sub-2_ses-1_dwi.nii.gz");
    write(root, "sub-2/ses-1/dwi/sub-2_ses-1_dwi.bval", b"0 1000\n");

    std::fs::create_dir_all(root.join("sub-3")).unwrap();
}

/// In-memory registry that can refuse or hang on large commits, lose files,
/// delay their visibility in listings, and fail the manifest update
#[derive(Default)]
pub struct FakeRegistry {
    /// Commits with more files than this fail
    pub max_batch: Option<usize>,
    /// Commits with more files than this never return
    pub hang_above: Option<usize>,
    /// Listing calls a file stays invisible after its commit returns
    pub visibility_lag: usize,
    pub fail_manifest: bool,
    /// Paths that are accepted but never show up
    lost: Mutex<BTreeSet<String>>,
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    batches: Vec<usize>,
    // path -> listing calls left until visible
    landing: Vec<(String, usize)>,
    visible: BTreeSet<String>,
    listings: usize,
    manifests: Vec<DatasetManifest>,
}

impl FakeRegistry {
    pub fn failing_above(mut self, max_batch: usize) -> Self {
        self.max_batch = Some(max_batch);
        self
    }

    pub fn hanging_above(mut self, max_batch: usize) -> Self {
        self.hang_above = Some(max_batch);
        self
    }

    pub fn with_lag(mut self, listings: usize) -> Self {
        self.visibility_lag = listings;
        self
    }

    pub fn losing(self, path: &str) -> Self {
        self.lost.lock().unwrap().insert(path.to_string());
        self
    }

    pub fn failing_manifest(mut self) -> Self {
        self.fail_manifest = true;
        self
    }

    pub fn stop_losing(&self) {
        self.lost.lock().unwrap().clear();
    }

    pub fn batches(&self) -> Vec<usize> {
        self.state.lock().unwrap().batches.clone()
    }

    pub fn visible(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().visible.clone()
    }

    pub fn listings(&self) -> usize {
        self.state.lock().unwrap().listings
    }

    pub fn manifests(&self) -> Vec<DatasetManifest> {
        self.state.lock().unwrap().manifests.clone()
    }

    /// Drop a file from the remote, as if it had been deleted there
    pub fn remove(&self, path: &str) {
        self.state.lock().unwrap().visible.remove(path);
    }
}

#[async_trait]
impl RemoteRegistry for FakeRegistry {
    async fn bulk_upload(&self, request: &UploadRequest) -> Result<UploadReport, TransportError> {
        if self.hang_above.is_some_and(|max| request.files.len() > max) {
            self.state.lock().unwrap().batches.push(request.files.len());
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock().unwrap();
        state.batches.push(request.files.len());
        if let Some(max) = self.max_batch {
            if request.files.len() > max {
                return Err(TransportError::Status {
                    status: 504,
                    body: format!("commit of {} files timed out", request.files.len()),
                });
            }
        }
        let lost = self.lost.lock().unwrap();
        for file in &request.files {
            assert!(file.local_path.is_file(), "staged file missing: {:?}", file.local_path);
            if !lost.contains(&file.path_in_repo) {
                state.landing.push((file.path_in_repo.clone(), self.visibility_lag));
            }
        }
        Ok(UploadReport {
            commit_id: Some(format!("commit-{}", state.batches.len())),
            files: request.files.iter().map(|f| f.path_in_repo.clone()).collect(),
        })
    }

    async fn list_remote_files(
        &self,
        _destination: &Destination,
    ) -> Result<BTreeSet<String>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.listings += 1;
        let mut still_landing = Vec::new();
        for (path, lag) in std::mem::take(&mut state.landing) {
            if lag == 0 {
                state.visible.insert(path);
            } else {
                still_landing.push((path, lag - 1));
            }
        }
        state.landing = still_landing;
        Ok(state.visible.clone())
    }

    async fn create_or_update_manifest(
        &self,
        _destination: &Destination,
        manifest: &DatasetManifest,
    ) -> Result<(), TransportError> {
        if self.fail_manifest {
            return Err(TransportError::Rejected("card rejected".to_string()));
        }
        self.state.lock().unwrap().manifests.push(manifest.clone());
        Ok(())
    }

    fn listing_hint(&self, destination: &Destination) -> String {
        format!("fake-list {}", destination)
    }
}
