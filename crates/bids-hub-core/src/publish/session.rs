//! Persistent publish sessions
//!
//! A session owns one staging directory, `<staging_root>/<uuid>/`, and records
//! its progress in `session.json` next to the staged shards so a failed
//! publish can be resumed by another process.

use super::registry::{DatasetManifest, Destination};
use crate::error::{PipelineError, Result};
use crate::staging::{write_atomic, StagedDatasetInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const SESSION_FILE: &str = "session.json";
pub const LEASE_FILE: &str = "LEASE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Created,
    Staging,
    Staged,
    Publishing,
    Published,
    PublishFailed,
    TornDown,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "CREATED",
            SessionState::Staging => "STAGING",
            SessionState::Staged => "STAGED",
            SessionState::Publishing => "PUBLISHING",
            SessionState::Published => "PUBLISHED",
            SessionState::PublishFailed => "PUBLISH_FAILED",
            SessionState::TornDown => "TORN_DOWN",
        }
    }

    /// Nothing but an explicit teardown leaves `Published`, and nothing
    /// reaches `TornDown` from any other state
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, Staging)
                | (Staging, Staged)
                // re-staging an unchanged table is idempotent
                | (Staged, Staging)
                | (Staged, Publishing)
                | (Publishing, Published)
                | (Publishing, PublishFailed)
                | (PublishFailed, Publishing)
                | (Published, TornDown)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CREATED" => Ok(SessionState::Created),
            "STAGING" => Ok(SessionState::Staging),
            "STAGED" => Ok(SessionState::Staged),
            "PUBLISHING" => Ok(SessionState::Publishing),
            "PUBLISHED" => Ok(SessionState::Published),
            "PUBLISH_FAILED" => Ok(SessionState::PublishFailed),
            "TORN_DOWN" => Ok(SessionState::TornDown),
            other => Err(PipelineError::session(format!("unknown session state '{}'", other))),
        }
    }
}

/// Per-shard progress; `confirmed` is only ever set from a remote listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardLedgerEntry {
    pub index: usize,
    pub path_in_repo: String,
    pub bytes: u64,
    pub attempts: u32,
    pub confirmed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSession {
    pub id: Uuid,
    #[serde(skip)]
    dir: PathBuf,
    pub state: SessionState,
    pub destination: Option<Destination>,
    pub manifest: Option<DatasetManifest>,
    pub ledger: Vec<ShardLedgerEntry>,
    /// Size of every attempted commit, in order
    pub batch_history: Vec<usize>,
    /// Batch size the next upload round starts from; never grows
    pub batch_size: Option<usize>,
    pub retries_used: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PublishSession {
    /// Allocate `<staging_root>/<uuid>/` and persist a `CREATED` session there
    pub fn create(staging_root: &Path) -> Result<Self> {
        let id = Uuid::new_v4();
        let dir = staging_root.join(id.to_string());
        std::fs::create_dir_all(&dir)?;

        let now = Utc::now();
        let session = Self {
            id,
            dir,
            state: SessionState::Created,
            destination: None,
            manifest: None,
            ledger: Vec::new(),
            batch_history: Vec::new(),
            batch_size: None,
            retries_used: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        session.persist()?;
        info!(session = %id, dir = %session.dir.display(), "Created publish session");
        Ok(session)
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(SESSION_FILE);
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            PipelineError::session(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut session: PublishSession = serde_json::from_str(&raw)?;
        session.dir = dir.to_path_buf();
        Ok(session)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn persist(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(&self.dir.join(SESSION_FILE), &json)?;
        Ok(())
    }

    /// Validate, apply and persist a state change
    pub fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::session(format!(
                "invalid transition {} -> {} for session {}",
                self.state, next, self.id
            )));
        }
        debug!(session = %self.id, from = %self.state, to = %next, "Session transition");
        self.state = next;
        self.updated_at = Utc::now();
        self.persist()
    }

    /// Rebuild the ledger from freshly staged artifacts
    pub fn record_staged(&mut self, info: &StagedDatasetInfo) {
        self.ledger = info
            .shards
            .iter()
            .map(|shard| ShardLedgerEntry {
                index: shard.index,
                path_in_repo: shard.file.clone(),
                bytes: shard.bytes,
                attempts: 0,
                confirmed: false,
            })
            .collect();
        self.manifest = Some(DatasetManifest::from_staged(info));
    }

    pub fn shard_count(&self) -> usize {
        self.ledger.len()
    }

    pub fn pending(&self) -> Vec<usize> {
        self.ledger
            .iter()
            .filter(|e| !e.confirmed)
            .map(|e| e.index)
            .collect()
    }

    pub fn confirmed_count(&self) -> usize {
        self.ledger.iter().filter(|e| e.confirmed).count()
    }

    pub fn entry(&self, index: usize) -> Option<&ShardLedgerEntry> {
        self.ledger.iter().find(|e| e.index == index)
    }

    pub(crate) fn note_attempt(&mut self, indices: &[usize]) {
        for entry in self.ledger.iter_mut().filter(|e| indices.contains(&e.index)) {
            entry.attempts += 1;
        }
    }

    /// Mark every ledger entry present in `listing`; returns the indices
    /// still missing
    pub fn confirm(&mut self, listing: &BTreeSet<String>) -> Vec<usize> {
        for entry in &mut self.ledger {
            if !entry.confirmed && listing.contains(&entry.path_in_repo) {
                entry.confirmed = true;
            }
        }
        self.pending()
    }

    /// Ledger paths absent from `listing`, confirmed or not
    pub fn missing_from(&self, listing: &BTreeSet<String>) -> Vec<String> {
        self.ledger
            .iter()
            .filter(|e| !listing.contains(&e.path_in_repo))
            .map(|e| e.path_in_repo.clone())
            .collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "session {} is {}: {}/{} shards confirmed, {} retries used",
            self.id,
            self.state,
            self.confirmed_count(),
            self.shard_count(),
            self.retries_used
        )
    }
}

/// Exclusive claim on a session directory, released on drop
#[derive(Debug)]
pub struct SessionLease {
    path: PathBuf,
}

impl SessionLease {
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LEASE_FILE);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => PipelineError::session(format!(
                    "{} is held by another publisher (remove {} if that process is gone)",
                    dir.display(),
                    path.display()
                )),
                _ => PipelineError::Io(e),
            })?;
        writeln!(file, "pid={}", std::process::id())?;
        writeln!(file, "acquired_at={}", Utc::now().to_rfc3339())?;
        Ok(Self { path })
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to release lease {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ledger_entry(index: usize) -> ShardLedgerEntry {
        ShardLedgerEntry {
            index,
            path_in_repo: format!("data/train-{:05}-of-00003.jsonl", index),
            bytes: 10,
            attempts: 0,
            confirmed: false,
        }
    }

    #[test]
    fn test_transitions() {
        use SessionState::*;
        assert!(Created.can_transition_to(Staging));
        assert!(Publishing.can_transition_to(PublishFailed));
        assert!(PublishFailed.can_transition_to(Publishing));
        assert!(Published.can_transition_to(TornDown));

        assert!(!Created.can_transition_to(Publishing));
        assert!(!PublishFailed.can_transition_to(TornDown));
        assert!(!Staged.can_transition_to(TornDown));
        assert!(!Published.can_transition_to(Publishing));
        assert!(!TornDown.can_transition_to(Staging));
    }

    #[test]
    fn test_state_strings() {
        for state in [
            SessionState::Created,
            SessionState::PublishFailed,
            SessionState::TornDown,
        ] {
            assert_eq!(state.as_str().parse::<SessionState>().unwrap(), state);
        }
        assert_eq!(
            serde_json::to_string(&SessionState::PublishFailed).unwrap(),
            "\"PUBLISH_FAILED\""
        );
    }

    #[test]
    fn test_create_persist_load() {
        let root = TempDir::new().unwrap();
        let mut session = PublishSession::create(root.path()).unwrap();
        assert_eq!(session.dir(), root.path().join(session.id.to_string()));

        session.transition(SessionState::Staging).unwrap();
        session.ledger = vec![ledger_entry(0), ledger_entry(1)];
        session.persist().unwrap();

        let loaded = PublishSession::load(session.dir()).unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.state, SessionState::Staging);
        assert_eq!(loaded.ledger.len(), 2);
        assert_eq!(loaded.dir(), session.dir());
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let root = TempDir::new().unwrap();
        let mut session = PublishSession::create(root.path()).unwrap();
        let err = session.transition(SessionState::TornDown).unwrap_err();
        assert!(matches!(err, PipelineError::Session(_)));
        assert_eq!(session.state, SessionState::Created);
    }

    #[test]
    fn test_confirm_only_from_listing() {
        let root = TempDir::new().unwrap();
        let mut session = PublishSession::create(root.path()).unwrap();
        session.ledger = (0..3).map(ledger_entry).collect();

        let listing: BTreeSet<String> = ["data/train-00001-of-00003.jsonl".to_string()].into();
        assert_eq!(session.confirm(&listing), vec![0, 2]);
        assert_eq!(session.confirmed_count(), 1);
        assert_eq!(session.missing_from(&listing).len(), 2);
    }

    #[test]
    fn test_lease_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let lease = SessionLease::acquire(dir.path()).unwrap();
        assert!(dir.path().join(LEASE_FILE).exists());

        let err = SessionLease::acquire(dir.path()).unwrap_err();
        assert!(err.to_string().contains("held by another publisher"));

        drop(lease);
        assert!(!dir.path().join(LEASE_FILE).exists());
        assert!(SessionLease::acquire(dir.path()).is_ok());
    }
}
