//! Rate-limited bulk upload with shrinking batches and listing confirmation

use super::config::PublishConfig;
use super::rate_limit::CommitRateLimiter;
use super::registry::{DatasetManifest, Destination, RemoteRegistry, UploadFile, UploadRequest};
use super::session::{PublishSession, SessionLease, SessionState};
use crate::error::{PipelineError, Result, TransportError};
use crate::staging::{StagedDatasetInfo, DATASET_INFO_FILE, DATA_DIR};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

pub struct Publisher {
    registry: Arc<dyn RemoteRegistry>,
    config: PublishConfig,
    limiter: CommitRateLimiter,
}

impl Publisher {
    pub fn new(registry: Arc<dyn RemoteRegistry>, config: PublishConfig) -> Self {
        let limiter = CommitRateLimiter::new(config.max_commits, config.commit_window);
        Self {
            registry,
            config,
            limiter,
        }
    }

    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    /// Upload every unconfirmed shard of a `STAGED` or `PUBLISH_FAILED`
    /// session. Ends in `PUBLISHED` once a remote listing shows every shard,
    /// or in `PUBLISH_FAILED` once the retry budget is spent; staging is
    /// left in place either way.
    #[instrument(skip(self, session, destination), fields(session = %session.id, destination = %destination))]
    pub async fn publish(
        &mut self,
        session: &mut PublishSession,
        destination: &Destination,
    ) -> Result<()> {
        let _lease = SessionLease::acquire(session.dir())?;

        let info = StagedDatasetInfo::load(session.dir())?;
        info.verify(session.dir())?;
        if session.ledger.is_empty() {
            session.record_staged(&info);
        }

        if session.state == SessionState::PublishFailed {
            info!(
                "Resuming {} with {} of {} shards unconfirmed",
                session.id,
                session.pending().len(),
                session.shard_count()
            );
            session.retries_used = 0;
            session.last_error = None;
        }
        session.destination = Some(destination.clone());
        // a session left in PUBLISHING by a crashed process continues as is
        if session.state != SessionState::Publishing {
            session.transition(SessionState::Publishing)?;
        }

        // shards from an earlier attempt may already be visible
        if session.batch_history.is_empty() {
            session.batch_size = self.config.initial_batch_size;
        } else if let Ok(listing) = self.registry.list_remote_files(destination).await {
            session.confirm(&listing);
        }

        match self.upload_until_confirmed(session, destination).await {
            Ok(()) => {}
            Err(reason) => return self.fail(session, reason),
        }

        let manifest = session
            .manifest
            .clone()
            .unwrap_or_else(|| DatasetManifest::from_staged(&info));
        self.limiter.acquire().await;
        if let Err(e) = self
            .registry
            .create_or_update_manifest(destination, &manifest)
            .await
        {
            return self.fail(session, format!("manifest update failed: {}", e));
        }

        session.transition(SessionState::Published)?;
        info!(
            "Published {} shards ({} rows) to {}",
            session.shard_count(),
            info.row_count,
            destination
        );
        info!(
            "Staging kept at {}; confirm {} shards with `{}` before teardown",
            session.dir().display(),
            session.shard_count(),
            self.registry.listing_hint(destination)
        );
        Ok(())
    }

    /// Upload rounds alternate with listing polls until nothing is pending.
    /// Errors carry the reason the session failed.
    async fn upload_until_confirmed(
        &mut self,
        session: &mut PublishSession,
        destination: &Destination,
    ) -> std::result::Result<(), String> {
        loop {
            let pending = session.pending();
            if pending.is_empty() {
                return Ok(());
            }

            self.upload_round(session, destination, pending).await?;

            let missing = self.verify(session, destination).await;
            if missing.is_empty() {
                return Ok(());
            }

            self.spend_retry(
                session,
                format!(
                    "{} shards not visible after {} listing polls",
                    missing.len(),
                    self.config.verify_polls
                ),
            )?;
            warn!(
                "{} of {} shards missing from remote listing; re-queueing",
                missing.len(),
                session.shard_count()
            );
        }
    }

    async fn upload_round(
        &mut self,
        session: &mut PublishSession,
        destination: &Destination,
        pending: Vec<usize>,
    ) -> std::result::Result<(), String> {
        let mut queue: VecDeque<usize> = pending.into();
        let mut batch_size = session.batch_size.unwrap_or(queue.len()).max(1);

        while !queue.is_empty() {
            let take = batch_size.min(queue.len());
            let batch: Vec<usize> = queue.iter().take(take).copied().collect();
            let request = self
                .build_request(session, destination, &batch)
                .map_err(|e| e.to_string())?;

            self.limiter.acquire().await;
            session.batch_history.push(take);
            session.note_attempt(&batch);
            info!(
                "Committing {} shards ({} bytes largest, timeout {:?})",
                take,
                request.largest_file(),
                request.timeout
            );

            let outcome = tokio::time::timeout(request.timeout, self.registry.bulk_upload(&request))
                .await
                .unwrap_or_else(|_| Err(TransportError::Timeout(request.timeout)));

            match outcome {
                Ok(report) => {
                    queue.drain(..take);
                    info!(
                        "Commit {} returned for {} shards",
                        report.commit_id.as_deref().unwrap_or("-"),
                        take
                    );
                }
                Err(e) => {
                    error!("Commit of {} shards failed: {}", take, e);
                    self.spend_retry(session, e.to_string())?;
                    batch_size = (take / 2).max(1);
                    session.batch_size = Some(batch_size);
                    warn!(
                        "Retrying with batch size {} ({} of {} retries used)",
                        batch_size, session.retries_used, self.config.retry_budget
                    );
                }
            }
            if let Err(e) = session.persist() {
                warn!("Failed to persist session {}: {}", session.id, e);
            }
        }
        Ok(())
    }

    fn spend_retry(
        &self,
        session: &mut PublishSession,
        reason: String,
    ) -> std::result::Result<(), String> {
        session.retries_used += 1;
        session.last_error = Some(reason.clone());
        if session.retries_used > self.config.retry_budget {
            return Err(format!(
                "retry budget of {} exhausted: {}",
                self.config.retry_budget, reason
            ));
        }
        Ok(())
    }

    fn build_request(
        &self,
        session: &PublishSession,
        destination: &Destination,
        batch: &[usize],
    ) -> Result<UploadRequest> {
        let mut files = Vec::with_capacity(batch.len());
        for &index in batch {
            let entry = session.entry(index).ok_or_else(|| {
                PipelineError::session(format!("shard {} is not in the ledger", index))
            })?;
            files.push(UploadFile {
                local_path: session.dir().join(&entry.path_in_repo),
                path_in_repo: entry.path_in_repo.clone(),
                size: entry.bytes,
            });
        }
        let largest = files.iter().map(|f| f.size).max().unwrap_or(0);
        let (first, last) = (batch.first().copied(), batch.last().copied());

        Ok(UploadRequest {
            destination: destination.clone(),
            commit_message: match (first, last) {
                (Some(a), Some(b)) if a != b => format!("Upload shards {}..={}", a, b),
                (Some(a), _) => format!("Upload shard {}", a),
                _ => "Upload shards".to_string(),
            },
            files,
            timeout: self.config.timeout.timeout_for(largest),
        })
    }

    /// Poll the listing until every shard shows up or the polls run out;
    /// returns what is still missing
    async fn verify(&self, session: &mut PublishSession, destination: &Destination) -> Vec<usize> {
        let polls = self.config.verify_polls.max(1);
        let mut missing = session.pending();
        for poll in 1..=polls {
            match self.registry.list_remote_files(destination).await {
                Ok(listing) => {
                    missing = session.confirm(&listing);
                    info!(
                        "Listing poll {}/{}: {} of {} shards confirmed",
                        poll,
                        polls,
                        session.confirmed_count(),
                        session.shard_count()
                    );
                }
                Err(e) => warn!("Listing poll {}/{} failed: {}", poll, polls, e),
            }
            if let Err(e) = session.persist() {
                warn!("Failed to persist session {}: {}", session.id, e);
            }
            if missing.is_empty() {
                break;
            }
            if poll < polls {
                tokio::time::sleep(self.config.verify_interval).await;
            }
        }
        missing
    }

    fn fail(&self, session: &mut PublishSession, reason: String) -> Result<()> {
        error!(
            "Publishing {} failed: {}; staging preserved at {}",
            session.id,
            reason,
            session.dir().display()
        );
        session.last_error = Some(reason);
        session.transition(SessionState::PublishFailed)
    }

    /// Delete staged artifacts of a `PUBLISHED` session after re-checking the
    /// remote listing. `session.json` stays behind as a record.
    #[instrument(skip(self, session, destination), fields(session = %session.id, destination = %destination))]
    pub async fn teardown(
        &self,
        session: &mut PublishSession,
        destination: &Destination,
    ) -> Result<()> {
        if session.state != SessionState::Published {
            return Err(PipelineError::session(format!(
                "teardown refused: session {} is {}, not {}",
                session.id,
                session.state,
                SessionState::Published
            )));
        }
        let _lease = SessionLease::acquire(session.dir())?;

        info!(
            "Expecting {} shards at {}; verify with `{}`",
            session.shard_count(),
            destination,
            self.registry.listing_hint(destination)
        );

        let listing: BTreeSet<String> = self.registry.list_remote_files(destination).await?;
        let missing = session.missing_from(&listing);
        if !missing.is_empty() {
            return Err(PipelineError::session(format!(
                "teardown refused: {} of {} shards missing from the remote listing (first: {})",
                missing.len(),
                session.shard_count(),
                missing[0]
            )));
        }

        let data_dir = session.dir().join(DATA_DIR);
        if data_dir.exists() {
            std::fs::remove_dir_all(&data_dir)?;
        }
        let info_file = session.dir().join(DATASET_INFO_FILE);
        if info_file.exists() {
            std::fs::remove_file(&info_file)?;
        }

        session.transition(SessionState::TornDown)?;
        info!("Removed staged shards from {}", session.dir().display());
        Ok(())
    }
}
