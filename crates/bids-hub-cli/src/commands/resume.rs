//! `bids-hub resume` command implementation

use super::{publisher_for, report_session};
use crate::config::Config;
use crate::error::Result;
use crate::progress::{create_spinner, finish};
use crate::TargetArgs;
use bids_hub_core::pipeline;
use bids_hub_core::publish::PublishSession;
use std::path::Path;

/// Upload whatever the session has not yet confirmed remotely
pub async fn run(session_dir: &Path, target: &TargetArgs) -> Result<()> {
    let config = Config::from_env()?.with_revision(target.revision.clone());

    let recorded = PublishSession::load(session_dir)?.destination;
    let destination = match target.repo.as_deref() {
        Some(repo) => Some(config.destination(repo)),
        None => recorded,
    };
    let mut publisher = publisher_for(&config, target, destination.as_ref()).await?;

    let spinner = create_spinner(&format!("Resuming {}", session_dir.display()));
    let session = pipeline::resume(session_dir, destination.as_ref(), &mut publisher).await?;
    finish(&spinner, session.summary());

    report_session(&session)
}
