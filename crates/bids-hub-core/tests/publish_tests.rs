//! Publishing against fake and folder registries: shrinking batches,
//! listing confirmation, resume and teardown

mod common;

use bids_hub_core::publish::{
    Destination, FolderRegistry, PublishConfig, PublishSession, Publisher, SessionLease,
    SessionState, TimeoutPolicy, SESSION_FILE,
};
use bids_hub_core::schema::Schema;
use bids_hub_core::staging::{StagingOptions, DATASET_INFO_FILE};
use bids_hub_core::{discover, pipeline, PipelineError, Table};
use common::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TEN_SCHEMA: &str = r#"
[dataset]
name = "ten-subjects"
description = "Ten anatomical scans"
license = "cc0-1.0"

[records]
source = "tree"
levels = [{ entity = "sub", column = "subject_id" }]

[[columns]]
name = "t1w"
dtype = "payload"
source = { kind = "files", dir = "anat", pattern = "*_T1w.nii.gz" }
"#;

struct Fixture {
    _tree: TempDir,
    staging: TempDir,
    schema: Schema,
    table: Table,
}

fn ten_subjects() -> Fixture {
    let tree = TempDir::new().unwrap();
    for i in 1..=10 {
        nifti(
            tree.path(),
            &format!("sub-{:02}/anat/sub-{:02}_T1w.nii.gz", i, i),
        );
    }
    let schema = Schema::from_toml_str(TEN_SCHEMA).unwrap();
    let table = discover(tree.path(), &schema).unwrap().table;
    assert_eq!(table.len(), 10);
    Fixture {
        _tree: tree,
        staging: TempDir::new().unwrap(),
        schema,
        table,
    }
}

fn config() -> PublishConfig {
    PublishConfig::default()
        .with_verification(3, Duration::from_millis(1))
        .with_rate_limit(1000, Duration::from_secs(60))
}

fn shard_paths(count: usize) -> BTreeSet<String> {
    (0..count)
        .map(|i| format!("data/train-{:05}-of-{:05}.jsonl", i, count))
        .collect()
}

fn destination() -> Destination {
    Destination::new("lab/ten-subjects")
}

async fn publish_ten(
    fixture: &Fixture,
    publisher: &mut Publisher,
) -> bids_hub_core::Result<PublishSession> {
    pipeline::publish(
        &fixture.table,
        &fixture.schema,
        &destination(),
        Some(10),
        fixture.staging.path(),
        StagingOptions::default(),
        publisher,
    )
    .await
}

#[tokio::test]
async fn test_scenario_d_batches_shrink_until_every_shard_is_listed() {
    let fixture = ten_subjects();
    let registry = Arc::new(FakeRegistry::default().failing_above(1));
    let mut publisher = Publisher::new(registry.clone(), config());

    let session = publish_ten(&fixture, &mut publisher).await.unwrap();

    let batches = registry.batches();
    assert_eq!(&batches[..4], &[10, 5, 2, 1]);
    assert_eq!(batches.len(), 13);
    assert_eq!(session.batch_history, batches);
    assert_eq!(session.batch_size, Some(1));
    assert_eq!(session.retries_used, 3);

    assert_eq!(session.state, SessionState::Published);
    assert_eq!(registry.visible(), shard_paths(10));
    assert_eq!(session.confirmed_count(), 10);

    let manifests = registry.manifests();
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0].row_count, 10);
    assert_eq!(manifests[0].shard_count, 10);
    assert_eq!(manifests[0].license.as_deref(), Some("cc0-1.0"));

    // staging is only removed by an explicit teardown
    assert!(session.dir().join("data").is_dir());
    let reloaded = PublishSession::load(session.dir()).unwrap();
    assert_eq!(reloaded.state, SessionState::Published);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_commit_times_out_and_halves_batch() {
    let fixture = ten_subjects();
    let registry = Arc::new(FakeRegistry::default().hanging_above(5));
    // at one byte per second every shard hits the 90s ceiling
    let policy = TimeoutPolicy {
        base: Duration::from_secs(30),
        min_bytes_per_sec: 1,
        ceiling: Duration::from_secs(90),
    };
    let mut publisher = Publisher::new(registry.clone(), config().with_timeout(policy));

    let started = tokio::time::Instant::now();
    let session = publish_ten(&fixture, &mut publisher).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(registry.batches(), vec![10, 5, 5]);
    assert_eq!(session.batch_history, vec![10, 5, 5]);
    assert_eq!(session.batch_size, Some(5));
    assert_eq!(session.retries_used, 1);
    assert!(
        session.last_error.as_deref().unwrap_or_default().contains("timed out after 90s"),
        "{:?}",
        session.last_error
    );
    assert!(elapsed >= Duration::from_secs(90), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(180), "{:?}", elapsed);

    assert_eq!(session.state, SessionState::Published);
    assert_eq!(registry.visible(), shard_paths(10));
}

#[tokio::test]
async fn test_publish_waits_for_delayed_listing() {
    let fixture = ten_subjects();
    let registry = Arc::new(FakeRegistry::default().with_lag(2));
    let mut publisher = Publisher::new(registry.clone(), config());

    let session = publish_ten(&fixture, &mut publisher).await.unwrap();

    assert_eq!(session.state, SessionState::Published);
    assert_eq!(registry.batches(), vec![10]);
    assert_eq!(registry.listings(), 3);
    assert_eq!(session.retries_used, 0);
}

#[tokio::test]
async fn test_unlisted_shards_are_requeued() {
    let fixture = ten_subjects();
    let registry = Arc::new(FakeRegistry::default().with_lag(3));
    let config = config().with_verification(2, Duration::from_millis(1));
    let mut publisher = Publisher::new(registry.clone(), config);

    let session = publish_ten(&fixture, &mut publisher).await.unwrap();

    // the first commit surfaces only after a second upload round
    assert_eq!(registry.batches(), vec![10, 10]);
    assert_eq!(session.retries_used, 1);
    assert_eq!(session.state, SessionState::Published);
    assert!(session.ledger.iter().all(|e| e.attempts == 2));
}

#[tokio::test]
async fn test_exhausted_budget_fails_then_resume_uploads_only_pending() {
    let fixture = ten_subjects();
    let lost = "data/train-00003-of-00010.jsonl";
    let registry = Arc::new(FakeRegistry::default().losing(lost));
    let config = config()
        .with_retry_budget(2)
        .with_verification(1, Duration::from_millis(1));
    let mut publisher = Publisher::new(registry.clone(), config);

    let session = publish_ten(&fixture, &mut publisher).await.unwrap();

    assert_eq!(session.state, SessionState::PublishFailed);
    assert_eq!(registry.batches(), vec![10, 1, 1]);
    assert_eq!(session.confirmed_count(), 9);
    assert_eq!(session.pending(), vec![3]);
    let reason = session.last_error.clone().unwrap();
    assert!(reason.contains("retry budget of 2 exhausted"), "{}", reason);
    assert!(registry.manifests().is_empty());

    assert!(session.dir().join(lost).is_file());
    let persisted = PublishSession::load(session.dir()).unwrap();
    assert_eq!(persisted.state, SessionState::PublishFailed);

    registry.stop_losing();
    let resumed = pipeline::resume(session.dir(), None, &mut publisher)
        .await
        .unwrap();

    assert_eq!(resumed.state, SessionState::Published);
    assert_eq!(registry.batches(), vec![10, 1, 1, 1]);
    assert_eq!(resumed.entry(0).unwrap().attempts, 1);
    assert_eq!(resumed.entry(3).unwrap().attempts, 4);
    assert_eq!(resumed.retries_used, 0);
    assert_eq!(registry.visible(), shard_paths(10));
    assert_eq!(resumed.destination, Some(destination()));
}

#[tokio::test]
async fn test_manifest_failure_marks_session_failed() {
    let fixture = ten_subjects();
    let registry = Arc::new(FakeRegistry::default().failing_manifest());
    let mut publisher = Publisher::new(registry.clone(), config());

    let session = publish_ten(&fixture, &mut publisher).await.unwrap();

    assert_eq!(session.state, SessionState::PublishFailed);
    assert_eq!(session.confirmed_count(), 10);
    assert!(session
        .last_error
        .as_deref()
        .unwrap()
        .contains("manifest update failed"));
}

#[tokio::test]
async fn test_held_lease_blocks_publishing() {
    let fixture = ten_subjects();
    let registry = Arc::new(FakeRegistry::default());
    let mut publisher = Publisher::new(registry.clone(), config());

    let mut session = pipeline::stage(
        &fixture.table,
        &fixture.schema,
        fixture.staging.path(),
        Some(2),
        StagingOptions::default(),
    )
    .unwrap();
    assert_eq!(session.state, SessionState::Staged);

    let lease = SessionLease::acquire(session.dir()).unwrap();
    let err = publisher
        .publish(&mut session, &destination())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Session(ref m) if m.contains("held by another publisher")));
    assert!(registry.batches().is_empty());

    drop(lease);
    publisher.publish(&mut session, &destination()).await.unwrap();
    assert_eq!(session.state, SessionState::Published);
}

#[tokio::test]
async fn test_teardown_requires_published_session() {
    let fixture = ten_subjects();
    let publisher = Publisher::new(Arc::new(FakeRegistry::default()), config());

    let session = pipeline::stage(
        &fixture.table,
        &fixture.schema,
        fixture.staging.path(),
        None,
        StagingOptions::default(),
    )
    .unwrap();

    let err = pipeline::teardown(session.dir(), Some(&destination()), &publisher)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("teardown refused"), "{}", err);
    assert!(session.dir().join("data").is_dir());
}

#[tokio::test]
async fn test_teardown_refuses_when_remote_lost_a_shard() {
    let fixture = ten_subjects();
    let registry = Arc::new(FakeRegistry::default());
    let mut publisher = Publisher::new(registry.clone(), config());
    let session = publish_ten(&fixture, &mut publisher).await.unwrap();

    registry.remove("data/train-00007-of-00010.jsonl");
    let err = pipeline::teardown(session.dir(), None, &publisher)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("train-00007"), "{}", err);

    assert!(session.dir().join("data").is_dir());
    let persisted = PublishSession::load(session.dir()).unwrap();
    assert_eq!(persisted.state, SessionState::Published);
}

#[tokio::test]
async fn test_teardown_removes_staged_shards() {
    let fixture = ten_subjects();
    let registry = Arc::new(FakeRegistry::default());
    let mut publisher = Publisher::new(registry.clone(), config());
    let session = publish_ten(&fixture, &mut publisher).await.unwrap();

    let torn = pipeline::teardown(session.dir(), None, &publisher)
        .await
        .unwrap();

    assert_eq!(torn.state, SessionState::TornDown);
    assert!(!session.dir().join("data").exists());
    assert!(!session.dir().join(DATASET_INFO_FILE).exists());
    assert!(session.dir().join(SESSION_FILE).is_file());

    let err = pipeline::resume(session.dir(), None, &mut publisher)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("TORN_DOWN"), "{}", err);
}

#[tokio::test]
async fn test_folder_registry_end_to_end() {
    let tree = TempDir::new().unwrap();
    build_session_tree(tree.path());
    let schema = session_schema();
    let table = discover(tree.path(), &schema).unwrap().table;

    let remote = TempDir::new().unwrap();
    let staging = TempDir::new().unwrap();
    let registry = Arc::new(FolderRegistry::new(remote.path()));
    let mut publisher = Publisher::new(registry.clone(), config());
    let dest = Destination::new("lab/synthetic-arc");

    let session = pipeline::publish(
        &table,
        &schema,
        &dest,
        None,
        staging.path(),
        StagingOptions::for_split("train"),
        &mut publisher,
    )
    .await
    .unwrap();
    assert_eq!(session.state, SessionState::Published);

    let repo = registry.repo_dir(&dest);
    for path in shard_paths(3) {
        assert!(repo.join(&path).is_file(), "{}", path);
    }
    let card = std::fs::read_to_string(repo.join("README.md")).unwrap();
    assert!(card.contains("num_examples: 3"), "{}", card);
    assert!(card.contains("Synthetic longitudinal dataset"));
}
