//! Shard planning, staging and reload

mod common;

use bids_hub_core::staging::{
    load_staged, ShardPlan, StagedDatasetInfo, Stager, StagingOptions, DATASET_INFO_FILE,
};
use bids_hub_core::{discover, Value};
use common::*;
use tempfile::TempDir;

fn staged_bytes(dir: &std::path::Path, info: &StagedDatasetInfo) -> Vec<Vec<u8>> {
    info.shards
        .iter()
        .map(|s| std::fs::read(dir.join(&s.file)).unwrap())
        .collect()
}

#[test]
fn test_round_trip_restores_table() {
    let tree = TempDir::new().unwrap();
    build_session_tree(tree.path());
    let schema = session_schema();
    let table = discover(tree.path(), &schema).unwrap().table;

    // sequences of length 0, 1 and 2 are all present
    let lengths: Vec<usize> = table.column_values("dwi").map(Value::sequence_len).collect();
    assert_eq!(lengths, vec![2, 0, 1]);
    let embedded = table.with_embedded_payloads().unwrap();

    for shards in [None, Some(1), Some(2)] {
        let staging = TempDir::new().unwrap();
        let plan = ShardPlan::new(table.len(), shards).unwrap();
        let stager = Stager::new(staging.path(), StagingOptions::default());
        let info = stager
            .stage(&schema.dataset.name, &schema.records.levels, &table, &plan)
            .unwrap();
        assert_eq!(info.shard_count, plan.shard_count());

        let reloaded = load_staged(staging.path()).unwrap();
        assert_eq!(reloaded, embedded, "shards: {:?}", shards);
    }
}

#[test]
fn test_restaging_is_byte_identical() {
    let tree = TempDir::new().unwrap();
    build_session_tree(tree.path());
    let schema = session_schema();
    let table = discover(tree.path(), &schema).unwrap().table;

    let staging = TempDir::new().unwrap();
    let plan = ShardPlan::new(table.len(), None).unwrap();
    let stager = Stager::new(staging.path(), StagingOptions::default());

    let first = stager
        .stage(&schema.dataset.name, &schema.records.levels, &table, &plan)
        .unwrap();
    let first_bytes = staged_bytes(staging.path(), &first);
    let first_info = std::fs::read(staging.path().join(DATASET_INFO_FILE)).unwrap();

    let second = stager
        .stage(&schema.dataset.name, &schema.records.levels, &table, &plan)
        .unwrap();
    assert_eq!(staged_bytes(staging.path(), &second), first_bytes);
    assert_eq!(
        std::fs::read(staging.path().join(DATASET_INFO_FILE)).unwrap(),
        first_info
    );

    let files = std::fs::read_dir(staging.path().join("data")).unwrap().count();
    assert_eq!(files, plan.shard_count());
}

#[test]
fn test_fewer_shards_remove_stale_artifacts() {
    let tree = TempDir::new().unwrap();
    build_session_tree(tree.path());
    let schema = session_schema();
    let table = discover(tree.path(), &schema).unwrap().table;

    let staging = TempDir::new().unwrap();
    let stager = Stager::new(staging.path(), StagingOptions::default());
    stager
        .stage(
            &schema.dataset.name,
            &schema.records.levels,
            &table,
            &ShardPlan::new(table.len(), None).unwrap(),
        )
        .unwrap();
    let info = stager
        .stage(
            &schema.dataset.name,
            &schema.records.levels,
            &table,
            &ShardPlan::new(table.len(), Some(1)).unwrap(),
        )
        .unwrap();

    let names: Vec<String> = std::fs::read_dir(staging.path().join("data"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["train-00000-of-00001.jsonl".to_string()]);
    assert_eq!(info.shards[0].rows, 3);
    assert_eq!(
        load_staged(staging.path()).unwrap(),
        table.with_embedded_payloads().unwrap()
    );
}

#[test]
fn test_dataset_info_verifies_checksums() {
    let tree = TempDir::new().unwrap();
    build_session_tree(tree.path());
    let schema = session_schema();
    let table = discover(tree.path(), &schema).unwrap().table;

    let staging = TempDir::new().unwrap();
    let stager = Stager::new(staging.path(), StagingOptions::default().with_split("test"));
    let info = stager
        .stage(
            &schema.dataset.name,
            &schema.records.levels,
            &table,
            &ShardPlan::new(table.len(), None).unwrap(),
        )
        .unwrap();
    assert_eq!(info.shards[2].file, "data/test-00002-of-00003.jsonl");

    let loaded = StagedDatasetInfo::load(staging.path()).unwrap();
    loaded.verify(staging.path()).unwrap();

    std::fs::write(staging.path().join(&info.shards[1].file), b"{}\n").unwrap();
    assert!(loaded.verify(staging.path()).is_err());
}

#[test]
fn test_default_staging_carries_payload_bytes() {
    let tree = TempDir::new().unwrap();
    build_session_tree(tree.path());
    let schema = session_schema();
    let table = discover(tree.path(), &schema).unwrap().table;

    let staging = TempDir::new().unwrap();
    let stager = Stager::new(staging.path(), StagingOptions::default());
    let info = stager
        .stage(
            &schema.dataset.name,
            &schema.records.levels,
            &table,
            &ShardPlan::new(table.len(), Some(1)).unwrap(),
        )
        .unwrap();
    assert!(info.embed_payloads);

    let raw = std::fs::read_to_string(staging.path().join(&info.shards[0].file)).unwrap();
    let source_root = tree.path().display().to_string();
    assert!(!raw.contains(&source_root), "shard references the source tree");

    let first: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
    assert!(first["t1w"]["bytes"].is_string());
    assert_eq!(first["t1w"]["path"], "sub-1_ses-1_T1w.nii.gz");

    let reloaded = load_staged(staging.path()).unwrap();
    let original = table.rows()[0].get("t1w").unwrap().as_path().unwrap();
    let restored = match reloaded.rows()[0].get("t1w").unwrap() {
        Value::Embedded(payload) => payload.bytes.to_vec(),
        other => panic!("expected embedded payload, got {:?}", other),
    };
    assert_eq!(restored, std::fs::read(original).unwrap());
    assert_eq!(reloaded, table.with_embedded_payloads().unwrap());
}

#[test]
fn test_path_only_staging_round_trips_paths() {
    let tree = TempDir::new().unwrap();
    build_session_tree(tree.path());
    let schema = session_schema();
    let table = discover(tree.path(), &schema).unwrap().table;

    let staging = TempDir::new().unwrap();
    let stager = Stager::new(
        staging.path(),
        StagingOptions::default().with_embed_payloads(false),
    );
    let info = stager
        .stage(
            &schema.dataset.name,
            &schema.records.levels,
            &table,
            &ShardPlan::new(table.len(), None).unwrap(),
        )
        .unwrap();
    assert!(!info.embed_payloads);
    assert_eq!(load_staged(staging.path()).unwrap(), table);
}
