//! Shard planning and local staging
//!
//! A staged dataset is a directory that can be inspected, re-staged and
//! uploaded independently of the process that built it:
//!
//! ```text
//! <session>/
//!   dataset_info.json
//!   data/train-00000-of-00003.jsonl
//!   data/train-00001-of-00003.jsonl
//!   data/train-00002-of-00003.jsonl
//! ```

mod plan;
mod stager;

pub use plan::{shard_file_name, ShardPlan};
pub use stager::{
    load_staged, Shard, StagedDatasetInfo, StagedShard, Stager, StagingOptions, DATASET_INFO_FILE,
    DATA_DIR,
};

use std::io::Write;
use std::path::Path;

/// Write through a sibling temp file and rename, so readers never observe a
/// partial artifact
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}
