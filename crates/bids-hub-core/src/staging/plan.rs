//! Deterministic partitioning of table rows into shards

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::warn;

/// Contiguous, order-preserving row ranges; sizes differ by at most one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardPlan {
    pub row_count: usize,
    pub ranges: Vec<Range<usize>>,
}

impl ShardPlan {
    /// `requested = None` means one row per shard
    pub fn new(row_count: usize, requested: Option<usize>) -> Result<Self> {
        if row_count == 0 {
            return Err(PipelineError::Staging("cannot shard an empty table".to_string()));
        }

        let mut count = requested.unwrap_or(row_count);
        if count == 0 {
            return Err(PipelineError::Staging("shard count must be at least 1".to_string()));
        }
        if count > row_count {
            warn!("Requested {} shards for {} rows; using {}", count, row_count, row_count);
            count = row_count;
        }

        let base = row_count / count;
        let remainder = row_count % count;
        let mut ranges = Vec::with_capacity(count);
        let mut start = 0;
        for i in 0..count {
            let len = base + usize::from(i < remainder);
            ranges.push(start..start + len);
            start += len;
        }

        Ok(Self { row_count, ranges })
    }

    pub fn shard_count(&self) -> usize {
        self.ranges.len()
    }
}

/// `data/train-00003-of-00010.jsonl`
pub fn shard_file_name(split: &str, index: usize, count: usize) -> String {
    format!("{}-{:05}-of-{:05}.jsonl", split, index, count)
}
