//! Serialize shards to JSON Lines and read them back

use super::plan::{shard_file_name, ShardPlan};
use super::write_atomic;
use crate::entity::split_level_dir;
use crate::error::{PipelineError, Result};
use crate::schema::{ColumnInfo, DType, RecordLevel, Shape};
use crate::table::{EmbeddedPayload, EntityKey, Record, Table, Value};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bids_hub_common::checksum::{compute_checksum, verify_file_checksum};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DATA_DIR: &str = "data";
pub const DATASET_INFO_FILE: &str = "dataset_info.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingOptions {
    pub split: String,
    /// Inline payload bytes (base64) so shards do not reference the source tree
    pub embed_payloads: bool,
}

impl Default for StagingOptions {
    fn default() -> Self {
        Self {
            split: "train".to_string(),
            embed_payloads: true,
        }
    }
}

impl StagingOptions {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            split: std::env::var("BIDS_HUB_SPLIT").unwrap_or(defaults.split),
            embed_payloads: std::env::var("BIDS_HUB_EMBED_PAYLOADS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.embed_payloads),
        }
    }

    /// Environment settings with the dataset's own split as the default
    pub fn for_split(split: &str) -> Self {
        Self {
            split: std::env::var("BIDS_HUB_SPLIT").unwrap_or_else(|_| split.to_string()),
            ..Self::from_env()
        }
    }

    pub fn with_split(mut self, split: impl Into<String>) -> Self {
        self.split = split.into();
        self
    }

    pub fn with_embed_payloads(mut self, embed: bool) -> Self {
        self.embed_payloads = embed;
        self
    }
}

/// An owned copy of a row range; shares nothing with the parent table
#[derive(Debug, Clone)]
pub struct Shard {
    pub index: usize,
    pub count: usize,
    pub rows: Vec<Record>,
}

impl Shard {
    pub fn materialize(table: &Table, plan: &ShardPlan, index: usize) -> Result<Self> {
        let range = plan
            .ranges
            .get(index)
            .cloned()
            .ok_or_else(|| PipelineError::Staging(format!("shard {} is not in the plan", index)))?;
        let rows = table
            .rows()
            .get(range.clone())
            .ok_or_else(|| {
                PipelineError::Staging(format!(
                    "shard {} range {:?} exceeds table of {} rows",
                    index,
                    range,
                    table.len()
                ))
            })?
            .to_vec();
        Ok(Self {
            index,
            count: plan.shard_count(),
            rows,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedShard {
    pub index: usize,
    /// Relative to the staging directory, also the remote path
    pub file: String,
    pub rows: usize,
    pub bytes: u64,
    pub sha256: String,
}

/// `dataset_info.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedDatasetInfo {
    pub name: String,
    pub split: String,
    pub levels: Vec<RecordLevel>,
    pub columns: Vec<ColumnInfo>,
    pub row_count: usize,
    pub shard_count: usize,
    pub embed_payloads: bool,
    pub shards: Vec<StagedShard>,
}

impl StagedDatasetInfo {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(DATASET_INFO_FILE);
        if !path.is_file() {
            return Err(PipelineError::Staging(format!(
                "{} not found; nothing staged in {}",
                DATASET_INFO_FILE,
                dir.display()
            )));
        }
        Ok(serde_json::from_slice(&std::fs::read(path)?)?)
    }

    /// Re-hash every shard against the recorded digest
    pub fn verify(&self, dir: &Path) -> Result<()> {
        for shard in &self.shards {
            verify_file_checksum(dir.join(&shard.file), &shard.sha256)?;
        }
        Ok(())
    }

    pub fn shard(&self, index: usize) -> Option<&StagedShard> {
        self.shards.iter().find(|s| s.index == index)
    }
}

pub struct Stager {
    dir: PathBuf,
    options: StagingOptions,
}

impl Stager {
    pub fn new(dir: impl Into<PathBuf>, options: StagingOptions) -> Self {
        Self {
            dir: dir.into(),
            options,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write every shard of the plan plus `dataset_info.json`. Re-staging the
    /// same table overwrites byte-identical files and removes stale shards.
    pub fn stage(
        &self,
        name: &str,
        levels: &[RecordLevel],
        table: &Table,
        plan: &ShardPlan,
    ) -> Result<StagedDatasetInfo> {
        if plan.row_count != table.len() {
            return Err(PipelineError::Staging(format!(
                "plan covers {} rows but table has {}",
                plan.row_count,
                table.len()
            )));
        }

        let data_dir = self.dir.join(DATA_DIR);
        std::fs::create_dir_all(&data_dir)?;

        let mut shards = Vec::with_capacity(plan.shard_count());
        for index in 0..plan.shard_count() {
            let shard = Shard::materialize(table, plan, index)?;
            shards.push(self.write_shard(table.columns(), &shard)?);
        }

        self.remove_stale(&data_dir, &shards)?;

        let info = StagedDatasetInfo {
            name: name.to_string(),
            split: self.options.split.clone(),
            levels: levels.to_vec(),
            columns: table.columns().to_vec(),
            row_count: table.len(),
            shard_count: shards.len(),
            embed_payloads: self.options.embed_payloads,
            shards,
        };
        write_atomic(
            &self.dir.join(DATASET_INFO_FILE),
            &serde_json::to_vec_pretty(&info)?,
        )?;

        info!(
            "Staged {} rows into {} shards at {}",
            info.row_count,
            info.shard_count,
            self.dir.display()
        );
        Ok(info)
    }

    fn write_shard(&self, columns: &[ColumnInfo], shard: &Shard) -> Result<StagedShard> {
        let mut buf = Vec::new();
        for record in &shard.rows {
            let mut row = Map::new();
            for column in columns {
                let value = record.get(&column.name).unwrap_or(&Value::Null);
                row.insert(
                    column.name.clone(),
                    encode_value(value, self.options.embed_payloads)?,
                );
            }
            serde_json::to_writer(&mut buf, &row)?;
            buf.push(b'\n');
        }

        let file = format!(
            "{}/{}",
            DATA_DIR,
            shard_file_name(&self.options.split, shard.index, shard.count)
        );
        write_atomic(&self.dir.join(&file), &buf)?;
        debug!("Wrote shard {} ({} rows, {} bytes)", file, shard.rows.len(), buf.len());

        Ok(StagedShard {
            index: shard.index,
            file,
            rows: shard.rows.len(),
            bytes: buf.len() as u64,
            sha256: compute_checksum(&buf),
        })
    }

    fn remove_stale(&self, data_dir: &Path, keep: &[StagedShard]) -> Result<()> {
        let keep: HashSet<String> = keep
            .iter()
            .filter_map(|s| Path::new(&s.file).file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();

        for entry in std::fs::read_dir(data_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let stale_shard = name.ends_with(".jsonl") && !keep.contains(&name);
            let leftover_tmp = name.starts_with('.') && name.ends_with(".tmp");
            if stale_shard || leftover_tmp {
                debug!("Removing stale staging file {}", name);
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

/// Reload staged shards in index order and concatenate them into a Table
pub fn load_staged(dir: &Path) -> Result<Table> {
    let info = StagedDatasetInfo::load(dir)?;
    let mut shards = info.shards.clone();
    shards.sort_by_key(|s| s.index);

    let mut rows = Vec::with_capacity(info.row_count);
    for shard in &shards {
        let content = std::fs::read_to_string(dir.join(&shard.file))?;
        for line in content.lines().filter(|l| !l.is_empty()) {
            let row: Map<String, Json> = serde_json::from_str(line)?;
            rows.push(decode_row(&row, &info)?);
        }
    }

    if rows.len() != info.row_count {
        return Err(PipelineError::Staging(format!(
            "expected {} staged rows, read {}",
            info.row_count,
            rows.len()
        )));
    }
    Ok(Table::new(info.columns, rows))
}

fn decode_row(row: &Map<String, Json>, info: &StagedDatasetInfo) -> Result<Record> {
    let mut values = BTreeMap::new();
    for column in &info.columns {
        let json = row.get(&column.name).unwrap_or(&Json::Null);
        values.insert(column.name.clone(), decode_value(json, column)?);
    }

    let mut parts = Vec::with_capacity(info.levels.len());
    for level in &info.levels {
        let part = values
            .get(&level.column)
            .and_then(Value::as_text)
            .and_then(|dir_name| split_level_dir(dir_name, &level.entity))
            .ok_or_else(|| {
                PipelineError::Staging(format!("staged row lacks key column '{}'", level.column))
            })?;
        parts.push(part);
    }

    Ok(Record {
        key: EntityKey::new(parts),
        values,
    })
}

fn encode_value(value: &Value, embed: bool) -> Result<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Text(s) => Json::String(s.clone()),
        Value::Int(i) => json!(i),
        Value::Float(x) => json!(x),
        Value::Payload(path) if embed => encode_embedded(&EmbeddedPayload::read(path)?),
        Value::Payload(path) => Json::String(path.display().to_string()),
        Value::Embedded(payload) => encode_embedded(payload),
        Value::List(items) => Json::Array(
            items
                .iter()
                .map(|v| encode_value(v, embed))
                .collect::<Result<Vec<_>>>()?,
        ),
    })
}

fn encode_embedded(payload: &EmbeddedPayload) -> Json {
    json!({ "path": payload.name, "bytes": BASE64.encode(&payload.bytes) })
}

fn decode_value(json: &Json, column: &ColumnInfo) -> Result<Value> {
    match (column.shape, json) {
        (Shape::Sequence, Json::Array(items)) => Ok(Value::List(
            items
                .iter()
                .map(|item| decode_scalar(item, column))
                .collect::<Result<Vec<_>>>()?,
        )),
        (Shape::Sequence, Json::Null) => Ok(Value::List(Vec::new())),
        (Shape::Sequence, other) => Err(PipelineError::Staging(format!(
            "column '{}' expects a list, found {}",
            column.name, other
        ))),
        (Shape::Singleton, scalar) => decode_scalar(scalar, column),
    }
}

fn decode_scalar(json: &Json, column: &ColumnInfo) -> Result<Value> {
    let mismatch = || {
        PipelineError::Staging(format!(
            "column '{}' ({}) cannot hold {}",
            column.name,
            column.dtype.as_str(),
            json
        ))
    };

    match (column.dtype, json) {
        (_, Json::Null) => Ok(Value::Null),
        (DType::Text, Json::String(s)) => Ok(Value::Text(s.clone())),
        (DType::Int, Json::Number(n)) => n.as_i64().map(Value::Int).ok_or_else(mismatch),
        (DType::Float, Json::Number(n)) => n.as_f64().map(Value::Float).ok_or_else(mismatch),
        (DType::Payload, Json::String(s)) => Ok(Value::Payload(PathBuf::from(s))),
        (DType::Payload, Json::Object(obj)) => {
            let path = obj.get("path").and_then(Json::as_str).ok_or_else(mismatch)?;
            match obj.get("bytes").and_then(Json::as_str) {
                Some(encoded) => {
                    let bytes = BASE64.decode(encoded).map_err(|e| {
                        PipelineError::Staging(format!(
                            "column '{}' holds invalid base64 for {}: {}",
                            column.name, path, e
                        ))
                    })?;
                    Ok(Value::Embedded(EmbeddedPayload {
                        name: path.to_string(),
                        bytes: bytes.into(),
                    }))
                },
                None => Ok(Value::Payload(PathBuf::from(path))),
            }
        },
        _ => Err(mismatch()),
    }
}
