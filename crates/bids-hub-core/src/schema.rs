//! Dataset schema: the injected column catalog
//!
//! A schema names the record levels of a tree (`sub-*`, optionally `ses-*`),
//! where each output column comes from, and what the validator should expect.
//! Dataset families differ only in their schema document; discovery and
//! assembly never branch on dataset identity.
//!
//! ```toml
//! [dataset]
//! name = "arc"
//!
//! [records]
//! source = "metadata"
//! levels = [
//!     { entity = "sub", column = "subject_id" },
//!     { entity = "ses", column = "session_id" },
//! ]
//!
//! [metadata]
//! path = "participants.tsv"
//!
//! [[columns]]
//! name = "t1w"
//! shape = "sequence"
//! dtype = "payload"
//! source = { kind = "files", dir = "anat", pattern = "*_T1w.nii.gz" }
//! ```

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub dataset: DatasetInfo,
    pub records: RecordSpec,
    #[serde(default)]
    pub metadata: Option<MetadataSource>,
    #[serde(default)]
    pub partitions: Vec<Partition>,
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub validation: ValidationSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub name: String,
    #[serde(default = "default_split")]
    pub split: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
}

fn default_split() -> String {
    "train".to_string()
}

/// How logical records are enumerated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    /// One top-level record per metadata row; drives "N of M expected"
    #[default]
    Metadata,
    /// Every `<entity>-*` directory under the root
    Tree,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSpec {
    #[serde(default)]
    pub source: RecordSource,
    /// Directory holding the top-level record directories, relative to the
    /// dataset root (e.g. `raw_data`); empty means the root itself
    #[serde(default)]
    pub root: String,
    pub levels: Vec<RecordLevel>,
}

impl RecordSpec {
    /// The outermost level, which names the subjects
    pub fn top(&self) -> Result<&RecordLevel> {
        self.levels
            .first()
            .ok_or_else(|| PipelineError::schema("at least one record level is required"))
    }

    pub fn root_dir(&self, dataset_root: &Path) -> PathBuf {
        match self.root.trim_matches('/') {
            "" | "." => dataset_root.to_path_buf(),
            rel => dataset_root.join(rel),
        }
    }
}

/// One directory level of the tree, e.g. `sub-*` stored as `subject_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordLevel {
    pub entity: String,
    pub column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataSource {
    /// Relative to the dataset root
    pub path: PathBuf,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_key_column")]
    pub key_column: String,
    #[serde(default = "default_null_values")]
    pub null_values: Vec<String>,
}

fn default_delimiter() -> String {
    "\t".to_string()
}

fn default_key_column() -> String {
    "participant_id".to_string()
}

fn default_null_values() -> Vec<String> {
    ["", "n/a", "N/A", "NA", "NaN", "nan"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl MetadataSource {
    pub fn delimiter_byte(&self) -> Result<u8> {
        match self.delimiter.as_bytes() {
            [b] => Ok(*b),
            _ => Err(PipelineError::schema(format!(
                "metadata delimiter must be a single byte, got {:?}",
                self.delimiter
            ))),
        }
    }
}

/// A closed category set over one entity, e.g. `task` in {naming40, rest}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partition {
    pub name: String,
    pub entity: String,
    pub categories: Vec<String>,
    #[serde(default)]
    pub scope: Scope,
    pub dir: String,
    pub pattern: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    #[default]
    Singleton,
    Sequence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Text,
    Float,
    Int,
    /// A file whose bytes are the cell's content
    Payload,
}

impl DType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::Text => "text",
            DType::Float => "float",
            DType::Int => "int",
            DType::Payload => "payload",
        }
    }
}

/// What a singleton file column does when several files match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    #[default]
    Fail,
    First,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Relative to the innermost record directory
    #[default]
    Record,
    /// Relative to the dataset root, with `{entity}` placeholders
    Dataset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompanionPolicy {
    #[default]
    Required,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompanionMode {
    #[default]
    Path,
    /// Whitespace-trimmed text content of the companion
    Content,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnSource {
    Files {
        #[serde(default)]
        scope: Scope,
        dir: String,
        pattern: String,
        /// Tried in order when the primary location has no match
        #[serde(default)]
        fallback: Vec<FileLocation>,
    },
    Partition {
        partition: String,
        category: String,
    },
    Companion {
        of: String,
        suffix: String,
        #[serde(default)]
        policy: CompanionPolicy,
        #[serde(default)]
        mode: CompanionMode,
    },
    DerivedEntity {
        of: String,
        entity: String,
        #[serde(default)]
        map: BTreeMap<String, String>,
    },
    Metadata {
        column: String,
    },
}

/// Where a file column looks, as used by fallbacks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLocation {
    #[serde(default)]
    pub scope: Scope,
    pub dir: String,
    pub pattern: String,
}

impl ColumnSource {
    /// Columns whose cells are discovered file paths
    pub fn is_file_source(&self) -> bool {
        matches!(self, ColumnSource::Files { .. } | ColumnSource::Partition { .. })
    }
}

/// Per-column contract (a Field Descriptor)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(default)]
    pub shape: Shape,
    pub dtype: DType,
    pub source: ColumnSource,
    #[serde(default)]
    pub aligned_with: Option<String>,
    #[serde(default)]
    pub on_ambiguous: AmbiguityPolicy,
    #[serde(default)]
    pub description: Option<String>,
}

/// Column layout of an assembled table, as persisted with staged shards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub shape: Shape,
    pub dtype: DType,
}

// ============================================================================
// Validation expectations
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSpec {
    /// Default fractional tolerance for count checks; absent means exact
    pub tolerance: Option<f64>,
    pub sample_size: usize,
    pub sample_seed: u64,
    /// Restrict header probes to this file pattern (falls back to any payload)
    pub sample_pattern: Option<String>,
    pub payload_suffixes: Vec<String>,
    pub required_files: Vec<String>,
    pub expected: ExpectedCounts,
    pub modalities: BTreeMap<String, ModalityExpectation>,
    pub dataset_patterns: Vec<DatasetPattern>,
    pub optional: Vec<OptionalPrerequisite>,
    pub archives: Vec<ArchiveChecksum>,
    pub table: TableExpectations,
}

impl Default for ValidationSpec {
    fn default() -> Self {
        Self {
            tolerance: None,
            sample_size: 10,
            sample_seed: 42,
            sample_pattern: None,
            payload_suffixes: vec![".nii.gz".to_string(), ".nii".to_string()],
            required_files: Vec::new(),
            expected: ExpectedCounts::default(),
            modalities: BTreeMap::new(),
            dataset_patterns: Vec::new(),
            optional: Vec::new(),
            archives: Vec::new(),
            table: TableExpectations::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpectedCounts {
    pub subjects: Option<u64>,
    pub sessions: Option<u64>,
    pub rows: Option<u64>,
}

/// Records (innermost directories) with at least one match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModalityExpectation {
    pub pattern: String,
    pub expected: u64,
}

/// Raw file count below a dataset-relative directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetPattern {
    pub name: String,
    pub dir: String,
    pub pattern: String,
    pub expected: u64,
    #[serde(default)]
    pub non_empty_only: bool,
}

/// A directory that may legitimately be absent; absence yields `skip`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionalPrerequisite {
    pub name: String,
    pub dir: String,
    #[serde(default = "default_any_pattern")]
    pub pattern: String,
}

fn default_any_pattern() -> String {
    "*".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveChecksum {
    pub path: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableExpectations {
    pub unique: BTreeMap<String, u64>,
    pub non_null: BTreeMap<String, u64>,
    pub non_empty: BTreeMap<String, u64>,
    pub total_items: BTreeMap<String, u64>,
    pub aligned: Vec<Vec<String>>,
}

// ============================================================================
// Loading and consistency checks
// ============================================================================

impl Schema {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let schema: Schema = toml::from_str(s)?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|e| match e {
            PipelineError::Toml(inner) => {
                PipelineError::schema(format!("{}: {}", path.display(), inner))
            },
            other => other,
        })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn partition(&self, name: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.name == name)
    }

    /// Entity of the innermost level, i.e. the one a record directory carries
    pub fn innermost_entity(&self) -> &str {
        self.records
            .levels
            .last()
            .map(|l| l.entity.as_str())
            .unwrap_or("sub")
    }

    /// Level key columns first, then declared columns
    pub fn output_columns(&self) -> Vec<ColumnInfo> {
        self.records
            .levels
            .iter()
            .map(|l| ColumnInfo {
                name: l.column.clone(),
                shape: Shape::Singleton,
                dtype: DType::Text,
            })
            .chain(self.columns.iter().map(|c| ColumnInfo {
                name: c.name.clone(),
                shape: c.shape,
                dtype: c.dtype,
            }))
            .collect()
    }

    /// Reject dangling references and contradictory declarations
    pub fn validate(&self) -> Result<()> {
        self.records.top()?;
        let records_root = Path::new(&self.records.root);
        let escapes = records_root
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
        if records_root.is_absolute() || escapes {
            return Err(PipelineError::schema(format!(
                "records.root must stay inside the dataset root, got '{}'",
                self.records.root
            )));
        }
        if self.records.source == RecordSource::Metadata && self.metadata.is_none() {
            return Err(PipelineError::schema(
                "records.source = \"metadata\" needs a [metadata] section",
            ));
        }
        if let Some(ref metadata) = self.metadata {
            metadata.delimiter_byte()?;
        }

        let entities: Vec<&str> = self.records.levels.iter().map(|l| l.entity.as_str()).collect();

        let mut seen = HashSet::new();
        for name in self
            .records
            .levels
            .iter()
            .map(|l| l.column.as_str())
            .chain(self.columns.iter().map(|c| c.name.as_str()))
        {
            if !seen.insert(name) {
                return Err(PipelineError::schema(format!("duplicate column '{}'", name)));
            }
        }

        for partition in &self.partitions {
            if partition.categories.is_empty() {
                return Err(PipelineError::schema(format!(
                    "partition '{}' declares no categories",
                    partition.name
                )));
            }
            let unique: HashSet<_> = partition.categories.iter().collect();
            if unique.len() != partition.categories.len() {
                return Err(PipelineError::schema(format!(
                    "partition '{}' repeats a category",
                    partition.name
                )));
            }
            check_placeholders(&partition.dir, &entities, &partition.name)?;
            check_placeholders(&partition.pattern, &entities, &partition.name)?;
        }

        for column in &self.columns {
            self.validate_column(column, &entities)?;
        }

        for group in &self.validation.table.aligned {
            for name in group {
                if !seen.contains(name.as_str()) {
                    return Err(PipelineError::schema(format!(
                        "validation alignment group names unknown column '{}'",
                        name
                    )));
                }
            }
        }

        Ok(())
    }

    fn validate_column(&self, column: &ColumnSpec, entities: &[&str]) -> Result<()> {
        let err = |msg: String| PipelineError::schema(format!("column '{}': {}", column.name, msg));

        match &column.source {
            ColumnSource::Files {
                dir,
                pattern,
                fallback,
                ..
            } => {
                if !matches!(column.dtype, DType::Payload | DType::Text) {
                    return Err(err("file columns must be payload or text".to_string()));
                }
                let locations = std::iter::once((dir, pattern))
                    .chain(fallback.iter().map(|f| (&f.dir, &f.pattern)));
                for (dir, pattern) in locations {
                    if pattern.is_empty() {
                        return Err(err("empty file pattern".to_string()));
                    }
                    check_placeholders(dir, entities, &column.name)?;
                    check_placeholders(pattern, entities, &column.name)?;
                }
            },
            ColumnSource::Partition {
                partition,
                category,
            } => {
                let p = self
                    .partition(partition)
                    .ok_or_else(|| err(format!("unknown partition '{}'", partition)))?;
                if !p.categories.contains(category) {
                    return Err(err(format!(
                        "category '{}' is not in partition '{}' {:?}",
                        category, partition, p.categories
                    )));
                }
                if column.shape != Shape::Sequence {
                    return Err(err("partition columns must be sequences".to_string()));
                }
            },
            ColumnSource::Companion { of, suffix, mode, .. } => {
                let primary = self
                    .column(of)
                    .ok_or_else(|| err(format!("companion of unknown column '{}'", of)))?;
                if !primary.source.is_file_source() {
                    return Err(err(format!("companion of non-file column '{}'", of)));
                }
                if primary.shape != column.shape {
                    return Err(err(format!("shape must match primary column '{}'", of)));
                }
                if !suffix.starts_with('.') {
                    return Err(err(format!("companion suffix '{}' must start with '.'", suffix)));
                }
                if *mode == CompanionMode::Content && column.dtype != DType::Text {
                    return Err(err(format!(
                        "content companions hold text, not {}",
                        column.dtype.as_str()
                    )));
                }
            },
            ColumnSource::DerivedEntity { of, .. } => {
                let primary = self
                    .column(of)
                    .ok_or_else(|| err(format!("derived from unknown column '{}'", of)))?;
                if !primary.source.is_file_source() {
                    return Err(err(format!("derived from non-file column '{}'", of)));
                }
                if column.shape != Shape::Singleton || column.dtype != DType::Text {
                    return Err(err("derived entity columns are singleton text".to_string()));
                }
            },
            ColumnSource::Metadata { .. } => {
                if self.metadata.is_none() {
                    return Err(err("metadata column without a [metadata] section".to_string()));
                }
                if column.shape != Shape::Singleton || column.dtype == DType::Payload {
                    return Err(err("metadata columns are singleton text/float/int".to_string()));
                }
            },
        }

        if let Some(ref target) = column.aligned_with {
            let other = self
                .column(target)
                .ok_or_else(|| err(format!("aligned_with unknown column '{}'", target)))?;
            if column.shape != Shape::Sequence || other.shape != Shape::Sequence {
                return Err(err(format!(
                    "aligned_with '{}' requires both columns to be sequences",
                    target
                )));
            }
        }

        Ok(())
    }
}

fn check_placeholders(template: &str, entities: &[&str], owner: &str) -> Result<()> {
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let end = after.find('}').ok_or_else(|| {
            PipelineError::schema(format!("'{}': unclosed placeholder in '{}'", owner, template))
        })?;
        let name = &after[..end];
        if !entities.contains(&name) {
            return Err(PipelineError::schema(format!(
                "'{}': placeholder '{{{}}}' is not a record level",
                owner, name
            )));
        }
        rest = &after[end + 1..];
    }
    Ok(())
}
