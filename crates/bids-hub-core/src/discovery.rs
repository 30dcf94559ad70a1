//! Discovery engine: walk the source tree and group files per record
//!
//! Records are enumerated from the metadata registry (or the tree under the
//! schema's records root), each
//! record directory is searched for the schema's file columns, partitions
//! and companions. Anything that would silently lose data (an ambiguous
//! singleton, an unknown category, a missing required companion) aborts
//! discovery.

use crate::entity::{extract_entity, render_template, split_level_dir, FilePattern};
use crate::error::{PipelineError, Result};
use crate::metadata::{strip_entity_prefix, MetadataTable};
use crate::schema::{
    AmbiguityPolicy, ColumnSource, CompanionMode, CompanionPolicy, DType, FileLocation, Partition,
    RecordSource, Schema, Scope, Shape,
};
use crate::table::{EntityKey, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// All files below `dir` (recursively) whose name matches, sorted by file
/// name then full path. A missing directory yields `[]`.
pub fn collect_all(dir: &Path, pattern: &FilePattern) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut matches = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() && pattern.matches_path(entry.path()) {
            matches.push(entry.into_path());
        }
    }

    matches.sort_by(|a, b| a.file_name().cmp(&b.file_name()).then_with(|| a.cmp(b)));
    Ok(matches)
}

/// Exactly one match, or none. Several matches are a classification error
/// unless the policy is [`AmbiguityPolicy::First`].
pub fn collect_singleton(
    dir: &Path,
    pattern: &FilePattern,
    policy: AmbiguityPolicy,
) -> Result<Option<PathBuf>> {
    let matches = collect_all(dir, pattern)?;
    resolve_singleton(
        matches,
        policy,
        &dir.display().to_string(),
        pattern.as_str(),
    )
}

fn resolve_singleton(
    mut matches: Vec<PathBuf>,
    policy: AmbiguityPolicy,
    record: &str,
    field: &str,
) -> Result<Option<PathBuf>> {
    match (matches.len(), policy) {
        (0, _) => Ok(None),
        (1, _) | (_, AmbiguityPolicy::First) => {
            if matches.len() > 1 {
                debug!(record = %record, field = %field, "Taking first of {} matches", matches.len());
            }
            Ok(Some(matches.swap_remove(0)))
        },
        (n, AmbiguityPolicy::Fail) => Err(PipelineError::classification(
            record,
            field,
            format!("expected at most one file, found {}: {}", n, preview(&matches)),
        )),
    }
}

/// Split matches into the partition's declared categories. A match whose
/// category is absent or outside the closed set fails the whole record.
pub fn partition_matches(
    matches: Vec<PathBuf>,
    partition: &Partition,
    record: &str,
) -> Result<BTreeMap<String, Vec<PathBuf>>> {
    let mut buckets: BTreeMap<String, Vec<PathBuf>> = partition
        .categories
        .iter()
        .map(|c| (c.clone(), Vec::new()))
        .collect();
    let mut unexpected = Vec::new();

    for path in matches {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        match extract_entity(name, &partition.entity).and_then(|c| buckets.get_mut(&c)) {
            Some(bucket) => bucket.push(path),
            None => unexpected.push(path),
        }
    }

    if !unexpected.is_empty() {
        return Err(PipelineError::classification(
            record,
            &partition.name,
            format!(
                "{} file(s) with {} outside {:?}: {}",
                unexpected.len(),
                partition.entity,
                partition.categories,
                preview(&unexpected)
            ),
        ));
    }

    Ok(buckets)
}

/// Companion path by suffix substitution:
/// `x_dwi.nii.gz` + `.bval` -> `x_dwi.bval`
pub fn companion_path(primary: &Path, suffix: &str) -> PathBuf {
    let name = primary
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let name = name.strip_suffix(".gz").unwrap_or(name);
    let base = match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    };
    primary.with_file_name(format!("{}{}", base, suffix))
}

fn preview(paths: &[PathBuf]) -> String {
    let names: Vec<_> = paths
        .iter()
        .take(3)
        .map(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
        .collect();
    if paths.len() > 3 {
        format!("{} (showing 3 of {})", names.join(", "), paths.len())
    } else {
        names.join(", ")
    }
}

/// Tree-derived cells of one logical record
#[derive(Debug, Clone)]
pub struct DiscoveredRecord {
    pub key: EntityKey,
    pub dir: PathBuf,
    pub values: BTreeMap<String, Value>,
}

/// Expected-vs-found accounting for top-level records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub expected: usize,
    pub found: usize,
    pub missing_dirs: Vec<String>,
    pub without_children: Vec<String>,
    pub records: usize,
}

impl DiscoveryReport {
    pub fn skipped(&self) -> usize {
        self.missing_dirs.len() + self.without_children.len()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} of {} expected subjects found ({} records; {} missing directories, {} with no sessions)",
            self.found,
            self.expected,
            self.records,
            self.missing_dirs.len(),
            self.without_children.len()
        )
    }
}

#[derive(Debug, Clone)]
pub struct Discovery {
    pub records: Vec<DiscoveredRecord>,
    pub report: DiscoveryReport,
}

pub struct DiscoveryEngine<'a> {
    schema: &'a Schema,
    root: PathBuf,
    records_root: PathBuf,
    metadata: Option<&'a MetadataTable>,
    patterns: BTreeMap<String, FilePattern>,
}

impl<'a> DiscoveryEngine<'a> {
    pub fn new(schema: &'a Schema, root: &Path, metadata: Option<&'a MetadataTable>) -> Result<Self> {
        if !root.is_dir() {
            return Err(PipelineError::structural(format!(
                "dataset root is not a directory: {}",
                root.display()
            )));
        }
        if schema.records.source == RecordSource::Metadata && metadata.is_none() {
            return Err(PipelineError::structural(
                "record source is metadata but no metadata table was loaded",
            ));
        }

        // templates without placeholders can be compiled once
        let mut patterns = BTreeMap::new();
        for column in &schema.columns {
            if let ColumnSource::Files { pattern, .. } = &column.source {
                if !pattern.contains('{') {
                    patterns.insert(column.name.clone(), FilePattern::new(pattern)?);
                }
            }
        }
        for partition in &schema.partitions {
            if !partition.pattern.contains('{') {
                patterns.insert(partition_owner(&partition.name), FilePattern::new(&partition.pattern)?);
            }
        }

        let root = root.canonicalize()?;
        let records_root = schema.records.root_dir(&root);
        if !records_root.is_dir() {
            return Err(PipelineError::structural(format!(
                "records root is not a directory: {}",
                records_root.display()
            )));
        }

        Ok(Self {
            schema,
            root,
            records_root,
            metadata,
            patterns,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run(&self) -> Result<Discovery> {
        let top_entity = self.schema.records.top()?.entity.as_str();

        let top_labels = self.top_level_labels(top_entity)?;
        let mut report = DiscoveryReport {
            expected: top_labels.len(),
            ..Default::default()
        };
        let mut records = Vec::new();

        for label in top_labels {
            let dir_name = format!("{}-{}", top_entity, label);
            let dir = self.records_root.join(&dir_name);
            if !dir.is_dir() {
                debug!("Subject directory not found: {}", dir.display());
                report.missing_dirs.push(dir_name);
                continue;
            }

            let key = EntityKey::new(vec![(top_entity.to_string(), label)]);
            let leaves = self.expand_levels(dir, key, 1)?;
            if leaves.is_empty() {
                report.without_children.push(dir_name);
                continue;
            }

            report.found += 1;
            for (key, dir) in leaves {
                records.push(self.discover_record(key, dir)?);
            }
        }

        report.records = records.len();
        if report.skipped() > 0 {
            warn!("{}", report.summary());
        } else {
            info!("{}", report.summary());
        }

        Ok(Discovery { records, report })
    }

    fn top_level_labels(&self, entity: &str) -> Result<Vec<String>> {
        match (self.schema.records.source, self.metadata) {
            (RecordSource::Metadata, Some(metadata)) => Ok(metadata
                .keys()
                .map(|k| strip_entity_prefix(k, entity).to_string())
                .collect()),
            _ => Ok(list_level_dirs(&self.records_root, entity)?
                .into_iter()
                .map(|(_, (_, label))| label)
                .collect()),
        }
    }

    /// Descend the remaining record levels; returns leaf keys with their directories
    fn expand_levels(&self, dir: PathBuf, key: EntityKey, depth: usize) -> Result<Vec<(EntityKey, PathBuf)>> {
        let levels = &self.schema.records.levels;
        if depth == levels.len() {
            return Ok(vec![(key, dir)]);
        }

        let mut leaves = Vec::new();
        for (child, part) in list_level_dirs(&dir, &levels[depth].entity)? {
            let mut child_key = key.clone();
            child_key.0.push(part);
            leaves.extend(self.expand_levels(child, child_key, depth + 1)?);
        }
        Ok(leaves)
    }

    fn search_dir(&self, scope: Scope, dir: &str, key: &EntityKey, record_dir: &Path) -> PathBuf {
        let rendered = render_template(dir, key);
        let base = match scope {
            Scope::Record => record_dir,
            Scope::Dataset => self.root.as_path(),
        };
        if rendered.is_empty() || rendered == "." {
            base.to_path_buf()
        } else {
            base.join(rendered)
        }
    }

    fn pattern_for(&self, owner: &str, template: &str, key: &EntityKey) -> Result<FilePattern> {
        match self.patterns.get(owner) {
            Some(p) => Ok(p.clone()),
            None => FilePattern::new(&render_template(template, key)),
        }
    }

    /// Matches of the first fallback location that has any
    fn collect_fallback(
        &self,
        locations: &[FileLocation],
        key: &EntityKey,
        record_dir: &Path,
        record: &str,
        field: &str,
    ) -> Result<Vec<PathBuf>> {
        for location in locations {
            let search = self.search_dir(location.scope, &location.dir, key, record_dir);
            let pattern = FilePattern::new(&render_template(&location.pattern, key))?;
            let found = collect_all(&search, &pattern)?;
            if !found.is_empty() {
                debug!(record = %record, field = %field, "Using fallback {}", search.display());
                return Ok(found);
            }
        }
        Ok(Vec::new())
    }

    fn discover_record(&self, key: EntityKey, dir: PathBuf) -> Result<DiscoveredRecord> {
        let record = key.to_string();
        let mut values = BTreeMap::new();
        let mut partitions: BTreeMap<&str, BTreeMap<String, Vec<PathBuf>>> = BTreeMap::new();

        for partition in &self.schema.partitions {
            let search = self.search_dir(partition.scope, &partition.dir, &key, &dir);
            let pattern = self.pattern_for(&partition_owner(&partition.name), &partition.pattern, &key)?;
            let matches = collect_all(&search, &pattern)?;
            partitions.insert(
                partition.name.as_str(),
                partition_matches(matches, partition, &record)?,
            );
        }

        // file columns first; companions refer to them
        for column in &self.schema.columns {
            let paths = match &column.source {
                ColumnSource::Files {
                    scope,
                    dir: sub,
                    pattern,
                    fallback,
                } => {
                    let search = self.search_dir(*scope, sub, &key, &dir);
                    let pattern = self.pattern_for(&column.name, pattern, &key)?;
                    let found = collect_all(&search, &pattern)?;
                    if found.is_empty() && !fallback.is_empty() {
                        self.collect_fallback(fallback, &key, &dir, &record, &column.name)?
                    } else {
                        found
                    }
                },
                ColumnSource::Partition { partition, category } => partitions
                    .get(partition.as_str())
                    .and_then(|b| b.get(category))
                    .cloned()
                    .unwrap_or_default(),
                _ => continue,
            };

            let value = match column.shape {
                Shape::Sequence => Value::List(
                    paths
                        .into_iter()
                        .map(|p| Value::from_path(p, column.dtype))
                        .collect(),
                ),
                Shape::Singleton => {
                    match resolve_singleton(paths, column.on_ambiguous, &record, &column.name)? {
                        Some(p) => Value::from_path(p, column.dtype),
                        None => Value::Null,
                    }
                },
            };
            values.insert(column.name.clone(), value);
        }

        for column in &self.schema.columns {
            let ColumnSource::Companion {
                of,
                suffix,
                policy,
                mode,
            } = &column.source
            else {
                continue;
            };

            let resolve = |primary: &Value| -> Result<Value> {
                match primary.as_path() {
                    Some(p) => resolve_companion(
                        &record,
                        &column.name,
                        &companion_path(&p, suffix),
                        *policy,
                        *mode,
                        column.dtype,
                    ),
                    None => Ok(Value::Null),
                }
            };

            let value = match values.get(of) {
                Some(Value::List(items)) => {
                    Value::List(items.iter().map(resolve).collect::<Result<Vec<_>>>()?)
                },
                Some(single) => resolve(single)?,
                None => Value::empty_for(column.shape),
            };
            values.insert(column.name.clone(), value);
        }

        Ok(DiscoveredRecord { key, dir, values })
    }
}

fn partition_owner(name: &str) -> String {
    format!("partition:{}", name)
}

fn resolve_companion(
    record: &str,
    field: &str,
    path: &Path,
    policy: CompanionPolicy,
    mode: CompanionMode,
    dtype: DType,
) -> Result<Value> {
    if !path.is_file() {
        return match policy {
            CompanionPolicy::Required => Err(PipelineError::CompanionMissing {
                record: record.to_string(),
                field: field.to_string(),
                path: path.display().to_string(),
            }),
            CompanionPolicy::Optional => {
                warn!(record = %record, field = %field, "Optional companion not found: {}", path.display());
                Ok(Value::Null)
            },
        };
    }

    match mode {
        CompanionMode::Path => Ok(Value::from_path(path.to_path_buf(), dtype)),
        CompanionMode::Content => Ok(Value::Text(std::fs::read_to_string(path)?.trim().to_string())),
    }
}

/// Child directories named `<entity>-<label>`, sorted by name
pub(crate) fn list_level_dirs(dir: &Path, entity: &str) -> Result<Vec<(PathBuf, (String, String))>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(part) = entry.file_name().to_str().and_then(|n| split_level_dir(n, entity)) {
            found.push((path, part));
        }
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}
