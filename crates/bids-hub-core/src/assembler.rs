//! Table assembler: discovered files + metadata -> one immutable Table

use crate::discovery::Discovery;
use crate::entity::extract_entity;
use crate::error::{PipelineError, Result};
use crate::metadata::{coerce_or_null, MetadataTable};
use crate::schema::{ColumnSource, Schema, Shape};
use crate::table::{Record, Table, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

/// A record dropped at assembly time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRow {
    pub record: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct AssemblyReport {
    pub rejected: Vec<RejectedRow>,
    pub coercion_failures: usize,
}

#[derive(Debug, Clone)]
pub struct Assembled {
    pub table: Table,
    pub report: AssemblyReport,
}

/// Merge discovery output with metadata into a Table.
///
/// Row order follows discovery order. Rows whose aligned sequences disagree
/// in length are rejected individually; a duplicate entity key aborts.
pub fn assemble(
    schema: &Schema,
    discovery: &Discovery,
    metadata: Option<&MetadataTable>,
) -> Result<Assembled> {
    let top_entity = schema.records.top()?.entity.as_str();
    let mut report = AssemblyReport::default();
    let mut seen = HashSet::new();
    let mut rows = Vec::with_capacity(discovery.records.len());

    for discovered in &discovery.records {
        let record_name = discovered.key.to_string();
        if !seen.insert(discovered.key.clone()) {
            return Err(PipelineError::structural(format!(
                "duplicate record key {}",
                record_name
            )));
        }

        let mut values = BTreeMap::new();
        for (level, dir_name) in schema.records.levels.iter().zip(discovered.key.dir_names()) {
            values.insert(level.column.clone(), Value::Text(dir_name));
        }

        for column in &schema.columns {
            let value = match &column.source {
                ColumnSource::Files { .. }
                | ColumnSource::Partition { .. }
                | ColumnSource::Companion { .. } => discovered.values.get(&column.name).cloned(),
                ColumnSource::DerivedEntity { of, entity, map } => Some(derive_entity(
                    discovered.values.get(of),
                    entity,
                    map,
                )),
                ColumnSource::Metadata { column: source_column } => {
                    let label = discovered.key.get(top_entity).unwrap_or_default();
                    let raw = metadata.and_then(|m| m.cell(label, top_entity, source_column));
                    let (value, failure) =
                        coerce_or_null(&record_name, &column.name, raw, column.dtype);
                    if failure.is_some() {
                        report.coercion_failures += 1;
                    }
                    Some(value)
                },
            };

            let value = match (value, column.shape) {
                (None | Some(Value::Null), Shape::Sequence) => Value::List(Vec::new()),
                (None, Shape::Singleton) => Value::Null,
                (Some(v), _) => v,
            };
            values.insert(column.name.clone(), value);
        }

        if let Some(reason) = alignment_violation(schema, &values) {
            warn!(record = %record_name, "Rejecting row: {}", reason);
            report.rejected.push(RejectedRow {
                record: record_name,
                reason,
            });
            continue;
        }

        rows.push(Record {
            key: discovered.key.clone(),
            values,
        });
    }

    info!(
        "Assembled table with {} rows ({} rejected, {} coercion failures)",
        rows.len(),
        report.rejected.len(),
        report.coercion_failures
    );

    Ok(Assembled {
        table: Table::new(schema.output_columns(), rows),
        report,
    })
}

/// Entity token of the first file in `source`, lowercased, then mapped through
/// `map` (keys compared case-insensitively); unknown labels pass through
fn derive_entity(source: Option<&Value>, entity: &str, map: &BTreeMap<String, String>) -> Value {
    let first = match source {
        Some(Value::List(items)) => items.first(),
        other => other,
    };

    first
        .and_then(Value::as_path)
        .and_then(|p| extract_entity(&p.to_string_lossy(), entity))
        .map(|label| label.to_lowercase())
        .map(|label| {
            let mapped = map
                .iter()
                .find(|(code, _)| code.eq_ignore_ascii_case(&label))
                .map(|(_, name)| name.clone());
            Value::Text(mapped.unwrap_or(label))
        })
        .unwrap_or(Value::Null)
}

fn alignment_violation(schema: &Schema, values: &BTreeMap<String, Value>) -> Option<String> {
    schema.columns.iter().find_map(|column| {
        let target = column.aligned_with.as_ref()?;
        let own = values.get(&column.name).map(Value::sequence_len).unwrap_or(0);
        let other = values.get(target).map(Value::sequence_len).unwrap_or(0);
        (own != other).then(|| {
            format!(
                "'{}' has {} items but aligned column '{}' has {}",
                column.name, own, target, other
            )
        })
    })
}
