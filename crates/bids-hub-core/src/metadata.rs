//! Auxiliary tabular metadata (`participants.tsv` and friends)

use crate::error::{ParseError, PipelineError, Result};
use crate::schema::{DType, MetadataSource};
use crate::table::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};

/// One row per top-level key, in file order. Missing cells are `None`.
#[derive(Debug, Clone, Default)]
pub struct MetadataTable {
    headers: Vec<String>,
    rows: Vec<(String, BTreeMap<String, Option<String>>)>,
}

impl MetadataTable {
    /// Read the metadata file below `root`
    pub fn load(root: &Path, source: &MetadataSource) -> Result<Self> {
        let path = root.join(&source.path);
        if !path.is_file() {
            return Err(PipelineError::structural(format!(
                "metadata file not found: {}",
                path.display()
            )));
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(source.delimiter_byte()?)
            .flexible(true)
            .from_path(&path)?;

        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let key_index = headers
            .iter()
            .position(|h| h == &source.key_column)
            .ok_or_else(|| {
                PipelineError::structural(format!(
                    "{} has no '{}' column",
                    path.display(),
                    source.key_column
                ))
            })?;

        let nulls: HashSet<&str> = source.null_values.iter().map(String::as_str).collect();
        let mut rows = Vec::new();
        let mut seen = HashSet::new();

        for record in reader.records() {
            let record = record?;
            let key = record.get(key_index).map(str::trim).unwrap_or_default();
            if key.is_empty() {
                warn!("Skipping metadata row without '{}'", source.key_column);
                continue;
            }
            if !seen.insert(key.to_string()) {
                return Err(PipelineError::structural(format!(
                    "duplicate key '{}' in {}",
                    key,
                    path.display()
                )));
            }

            let cells = headers
                .iter()
                .enumerate()
                .map(|(i, header)| {
                    let cell = record
                        .get(i)
                        .map(str::trim)
                        .filter(|c| !nulls.contains(c))
                        .map(str::to_string);
                    (header.clone(), cell)
                })
                .collect();
            rows.push((key.to_string(), cells));
        }

        debug!("Loaded {} metadata rows from {}", rows.len(), path.display());
        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Keys in file order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Raw cell for a key. `sub-01` and `01` address the same row.
    pub fn cell(&self, key: &str, entity: &str, column: &str) -> Option<&str> {
        let bare = strip_entity_prefix(key, entity);
        self.rows
            .iter()
            .find(|(k, _)| strip_entity_prefix(k, entity) == bare)
            .and_then(|(_, cells)| cells.get(column))
            .and_then(|c| c.as_deref())
    }
}

/// `sub-01` -> `01`; labels without the prefix pass through
pub fn strip_entity_prefix<'a>(key: &'a str, entity: &str) -> &'a str {
    key.strip_prefix(entity)
        .and_then(|rest| rest.strip_prefix('-'))
        .unwrap_or(key)
}

/// Coerce a raw cell per the column dtype
pub fn coerce(column: &str, raw: Option<&str>, dtype: DType) -> std::result::Result<Value, ParseError> {
    let Some(raw) = raw else {
        return Ok(Value::Null);
    };
    let fail = || ParseError {
        column: column.to_string(),
        raw: raw.to_string(),
        dtype: dtype.as_str(),
    };

    match dtype {
        DType::Text | DType::Payload => Ok(Value::Text(raw.to_string())),
        DType::Float => {
            let parsed: f64 = raw.parse().map_err(|_| fail())?;
            // non-finite floats do not survive JSON staging
            if parsed.is_finite() {
                Ok(Value::Float(parsed))
            } else {
                Err(fail())
            }
        },
        DType::Int => {
            if let Ok(i) = raw.parse::<i64>() {
                return Ok(Value::Int(i));
            }
            // "3.0" is an integer written by a spreadsheet
            match raw.parse::<f64>() {
                Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Ok(Value::Int(f as i64))
                },
                _ => Err(fail()),
            }
        },
    }
}

/// [`coerce`], but a failure becomes null plus a warning naming the record.
/// The error is handed back so callers can count it.
pub fn coerce_or_null(
    record: &str,
    column: &str,
    raw: Option<&str>,
    dtype: DType,
) -> (Value, Option<ParseError>) {
    match coerce(column, raw, dtype) {
        Ok(value) => (value, None),
        Err(e) => {
            warn!(record = %record, "Invalid metadata value, storing null: {}", e);
            (Value::Null, Some(e))
        },
    }
}
