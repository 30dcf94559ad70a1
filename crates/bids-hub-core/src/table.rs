//! Records and the immutable Table they are assembled into

use crate::schema::{ColumnInfo, DType, Shape};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A single cell
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    /// Path to a payload file in the source tree
    Payload(PathBuf),
    /// Payload bytes carried inline, keyed by the source file name
    Embedded(EmbeddedPayload),
    List(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedPayload {
    pub name: String,
    pub bytes: Arc<[u8]>,
}

impl EmbeddedPayload {
    pub fn read(path: &Path) -> io::Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            name,
            bytes: std::fs::read(path)?.into(),
        })
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Path for payload and text-path cells; embedded payloads yield their file name
    pub fn as_path(&self) -> Option<PathBuf> {
        match self {
            Value::Payload(p) => Some(p.clone()),
            Value::Embedded(e) => Some(PathBuf::from(&e.name)),
            Value::Text(s) => Some(PathBuf::from(s)),
            _ => None,
        }
    }

    /// Length of a sequence cell; null counts as empty
    pub fn sequence_len(&self) -> usize {
        match self {
            Value::List(items) => items.len(),
            _ => 0,
        }
    }

    /// The empty value for a column of the given shape
    pub fn empty_for(shape: Shape) -> Self {
        match shape {
            Shape::Singleton => Value::Null,
            Shape::Sequence => Value::List(Vec::new()),
        }
    }

    /// Replace payload paths with their bytes, recursing into lists
    pub fn embedded(&self) -> io::Result<Value> {
        Ok(match self {
            Value::Payload(path) => Value::Embedded(EmbeddedPayload::read(path)?),
            Value::List(items) => Value::List(
                items
                    .iter()
                    .map(Value::embedded)
                    .collect::<io::Result<Vec<_>>>()?,
            ),
            other => other.clone(),
        })
    }

    /// Wrap a discovered file path according to the column dtype
    pub fn from_path(path: PathBuf, dtype: DType) -> Self {
        match dtype {
            DType::Payload => Value::Payload(path),
            _ => Value::Text(path.display().to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Text(s) => f.write_str(s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Payload(p) => write!(f, "{}", p.display()),
            Value::Embedded(e) => write!(f, "{} ({} bytes)", e.name, e.bytes.len()),
            Value::List(items) => write!(f, "[{} items]", items.len()),
        }
    }
}

/// Ordered `(entity, label)` pairs identifying one record, e.g. sub-M2001/ses-1
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey(pub Vec<(String, String)>);

impl EntityKey {
    pub fn new(parts: Vec<(String, String)>) -> Self {
        Self(parts)
    }

    pub fn get(&self, entity: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(e, _)| e == entity)
            .map(|(_, label)| label.as_str())
    }

    /// Directory-style names, e.g. `["sub-M2001", "ses-1"]`
    pub fn dir_names(&self) -> Vec<String> {
        self.0.iter().map(|(e, label)| format!("{}-{}", e, label)).collect()
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir_names().join("/"))
    }
}

/// One output row
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: EntityKey,
    pub values: BTreeMap<String, Value>,
}

impl Record {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }
}

/// Ordered, immutable collection of records sharing one column layout
///
/// Cloning is cheap; rows are shared and never mutated after assembly.
#[derive(Debug, Clone)]
pub struct Table {
    columns: Arc<[ColumnInfo]>,
    rows: Arc<[Record]>,
}

impl Table {
    pub(crate) fn new(columns: Vec<ColumnInfo>, rows: Vec<Record>) -> Self {
        Self {
            columns: columns.into(),
            rows: rows.into(),
        }
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cells of one column in row order
    pub fn column_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.rows.iter().filter_map(move |r| r.get(name))
    }
}

impl Table {
    /// Copy of the table with every payload read into memory, as staged shards carry it
    pub fn with_embedded_payloads(&self) -> io::Result<Table> {
        let rows = self
            .rows
            .iter()
            .map(|record| {
                let values = record
                    .values
                    .iter()
                    .map(|(name, value)| Ok((name.clone(), value.embedded()?)))
                    .collect::<io::Result<BTreeMap<_, _>>>()?;
                Ok(Record {
                    key: record.key.clone(),
                    values,
                })
            })
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Table::new(self.columns.to_vec(), rows))
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns && self.rows == other.rows
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn key(sub: &str, ses: &str) -> EntityKey {
        EntityKey::new(vec![
            ("sub".to_string(), sub.to_string()),
            ("ses".to_string(), ses.to_string()),
        ])
    }

    #[test]
    fn test_entity_key_display_and_order() {
        let a = key("M2001", "1");
        let b = key("M2001", "2");
        assert_eq!(a.to_string(), "sub-M2001/ses-1");
        assert_eq!(a.get("ses"), Some("1"));
        assert!(a < b);
    }

    #[test]
    fn test_sequence_len_treats_null_as_empty() {
        assert_eq!(Value::Null.sequence_len(), 0);
        assert_eq!(Value::List(vec![Value::Int(1), Value::Int(2)]).sequence_len(), 2);
        assert_eq!(Value::empty_for(Shape::Sequence), Value::List(vec![]));
        assert_eq!(Value::empty_for(Shape::Singleton), Value::Null);
    }

    #[test]
    fn test_table_column_values() {
        let columns = vec![ColumnInfo {
            name: "age".to_string(),
            shape: Shape::Singleton,
            dtype: DType::Float,
        }];
        let rows = vec![
            Record {
                key: key("1", "1"),
                values: BTreeMap::from([("age".to_string(), Value::Float(40.0))]),
            },
            Record {
                key: key("2", "1"),
                values: BTreeMap::from([("age".to_string(), Value::Null)]),
            },
        ];
        let table = Table::new(columns, rows);
        let ages: Vec<_> = table.column_values("age").cloned().collect();
        assert_eq!(ages, vec![Value::Float(40.0), Value::Null]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_embedded_reads_payloads_inside_lists() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sub-1_dwi.nii.gz");
        std::fs::write(&path, b"gradient").unwrap();

        let value = Value::List(vec![Value::Payload(path), Value::Null]);
        let embedded = value.embedded().unwrap();
        let items = embedded.as_list().unwrap();
        assert_eq!(
            items[0],
            Value::Embedded(EmbeddedPayload {
                name: "sub-1_dwi.nii.gz".to_string(),
                bytes: Arc::from(&b"gradient"[..]),
            })
        );
        assert_eq!(items[1], Value::Null);
        assert_eq!(items[0].as_path(), Some(PathBuf::from("sub-1_dwi.nii.gz")));
    }
}
