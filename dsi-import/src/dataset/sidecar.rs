//! JSON sidecar metadata
//!
//! Sidecars are read into an ordered map of closed [`MetadataValue`]s. The map
//! is never mutated after reading; derived maps (alias remapping, extractor
//! output) are built as new values.

use crate::error::{ImportError, ImportResult};
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use std::path::Path;

/// A sidecar value
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    List(Vec<MetadataValue>),
    Object(IndexMap<String, MetadataValue>),
}

/// Sidecar key/value pairs in file order
pub type Metadata = IndexMap<String, MetadataValue>;

impl From<Value> for MetadataValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => MetadataValue::Null,
            Value::Bool(b) => MetadataValue::Bool(b),
            Value::Number(n) => MetadataValue::Number(n),
            Value::String(s) => MetadataValue::Text(s),
            Value::Array(items) => {
                MetadataValue::List(items.into_iter().map(MetadataValue::from).collect())
            }
            Value::Object(map) => MetadataValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, MetadataValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl MetadataValue {
    pub fn to_json(&self) -> Value {
        match self {
            MetadataValue::Null => Value::Null,
            MetadataValue::Bool(b) => Value::Bool(*b),
            MetadataValue::Number(n) => Value::Number(n.clone()),
            MetadataValue::Text(s) => Value::String(s.clone()),
            MetadataValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            MetadataValue::Object(map) => Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Catalog text of the value; `None` for JSON null
    pub fn render(&self) -> Option<String> {
        match self {
            MetadataValue::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Null => write!(f, "n/a"),
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Number(n) => write!(f, "{}", n),
            MetadataValue::Text(s) => write!(f, "{}", s),
            MetadataValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            MetadataValue::Object(_) => write!(f, "{}", self.to_json()),
        }
    }
}

/// Read a JSON object file into ordered metadata
pub fn read_metadata(path: &Path) -> ImportResult<Metadata> {
    let content = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| ImportError::invalid_data(path.display(), e.to_string()))?;

    match MetadataValue::from(value) {
        MetadataValue::Object(map) => Ok(map),
        _ => Err(ImportError::invalid_data(
            path.display(),
            "expected a JSON object",
        )),
    }
}
