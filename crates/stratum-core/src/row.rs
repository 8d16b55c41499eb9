//! Result rows.
//!
//! A [`Row`] pairs a shared [`ColumnInfo`] (one allocation per result set)
//! with the values for one row. Rows convert to and from JSON objects for
//! cache storage.

use crate::value::Value;
use std::sync::Arc;

/// Column metadata shared by every row of a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    names: Vec<String>,
}

impl ColumnInfo {
    /// Create column metadata from column names in result order.
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Position of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Column names in result order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether there are no columns.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One row of a query result.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<ColumnInfo>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row from shared column metadata and values.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Create a row from `(name, value)` pairs. Convenience for tests and
    /// for rebuilding rows out of cached JSON objects.
    pub fn from_pairs(pairs: Vec<(String, Value)>) -> Self {
        let (names, values) = pairs.into_iter().unzip();
        Self {
            columns: Arc::new(ColumnInfo::new(names)),
            values,
        }
    }

    /// Value at a column position.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value of a named column.
    pub fn get_named(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Column metadata.
    pub fn columns(&self) -> &ColumnInfo {
        &self.columns
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate `(name, value)` pairs in result order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Render the row as a JSON object, the cache storage format.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::with_capacity(self.values.len());
        for (name, value) in self.iter() {
            map.insert(
                name.to_string(),
                serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
            );
        }
        serde_json::Value::Object(map)
    }

    /// Rebuild a row from a JSON object previously produced by
    /// [`Row::to_json`]. Returns `None` for non-object input.
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        let map = json.as_object()?;
        let pairs = map
            .iter()
            .map(|(k, v)| {
                let value = serde_json::from_value(v.clone()).unwrap_or(Value::Null);
                (k.clone(), value)
            })
            .collect();
        Some(Self::from_pairs(pairs))
    }
}
