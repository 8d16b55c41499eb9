//! SQL value representation and literal escaping.
//!
//! [`Value`] is the dynamic value type carried through filter maps, bind
//! maps, rows, and cache entries. [`escape_literal`] is the single choke
//! point used whenever a value must be inlined into SQL text — the
//! array-to-IN rewrite in the executor and the parameter inlining in the
//! debug log both call it, so the two renderings can never drift apart.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A dynamically typed SQL value.
///
/// The untagged serde representation round-trips through JSON the way rows
/// are stored in the cache: `Null` as `null`, numbers as numbers, arrays as
/// arrays, and `Json` as the embedded document itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer (covers smallint/int/bigint).
    Int(i64),
    /// Double-precision float.
    Float(f64),
    /// Text.
    Text(String),
    /// An array of values. Array-valued bind parameters are not supported by
    /// the driver and are inlined by the executor before dispatch.
    Array(Vec<Value>),
    /// An embedded JSON document (json/jsonb columns).
    Json(serde_json::Value),
}

impl Value {
    /// Whether this value is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of this value, if it is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Float view of this value, if numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Borrow the text content, if this is a text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean view of this value, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Raw stringification, used for cache-key derivation and nothing else.
///
/// This is intentionally not SQL: NULL renders empty, booleans render as
/// `true`/`false`, arrays comma-join their elements. Changing it changes
/// cache-key compatibility across deployments.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Value::Json(j) => write!(f, "{j}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Quote a string as a PostgreSQL string literal.
///
/// Single quotes are doubled; when the text contains backslashes the
/// escape-string form `E'...'` is emitted with backslashes doubled, since
/// plain literals treat backslashes literally only under
/// `standard_conforming_strings`.
pub fn quote_literal(s: &str) -> String {
    let escaped_quotes = s.replace('\'', "''");
    if s.contains('\\') {
        format!("E'{}'", escaped_quotes.replace('\\', "\\\\"))
    } else {
        format!("'{escaped_quotes}'")
    }
}

/// Render a value as an inline SQL literal.
///
/// This is the single choke point for inlining values into SQL text:
/// booleans become `TRUE`/`FALSE`, NULL becomes `NULL`, arrays are escaped
/// recursively and comma-joined (an empty array renders `NULL` so that
/// `IN ()` never appears), numeric scalars pass through bare, and everything
/// else goes through [`quote_literal`].
pub fn escape_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => quote_literal(s),
        Value::Array(items) => {
            if items.is_empty() {
                return "NULL".to_string();
            }
            items
                .iter()
                .map(escape_literal)
                .collect::<Vec<_>>()
                .join(",")
        }
        Value::Json(j) => quote_literal(&j.to_string()),
    }
}
