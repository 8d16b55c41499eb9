//! Text-format value encoding and OID-driven decoding.

use stratum_core::error::{Error, QueryError, QueryErrorKind};
use stratum_core::Value;

// OIDs this driver decodes specially; everything else stays text.
const OID_BOOL: u32 = 16;
const OID_INT8: u32 = 20;
const OID_INT2: u32 = 21;
const OID_INT4: u32 = 23;
const OID_FLOAT4: u32 = 700;
const OID_FLOAT8: u32 = 701;
const OID_NUMERIC: u32 = 1700;
const OID_JSON: u32 = 114;
const OID_JSONB: u32 = 3802;

/// Encode a value for a text-format Bind parameter.
///
/// Arrays are rejected: the executor inlines them into the SQL text before
/// dispatch, so an array reaching this point is a caller error.
pub fn encode_value(value: &Value) -> Result<Vec<u8>, Error> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Bool(b) => Ok(if *b { b"t".to_vec() } else { b"f".to_vec() }),
        Value::Int(i) => Ok(i.to_string().into_bytes()),
        Value::Float(f) => Ok(f.to_string().into_bytes()),
        Value::Text(s) => Ok(s.clone().into_bytes()),
        Value::Json(j) => Ok(j.to_string().into_bytes()),
        Value::Array(_) => Err(Error::Query(QueryError::new(
            QueryErrorKind::Syntax,
            "array parameters cannot be bound; inline them into the statement",
        ))),
    }
}

/// Decode a text-format column by its type OID. `None` is SQL NULL.
pub fn decode_value(type_oid: u32, bytes: Option<&[u8]>) -> Result<Value, Error> {
    let Some(bytes) = bytes else {
        return Ok(Value::Null);
    };
    let text = std::str::from_utf8(bytes).map_err(|_| {
        Error::Protocol(stratum_core::ProtocolError::new(
            "non-utf8 column data in text format",
        ))
    })?;

    let value = match type_oid {
        OID_BOOL => Value::Bool(text == "t"),
        OID_INT2 | OID_INT4 | OID_INT8 => match text.parse() {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Text(text.to_string()),
        },
        OID_FLOAT4 | OID_FLOAT8 | OID_NUMERIC => match text.parse() {
            Ok(f) => Value::Float(f),
            Err(_) => Value::Text(text.to_string()),
        },
        OID_JSON | OID_JSONB => match serde_json::from_str(text) {
            Ok(j) => Value::Json(j),
            Err(_) => Value::Text(text.to_string()),
        },
        _ => Value::Text(text.to_string()),
    };
    Ok(value)
}
