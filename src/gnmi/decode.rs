//! Decoding of gNMI typed values into measurement field values.

use thiserror::Error;

use crate::measure::Value;

use super::proto::{typed_value, TypedValue};

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("value is unset")]
    Empty,

    #[error("invalid data length: expected 4 bytes, got {0}")]
    BadFloatLength(usize),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// A decoded typed value: either a single scalar or a JSON document that
/// still needs flattening into dotted field names.
pub enum Decoded {
    Scalar(Value),
    Json(serde_json::Value),
}

/// Decode a wire value following the typed union.
///
/// With `bytes_to_float`, 4-byte bytes values are reinterpreted as IEEE-754
/// float32 in network byte order; any other length keeps the raw bytes and
/// reports the error to the caller for logging.
pub fn decode_value(val: &TypedValue, bytes_to_float: bool) -> Result<Decoded, DecodeError> {
    let inner = val.value.as_ref().ok_or(DecodeError::Empty)?;

    let scalar = match inner {
        typed_value::Value::StringVal(s) => Value::String(s.clone()),
        typed_value::Value::AsciiVal(s) => Value::String(s.clone()),
        typed_value::Value::BoolVal(b) => Value::Bool(*b),
        typed_value::Value::BytesVal(b) => {
            if bytes_to_float {
                Value::Float(f64::from(bytes_to_f32_be(b)?))
            } else {
                Value::Bytes(b.clone())
            }
        }
        typed_value::Value::IntVal(v) => Value::Int(*v),
        typed_value::Value::UintVal(v) => Value::Uint(*v),
        typed_value::Value::FloatVal(v) => Value::Float(f64::from(*v)),
        typed_value::Value::DoubleVal(v) => Value::Float(*v),
        typed_value::Value::DecimalVal(d) => {
            Value::Float(d.digits as f64 / 10f64.powi(d.precision as i32))
        }
        typed_value::Value::JsonVal(data) | typed_value::Value::JsonIetfVal(data) => {
            return Ok(Decoded::Json(serde_json::from_slice(data)?));
        }
    };

    Ok(Decoded::Scalar(scalar))
}

/// Reinterpret 4 network-order bytes as a float32, clamping infinities to
/// the finite float32 range.
pub fn bytes_to_f32_be(data: &[u8]) -> Result<f32, DecodeError> {
    let bytes: [u8; 4] = data
        .try_into()
        .map_err(|_| DecodeError::BadFloatLength(data.len()))?;

    let result = f32::from_bits(u32::from_be_bytes(bytes));

    if result == f32::INFINITY {
        Ok(f32::MAX)
    } else if result == f32::NEG_INFINITY {
        Ok(f32::MIN)
    } else {
        Ok(result)
    }
}

/// Recursively flatten a JSON document into dotted field names.
///
/// Objects append `.key`, arrays append `.index`, nulls are skipped.
pub fn flatten_json(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, Value)>) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                flatten_json(&join(prefix, k), v, out);
            }
        }
        serde_json::Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_json(&join(prefix, &i.to_string()), v, out);
            }
        }
        serde_json::Value::String(s) => out.push((prefix.to_string(), Value::String(s.clone()))),
        serde_json::Value::Bool(b) => out.push((prefix.to_string(), Value::Bool(*b))),
        serde_json::Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                out.push((prefix.to_string(), Value::Float(f)));
            }
        }
        serde_json::Value::Null => {}
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}
