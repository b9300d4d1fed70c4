//! Canonical JSON encoding.
//!
//! Content hashes must be a pure function of payload content: the same
//! logical payload always renders to the same byte string regardless of
//! key insertion order or numeric representation. Rules:
//!
//! - object keys sorted lexicographically, no extra whitespace;
//! - integral floats render as integers (`1.0` becomes `1`, `-0.0`
//!   becomes `0`);
//! - non-finite floats cannot exist inside `serde_json::Value`, so
//!   payload construction maps them to sentinel strings via
//!   [`canonical_f64`] (`"NaN"`, `"Infinity"`, `"-Infinity"`).

use serde::Serialize;
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

use crate::error::{PanelError, Result};

/// Maximum nesting depth accepted by the canonicalizer.
pub const MAX_DEPTH: usize = 128;

/// Largest float magnitude converted to an integer (2^53). Integral
/// floats beyond this cannot represent every integer and stay floats.
const MAX_SAFE_INT: f64 = 9_007_199_254_740_992.0;

/// Render a serializable value as canonical JSON.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let json =
        serde_json::to_value(value).map_err(|e| PanelError::Serialization(e.to_string()))?;
    let canonical = canonicalize_value(json, 0)?;
    serde_json::to_string(&canonical).map_err(|e| PanelError::Serialization(e.to_string()))
}

/// Hex SHA-256 digest of the canonical encoding of `value`.
pub fn canonical_hash<T: Serialize>(value: &T) -> Result<String> {
    let rendered = canonical_json(value)?;
    Ok(sha256_hex(rendered.as_bytes()))
}

/// Hex-encode the SHA-256 digest of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Convert a raw float to its canonical JSON value. Payload builders
/// call this for every float source that may be non-finite.
pub fn canonical_f64(value: f64) -> Value {
    if value.is_nan() {
        return Value::String("NaN".to_string());
    }
    if value.is_infinite() {
        let token = if value > 0.0 { "Infinity" } else { "-Infinity" };
        return Value::String(token.to_string());
    }
    match Number::from_f64(value) {
        Some(n) => Value::Number(n),
        None => Value::Null,
    }
}

fn canonicalize_value(value: Value, depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(PanelError::DepthExceeded(depth));
    }
    match value {
        Value::Object(object) => {
            let mut entries: Vec<(String, Value)> = object.into_iter().collect();
            entries.sort_by(|left, right| left.0.cmp(&right.0));

            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, canonicalize_value(value, depth + 1)?);
            }
            Ok(Value::Object(sorted))
        }
        Value::Array(values) => Ok(Value::Array(
            values
                .into_iter()
                .map(|v| canonicalize_value(v, depth + 1))
                .collect::<Result<Vec<_>>>()?,
        )),
        Value::Number(number) => Ok(Value::Number(normalize_number(number))),
        scalar => Ok(scalar),
    }
}

fn normalize_number(number: Number) -> Number {
    if !number.is_f64() {
        return number;
    }
    match number.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INT => Number::from(f as i64),
        _ => number,
    }
}
