//! Diff merge engine.
//!
//! Pure map merging with an explicit removal marker. Lists are never
//! merged element-wise; any non-map value replaces wholesale.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ClientError, Result};

/// Field name of the removal marker. A patch value of
/// `{"__remove__": true}` deletes the key instead of setting it.
pub const REMOVE_MARKER: &str = "__remove__";

/// True for the exact single-field removal marker.
fn is_remove_marker(value: &Value) -> bool {
    value
        .as_object()
        .map_or(false, |map| {
            map.len() == 1 && map.get(REMOVE_MARKER).and_then(Value::as_bool) == Some(true)
        })
}

/// Merge `patch` over `base` into a new map. Neither input is mutated.
///
/// Marker values delete; map-on-map recurses; everything else replaces
/// wholesale.
pub fn merge_value_maps(base: &Map<String, Value>, patch: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = base.clone();
    for (key, value) in patch {
        if is_remove_marker(value) {
            merged.remove(key);
            continue;
        }
        let combined = match (merged.get(key).and_then(Value::as_object), value.as_object()) {
            (Some(existing), Some(incoming)) => Value::Object(merge_value_maps(existing, incoming)),
            _ => value.clone(),
        };
        merged.insert(key.clone(), combined);
    }
    merged
}

/// How a patch applies to its target entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    /// Replace the entry wholesale with `data` (any JSON value).
    Full,
    /// Merge map-valued `data` into the entry.
    Diff,
}

/// One keyed mutation of a state map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelPatch {
    pub op: PatchOp,
    pub key: String,
    pub data: Value,
}

/// Apply one patch to a keyed state map.
///
/// `diff` patches require map data and merge into the existing entry
/// (an empty map when the entry is absent or not a map). Malformed
/// patches fail fast instead of coercing.
pub fn apply_patch(state: &mut Map<String, Value>, patch: &PanelPatch) -> Result<()> {
    if patch.key.is_empty() {
        return Err(ClientError::MissingKey);
    }
    match patch.op {
        PatchOp::Full => {
            state.insert(patch.key.clone(), patch.data.clone());
            Ok(())
        }
        PatchOp::Diff => {
            let incoming = patch
                .data
                .as_object()
                .ok_or_else(|| ClientError::DiffNotMap(patch.key.clone()))?;
            let existing = state
                .get(&patch.key)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let merged = merge_value_maps(&existing, incoming);
            state.insert(patch.key.clone(), Value::Object(merged));
            Ok(())
        }
    }
}
