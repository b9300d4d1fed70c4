//! Panel payload and line construction.
//!
//! Each panel's logical payload is a JSON value derived from one section
//! of the cycle input. The content hash is computed over the payload;
//! the display lines are a flat text rendering of the same payload, so
//! identical payloads always produce identical lines.

use serde_json::{json, Value};

use sumcast_core::{CycleInput, Panel, PanelContent, PanelKey};

/// Builds per-panel payloads and display lines.
///
/// `links` is fixed at construction, so the links panel hashes
/// identically every cycle. That is required behavior, not staleness.
#[derive(Debug, Clone, Default)]
pub struct PanelBuilder {
    links: Vec<String>,
}

impl PanelBuilder {
    pub fn new(links: Vec<String>) -> Self {
        Self { links }
    }

    /// Logical payload for one panel. Hashes are computed over this
    /// value, so anything that should invalidate a panel must appear in
    /// it. The header payload folds in the index list and cycle number
    /// so it changes whenever either does.
    pub fn payload(&self, key: PanelKey, input: &CycleInput) -> Value {
        match key {
            PanelKey::Header => json!({
                "cycle": input.cycle,
                "indices": section_or(input, "indices", json!([])),
                "summary": section_or(input, "header", json!({})),
            }),
            PanelKey::Links => json!({ "links": self.links }),
            PanelKey::Indices => section_or(input, "indices", json!([])),
            PanelKey::Alerts => section_or(input, "alerts", json!([])),
            PanelKey::Analytics => section_or(input, "analytics", json!({})),
            PanelKey::Perfstore => section_or(input, "perfstore", json!({})),
            PanelKey::Storage => section_or(input, "storage", json!({})),
        }
    }

    /// Display lines for one panel.
    pub fn lines(&self, key: PanelKey, input: &CycleInput) -> Vec<String> {
        match key {
            PanelKey::Links => self.links.clone(),
            _ => render_lines(&self.payload(key, input)),
        }
    }

    /// Assemble wire content for a panel whose hash is already known.
    pub fn content(&self, key: PanelKey, input: &CycleInput, hash: String) -> PanelContent {
        PanelContent {
            hash,
            title: key.title().to_string(),
            lines: self.lines(key, input),
        }
    }

    /// Like [`content`](Self::content) but keeps the key, for list-form
    /// update events.
    pub fn panel(&self, key: PanelKey, input: &CycleInput, hash: String) -> Panel {
        Panel {
            key,
            hash,
            title: key.title().to_string(),
            lines: self.lines(key, input),
        }
    }
}

fn section_or(input: &CycleInput, name: &str, fallback: Value) -> Value {
    input.section(name).cloned().unwrap_or(fallback)
}

/// Flat text rendering of a payload: arrays become one line per item,
/// objects one `key: value` line per entry (map iteration is already
/// key-sorted), scalars a single line.
fn render_lines(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(render_scalar).collect(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{}: {}", k, render_scalar(v)))
            .collect(),
        Value::Null => Vec::new(),
        scalar => vec![render_scalar(scalar)],
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
