//! Per-cycle input handed to the publisher.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::panel::PanelKey;

/// Everything the publisher needs for one cycle.
///
/// Collaborators construct this explicitly instead of handing over an
/// opaque snapshot object. `domain` holds derived views (e.g. analytics
/// rollups) that shadow same-named sections of the raw status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleInput {
    /// Monotonic collector cycle number.
    pub cycle: u64,
    /// Raw status object as collected (JSON map).
    pub status: Value,
    /// Optional derived view layered over `status`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Value>,
    /// Pre-computed panel hashes from the upstream collector. When set,
    /// the hasher returns these untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panel_hashes: Option<BTreeMap<PanelKey, String>>,
}

impl CycleInput {
    pub fn new(cycle: u64, status: Value) -> Self {
        Self {
            cycle,
            status,
            domain: None,
            panel_hashes: None,
        }
    }

    pub fn with_domain(mut self, domain: Value) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn with_panel_hashes(mut self, hashes: BTreeMap<PanelKey, String>) -> Self {
        self.panel_hashes = Some(hashes);
        self
    }

    /// Look up a named section, preferring the derived view.
    pub fn section(&self, name: &str) -> Option<&Value> {
        if let Some(value) = self.domain.as_ref().and_then(|d| d.get(name)) {
            return Some(value);
        }
        self.status.get(name)
    }
}
