//! Panel identity and content types.
//!
//! A panel is a named, independently-hashed slice of the overall status
//! object. The key set is closed: the collector and every subscriber agree
//! on it ahead of time, so snapshots always carry the complete set.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Identifies one panel of the summary dashboard.
///
/// Serializes to the lowercase key string used on the wire and as map keys
/// in snapshot/diff payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelKey {
    Header,
    Indices,
    Alerts,
    Analytics,
    Links,
    Perfstore,
    Storage,
}

impl PanelKey {
    /// Every known panel, in stable emit order.
    pub const ALL: [PanelKey; 7] = [
        PanelKey::Header,
        PanelKey::Indices,
        PanelKey::Alerts,
        PanelKey::Analytics,
        PanelKey::Links,
        PanelKey::Perfstore,
        PanelKey::Storage,
    ];

    /// Wire name of this panel.
    pub fn as_str(&self) -> &'static str {
        match self {
            PanelKey::Header => "header",
            PanelKey::Indices => "indices",
            PanelKey::Alerts => "alerts",
            PanelKey::Analytics => "analytics",
            PanelKey::Links => "links",
            PanelKey::Perfstore => "perfstore",
            PanelKey::Storage => "storage",
        }
    }

    /// Human title shown by terminal/browser renderers.
    pub fn title(&self) -> &'static str {
        match self {
            PanelKey::Header => "Summary",
            PanelKey::Indices => "Market Indices",
            PanelKey::Alerts => "Alerts",
            PanelKey::Analytics => "Analytics",
            PanelKey::Links => "Links",
            PanelKey::Perfstore => "Performance Store",
            PanelKey::Storage => "Storage",
        }
    }
}

impl std::fmt::Display for PanelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PanelKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PanelKey::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| CoreError::InvalidPanelKey(s.to_string()))
    }
}

/// Key/hash pair announced in `hello` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelRef {
    pub key: PanelKey,
    pub hash: String,
}

/// Full panel as carried in `panel_update` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Panel {
    pub key: PanelKey,
    pub hash: String,
    pub title: String,
    pub lines: Vec<String>,
}

impl Panel {
    /// Strip the key for map-valued event payloads.
    pub fn into_content(self) -> PanelContent {
        PanelContent {
            hash: self.hash,
            title: self.title,
            lines: self.lines,
        }
    }
}

/// Panel content keyed externally, as carried in `full_snapshot` and
/// `panel_diff` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelContent {
    pub hash: String,
    pub title: String,
    pub lines: Vec<String>,
}
