//! Per-cycle panel hashing.

use std::collections::BTreeMap;

use tracing::warn;

use sumcast_core::{CycleInput, PanelKey};

use crate::builder::PanelBuilder;
use crate::canonical::canonical_hash;

/// Sentinel hash substituted when canonicalization fails. The publish
/// cycle never aborts on a hash failure; the affected panel re-emits
/// until hashing succeeds again.
pub const ERR_HASH: &str = "err";

/// Computes the panel-key to content-hash map for a cycle.
pub struct PanelHasher {
    builder: PanelBuilder,
}

impl PanelHasher {
    pub fn new(builder: PanelBuilder) -> Self {
        Self { builder }
    }

    /// The payload builder backing this hasher.
    pub fn builder(&self) -> &PanelBuilder {
        &self.builder
    }

    /// Hash every known panel for this cycle.
    ///
    /// Hashes pre-computed by the upstream collector are returned
    /// untouched.
    pub fn hash(&self, input: &CycleInput) -> BTreeMap<PanelKey, String> {
        if let Some(precomputed) = &input.panel_hashes {
            return precomputed.clone();
        }
        PanelKey::ALL
            .iter()
            .map(|&key| (key, self.hash_panel(key, input)))
            .collect()
    }

    /// Hash one panel, substituting [`ERR_HASH`] on failure.
    pub fn hash_panel(&self, key: PanelKey, input: &CycleInput) -> String {
        let payload = self.builder.payload(key, input);
        match canonical_hash(&payload) {
            Ok(hash) => hash,
            Err(e) => {
                warn!(panel = %key, error = %e, "Panel canonicalization failed, substituting sentinel hash");
                ERR_HASH.to_string()
            }
        }
    }
}
