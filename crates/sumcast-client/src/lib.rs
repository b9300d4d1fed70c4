//! Subscriber-side state reconstruction for sumcast event streams.
//!
//! [`SummaryStore`] ingests protocol events and maintains the composite
//! status with generation mismatch detection; [`merge`] holds the pure
//! diff merge engine it applies patches with.

pub mod error;
pub mod merge;
pub mod store;

pub use error::{ClientError, Result};
pub use merge::{apply_patch, merge_value_maps, PanelPatch, PatchOp, REMOVE_MARKER};
pub use store::{HeartbeatHealth, HeartbeatReport, SeverityEntry, SummaryStore};
