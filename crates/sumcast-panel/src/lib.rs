//! Panel hashing for the sumcast publisher.
//!
//! Turns a per-cycle status object into a content-addressed map of panel
//! hashes. Hashes are SHA-256 over a canonical JSON encoding, so they are
//! stable across key ordering, numeric representation and process
//! restarts. Canonicalization failures substitute a sentinel hash instead
//! of aborting the cycle.

pub mod builder;
pub mod canonical;
pub mod error;
pub mod hasher;

pub use builder::PanelBuilder;
pub use canonical::{canonical_f64, canonical_hash, canonical_json, sha256_hex, MAX_DEPTH};
pub use error::{PanelError, Result};
pub use hasher::{PanelHasher, ERR_HASH};
