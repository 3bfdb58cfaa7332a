//! State Snapshot Module
//!
//! Detecting what changed in the database:
//! - State fingerprints (schema digest plus per-table data digests)
//! - Baseline persistence for non-sandbox diffs
//! - Fingerprint comparison
//! - Validation of committed layers

pub mod diff;
pub mod fingerprint;
pub mod rules;
pub mod store;

pub use diff::{StateDiff, TableChange};
pub use fingerprint::{compute_state, StateFingerprint, TrackingPolicy};
pub use rules::{LayerText, ValidationEngine, ValidationReport};
pub use store::BaselineStore;
