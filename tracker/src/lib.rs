//! Accumulator state tracking for stele clients
//!
//! The ledger publishes one [`StateDelta`] per finalized round. This crate
//! keeps a client-side replica of that stream: validating each transition
//! (ordering, continuity, published proofs), retaining a bounded replay
//! window for witness updates, and rolling the view back when the ledger
//! reorganizes.
//!
//! # Key Features
//!
//! - **Ordered apply**: deltas are accepted strictly in sequence; gaps and
//!   forks are errors, never silently buffered
//! - **Proof validation**: Wesolowski proofs checked on apply, with a direct
//!   recomputation fallback for unproven pure additions
//! - **Replay window**: any [`Checkpoint`] inside the retained window can be
//!   replayed forward via [`StateTracker::deltas_since`]
//! - **Reorg handling**: bounded-depth truncation back to a retained
//!   checkpoint, returning the orphaned suffix

pub mod delta;
pub mod errors;
pub mod tracker;

// Re-export main types
pub use delta::{Checkpoint, DeltaProof, StateDelta};
pub use errors::{TrackerError, TrackerResult};
pub use tracker::{StateTracker, TrackerConfig, TrackerStats};
