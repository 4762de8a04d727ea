//! # Stele
//!
//! Client-side protocol logic for a non-fungible coin ledger built on an
//! RSA accumulator. The ledger's entire active coin set is folded into one
//! group element; owning a coin means holding a membership witness for it,
//! and every finalized round changes what that witness must prove.
//!
//! The workspace splits into three layers plus this facade:
//!
//! - [`crypto`]: accumulator arithmetic, element derivation, and
//!   exponentiation proofs
//! - [`tracker`]: the ordered local log of state transitions, with reorg
//!   rollback and witness replay
//! - [`wallet`]: coins, witnesses, transactions, the submission lifecycle,
//!   and the ledger gateway seam
//! - [`client`]: the event loop that owns all of the above and the
//!   [`SteleClient`] handle for driving it
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stele::prelude::*;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = Arc::new(CryptoContext::new(AccumulatorParams::rsa2048()));
//! let ledger = Arc::new(InMemoryLedger::new(ctx.clone()));
//! let mut client = SteleClient::new(ctx, ledger, ClientConfig::default());
//! client.start().await?;
//!
//! let owner = OwnerKey::new([1u8; 32])?;
//! let (receipt, done) = client.mint(owner, CoinId::new(42)).await?;
//! println!("submitted {receipt}");
//! let sequence = done.await??;
//! println!("minted in round {sequence}");
//! # Ok(())
//! # }
//! ```

pub mod client;

pub use stele_crypto as crypto;
pub use stele_tracker as tracker;
pub use stele_wallet as wallet;

pub use client::{
    ClientConfig, ClientError, ClientEvent, ClientResult, ClientStats, SteleClient,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol-level defaults shared across the workspace.
pub mod config {
    /// Deltas retained for witness replay before pruning
    pub const DEFAULT_REPLAY_WINDOW: usize = 1024;
    /// Deepest reorg followed without a full reset
    pub const DEFAULT_MAX_REORG_DEPTH: u64 = 64;
    /// Rounds before an unanswered submission times out
    pub const DEFAULT_TIMEOUT_ROUNDS: u64 = 16;
}

/// Common imports for client applications
pub mod prelude {
    pub use crate::client::{ClientConfig, ClientEvent, ClientResult, SteleClient};
    pub use crate::crypto::{AccumulatorParams, CryptoContext};
    pub use crate::tracker::{Checkpoint, StateDelta, StateTracker};
    pub use crate::wallet::{
        Coin, CoinEvent, CoinId, CoinState, InMemoryLedger, LedgerGateway, OwnerKey,
        WitnessStatus,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_defaults_match_component_configs() {
        let tracker = tracker::TrackerConfig::default();
        assert_eq!(tracker.max_retained_deltas, config::DEFAULT_REPLAY_WINDOW);
        assert_eq!(tracker.max_reorg_depth, config::DEFAULT_MAX_REORG_DEPTH);

        let lifecycle = wallet::LifecycleConfig::default();
        assert_eq!(lifecycle.timeout_rounds, config::DEFAULT_TIMEOUT_ROUNDS);
    }
}
