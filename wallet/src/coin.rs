//! Coin identity
//!
//! A coin is an owner key bound to a ledger-unique id. The *pair* determines
//! the accumulator element: spending a coin to a new owner deletes the old
//! owner's element and inserts a fresh one for the same id, so ownership
//! changes are visible as accumulator churn while the id stays constant.

use std::fmt;

use serde::{Deserialize, Serialize};
use stele_crypto::{CryptoContext, Element};

use crate::errors::{WalletError, WalletResult};

/// Width of an owner public key in bytes.
pub const OWNER_KEY_WIDTH: usize = 32;

/// An owner's public key bytes.
///
/// The key scheme itself is external; the wallet only ever hashes these
/// bytes. All-zero keys are rejected so an uninitialized buffer cannot
/// silently become a spendable owner.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerKey([u8; OWNER_KEY_WIDTH]);

impl OwnerKey {
    pub fn new(bytes: [u8; OWNER_KEY_WIDTH]) -> WalletResult<Self> {
        if bytes == [0u8; OWNER_KEY_WIDTH] {
            return Err(WalletError::InvalidOwnerKey);
        }
        Ok(Self(bytes))
    }

    pub fn from_slice(bytes: &[u8]) -> WalletResult<Self> {
        let bytes: [u8; OWNER_KEY_WIDTH] = bytes.try_into().map_err(|_| {
            WalletError::InvalidInput(format!(
                "owner key must be {OWNER_KEY_WIDTH} bytes, got {}",
                bytes.len()
            ))
        })?;
        Self::new(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; OWNER_KEY_WIDTH] {
        &self.0
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            hex::encode(&self.0[..4]),
            hex::encode(&self.0[OWNER_KEY_WIDTH - 4..])
        )
    }
}

impl fmt::Debug for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerKey({})", self)
    }
}

/// A ledger-unique coin identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoinId(u64);

impl CoinId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl From<u64> for CoinId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for CoinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for CoinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoinId({})", self.0)
    }
}

/// An owner bound to a coin id. Immutable once built; a transfer constructs
/// a new `Coin` for the recipient rather than editing this one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coin {
    owner: OwnerKey,
    id: CoinId,
}

impl Coin {
    pub fn new(owner: OwnerKey, id: CoinId) -> Self {
        Self { owner, id }
    }

    pub fn owner(&self) -> OwnerKey {
        self.owner
    }

    pub fn id(&self) -> CoinId {
        self.id
    }

    /// Canonical hash preimage: owner bytes followed by the id in
    /// little-endian, 40 bytes total.
    pub fn canonical_bytes(&self) -> [u8; OWNER_KEY_WIDTH + 8] {
        let mut bytes = [0u8; OWNER_KEY_WIDTH + 8];
        bytes[..OWNER_KEY_WIDTH].copy_from_slice(self.owner.as_bytes());
        bytes[OWNER_KEY_WIDTH..].copy_from_slice(&self.id.to_le_bytes());
        bytes
    }

    /// The prime element this coin occupies in the accumulator.
    pub fn element(&self, ctx: &CryptoContext) -> Element {
        ctx.derive_element(&self.canonical_bytes())
    }
}

impl fmt::Debug for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Coin(id={}, owner={})", self.id, self.owner)
    }
}

/// Where a coin stands in its mint/spend lifecycle.
///
/// Transitions are driven exclusively by the lifecycle manager: submissions
/// move a coin into a pending state, and ledger outcomes (or timeouts, or
/// reorgs) move it out again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoinState {
    /// Known locally but not on the ledger
    Unminted,
    /// Mint submitted, outcome pending
    PendingMint,
    /// In the accumulator, spendable
    Minted,
    /// Spend submitted, outcome pending
    PendingSpend,
    /// Deleted from the accumulator (terminal)
    Spent,
}
