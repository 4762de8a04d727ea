//! Transaction wire types
//!
//! Requests are immutable one-shot payloads: all structural validation
//! happens at construction, so a value of these types is well-formed by
//! existence and submission paths never re-derive or mutate them. A spend
//! always carries the canonical triple of input coin, output coin, and the
//! input's membership witness at the submitted state.

use std::fmt;

use serde::{Deserialize, Serialize};
use stele_crypto::StateValue;

use crate::coin::{Coin, CoinId};
use crate::errors::{WalletError, WalletResult};

/// Domain prefix for transaction hashing.
pub const TX_HASH_DOMAIN: &[u8] = b"stele.tx.v1";

const MINT_TAG: u8 = 0;
const SPEND_TAG: u8 = 1;

/// Request to insert a brand-new coin into the accumulator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintTransaction {
    coin: Coin,
}

impl MintTransaction {
    pub fn new(coin: Coin) -> Self {
        Self { coin }
    }

    pub fn coin(&self) -> Coin {
        self.coin
    }
}

/// Request to move a coin to a new owner: delete the input element, insert
/// the output element, justified by the input's membership witness.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendTransaction {
    input: Coin,
    output: Coin,
    witness: StateValue,
}

impl SpendTransaction {
    /// Build a spend, rejecting id drift and self-transfers up front.
    pub fn new(input: Coin, output: Coin, witness: StateValue) -> WalletResult<Self> {
        if input.id() != output.id() {
            return Err(WalletError::CoinIdMismatch);
        }
        if input.owner() == output.owner() {
            return Err(WalletError::SelfTransfer);
        }
        Ok(Self {
            input,
            output,
            witness,
        })
    }

    pub fn input(&self) -> Coin {
        self.input
    }

    pub fn output(&self) -> Coin {
        self.output
    }

    pub fn witness(&self) -> &StateValue {
        &self.witness
    }
}

/// What a transaction does, for dispatch and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionKind {
    Mint,
    Spend,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Mint => write!(f, "mint"),
            TransactionKind::Spend => write!(f, "spend"),
        }
    }
}

/// A submittable ledger transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transaction {
    Mint(MintTransaction),
    Spend(SpendTransaction),
}

impl Transaction {
    pub fn kind(&self) -> TransactionKind {
        match self {
            Transaction::Mint(_) => TransactionKind::Mint,
            Transaction::Spend(_) => TransactionKind::Spend,
        }
    }

    /// The coin id this transaction is about. For spends the input and
    /// output carry the same id by construction.
    pub fn coin_id(&self) -> CoinId {
        match self {
            Transaction::Mint(mint) => mint.coin.id(),
            Transaction::Spend(spend) => spend.input.id(),
        }
    }

    /// Canonical encoding: a tag byte, the coins' canonical bytes, and for
    /// spends the witness as length-prefixed little-endian bytes.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            Transaction::Mint(mint) => {
                let mut bytes = Vec::with_capacity(41);
                bytes.push(MINT_TAG);
                bytes.extend_from_slice(&mint.coin.canonical_bytes());
                bytes
            }
            Transaction::Spend(spend) => {
                let witness = spend.witness.as_uint().to_bytes_le();
                let mut bytes = Vec::with_capacity(85 + witness.len());
                bytes.push(SPEND_TAG);
                bytes.extend_from_slice(&spend.input.canonical_bytes());
                bytes.extend_from_slice(&spend.output.canonical_bytes());
                bytes.extend_from_slice(&(witness.len() as u32).to_le_bytes());
                bytes.extend_from_slice(&witness);
                bytes
            }
        }
    }

    /// Domain-separated content hash.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(TX_HASH_DOMAIN);
        hasher.update(&self.canonical_bytes());
        hasher.finalize().into()
    }
}

/// Opaque submission handle returned by the ledger; outcome events refer
/// back to it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Receipt([u8; 32]);

impl Receipt {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            hex::encode(&self.0[..4]),
            hex::encode(&self.0[28..])
        )
    }
}

impl fmt::Debug for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Receipt({})", self)
    }
}
