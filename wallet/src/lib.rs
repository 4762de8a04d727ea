//! Stele Wallet
//!
//! Client-side coin handling for the stele accumulator ledger:
//! - Coin identities bound to an owner key and a ledger-unique id
//! - Membership witnesses kept fresh as the accumulator moves
//! - Mint and spend transactions with canonical hashing and receipts
//! - Lifecycle tracking through rejection, timeout, and reorg paths
//! - A gateway seam with a deterministic in-memory ledger for tests

pub mod coin;
pub mod errors;
pub mod gateway;
pub mod lifecycle;
pub mod transaction;
pub mod witness;

pub use coin::{Coin, CoinId, CoinState, OwnerKey, OWNER_KEY_WIDTH};
pub use errors::{WalletError, WalletResult};
pub use gateway::{
    GatewayError, GatewayResult, InMemoryLedger, LedgerEvent, LedgerEventStream, LedgerGateway,
    OutcomeEvent, OutcomeKind,
};
pub use lifecycle::{
    CoinEvent, CoinLedger, CoinLifecycle, CompletionReceiver, LifecycleConfig, LifecycleStats,
    SpentCoin,
};
pub use transaction::{
    MintTransaction, Receipt, SpendTransaction, Transaction, TransactionKind, TX_HASH_DOMAIN,
};
pub use witness::{MembershipWitness, WitnessManager, WitnessStatus};
