//! Error types for coin and witness management

use stele_crypto::CryptoError;
use stele_tracker::TrackerError;
use thiserror::Error;

use crate::coin::{CoinId, CoinState};
use crate::gateway::GatewayError;

/// Errors produced while managing coins, witnesses, and transactions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    /// A request failed structural validation
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An owner key was all zeroes
    #[error("owner key must not be all zeroes")]
    InvalidOwnerKey,

    /// A spend's input and output disagree on the coin id
    #[error("spend input and output must carry the same coin id")]
    CoinIdMismatch,

    /// A spend names the current owner as the recipient
    #[error("cannot spend a coin to its current owner")]
    SelfTransfer,

    /// The coin id is already in use
    #[error("coin id {0} is already in use")]
    DuplicateCoinId(CoinId),

    /// The coin id is not tracked by this wallet
    #[error("coin {0} is not tracked by this wallet")]
    UnknownCoin(CoinId),

    /// The coin is not in a state that allows the operation
    #[error("coin {id} is in state {state:?}")]
    WrongState { id: CoinId, state: CoinState },

    /// Another transaction for this coin is still in flight
    #[error("coin {0} already has a transaction in flight")]
    OperationInProgress(CoinId),

    /// The coin's witness does not verify against the current state
    #[error("witness for coin {0} is stale; update it and retry")]
    StaleWitness(CoinId),

    /// A freshly derived witness failed its own verification
    #[error("witness computation failed for coin {0}")]
    WitnessComputationFailed(CoinId),

    /// The ledger refused the transaction
    #[error("ledger rejected transaction for coin {id}: {reason}")]
    LedgerRejected { id: CoinId, reason: String },

    /// No outcome arrived within the configured number of rounds
    #[error("transaction for coin {id} saw no outcome after {rounds} rounds")]
    TimedOut { id: CoinId, rounds: u64 },

    /// A ledger reorg discarded the rounds this coin's state was built on
    #[error("a reorg invalidated the ledger state backing coin {0}")]
    ReorgInvalidatesState(CoinId),

    /// Transport failure talking to the ledger
    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),

    /// State tracking failure
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    /// Accumulator arithmetic failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Result type for wallet operations
pub type WalletResult<T> = Result<T, WalletError>;
