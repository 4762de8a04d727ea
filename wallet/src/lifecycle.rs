//! Coin lifecycle orchestration
//!
//! This module owns the state machine that carries a coin from `Unminted`
//! through mint, ownership, spend, and the messy paths in between:
//! rejections, timeouts, and reorgs that unwind finalized rounds. It is
//! deliberately synchronous apart from gateway submission; the caller (the
//! client event loop) feeds it deltas, reorgs, and outcomes in ledger order
//! and it never blocks on anything but the submit call itself.
//!
//! Key rules enforced here:
//! - At most one transaction in flight per coin id.
//! - A spend is only submitted behind a witness that verifies against the
//!   tracker's current state; anything else is refused locally.
//! - A submission with no outcome after the configured number of rounds
//!   times out, and any outcome that arrives later is ignored.
//! - Finalized outcomes are only applied once the tracker has the round
//!   they name; early arrivals are parked.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use stele_tracker::{StateDelta, StateTracker, TrackerError};

use crate::coin::{Coin, CoinId, CoinState, OwnerKey};
use crate::errors::{WalletError, WalletResult};
use crate::gateway::{LedgerGateway, OutcomeEvent, OutcomeKind};
use crate::transaction::{MintTransaction, Receipt, SpendTransaction, Transaction};
use crate::witness::WitnessManager;

/// Tunables for transaction tracking.
#[derive(Clone, Copy, Debug)]
pub struct LifecycleConfig {
    /// Rounds a submission may stay unresolved before it times out
    pub timeout_rounds: u64,
    /// Cap on concurrently in-flight transactions
    pub max_pending: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            timeout_rounds: 16,
            max_pending: 64,
        }
    }
}

/// Lifetime counters, surfaced through the client stats query.
#[derive(Clone, Copy, Debug, Default)]
pub struct LifecycleStats {
    pub submitted: u64,
    pub finalized: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub reverted: u64,
}

/// Tombstone for a coin this wallet spent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpentCoin {
    pub coin: Coin,
    /// Round that finalized the spend
    pub sequence: u64,
}

struct CoinRecord {
    coin: Coin,
    state: CoinState,
    /// Round that finalized the mint, when known
    minted_at: Option<u64>,
}

/// Registry of every coin this wallet has touched, spent tombstones
/// included.
#[derive(Default)]
pub struct CoinLedger {
    records: HashMap<CoinId, CoinRecord>,
    spent: Vec<SpentCoin>,
}

impl CoinLedger {
    pub fn state_of(&self, id: CoinId) -> Option<CoinState> {
        self.records.get(&id).map(|record| record.state)
    }

    pub fn coin(&self, id: CoinId) -> Option<Coin> {
        self.records.get(&id).map(|record| record.coin)
    }

    /// All coins currently in the given state.
    pub fn coins_in(&self, state: CoinState) -> Vec<Coin> {
        self.records
            .values()
            .filter(|record| record.state == state)
            .map(|record| record.coin)
            .collect()
    }

    pub fn spent(&self) -> &[SpentCoin] {
        &self.spent
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PendingKind {
    Mint,
    Spend,
}

struct PendingOp {
    receipt: Receipt,
    kind: PendingKind,
    /// Tracker sequence at submission, for timeout accounting
    submitted_at: u64,
    notify: Option<oneshot::Sender<WalletResult<u64>>>,
}

/// Resolves with the sequence of the finalizing round, or with the error
/// that ended the attempt. Dropping it never affects the transaction.
pub type CompletionReceiver = oneshot::Receiver<WalletResult<u64>>;

/// Observable lifecycle transitions, forwarded on the client event feed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoinEvent {
    Minted { id: CoinId, sequence: u64 },
    Spent { id: CoinId, sequence: u64 },
    Failed { id: CoinId, error: WalletError },
    MintReverted { id: CoinId },
    SpendReverted { id: CoinId },
}

/// Drives coins through their lifecycle against a [`LedgerGateway`].
///
/// The lifecycle holds no locks and spawns nothing. All mutation happens on
/// the caller's thread, so event ordering is exactly the order of calls.
pub struct CoinLifecycle {
    config: LifecycleConfig,
    gateway: Arc<dyn LedgerGateway>,
    registry: CoinLedger,
    pending: HashMap<CoinId, PendingOp>,
    by_receipt: HashMap<Receipt, CoinId>,
    /// Finalized outcomes for rounds the tracker has not applied yet
    parked: Vec<OutcomeEvent>,
    stats: LifecycleStats,
}

impl CoinLifecycle {
    pub fn new(config: LifecycleConfig, gateway: Arc<dyn LedgerGateway>) -> Self {
        Self {
            config,
            gateway,
            registry: CoinLedger::default(),
            pending: HashMap::new(),
            by_receipt: HashMap::new(),
            parked: Vec::new(),
            stats: LifecycleStats::default(),
        }
    }

    pub fn registry(&self) -> &CoinLedger {
        &self.registry
    }

    pub fn stats(&self) -> LifecycleStats {
        self.stats
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Submit a mint for a brand-new coin.
    ///
    /// The id must be unused both locally and on the ledger; the ledger
    /// check is advisory (another wallet can still win the race), so the
    /// authoritative answer arrives as the submission outcome.
    pub async fn build_mint(
        &mut self,
        coin: Coin,
        tracker: &StateTracker,
    ) -> WalletResult<(Receipt, CompletionReceiver)> {
        let id = coin.id();
        self.check_capacity()?;
        if self.pending.contains_key(&id) {
            return Err(WalletError::OperationInProgress(id));
        }
        match self.registry.state_of(id) {
            None | Some(CoinState::Unminted) => {}
            Some(_) => return Err(WalletError::DuplicateCoinId(id)),
        }
        if self.gateway.is_coin_active(id).await? {
            return Err(WalletError::DuplicateCoinId(id));
        }

        let receipt = self
            .gateway
            .submit(Transaction::Mint(MintTransaction::new(coin)))
            .await?;
        self.registry.records.insert(
            id,
            CoinRecord {
                coin,
                state: CoinState::PendingMint,
                minted_at: None,
            },
        );
        let receiver = self.record_pending(id, receipt, PendingKind::Mint, tracker);
        info!(%id, %receipt, "submitted mint");
        Ok((receipt, receiver))
    }

    /// Submit a spend moving an owned coin to `new_owner`.
    ///
    /// Refused locally unless the coin is `Minted`, idle, actually changing
    /// hands, and backed by a witness that verifies at the tracker's current
    /// checkpoint. The witness is pinned for the duration of the flight so
    /// it keeps matching the submitted transaction.
    pub async fn build_spend(
        &mut self,
        id: CoinId,
        new_owner: OwnerKey,
        tracker: &StateTracker,
        witnesses: &mut WitnessManager,
    ) -> WalletResult<(Receipt, CompletionReceiver)> {
        self.check_capacity()?;
        let (input, state) = match self.registry.records.get(&id) {
            Some(record) => (record.coin, record.state),
            None => return Err(WalletError::UnknownCoin(id)),
        };
        if self.pending.contains_key(&id) {
            return Err(WalletError::OperationInProgress(id));
        }
        if state != CoinState::Minted {
            return Err(WalletError::WrongState { id, state });
        }
        if input.owner() == new_owner {
            return Err(WalletError::SelfTransfer);
        }
        witnesses.verify(id, tracker)?;
        let witness = witnesses
            .witness(id)
            .ok_or(WalletError::StaleWitness(id))?
            .value
            .clone();
        let spend = SpendTransaction::new(input, Coin::new(new_owner, id), witness)?;

        let receipt = self.gateway.submit(Transaction::Spend(spend)).await?;
        witnesses.pin(id);
        if let Some(record) = self.registry.records.get_mut(&id) {
            record.state = CoinState::PendingSpend;
        }
        let receiver = self.record_pending(id, receipt, PendingKind::Spend, tracker);
        info!(%id, %receipt, "submitted spend");
        Ok((receipt, receiver))
    }

    /// Stop listening for the outcome of an in-flight transaction.
    ///
    /// The submission itself is not retracted; the ledger may still apply
    /// it, and the registry will reflect whatever it decides. Only the
    /// completion notification is dropped.
    pub fn cancel(&mut self, id: CoinId) -> WalletResult<()> {
        if let Some(op) = self.pending.get_mut(&id) {
            op.notify = None;
            debug!(%id, "detached completion notification");
            return Ok(());
        }
        match self.registry.state_of(id) {
            Some(state) => Err(WalletError::WrongState { id, state }),
            None => Err(WalletError::UnknownCoin(id)),
        }
    }

    /// Start tracking a coin someone else minted or spent to us, given the
    /// round that finalized it. Issues a witness from that round's delta
    /// and rolls it forward to the tracker head.
    pub fn track_incoming(
        &mut self,
        coin: Coin,
        sequence: u64,
        tracker: &StateTracker,
        witnesses: &mut WitnessManager,
    ) -> WalletResult<()> {
        let id = coin.id();
        match self.registry.state_of(id) {
            None | Some(CoinState::Unminted) => {}
            Some(_) => return Err(WalletError::DuplicateCoinId(id)),
        }
        let delta = tracker
            .delta_at(sequence)
            .ok_or(WalletError::Tracker(TrackerError::UnknownCheckpoint {
                sequence,
            }))?;
        witnesses.issue(&coin, delta)?;
        if tracker.current().sequence > sequence {
            if let Err(error) = witnesses.update(id, tracker) {
                witnesses.remove(id);
                return Err(error);
            }
        }
        self.registry.records.insert(
            id,
            CoinRecord {
                coin,
                state: CoinState::Minted,
                minted_at: Some(sequence),
            },
        );
        info!(%id, sequence, "tracking incoming coin");
        Ok(())
    }

    /// Bring a coin's witness back to the tracker head, rebuilding it from
    /// the mint round when a reorg left it anchored on a dropped branch.
    pub fn refresh_witness(
        &mut self,
        id: CoinId,
        tracker: &StateTracker,
        witnesses: &mut WitnessManager,
    ) -> WalletResult<()> {
        let record = self
            .registry
            .records
            .get(&id)
            .ok_or(WalletError::UnknownCoin(id))?;
        if record.state != CoinState::Minted {
            return Err(WalletError::WrongState {
                id,
                state: record.state,
            });
        }
        if witnesses.update(id, tracker).is_ok() {
            return Ok(());
        }

        // The anchor no longer chains to the tracker head. The mint round
        // itself is still on the surviving branch, so re-derive from there.
        let minted_at = record.minted_at.ok_or(WalletError::StaleWitness(id))?;
        let delta = tracker
            .delta_at(minted_at)
            .ok_or(WalletError::StaleWitness(id))?;
        let coin = record.coin;
        witnesses.remove(id);
        witnesses.issue(&coin, delta)?;
        if tracker.current().sequence > minted_at {
            witnesses.update(id, tracker)?;
        }
        debug!(%id, minted_at, "rebuilt witness from mint round");
        Ok(())
    }

    /// Process one submission outcome from the ledger event stream.
    pub fn on_outcome(
        &mut self,
        event: &OutcomeEvent,
        tracker: &StateTracker,
        witnesses: &mut WitnessManager,
    ) -> Vec<CoinEvent> {
        let mut events = Vec::new();
        self.apply_outcome(event, tracker, witnesses, &mut events);
        events
    }

    /// Process a newly applied delta: release any finalizations that were
    /// waiting on it and expire submissions that ran out of rounds.
    pub fn on_delta(
        &mut self,
        delta: &StateDelta,
        tracker: &StateTracker,
        witnesses: &mut WitnessManager,
    ) -> Vec<CoinEvent> {
        let mut events = Vec::new();

        let current = tracker.current().sequence;
        let (ready, parked): (Vec<_>, Vec<_>) = std::mem::take(&mut self.parked)
            .into_iter()
            .partition(|event| {
                matches!(event.kind, OutcomeKind::Finalized { sequence } if sequence <= current)
            });
        self.parked = parked;
        for event in ready {
            self.apply_outcome(&event, tracker, witnesses, &mut events);
        }

        let expired: Vec<CoinId> = self
            .pending
            .iter()
            .filter(|(_, op)| {
                delta.sequence.saturating_sub(op.submitted_at) >= self.config.timeout_rounds
            })
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            let rounds = self.config.timeout_rounds;
            self.fail_pending(
                id,
                WalletError::TimedOut { id, rounds },
                tracker,
                witnesses,
                &mut events,
            );
            self.stats.timed_out += 1;
        }
        events
    }

    /// Unwind the effects of dropped rounds after the tracker has rolled
    /// back. Mints finalized on the dropped branch are erased; spends
    /// finalized there come back as owned coins with stale witnesses.
    pub fn on_reorg(
        &mut self,
        dropped: &[StateDelta],
        tracker: &StateTracker,
        witnesses: &mut WitnessManager,
    ) -> Vec<CoinEvent> {
        let mut events = Vec::new();
        let from = match dropped.first() {
            Some(delta) => delta.sequence,
            None => return events,
        };

        // Parked finalizations naming dropped rounds will never land; their
        // pending ops resolve through the timeout path.
        self.parked.retain(|event| {
            !matches!(event.kind, OutcomeKind::Finalized { sequence } if sequence >= from)
        });

        let ids: Vec<CoinId> = self.registry.records.keys().copied().collect();
        for id in ids {
            let erased = self.registry.records.get(&id).map_or(false, |record| {
                matches!(record.state, CoinState::Minted | CoinState::PendingSpend)
                    && record.minted_at.map_or(false, |minted| minted >= from)
            });
            if !erased {
                continue;
            }
            if self.pending.contains_key(&id) {
                self.fail_pending(
                    id,
                    WalletError::ReorgInvalidatesState(id),
                    tracker,
                    witnesses,
                    &mut events,
                );
            }
            if let Some(record) = self.registry.records.get_mut(&id) {
                record.state = CoinState::Unminted;
                record.minted_at = None;
            }
            witnesses.remove(id);
            self.stats.reverted += 1;
            warn!(%id, "reorg erased mint");
            events.push(CoinEvent::MintReverted { id });
        }

        let revived: Vec<SpentCoin> = self
            .registry
            .spent
            .iter()
            .filter(|entry| entry.sequence >= from)
            .copied()
            .collect();
        self.registry.spent.retain(|entry| entry.sequence < from);
        for entry in revived {
            let id = entry.coin.id();
            if let Some(record) = self.registry.records.get_mut(&id) {
                record.state = CoinState::Minted;
            }
            // The pinned pre-spend witness survives discard; revive it as
            // stale and let refresh or the next delta bring it forward.
            witnesses.mark_stale(id);
            self.stats.reverted += 1;
            info!(%id, "reorg revived spent coin");
            events.push(CoinEvent::SpendReverted { id });
        }
        events
    }

    fn check_capacity(&self) -> WalletResult<()> {
        if self.pending.len() >= self.config.max_pending {
            return Err(WalletError::InvalidInput(format!(
                "too many transactions in flight (max {})",
                self.config.max_pending
            )));
        }
        Ok(())
    }

    fn record_pending(
        &mut self,
        id: CoinId,
        receipt: Receipt,
        kind: PendingKind,
        tracker: &StateTracker,
    ) -> CompletionReceiver {
        let (sender, receiver) = oneshot::channel();
        self.pending.insert(
            id,
            PendingOp {
                receipt,
                kind,
                submitted_at: tracker.current().sequence,
                notify: Some(sender),
            },
        );
        self.by_receipt.insert(receipt, id);
        self.stats.submitted += 1;
        receiver
    }

    fn apply_outcome(
        &mut self,
        event: &OutcomeEvent,
        tracker: &StateTracker,
        witnesses: &mut WitnessManager,
        events: &mut Vec<CoinEvent>,
    ) {
        let id = match self.by_receipt.get(&event.receipt) {
            Some(id) => *id,
            None => {
                // Resolved already (timeout or reorg), or never ours.
                debug!(receipt = %event.receipt, "outcome for unknown receipt");
                return;
            }
        };
        match &event.kind {
            OutcomeKind::Included => {
                debug!(%id, "submission included in upcoming round");
            }
            OutcomeKind::Rejected(reason) => {
                self.fail_pending(
                    id,
                    WalletError::LedgerRejected {
                        id,
                        reason: reason.clone(),
                    },
                    tracker,
                    witnesses,
                    events,
                );
                self.stats.rejected += 1;
            }
            OutcomeKind::Finalized { sequence } => {
                if tracker.current().sequence < *sequence {
                    debug!(%id, sequence, "parking finalization ahead of tracker");
                    self.parked.push(event.clone());
                    return;
                }
                self.finalize(id, *sequence, tracker, witnesses, events);
            }
        }
    }

    fn finalize(
        &mut self,
        id: CoinId,
        sequence: u64,
        tracker: &StateTracker,
        witnesses: &mut WitnessManager,
        events: &mut Vec<CoinEvent>,
    ) {
        let op = match self.pending.remove(&id) {
            Some(op) => op,
            None => return,
        };
        self.by_receipt.remove(&op.receipt);
        self.stats.finalized += 1;

        match op.kind {
            PendingKind::Mint => {
                let coin = match self.registry.records.get(&id) {
                    Some(record) => record.coin,
                    None => return,
                };
                let issued = match tracker.delta_at(sequence) {
                    Some(delta) => witnesses.issue(&coin, delta).map(|_| ()),
                    None => Err(WalletError::Tracker(TrackerError::UnknownCheckpoint {
                        sequence,
                    })),
                };
                let issued = issued.and_then(|()| {
                    if tracker.current().sequence > sequence {
                        witnesses.update(id, tracker)
                    } else {
                        Ok(())
                    }
                });
                if let Some(record) = self.registry.records.get_mut(&id) {
                    record.state = CoinState::Minted;
                    record.minted_at = Some(sequence);
                }
                if let Err(error) = issued {
                    // The coin exists on the ledger either way; the witness
                    // can be rebuilt later via refresh_witness.
                    warn!(%id, sequence, %error, "minted but witness issuance failed");
                }
                if let Some(notify) = op.notify {
                    let _ = notify.send(Ok(sequence));
                }
                info!(%id, sequence, "mint finalized");
                events.push(CoinEvent::Minted { id, sequence });
            }
            PendingKind::Spend => {
                let coin = self.registry.records.get(&id).map(|record| record.coin);
                if let Some(record) = self.registry.records.get_mut(&id) {
                    record.state = CoinState::Spent;
                }
                if let Some(coin) = coin {
                    self.registry.spent.push(SpentCoin { coin, sequence });
                }
                witnesses.discard(id);
                if let Some(notify) = op.notify {
                    let _ = notify.send(Ok(sequence));
                }
                info!(%id, sequence, "spend finalized");
                events.push(CoinEvent::Spent { id, sequence });
            }
        }
    }

    /// Unwind a pending operation: restore the registry state, release the
    /// witness, and notify the waiter.
    fn fail_pending(
        &mut self,
        id: CoinId,
        error: WalletError,
        tracker: &StateTracker,
        witnesses: &mut WitnessManager,
        events: &mut Vec<CoinEvent>,
    ) {
        let op = match self.pending.remove(&id) {
            Some(op) => op,
            None => return,
        };
        self.by_receipt.remove(&op.receipt);
        match op.kind {
            PendingKind::Mint => {
                if let Some(record) = self.registry.records.get_mut(&id) {
                    record.state = CoinState::Unminted;
                }
            }
            PendingKind::Spend => {
                if let Some(record) = self.registry.records.get_mut(&id) {
                    record.state = CoinState::Minted;
                }
                witnesses.unpin(id);
                witnesses.refresh_status(id, tracker);
            }
        }
        if let Some(notify) = op.notify {
            let _ = notify.send(Err(error.clone()));
        }
        warn!(%id, %error, "transaction failed");
        events.push(CoinEvent::Failed { id, error });
    }
}
