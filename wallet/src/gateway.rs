//! Ledger gateway seam
//!
//! The wallet never talks to a ledger directly; everything flows through
//! the [`LedgerGateway`] trait so transports can be swapped and tests can
//! inject a deterministic ledger. The gateway contract is strict about
//! ordering: each subscription delivers one totally ordered stream of
//! [`LedgerEvent`]s, and a finalized transaction's `Delta` always precedes
//! the `Finalized` outcome that names its sequence.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use stele_crypto::{CryptoContext, Element, ElementProduct, StateValue};
use stele_tracker::{Checkpoint, DeltaProof, StateDelta};

use crate::coin::CoinId;
use crate::errors::{WalletError, WalletResult};
use crate::transaction::{Receipt, Transaction};

/// Submissions the in-memory ledger will queue before pushing back.
const MAX_QUEUED_SUBMISSIONS: usize = 100;

/// Transport-level gateway failures. Transaction rejections are not errors
/// here; they arrive as [`OutcomeKind::Rejected`] events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The ledger endpoint cannot take the request right now
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The ledger could not parse or accept the submission at all
    #[error("malformed submission: {0}")]
    InvalidSubmission(String),
}

/// Result type for gateway calls
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Terminal and intermediate fates of a submitted transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutcomeKind {
    /// Queued for an upcoming round
    Included,
    /// Dropped with a reason; it will never finalize
    Rejected(String),
    /// Applied in the round with this sequence number
    Finalized { sequence: u64 },
}

/// An outcome notification for one submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutcomeEvent {
    pub receipt: Receipt,
    pub kind: OutcomeKind,
}

/// One entry of the ordered ledger event stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerEvent {
    /// A round finalized and moved the accumulator
    Delta(StateDelta),
    /// The ledger discarded rounds back to this checkpoint
    Reorg(Checkpoint),
    /// A submission progressed
    Outcome(OutcomeEvent),
}

/// Ordered per-subscription event stream. Dropping the receiver
/// unsubscribes.
pub type LedgerEventStream = mpsc::UnboundedReceiver<LedgerEvent>;

/// Client-side seam to the coin ledger.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Queue a transaction for the next round.
    async fn submit(&self, tx: Transaction) -> GatewayResult<Receipt>;

    /// Current accumulator checkpoint, for seeding a tracker.
    async fn query_state(&self) -> GatewayResult<Checkpoint>;

    /// Whether a coin id currently occupies the accumulator.
    async fn is_coin_active(&self, id: CoinId) -> GatewayResult<bool>;

    /// Open a fresh ordered event stream.
    fn subscribe_events(&self) -> LedgerEventStream;
}

struct PendingSubmission {
    receipt: Receipt,
    tx: Transaction,
}

/// Undo record for one finalized round.
struct RoundRecord {
    delta: StateDelta,
    inserted: Vec<(CoinId, Element)>,
    removed: Vec<(CoinId, Element)>,
}

struct LedgerInner {
    sequence: u64,
    state: StateValue,
    active: HashMap<CoinId, Element>,
    pending: Vec<PendingSubmission>,
    subscribers: Vec<mpsc::UnboundedSender<LedgerEvent>>,
    submissions: u64,
    rounds: Vec<RoundRecord>,
}

impl LedgerInner {
    fn emit(&mut self, event: LedgerEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

/// A complete miniature ledger: queues submissions, finalizes them in
/// explicit rounds, publishes proofs, and can be forced into a reorg.
///
/// Rounds only advance when [`Self::finalize_round`] is called, which makes
/// tests and demos fully deterministic. An empty round is a heartbeat: the
/// state stays put but the sequence advances, which is what drives timeout
/// accounting downstream.
pub struct InMemoryLedger {
    ctx: Arc<CryptoContext>,
    inner: Mutex<LedgerInner>,
}

impl InMemoryLedger {
    pub fn new(ctx: Arc<CryptoContext>) -> Self {
        let state = ctx.initial_state();
        Self {
            ctx,
            inner: Mutex::new(LedgerInner {
                sequence: 0,
                state,
                active: HashMap::new(),
                pending: Vec::new(),
                subscribers: Vec::new(),
                submissions: 0,
                rounds: Vec::new(),
            }),
        }
    }

    /// The checkpoint the ledger currently stands at.
    pub fn checkpoint(&self) -> Checkpoint {
        let inner = self.inner.lock();
        Checkpoint::new(inner.sequence, inner.state.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Close the current round: validate every queued submission, fold the
    /// survivors into one state transition, and publish it.
    ///
    /// Deletions are applied first by recombining the spent witnesses into
    /// a single aggregated root, then additions are folded in, mirroring
    /// the two-phase shape of the published [`DeltaProof`].
    pub fn finalize_round(&self) -> WalletResult<StateDelta> {
        let mut inner = self.inner.lock();
        let sequence = inner.sequence + 1;
        let prior = inner.state.clone();

        let mut outcomes: Vec<(Receipt, OutcomeKind)> = Vec::new();
        let mut inserted: Vec<(CoinId, Element)> = Vec::new();
        let mut removed: Vec<(CoinId, Element)> = Vec::new();
        let mut spends: Vec<(Element, StateValue)> = Vec::new();
        let mut claimed: HashSet<CoinId> = HashSet::new();
        let mut spent: HashSet<CoinId> = HashSet::new();

        for submission in std::mem::take(&mut inner.pending) {
            match &submission.tx {
                Transaction::Mint(mint) => {
                    let id = mint.coin().id();
                    if inner.active.contains_key(&id) || claimed.contains(&id) {
                        outcomes.push((
                            submission.receipt,
                            OutcomeKind::Rejected("duplicate coin id".into()),
                        ));
                        continue;
                    }
                    claimed.insert(id);
                    inserted.push((id, mint.coin().element(&self.ctx)));
                    outcomes.push((submission.receipt, OutcomeKind::Finalized { sequence }));
                }
                Transaction::Spend(spend) => {
                    let id = spend.input().id();
                    if spent.contains(&id) {
                        outcomes.push((
                            submission.receipt,
                            OutcomeKind::Rejected("input already spent this round".into()),
                        ));
                        continue;
                    }
                    let element = spend.input().element(&self.ctx);
                    match inner.active.get(&id) {
                        Some(active) if *active == element => {}
                        _ => {
                            outcomes.push((
                                submission.receipt,
                                OutcomeKind::Rejected("unknown input coin".into()),
                            ));
                            continue;
                        }
                    }
                    if !self.ctx.verify_membership(&prior, spend.witness(), element) {
                        outcomes.push((
                            submission.receipt,
                            OutcomeKind::Rejected("stale witness".into()),
                        ));
                        continue;
                    }
                    spent.insert(id);
                    removed.push((id, element));
                    spends.push((element, spend.witness().clone()));
                    inserted.push((id, spend.output().element(&self.ctx)));
                    outcomes.push((submission.receipt, OutcomeKind::Finalized { sequence }));
                }
            }
        }

        // Deletion phase: each spent witness is an e-th root of the prior
        // state; recombining them pairwise yields the state with all spent
        // elements removed.
        let mut spend_iter = spends.into_iter();
        let (mid_state, deleted_product) = match spend_iter.next() {
            None => (prior.clone(), ElementProduct::identity()),
            Some((first_element, first_witness)) => {
                let mut aggregate = ElementProduct::from(first_element);
                let mut state = first_witness;
                for (element, witness) in spend_iter {
                    state = self.ctx.combine_roots(
                        &state,
                        &witness,
                        &aggregate,
                        &ElementProduct::from(element),
                    )?;
                    aggregate.push(element);
                }
                (state, aggregate)
            }
        };

        // Addition phase.
        let added_elements: Vec<Element> = inserted.iter().map(|(_, element)| *element).collect();
        let added_product = ElementProduct::of(&added_elements);
        let new_state = self.ctx.add_elements(&mid_state, &added_product);

        let proof = DeltaProof {
            mid_state: mid_state.clone(),
            deletion: self
                .ctx
                .prove_exponentiation(&mid_state, &deleted_product, &prior)?,
            addition: self
                .ctx
                .prove_exponentiation(&mid_state, &added_product, &new_state)?,
        };
        let delta = StateDelta {
            sequence,
            prior_state: prior,
            new_state: new_state.clone(),
            added_product,
            deleted_product,
            proof: Some(proof),
        };

        inner.sequence = sequence;
        inner.state = new_state;
        for (id, _) in &removed {
            inner.active.remove(id);
        }
        for (id, element) in &inserted {
            inner.active.insert(*id, *element);
        }
        inner.rounds.push(RoundRecord {
            delta: delta.clone(),
            inserted,
            removed,
        });

        debug!(sequence, outcomes = outcomes.len(), "finalized ledger round");
        inner.emit(LedgerEvent::Delta(delta.clone()));
        for (receipt, kind) in outcomes {
            inner.emit(LedgerEvent::Outcome(OutcomeEvent { receipt, kind }));
        }
        Ok(delta)
    }

    /// Discard every round after `to_sequence` and announce the rollback.
    ///
    /// Coins that only existed on the dropped rounds leave the active set;
    /// coins spent there become active again. Queued submissions survive
    /// and go into the next finalized round on the new branch.
    pub fn force_reorg(&self, to_sequence: u64) -> WalletResult<Checkpoint> {
        let mut inner = self.inner.lock();
        if to_sequence >= inner.sequence {
            return Err(WalletError::InvalidInput(format!(
                "ledger is at sequence {}, cannot reorg to {}",
                inner.sequence, to_sequence
            )));
        }

        while inner
            .rounds
            .last()
            .map_or(false, |round| round.delta.sequence > to_sequence)
        {
            if let Some(round) = inner.rounds.pop() {
                for (id, _) in &round.inserted {
                    inner.active.remove(id);
                }
                for (id, element) in &round.removed {
                    inner.active.insert(*id, *element);
                }
            }
        }

        inner.sequence = to_sequence;
        inner.state = match inner.rounds.last() {
            Some(round) => round.delta.new_state.clone(),
            None => self.ctx.initial_state(),
        };
        let checkpoint = Checkpoint::new(inner.sequence, inner.state.clone());
        warn!(sequence = to_sequence, "forced ledger reorg");
        inner.emit(LedgerEvent::Reorg(checkpoint.clone()));
        Ok(checkpoint)
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    async fn submit(&self, tx: Transaction) -> GatewayResult<Receipt> {
        let mut inner = self.inner.lock();
        if inner.pending.len() >= MAX_QUEUED_SUBMISSIONS {
            return Err(GatewayError::Unavailable("submission queue is full".into()));
        }
        inner.submissions += 1;
        let mut hasher = blake3::Hasher::new();
        hasher.update(&tx.hash());
        hasher.update(&inner.submissions.to_le_bytes());
        let receipt = Receipt::new(hasher.finalize().into());

        debug!(kind = %tx.kind(), id = %tx.coin_id(), %receipt, "queued submission");
        inner.pending.push(PendingSubmission { receipt, tx });
        inner.emit(LedgerEvent::Outcome(OutcomeEvent {
            receipt,
            kind: OutcomeKind::Included,
        }));
        Ok(receipt)
    }

    async fn query_state(&self) -> GatewayResult<Checkpoint> {
        Ok(self.checkpoint())
    }

    async fn is_coin_active(&self, id: CoinId) -> GatewayResult<bool> {
        Ok(self.inner.lock().active.contains_key(&id))
    }

    fn subscribe_events(&self) -> LedgerEventStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner.lock().subscribers.push(sender);
        receiver
    }
}
