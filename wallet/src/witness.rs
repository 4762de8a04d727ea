//! Membership witness management
//!
//! Every owned coin needs a membership witness that verifies against the
//! *current* accumulator state, and the state moves every round. The manager
//! keeps one tracked witness per coin, advances them through published
//! deltas as they arrive, and degrades entries to `Stale` the moment an
//! advance fails or is skipped rather than ever serving an unverified value.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use stele_crypto::{CryptoContext, Element, ElementProduct, StateValue};
use stele_tracker::{Checkpoint, StateDelta, StateTracker};

use crate::coin::{Coin, CoinId};
use crate::errors::{WalletError, WalletResult};

/// A membership witness bound to the exact state it verifies against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipWitness {
    /// Group value `w` with `w^element == anchor.state`
    pub value: StateValue,
    /// The checkpoint this witness is valid at
    pub anchor: Checkpoint,
}

/// Freshness of a tracked witness relative to the state tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WitnessStatus {
    /// Anchored at the tracker's current checkpoint, ready to spend
    Fresh,
    /// The tracker advanced past the anchor; update before spending
    Stale,
    /// The coin was spent; terminal
    Discarded,
}

struct TrackedWitness {
    element: Element,
    witness: MembershipWitness,
    status: WitnessStatus,
    /// A pinned witness backs an in-flight spend and must stay anchored to
    /// the state it was submitted against.
    pinned: bool,
}

/// One membership witness per owned coin, kept verifiable as the
/// accumulator moves.
pub struct WitnessManager {
    ctx: Arc<CryptoContext>,
    tracked: HashMap<CoinId, TrackedWitness>,
}

impl WitnessManager {
    pub fn new(ctx: Arc<CryptoContext>) -> Self {
        Self {
            ctx,
            tracked: HashMap::new(),
        }
    }

    /// Derive and store the witness for a coin whose element entered the
    /// accumulator in `delta`.
    ///
    /// When the element is the round's only addition the witness degenerates
    /// to the state the addition was applied to. The result is verified
    /// against `delta.new_state` before it is stored.
    pub fn issue(&mut self, coin: &Coin, delta: &StateDelta) -> WalletResult<&MembershipWitness> {
        let id = coin.id();
        let element = coin.element(&self.ctx);
        let base = delta
            .addition_base()
            .ok_or(WalletError::WitnessComputationFailed(id))?;
        let value = self
            .ctx
            .witness_from_batch(base, &delta.added_product, element)?;
        if !self.ctx.verify_membership(&delta.new_state, &value, element) {
            return Err(WalletError::WitnessComputationFailed(id));
        }
        debug!(%id, sequence = delta.sequence, "issued membership witness");
        let tracked = TrackedWitness {
            element,
            witness: MembershipWitness {
                value,
                anchor: delta.checkpoint(),
            },
            status: WitnessStatus::Fresh,
            pinned: false,
        };
        Ok(&self.store(id, tracked).witness)
    }

    /// Issue witnesses for several owned coins minted in the same round.
    ///
    /// Divides the foreign elements out of the round's added product once,
    /// then splits the owned remainder with the recursive root-factor pass,
    /// which beats issuing each coin separately once the owned set grows.
    pub fn issue_batch(&mut self, coins: &[Coin], delta: &StateDelta) -> WalletResult<()> {
        if coins.is_empty() {
            return Ok(());
        }
        let base = delta
            .addition_base()
            .ok_or_else(|| {
                WalletError::InvalidInput("delta carries deletions but no proof material".into())
            })?
            .clone();
        let elements: Vec<Element> = coins.iter().map(|coin| coin.element(&self.ctx)).collect();
        let owned = ElementProduct::of(&elements);
        let rest = match delta.added_product.checked_div(&owned) {
            Some(rest) => rest,
            None => {
                // Name the offender: a coin outside the batch errors here,
                // otherwise the request listed the same coin twice.
                for element in &elements {
                    self.ctx
                        .witness_from_batch(&delta.prior_state, &delta.added_product, *element)?;
                }
                return Err(WalletError::InvalidInput(
                    "duplicate coins in batch issuance".into(),
                ));
            }
        };
        let start = self.ctx.add_elements(&base, &rest);
        let values = self.ctx.witnesses_for_batch(&start, &elements)?;
        for ((coin, element), value) in coins.iter().zip(&elements).zip(values) {
            if !self.ctx.verify_membership(&delta.new_state, &value, *element) {
                return Err(WalletError::WitnessComputationFailed(coin.id()));
            }
            let tracked = TrackedWitness {
                element: *element,
                witness: MembershipWitness {
                    value,
                    anchor: delta.checkpoint(),
                },
                status: WitnessStatus::Fresh,
                pinned: false,
            };
            self.store(coin.id(), tracked);
        }
        debug!(
            count = coins.len(),
            sequence = delta.sequence,
            "issued witness batch"
        );
        Ok(())
    }

    /// Check that a coin's witness is servable right now: `Fresh`, anchored
    /// at the tracker's current checkpoint, and verifying against it.
    ///
    /// This is the pre-spend gate; a failure means the caller should update
    /// (or re-issue) and retry rather than submit.
    pub fn verify(&self, id: CoinId, tracker: &StateTracker) -> WalletResult<()> {
        let tracked = self.tracked.get(&id).ok_or(WalletError::UnknownCoin(id))?;
        let current = tracker.current();
        if tracked.status != WitnessStatus::Fresh || tracked.witness.anchor != *current {
            return Err(WalletError::StaleWitness(id));
        }
        if !self
            .ctx
            .verify_membership(&current.state, &tracked.witness.value, tracked.element)
        {
            return Err(WalletError::StaleWitness(id));
        }
        Ok(())
    }

    /// Replay a witness forward from its anchor to the tracker's current
    /// checkpoint.
    ///
    /// Each intermediate result is verified against that round's state
    /// before the fold continues; nothing unverified is ever stored. A
    /// [`TrackerError::StaleCheckpoint`](stele_tracker::TrackerError) from
    /// the replay window means a reorg orphaned the anchor and the witness
    /// must be re-issued instead.
    pub fn update(&mut self, id: CoinId, tracker: &StateTracker) -> WalletResult<()> {
        let tracked = self
            .tracked
            .get_mut(&id)
            .ok_or(WalletError::UnknownCoin(id))?;
        if tracked.status == WitnessStatus::Discarded {
            return Err(WalletError::StaleWitness(id));
        }
        let deltas = tracker.deltas_since(&tracked.witness.anchor)?;
        let mut value = tracked.witness.value.clone();
        for delta in deltas {
            value = match self.ctx.recombine_witness(
                tracked.element,
                &value,
                &delta.added_product,
                &delta.deleted_product,
                &delta.new_state,
            ) {
                Ok(next) => next,
                Err(err) => {
                    tracked.status = WitnessStatus::Stale;
                    return Err(err.into());
                }
            };
            if !self
                .ctx
                .verify_membership(&delta.new_state, &value, tracked.element)
            {
                tracked.status = WitnessStatus::Stale;
                return Err(WalletError::WitnessComputationFailed(id));
            }
        }
        tracked.witness = MembershipWitness {
            value,
            anchor: tracker.current().clone(),
        };
        tracked.status = WitnessStatus::Fresh;
        Ok(())
    }

    /// Advance every live witness through a freshly applied delta.
    ///
    /// Runs on each delta the client applies, keeping witnesses current
    /// without replay. Entries that cannot advance (their element was
    /// deleted, or they were anchored on another branch) drop to `Stale`.
    /// Pinned entries are skipped entirely.
    pub fn advance_all(&mut self, delta: &StateDelta) {
        for (id, tracked) in self.tracked.iter_mut() {
            if tracked.status == WitnessStatus::Discarded || tracked.pinned {
                continue;
            }
            let anchor = &tracked.witness.anchor;
            if anchor.sequence + 1 != delta.sequence || anchor.state != delta.prior_state {
                if anchor.sequence < delta.sequence && tracked.status == WitnessStatus::Fresh {
                    tracked.status = WitnessStatus::Stale;
                }
                continue;
            }
            match self.ctx.recombine_witness(
                tracked.element,
                &tracked.witness.value,
                &delta.added_product,
                &delta.deleted_product,
                &delta.new_state,
            ) {
                Ok(value)
                    if self
                        .ctx
                        .verify_membership(&delta.new_state, &value, tracked.element) =>
                {
                    tracked.witness = MembershipWitness {
                        value,
                        anchor: delta.checkpoint(),
                    };
                    tracked.status = WitnessStatus::Fresh;
                }
                Ok(_) => {
                    warn!(%id, sequence = delta.sequence, "witness no longer verifies after advance");
                    tracked.status = WitnessStatus::Stale;
                }
                Err(err) => {
                    warn!(%id, sequence = delta.sequence, error = %err, "witness advance failed");
                    tracked.status = WitnessStatus::Stale;
                }
            }
        }
    }

    /// Degrade every live witness to `Stale` after a reorg; anchors may now
    /// point into discarded history and must be re-proven by `update`.
    pub fn mark_all_stale(&mut self) {
        for tracked in self.tracked.values_mut() {
            if tracked.status != WitnessStatus::Discarded {
                tracked.status = WitnessStatus::Stale;
            }
        }
    }

    /// Force one entry to `Stale`, even out of `Discarded`.
    ///
    /// Reorg path only: a reverted spend leaves the pre-spend witness
    /// recoverable by replay from its old anchor.
    pub fn mark_stale(&mut self, id: CoinId) {
        if let Some(tracked) = self.tracked.get_mut(&id) {
            tracked.status = WitnessStatus::Stale;
            tracked.pinned = false;
        }
    }

    /// Terminal bookkeeping for a finalized spend.
    pub fn discard(&mut self, id: CoinId) {
        if let Some(tracked) = self.tracked.get_mut(&id) {
            tracked.status = WitnessStatus::Discarded;
            tracked.pinned = false;
        }
    }

    /// Drop an entry entirely (a reorg erased the mint it came from).
    pub fn remove(&mut self, id: CoinId) {
        self.tracked.remove(&id);
    }

    /// Exclude a witness from [`Self::advance_all`] while its spend is in
    /// flight.
    pub fn pin(&mut self, id: CoinId) {
        if let Some(tracked) = self.tracked.get_mut(&id) {
            tracked.pinned = true;
        }
    }

    pub fn unpin(&mut self, id: CoinId) {
        if let Some(tracked) = self.tracked.get_mut(&id) {
            tracked.pinned = false;
        }
    }

    /// Recompute one entry's freshness against the tracker.
    pub fn refresh_status(&mut self, id: CoinId, tracker: &StateTracker) {
        if let Some(tracked) = self.tracked.get_mut(&id) {
            if tracked.status == WitnessStatus::Discarded {
                return;
            }
            tracked.status = if tracked.witness.anchor == *tracker.current() {
                WitnessStatus::Fresh
            } else {
                WitnessStatus::Stale
            };
        }
    }

    pub fn status(&self, id: CoinId) -> Option<WitnessStatus> {
        self.tracked.get(&id).map(|tracked| tracked.status)
    }

    pub fn witness(&self, id: CoinId) -> Option<&MembershipWitness> {
        self.tracked.get(&id).map(|tracked| &tracked.witness)
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    fn store(&mut self, id: CoinId, tracked: TrackedWitness) -> &TrackedWitness {
        match self.tracked.entry(id) {
            Entry::Occupied(mut occupied) => {
                occupied.insert(tracked);
                occupied.into_mut()
            }
            Entry::Vacant(vacant) => vacant.insert(tracked),
        }
    }
}
