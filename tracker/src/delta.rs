//! Published accumulator state transitions
//!
//! Each finalized ledger round compresses into one [`StateDelta`]: the state
//! before, the state after, and the products of the elements deleted and
//! added in between. The ledger also publishes Wesolowski proofs for both
//! directions so clients can validate a transition without redoing the batch
//! exponentiation.

use serde::{Deserialize, Serialize};
use stele_crypto::{CryptoContext, ElementProduct, ExponentiationProof, StateValue};

/// A specific historical accumulator state, identified by ledger sequence
/// and value.
///
/// Sequence alone is not enough after a reorg (the same sequence can carry a
/// different value on the replacing branch) and value alone is not enough
/// because accumulator values can recur; witnesses therefore anchor to the
/// pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Ledger round sequence number
    pub sequence: u64,
    /// Accumulator value at this sequence
    pub state: StateValue,
}

impl Checkpoint {
    pub fn new(sequence: u64, state: StateValue) -> Self {
        Self { sequence, state }
    }
}

/// Proof material published with a delta.
///
/// A round applies deletions first and additions second, passing through an
/// intermediate state: `mid^deleted == prior` and `mid^added == new`. The
/// two proofs certify those equations against the published `mid_state`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaProof {
    /// State between the deletion and addition phases
    pub mid_state: StateValue,
    /// Proves `mid_state^deleted_product == prior_state`
    pub deletion: ExponentiationProof,
    /// Proves `mid_state^added_product == new_state`
    pub addition: ExponentiationProof,
}

/// One finalized batch transition of the accumulator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDelta {
    /// Strictly increasing ledger round sequence
    pub sequence: u64,
    /// Accumulator value before this round
    pub prior_state: StateValue,
    /// Accumulator value after this round
    pub new_state: StateValue,
    /// Product of the elements added this round (identity if none)
    pub added_product: ElementProduct,
    /// Product of the elements deleted this round (identity if none)
    pub deleted_product: ElementProduct,
    /// Published proof material, if the ledger provides it
    pub proof: Option<DeltaProof>,
}

impl StateDelta {
    /// The checkpoint this delta advances the accumulator to.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint::new(self.sequence, self.new_state.clone())
    }

    /// True when the round changed nothing (a heartbeat round).
    pub fn is_empty(&self) -> bool {
        self.added_product.is_identity() && self.deleted_product.is_identity()
    }

    /// The state this round's additions were applied to.
    ///
    /// For a pure-addition round that is the prior state. A round with
    /// deletions passes through its proof's mid state first; without proof
    /// material the base cannot be reconstructed locally and witnesses for
    /// the round's additions cannot be derived.
    pub fn addition_base(&self) -> Option<&StateValue> {
        if self.deleted_product.is_identity() {
            Some(&self.prior_state)
        } else {
            self.proof.as_ref().map(|proof| &proof.mid_state)
        }
    }

    /// Check the published proofs against this delta's states and products.
    ///
    /// Returns false when either proof fails or when no proof is attached.
    pub fn verify_proof(&self, ctx: &CryptoContext) -> bool {
        let Some(proof) = &self.proof else {
            return false;
        };
        ctx.verify_exponentiation(
            &proof.mid_state,
            &self.deleted_product,
            &self.prior_state,
            &proof.deletion,
        ) && ctx.verify_exponentiation(
            &proof.mid_state,
            &self.added_product,
            &self.new_state,
            &proof.addition,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stele_crypto::{AccumulatorParams, Element};

    fn ctx() -> CryptoContext {
        CryptoContext::new(AccumulatorParams::insecure_test())
    }

    /// Build a pure-addition delta with proofs, the way the ledger does.
    fn addition_delta(ctx: &CryptoContext, sequence: u64, prior: StateValue, elements: &[Element]) -> StateDelta {
        let added = ElementProduct::of(elements);
        let new_state = ctx.add_elements(&prior, &added);
        let deleted = ElementProduct::identity();
        let proof = DeltaProof {
            mid_state: prior.clone(),
            deletion: ctx
                .prove_exponentiation(&prior, &deleted, &prior)
                .unwrap(),
            addition: ctx
                .prove_exponentiation(&prior, &added, &new_state)
                .unwrap(),
        };
        StateDelta {
            sequence,
            prior_state: prior,
            new_state,
            added_product: added,
            deleted_product: deleted,
            proof: Some(proof),
        }
    }

    #[test]
    fn test_delta_proof_verifies() {
        let ctx = ctx();
        let delta = addition_delta(&ctx, 1, ctx.initial_state(), &[Element::new(3), Element::new(5)]);
        assert!(delta.verify_proof(&ctx));
        assert!(!delta.is_empty());
    }

    #[test]
    fn test_tampered_delta_rejected() {
        let ctx = ctx();
        let mut delta = addition_delta(&ctx, 1, ctx.initial_state(), &[Element::new(3)]);
        delta.new_state = StateValue::from(7);
        assert!(!delta.verify_proof(&ctx));
    }

    #[test]
    fn test_missing_proof_does_not_verify() {
        let ctx = ctx();
        let mut delta = addition_delta(&ctx, 1, ctx.initial_state(), &[Element::new(3)]);
        delta.proof = None;
        assert!(!delta.verify_proof(&ctx));
    }

    #[test]
    fn test_checkpoint_takes_new_state() {
        let ctx = ctx();
        let delta = addition_delta(&ctx, 4, ctx.initial_state(), &[Element::new(3)]);
        let checkpoint = delta.checkpoint();
        assert_eq!(checkpoint.sequence, 4);
        assert_eq!(checkpoint.state, delta.new_state);
    }

    #[test]
    fn test_addition_base() {
        let ctx = ctx();
        let mut delta = addition_delta(&ctx, 1, ctx.initial_state(), &[Element::new(3)]);
        assert_eq!(delta.addition_base(), Some(&delta.prior_state));

        // With deletions the base comes from the proof's mid state.
        delta.deleted_product = ElementProduct::from(5u64);
        let mid = delta.proof.as_ref().map(|p| p.mid_state.clone());
        assert_eq!(delta.addition_base().cloned(), mid);
        delta.proof = None;
        assert_eq!(delta.addition_base(), None);
    }
}
