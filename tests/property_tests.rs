//! Property-based tests for stele accumulator primitives
//!
//! Uses proptest to generate random inputs and verify that the arithmetic
//! identities and wire encodings the protocol depends on hold for arbitrary
//! values, not just the hand-picked constants in the unit tests.

use proptest::prelude::*;
use stele::crypto::{
    primality, AccumulatorParams, CryptoContext, Element, ElementProduct, StateValue, LAMBDA,
};
use stele::tracker::{DeltaProof, StateDelta};
use stele::wallet::{Coin, CoinId, MintTransaction, OwnerKey, SpendTransaction, Transaction};

// =============================================================================
// PROPTEST STRATEGIES
// =============================================================================

/// Strategy for arbitrary derivation preimages
fn preimage() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for small sets of distinct coin ids
fn coin_ids(max: usize) -> impl Strategy<Value = Vec<u64>> {
    prop::collection::hash_set(any::<u64>(), 1..max).prop_map(|set| set.into_iter().collect())
}

/// Strategy for owner keys (the all-zero key is invalid by construction)
fn owner_key() -> impl Strategy<Value = OwnerKey> {
    prop::array::uniform32(any::<u8>())
        .prop_filter_map("all-zero owner key", |bytes| OwnerKey::new(bytes).ok())
}

fn wide_ctx() -> CryptoContext {
    CryptoContext::new(AccumulatorParams::insecure_test_wide())
}

fn derive_all(ctx: &CryptoContext, ids: &[u64]) -> Vec<Element> {
    ids.iter()
        .map(|id| ctx.derive_element(&id.to_le_bytes()))
        .collect()
}

// =============================================================================
// ELEMENT DERIVATION
// =============================================================================

proptest! {
    /// Property: hash-to-prime is deterministic
    #[test]
    fn element_derivation_is_deterministic(preimage in preimage()) {
        let ctx = wide_ctx();
        prop_assert_eq!(ctx.derive_element(&preimage), ctx.derive_element(&preimage));
    }

    /// Property: every derived element is a prime below λ
    #[test]
    fn derived_elements_are_primes_below_lambda(preimage in preimage()) {
        let element = wide_ctx().derive_element(&preimage);
        prop_assert!(element.as_u64() < LAMBDA);
        prop_assert!(primality::is_prime(element.as_u64()));
    }

    /// Property: distinct preimages derive distinct elements
    #[test]
    fn distinct_preimages_derive_distinct_elements(p1 in preimage(), p2 in preimage()) {
        prop_assume!(p1 != p2);
        let ctx = wide_ctx();
        prop_assert_ne!(ctx.derive_element(&p1), ctx.derive_element(&p2));
    }

    /// Property: derivation depends only on λ, not on the group parameters
    #[test]
    fn derivation_is_group_independent(preimage in preimage()) {
        let tiny = CryptoContext::new(AccumulatorParams::insecure_test());
        let wide = wide_ctx();
        prop_assert_eq!(tiny.derive_element(&preimage), wide.derive_element(&preimage));
    }
}

// =============================================================================
// ACCUMULATOR ARITHMETIC
// =============================================================================

proptest! {
    /// Property: applying a batch in chunks lands on the same state as
    /// applying it at once
    #[test]
    fn chunked_addition_matches_batch(ids in coin_ids(7), split in 0..8usize) {
        let ctx = wide_ctx();
        let elements = derive_all(&ctx, &ids);
        let split = split.min(elements.len());
        let genesis = ctx.initial_state();

        let at_once = ctx.add_elements(&genesis, &ElementProduct::of(&elements));
        let first = ctx.add_elements(&genesis, &ElementProduct::of(&elements[..split]));
        let chunked = ctx.add_elements(&first, &ElementProduct::of(&elements[split..]));
        prop_assert_eq!(at_once, chunked);
    }

    /// Property: every witness issued for a batch verifies against the
    /// post-batch state
    #[test]
    fn batch_witnesses_all_verify(ids in coin_ids(6)) {
        let ctx = wide_ctx();
        let elements = derive_all(&ctx, &ids);
        let genesis = ctx.initial_state();

        let witnesses = ctx.witnesses_for_batch(&genesis, &elements).unwrap();
        let state = ctx.add_elements(&genesis, &ElementProduct::of(&elements));
        for (element, witness) in elements.iter().zip(&witnesses) {
            prop_assert!(ctx.verify_membership(&state, witness, *element));
        }
    }

    /// Property: a pure-addition advance keeps an existing witness valid
    #[test]
    fn advanced_witness_survives_additions(ids_a in coin_ids(5), ids_b in coin_ids(5)) {
        let ctx = wide_ctx();
        let batch_a = derive_all(&ctx, &ids_a);
        let batch_b = derive_all(&ctx, &ids_b);
        let genesis = ctx.initial_state();

        let product_a = ElementProduct::of(&batch_a);
        let witness = ctx.witness_from_batch(&genesis, &product_a, batch_a[0]).unwrap();
        let state_a = ctx.add_elements(&genesis, &product_a);
        prop_assert!(ctx.verify_membership(&state_a, &witness, batch_a[0]));

        let product_b = ElementProduct::of(&batch_b);
        let state_ab = ctx.add_elements(&state_a, &product_b);
        let advanced = ctx.advance_witness(&witness, &product_b);
        prop_assert!(ctx.verify_membership(&state_ab, &advanced, batch_a[0]));
    }

    /// Property: two coprime roots combine into a root for the product
    #[test]
    fn combined_roots_give_joint_root(id_a in any::<u64>(), id_b in any::<u64>()) {
        prop_assume!(id_a != id_b);
        let ctx = wide_ctx();
        let a = ctx.derive_element(&id_a.to_le_bytes());
        let b = ctx.derive_element(&id_b.to_le_bytes());
        prop_assume!(a != b);
        let genesis = ctx.initial_state();

        let joint = ElementProduct::of(&[a, b]);
        let state = ctx.add_elements(&genesis, &joint);
        let root_a = ctx.witness_from_batch(&genesis, &joint, a).unwrap();
        let root_b = ctx.witness_from_batch(&genesis, &joint, b).unwrap();

        let combined = ctx
            .combine_roots(&root_a, &root_b, &ElementProduct::from(a), &ElementProduct::from(b))
            .unwrap();
        prop_assert_eq!(ctx.add_elements(&combined, &joint), state);
    }

    /// Property: a witness recombines through the deletion of another
    /// element and still verifies
    #[test]
    fn recombined_witness_survives_deletion(ids in coin_ids(6)) {
        prop_assume!(ids.len() >= 2);
        let ctx = wide_ctx();
        let elements = derive_all(&ctx, &ids);
        let genesis = ctx.initial_state();

        let all = ElementProduct::of(&elements);
        let witness = ctx.witness_from_batch(&genesis, &all, elements[0]).unwrap();
        let state = ctx.add_elements(&genesis, &all);
        prop_assert!(ctx.verify_membership(&state, &witness, elements[0]));

        // Delete elements[1]; the target drops it from the product.
        let deleted = ElementProduct::from(elements[1]);
        let remaining = ElementProduct::of(
            &elements
                .iter()
                .copied()
                .filter(|e| *e != elements[1])
                .collect::<Vec<_>>(),
        );
        let target = ctx.add_elements(&genesis, &remaining);
        let recombined = ctx
            .recombine_witness(
                elements[0],
                &witness,
                &ElementProduct::identity(),
                &deleted,
                &target,
            )
            .unwrap();
        prop_assert!(ctx.verify_membership(&target, &recombined, elements[0]));
    }

    /// Property: honest exponentiation proofs always verify
    #[test]
    fn exponentiation_proofs_verify(ids in coin_ids(9)) {
        let ctx = wide_ctx();
        let elements = derive_all(&ctx, &ids);
        let genesis = ctx.initial_state();

        let product = ElementProduct::of(&elements);
        let target = ctx.add_elements(&genesis, &product);
        let proof = ctx.prove_exponentiation(&genesis, &product, &target).unwrap();
        prop_assert!(ctx.verify_exponentiation(&genesis, &product, &target, &proof));
    }

    /// Property: a fully proven addition delta passes proof verification
    /// and survives a serde round trip
    #[test]
    fn proven_delta_round_trips(ids in coin_ids(5)) {
        let ctx = wide_ctx();
        let elements = derive_all(&ctx, &ids);
        let genesis = ctx.initial_state();

        let added = ElementProduct::of(&elements);
        let deleted = ElementProduct::identity();
        let new_state = ctx.add_elements(&genesis, &added);
        let delta = StateDelta {
            sequence: 1,
            prior_state: genesis.clone(),
            new_state: new_state.clone(),
            added_product: added.clone(),
            deleted_product: deleted.clone(),
            proof: Some(DeltaProof {
                mid_state: genesis.clone(),
                deletion: ctx.prove_exponentiation(&genesis, &deleted, &genesis).unwrap(),
                addition: ctx.prove_exponentiation(&genesis, &added, &new_state).unwrap(),
            }),
        };
        prop_assert!(delta.verify_proof(&ctx));

        let encoded = serde_json::to_string(&delta).unwrap();
        let decoded: StateDelta = serde_json::from_str(&encoded).unwrap();
        prop_assert_eq!(&decoded, &delta);
        prop_assert!(decoded.verify_proof(&ctx));
    }
}

// =============================================================================
// WALLET WIRE TYPES
// =============================================================================

proptest! {
    /// Property: a coin's element is a pure function of owner and id
    #[test]
    fn coin_element_binds_owner_and_id(owner in owner_key(), id in any::<u64>(), other in any::<u64>()) {
        prop_assume!(id != other);
        let ctx = wide_ctx();
        let coin = Coin::new(owner, CoinId::new(id));
        prop_assert_eq!(coin.element(&ctx), Coin::new(owner, CoinId::new(id)).element(&ctx));
        prop_assert_ne!(coin.element(&ctx), Coin::new(owner, CoinId::new(other)).element(&ctx));
    }

    /// Property: transactions survive a serde round trip and hash stably
    #[test]
    fn transactions_round_trip_serde(
        from in owner_key(),
        to in owner_key(),
        id in any::<u64>(),
        witness in any::<u64>()
    ) {
        prop_assume!(from != to);
        let mint = Transaction::Mint(MintTransaction::new(Coin::new(from, CoinId::new(id))));
        let spend = Transaction::Spend(
            SpendTransaction::new(
                Coin::new(from, CoinId::new(id)),
                Coin::new(to, CoinId::new(id)),
                StateValue::from(witness),
            )
            .unwrap(),
        );

        for tx in [&mint, &spend] {
            let encoded = serde_json::to_string(tx).unwrap();
            let decoded: Transaction = serde_json::from_str(&encoded).unwrap();
            prop_assert_eq!(&decoded, tx);
            prop_assert_eq!(decoded.hash(), tx.hash());
        }
        prop_assert_ne!(mint.hash(), spend.hash());
    }

    /// Property: the canonical encoding starts with the kind tag and is
    /// deterministic
    #[test]
    fn canonical_bytes_are_kind_tagged(owner in owner_key(), id in any::<u64>()) {
        let mint = Transaction::Mint(MintTransaction::new(Coin::new(owner, CoinId::new(id))));
        let bytes = mint.canonical_bytes();
        prop_assert_eq!(bytes[0], 0);
        prop_assert_eq!(bytes, mint.canonical_bytes());
    }
}

// =============================================================================
// EDGE CASES (not proptest)
// =============================================================================

#[cfg(test)]
mod edge_cases {
    use super::*;

    #[test]
    fn test_element_wire_boundaries() {
        for value in [0u64, 1, u64::MAX] {
            let element = Element::new(value);
            let bytes = element.to_wire_bytes();
            assert_eq!(Element::from_wire_bytes(&bytes).unwrap(), element);
        }
    }

    #[test]
    fn test_empty_product_is_identity() {
        let empty = ElementProduct::of(&[]);
        assert!(empty.is_identity());

        // Adding the empty product never moves the state.
        let ctx = wide_ctx();
        let genesis = ctx.initial_state();
        assert_eq!(ctx.add_elements(&genesis, &empty), genesis);
    }

    #[test]
    fn test_checked_div_by_identity_is_noop() {
        let ctx = wide_ctx();
        let product = ElementProduct::of(&derive_all(&ctx, &[1, 2, 3]));
        assert_eq!(
            product.checked_div(&ElementProduct::identity()),
            Some(product)
        );
    }
}
