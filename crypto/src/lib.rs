//! RSA accumulator arithmetic for the stele coin protocol
//!
//! The ledger compresses its entire coin set into one value of an RSA group:
//! adding a coin raises the accumulator to the coin's prime element, and a
//! membership witness for an element `e` is simply the `e`-th root of the
//! accumulator. This crate provides all the arithmetic the client-side
//! protocol consumes:
//!
//! - **Parameters**: the RSA-2048 production group and a hand-checkable test
//!   group ([`AccumulatorParams`])
//! - **Element derivation**: deterministic hash-to-prime below λ
//! - **Witness primitives**: issuance from a batch, pure-addition advances,
//!   and Shamir recombination across deletions ([`CryptoContext`])
//! - **Proofs of exponentiation**: Wesolowski proofs for cheap batch
//!   validation ([`ExponentiationProof`])
//!
//! All operations hang off [`CryptoContext`], which callers construct once
//! and pass around explicitly — there is no ambient global parameter set.

pub mod context;
pub mod errors;
pub mod params;
pub mod primality;
pub mod proofs;
pub mod value;

pub use context::CryptoContext;
pub use errors::{CryptoError, CryptoResult};
pub use params::{AccumulatorParams, LAMBDA};
pub use proofs::ExponentiationProof;
pub use value::{Element, ElementProduct, StateValue, ELEMENT_WIDTH};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_witness_survives_full_cycle() {
        // Issue, advance through an addition, recombine through a deletion,
        // and verify at every step.
        let ctx = CryptoContext::new(AccumulatorParams::insecure_test());

        // Batch 1: add {3, 5}.
        let genesis = ctx.initial_state();
        let batch1 = ElementProduct::of(&[Element::new(3), Element::new(5)]);
        let state1 = ctx.add_elements(&genesis, &batch1);
        let mut witness = ctx
            .witness_from_batch(&genesis, &batch1, Element::new(3))
            .unwrap();
        assert!(ctx.verify_membership(&state1, &witness, Element::new(3)));

        // Batch 2: add {7}.
        let batch2 = ElementProduct::from(Element::new(7));
        let state2 = ctx.add_elements(&state1, &batch2);
        witness = ctx.advance_witness(&witness, &batch2);
        assert!(ctx.verify_membership(&state2, &witness, Element::new(3)));

        // Batch 3: delete {5}. The target state drops 5 from the product.
        let remaining = ElementProduct::of(&[Element::new(3), Element::new(7)]);
        let state3 = ctx.add_elements(&genesis, &remaining);
        witness = ctx
            .recombine_witness(
                Element::new(3),
                &witness,
                &ElementProduct::identity(),
                &ElementProduct::from(Element::new(5)),
                &state3,
            )
            .unwrap();
        assert!(ctx.verify_membership(&state3, &witness, Element::new(3)));
    }
}
