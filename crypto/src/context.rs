//! The accumulator arithmetic context
//!
//! `CryptoContext` bundles the group parameters with every arithmetic
//! operation the protocol consumes: hash-to-prime element derivation,
//! accumulation, membership verification, and the witness maintenance
//! primitives. Components receive the context explicitly (usually as
//! `Arc<CryptoContext>`) rather than reaching for process globals, so tests
//! can run several parameter sets side by side.

use num_bigint::{BigInt, BigUint, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};

use crate::errors::{CryptoError, CryptoResult};
use crate::params::{AccumulatorParams, LAMBDA};
use crate::primality;
use crate::value::{Element, ElementProduct, StateValue};

/// Domain prefix for hash-to-prime element derivation.
const ELEMENT_DOMAIN: &[u8] = b"stele.element.v1";

/// Group parameters plus the arithmetic the protocol is built from.
#[derive(Clone, Debug)]
pub struct CryptoContext {
    params: AccumulatorParams,
}

impl CryptoContext {
    pub fn new(params: AccumulatorParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &AccumulatorParams {
        &self.params
    }

    /// Byte width of group values on the wire.
    pub fn value_width(&self) -> usize {
        self.params.value_width()
    }

    /// The accumulator's genesis value: the group generator.
    pub fn initial_state(&self) -> StateValue {
        StateValue::new(self.params.generator().clone())
    }

    /// Hash arbitrary bytes to a prime element below λ.
    ///
    /// The digest is interpreted little-endian, reduced mod λ, and rehashed
    /// until the candidate is prime. Deterministic: equal preimages always
    /// map to equal elements.
    pub fn derive_element(&self, preimage: &[u8]) -> Element {
        self.derive_prime_with_domain(ELEMENT_DOMAIN, preimage)
    }

    pub(crate) fn derive_prime_with_domain(&self, domain: &[u8], preimage: &[u8]) -> Element {
        let mut hasher = blake3::Hasher::new();
        hasher.update(domain);
        hasher.update(preimage);
        let mut digest = *hasher.finalize().as_bytes();
        loop {
            let candidate = fold_digest(&digest);
            if primality::is_prime(candidate) {
                return Element::new(candidate);
            }
            digest = *blake3::hash(&digest).as_bytes();
        }
    }

    /// Fold a batch of elements into the accumulator: `state^product mod N`.
    pub fn add_elements(&self, state: &StateValue, product: &ElementProduct) -> StateValue {
        StateValue::new(
            state
                .as_uint()
                .modpow(product.as_uint(), self.params.modulus()),
        )
    }

    /// Check that `witness^element mod N == state`.
    pub fn verify_membership(
        &self,
        state: &StateValue,
        witness: &StateValue,
        element: Element,
    ) -> bool {
        let lifted = witness
            .as_uint()
            .modpow(&element.to_uint(), self.params.modulus());
        &lifted == state.as_uint()
    }

    /// Witness for one element of a freshly added batch.
    ///
    /// `prior_state` is the accumulator value *before* the batch was folded
    /// in. The element must divide the batch product exactly; the witness is
    /// the prior state raised to the product of all other elements. When the
    /// element is the entire batch this degenerates to the prior state
    /// itself.
    pub fn witness_from_batch(
        &self,
        prior_state: &StateValue,
        batch_product: &ElementProduct,
        element: Element,
    ) -> CryptoResult<StateValue> {
        // div_rem panics on a zero divisor.
        if element.as_u64() == 0 {
            return Err(CryptoError::ElementNotInBatch { element: 0 });
        }
        let (quotient, remainder) = batch_product.as_uint().div_rem(&element.to_uint());
        if !remainder.is_zero() {
            return Err(CryptoError::ElementNotInBatch {
                element: element.as_u64(),
            });
        }
        Ok(StateValue::new(
            prior_state.as_uint().modpow(&quotient, self.params.modulus()),
        ))
    }

    /// Carry a witness through a pure-addition batch: `witness^added mod N`.
    pub fn advance_witness(&self, witness: &StateValue, added: &ElementProduct) -> StateValue {
        StateValue::new(
            witness
                .as_uint()
                .modpow(added.as_uint(), self.params.modulus()),
        )
    }

    /// Merge an x-th root and a y-th root of the same value into an xy-th
    /// root (Shamir's trick).
    ///
    /// Fails with [`CryptoError::RootMismatch`] when the roots disagree on
    /// the underlying value and [`CryptoError::NotCoprime`] when the
    /// exponents share a factor.
    pub fn combine_roots(
        &self,
        xth_root: &StateValue,
        yth_root: &StateValue,
        x: &ElementProduct,
        y: &ElementProduct,
    ) -> CryptoResult<StateValue> {
        let n = self.params.modulus();
        let via_x = xth_root.as_uint().modpow(x.as_uint(), n);
        let via_y = yth_root.as_uint().modpow(y.as_uint(), n);
        if via_x != via_y {
            return Err(CryptoError::RootMismatch);
        }

        let extended = BigInt::from(x.as_uint().clone()).extended_gcd(&BigInt::from(y.as_uint().clone()));
        if !extended.gcd.is_one() {
            return Err(CryptoError::NotCoprime);
        }

        // a*x + b*y = 1, so root^(b) * root'^(a) has order xy. Negative
        // coefficients exponentiate the inverse root instead.
        let left = self.signed_pow(xth_root.as_uint(), &extended.y)?;
        let right = self.signed_pow(yth_root.as_uint(), &extended.x)?;
        Ok(StateValue::new((left * right) % n))
    }

    /// Update a witness across a batch that contains deletions.
    ///
    /// The witness is first advanced through the additions, then recombined
    /// against the post-batch `target` state via [`Self::combine_roots`]. A
    /// witness whose own element was deleted cannot be recombined and fails
    /// with [`CryptoError::NotCoprime`].
    pub fn recombine_witness(
        &self,
        element: Element,
        witness: &StateValue,
        added: &ElementProduct,
        deleted: &ElementProduct,
        target: &StateValue,
    ) -> CryptoResult<StateValue> {
        let advanced = if added.is_identity() {
            witness.clone()
        } else {
            self.advance_witness(witness, added)
        };
        if deleted.is_identity() {
            return Ok(advanced);
        }
        self.combine_roots(&advanced, target, &ElementProduct::from(element), deleted)
    }

    /// Witnesses for every element of a batch in one O(n log n) pass.
    ///
    /// `prior_state` is the accumulator value before the batch. Output order
    /// matches input order. This is the service-provider path; issuing a
    /// single witness via [`Self::witness_from_batch`] stays O(1).
    pub fn witnesses_for_batch(
        &self,
        prior_state: &StateValue,
        elements: &[Element],
    ) -> CryptoResult<Vec<StateValue>> {
        if elements.is_empty() {
            return Err(CryptoError::EmptyBatch);
        }
        Ok(self.root_factor(prior_state.as_uint(), elements))
    }

    fn root_factor(&self, base: &BigUint, elements: &[Element]) -> Vec<StateValue> {
        if elements.len() == 1 {
            return vec![StateValue::new(base.clone())];
        }
        let n = self.params.modulus();
        let mid = elements.len() / 2;

        let mut left_base = base.clone();
        for elem in &elements[..mid] {
            left_base = left_base.modpow(&elem.to_uint(), n);
        }
        let mut right_base = base.clone();
        for elem in &elements[mid..] {
            right_base = right_base.modpow(&elem.to_uint(), n);
        }

        // Each half's witnesses start from the base already raised by the
        // other half's elements.
        let mut witnesses = self.root_factor(&right_base, &elements[..mid]);
        witnesses.extend(self.root_factor(&left_base, &elements[mid..]));
        witnesses
    }

    fn signed_pow(&self, base: &BigUint, exp: &BigInt) -> CryptoResult<BigUint> {
        let n = self.params.modulus();
        if exp.sign() == Sign::Minus {
            let inverse = base.modinv(n).ok_or(CryptoError::NoInverse)?;
            Ok(inverse.modpow(exp.magnitude(), n))
        } else {
            Ok(base.modpow(exp.magnitude(), n))
        }
    }
}

/// Reduce a 32-byte little-endian digest mod λ.
///
/// λ = 2^63 - 1, so 2^64 ≡ 2 (mod λ) and the four 64-bit limbs fold as
/// `Σ limb_i * 2^i`.
fn fold_digest(digest: &[u8; 32]) -> u64 {
    let mut acc: u128 = 0;
    for i in 0..4 {
        let mut limb = [0u8; 8];
        limb.copy_from_slice(&digest[i * 8..(i + 1) * 8]);
        acc += (u64::from_le_bytes(limb) as u128) << i;
    }
    (acc % LAMBDA as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_context() -> CryptoContext {
        CryptoContext::new(AccumulatorParams::insecure_test())
    }

    #[test]
    fn test_add_elements() {
        let ctx = test_context();
        let state = ctx.add_elements(
            &ctx.initial_state(),
            &ElementProduct::of(&[Element::new(3), Element::new(5), Element::new(7)]),
        );
        assert_eq!(state, StateValue::from(5));
    }

    #[test]
    fn test_witness_from_batch_known_values() {
        let ctx = test_context();
        let prior = StateValue::from(2);
        let batch = ElementProduct::new(BigUint::from(1155u32)); // 3*5*7*11

        for (elem, expected) in [(3u64, 2u64), (5, 8), (7, 5), (11, 5)] {
            let witness = ctx
                .witness_from_batch(&prior, &batch, Element::new(elem))
                .unwrap();
            assert_eq!(witness, StateValue::from(expected), "element {}", elem);
        }

        assert_eq!(
            ctx.witness_from_batch(&prior, &batch, Element::new(4)),
            Err(CryptoError::ElementNotInBatch { element: 4 })
        );
        assert_eq!(
            ctx.witness_from_batch(&prior, &batch, Element::new(0)),
            Err(CryptoError::ElementNotInBatch { element: 0 })
        );
    }

    #[test]
    fn test_single_element_batch_witness_is_prior_state() {
        let ctx = test_context();
        let prior = StateValue::from(2);
        let witness = ctx
            .witness_from_batch(&prior, &ElementProduct::from(Element::new(7)), Element::new(7))
            .unwrap();
        assert_eq!(witness, prior);
    }

    #[test]
    fn test_verify_membership() {
        let ctx = test_context();
        // State after adding 3*5*7*11 to generator 2: 2^1155 mod 13 = 8.
        let state = StateValue::from(8);
        assert!(ctx.verify_membership(&state, &StateValue::from(2), Element::new(3)));
        assert!(ctx.verify_membership(&state, &StateValue::from(8), Element::new(5)));
        assert!(!ctx.verify_membership(&state, &StateValue::from(3), Element::new(3)));
    }

    #[test]
    fn test_advance_witness_tracks_state() {
        let ctx = test_context();
        // Witness 2 proves element 3 against state 8 = 2^3 mod 13.
        let state = StateValue::from(8);
        let witness = StateValue::from(2);
        assert!(ctx.verify_membership(&state, &witness, Element::new(3)));

        let added = ElementProduct::from(Element::new(5));
        let new_state = ctx.add_elements(&state, &added);
        let advanced = ctx.advance_witness(&witness, &added);
        assert!(ctx.verify_membership(&new_state, &advanced, Element::new(3)));
    }

    #[test]
    fn test_combine_roots_known_values() {
        let ctx = test_context();
        let combine = |u: u64, v: u64, x: u64, y: u64| {
            ctx.combine_roots(
                &StateValue::from(u),
                &StateValue::from(v),
                &ElementProduct::from(x),
                &ElementProduct::from(y),
            )
        };
        assert_eq!(combine(11, 6, 7, 5), Ok(StateValue::from(7)));
        assert_eq!(combine(11, 7, 7, 11), Ok(StateValue::from(6)));
        assert_eq!(combine(6, 7, 5, 11), Ok(StateValue::from(11)));
        assert_eq!(combine(12, 7, 7, 11), Err(CryptoError::RootMismatch));
        assert_eq!(combine(1, 1, 4, 10), Err(CryptoError::NotCoprime));
    }

    #[test]
    fn test_recombine_witness_known_values() {
        let ctx = test_context();
        let result = ctx
            .recombine_witness(
                Element::new(12131),
                &StateValue::from(8),
                &ElementProduct::from(77u64),
                &ElementProduct::from(15u64),
                &StateValue::from(11),
            )
            .unwrap();
        assert_eq!(result, StateValue::from(6));
    }

    #[test]
    fn test_recombine_without_deletions_is_pure_advance() {
        let ctx = test_context();
        let witness = StateValue::from(2);
        let added = ElementProduct::from(Element::new(5));
        let result = ctx
            .recombine_witness(
                Element::new(3),
                &witness,
                &added,
                &ElementProduct::identity(),
                &StateValue::from(8),
            )
            .unwrap();
        assert_eq!(result, ctx.advance_witness(&witness, &added));
    }

    #[test]
    fn test_witnesses_for_batch_known_values() {
        let ctx = test_context();
        let elements = [
            Element::new(3),
            Element::new(5),
            Element::new(7),
            Element::new(11),
        ];
        let witnesses = ctx
            .witnesses_for_batch(&StateValue::from(2), &elements)
            .unwrap();
        assert_eq!(
            witnesses,
            vec![
                StateValue::from(2),
                StateValue::from(8),
                StateValue::from(5),
                StateValue::from(5),
            ]
        );

        // Every batch witness verifies against the post-batch state.
        let state = ctx.add_elements(&StateValue::from(2), &ElementProduct::of(&elements));
        for (witness, elem) in witnesses.iter().zip(elements) {
            assert!(ctx.verify_membership(&state, witness, elem));
        }

        assert_eq!(
            ctx.witnesses_for_batch(&StateValue::from(2), &[]),
            Err(CryptoError::EmptyBatch)
        );
    }

    #[test]
    fn test_derive_element_deterministic_and_bounded() {
        let ctx = test_context();
        let a = ctx.derive_element(b"coin-42");
        let b = ctx.derive_element(b"coin-42");
        let c = ctx.derive_element(b"coin-43");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_u64() < LAMBDA);
        assert!(primality::is_prime(a.as_u64()));
        assert!(primality::is_prime(c.as_u64()));
    }

    #[test]
    fn test_production_params_smoke() {
        let ctx = CryptoContext::new(AccumulatorParams::rsa2048());
        let state = ctx.add_elements(&ctx.initial_state(), &ElementProduct::from(Element::new(3)));
        assert_eq!(state, StateValue::from(8));
        assert!(ctx.verify_membership(&state, &StateValue::from(2), Element::new(3)));
    }
}
