//! Succinct proofs of exponentiation
//!
//! The ledger publishes a Wesolowski proof alongside every batch transition
//! so that clients can check `base^exponent == result` with two small
//! exponentiations instead of one enormous one. The verifier recomputes the
//! challenge prime from the statement, so proofs are non-interactive.

use num_integer::Integer;
use serde::{Deserialize, Serialize};

use crate::context::CryptoContext;
use crate::errors::CryptoResult;
use crate::value::{ElementProduct, StateValue};

/// Domain prefix for the proof-of-exponentiation challenge.
const CHALLENGE_DOMAIN: &[u8] = b"stele.poe.v1";

/// A Wesolowski proof that `base^exponent mod N == result`.
///
/// The proof is the single group value `base^(exponent / l)` for the
/// challenge prime `l` derived from the statement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExponentiationProof(StateValue);

impl ExponentiationProof {
    pub fn new(value: StateValue) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &StateValue {
        &self.0
    }
}

impl CryptoContext {
    /// Prove that `base^exponent mod N == result`.
    pub fn prove_exponentiation(
        &self,
        base: &StateValue,
        exponent: &ElementProduct,
        result: &StateValue,
    ) -> CryptoResult<ExponentiationProof> {
        let challenge = self.exponentiation_challenge(base, exponent, result)?;
        let (quotient, _) = exponent.as_uint().div_rem(&challenge.to_uint());
        let proof = base.as_uint().modpow(&quotient, self.params().modulus());
        Ok(ExponentiationProof(StateValue::new(proof)))
    }

    /// Verify a proof that `base^exponent mod N == result`.
    ///
    /// Malformed statements (values outside the wire width) verify as false.
    pub fn verify_exponentiation(
        &self,
        base: &StateValue,
        exponent: &ElementProduct,
        result: &StateValue,
        proof: &ExponentiationProof,
    ) -> bool {
        let challenge = match self.exponentiation_challenge(base, exponent, result) {
            Ok(challenge) => challenge,
            Err(_) => return false,
        };
        let n = self.params().modulus();
        let residue = exponent.as_uint() % challenge.to_uint();
        let lifted = (proof.0.as_uint().modpow(&challenge.to_uint(), n)
            * base.as_uint().modpow(&residue, n))
            % n;
        &lifted == result.as_uint()
    }

    /// Challenge prime for the statement `base^exponent == result`, bound to
    /// all three values.
    fn exponentiation_challenge(
        &self,
        base: &StateValue,
        exponent: &ElementProduct,
        result: &StateValue,
    ) -> CryptoResult<crate::value::Element> {
        let width = self.value_width();
        let exponent_bytes = exponent.as_uint().to_bytes_le();
        let mut preimage = Vec::with_capacity(2 * width + exponent_bytes.len() + 4);
        preimage.extend_from_slice(&base.to_wire_bytes(width)?);
        preimage.extend_from_slice(&(exponent_bytes.len() as u32).to_le_bytes());
        preimage.extend_from_slice(&exponent_bytes);
        preimage.extend_from_slice(&result.to_wire_bytes(width)?);
        Ok(self.derive_prime_with_domain(CHALLENGE_DOMAIN, &preimage))
    }
}
