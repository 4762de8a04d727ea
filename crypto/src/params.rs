//! Accumulator group parameters
//!
//! The accumulator lives in the quadratic residues of an RSA group whose
//! modulus has no known factorization holder. Production deployments use the
//! RSA-2048 factoring-challenge modulus; unit tests use a tiny modulus whose
//! algebra can be checked by hand.

use num_bigint::BigUint;
use num_traits::{One, Zero};
use once_cell::sync::Lazy;

use crate::errors::{CryptoError, CryptoResult};

/// Bound on derived prime elements: every element is below 2^63.
///
/// Keeping elements word-sized makes hashing-to-prime cheap while products
/// and group values stay arbitrary precision.
pub const LAMBDA: u64 = u64::MAX / 2;

/// The RSA-2048 factoring-challenge modulus (decimal).
const RSA2048_DECIMAL: &str = "2519590847565789349402718324004839857142928212620403202777713783604366202070\
7595556264018525880784406918290641249515082189298559149176184502808489120072\
8449926873928072877767359714183472702618963750149718246911650776133798590957\
0009733045974880842840179742910064245869181719511874612151517265463228221686\
9987549182422433637259085141865462043576798423387184774447920739934236584823\
8242811981638150106748104516603773060562016196762561338441436038339044149526\
3443219011465754445417842402092461651572335077870774981712577246796292638635\
6373289912154831438167899885040445364023527381951378636564391212010397122822\
120720357";

static RSA2048_MODULUS: Lazy<BigUint> = Lazy::new(|| {
    RSA2048_DECIMAL
        .parse::<BigUint>()
        .expect("embedded RSA-2048 constant is valid decimal")
});

/// RSA group parameters for the accumulator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccumulatorParams {
    modulus: BigUint,
    generator: BigUint,
    value_width: usize,
}

impl AccumulatorParams {
    /// Build parameters from an explicit modulus and generator.
    pub fn new(modulus: BigUint, generator: BigUint) -> CryptoResult<Self> {
        if modulus <= BigUint::from(3u32) || (&modulus % 2u32).is_zero() {
            return Err(CryptoError::InvalidModulus);
        }
        if generator <= BigUint::one() || generator >= modulus {
            return Err(CryptoError::InvalidGenerator);
        }
        let value_width = ((modulus.bits() + 7) / 8) as usize;
        Ok(Self {
            modulus,
            generator,
            value_width,
        })
    }

    /// Production parameters: the RSA-2048 challenge modulus with generator 2.
    pub fn rsa2048() -> Self {
        Self {
            modulus: RSA2048_MODULUS.clone(),
            generator: BigUint::from(2u32),
            value_width: 256,
        }
    }

    /// Tiny parameters for exercising the algebra in tests: modulus 13,
    /// generator 2.
    ///
    /// The group order is public, so these parameters offer no security
    /// whatsoever. They exist because every accumulator identity can be
    /// verified by hand modulo 13.
    pub fn insecure_test() -> Self {
        Self {
            modulus: BigUint::from(13u32),
            generator: BigUint::from(2u32),
            value_width: 1,
        }
    }

    /// Wider test parameters: a 64-bit semiprime modulus with generator 2.
    ///
    /// Just as insecure as [`insecure_test`](Self::insecure_test) (the
    /// factors are right here in the source), but the group is large enough
    /// that unrelated values never coincide. Rejection-path tests need
    /// that: modulo 13 a stale witness can still verify by accident.
    pub fn insecure_test_wide() -> Self {
        Self {
            // (2^32 - 5) * (2^32 - 17), both prime
            modulus: BigUint::from(4_294_967_291u64) * BigUint::from(4_294_967_279u64),
            generator: BigUint::from(2u32),
            value_width: 8,
        }
    }

    /// The RSA modulus N.
    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    /// The group generator, also the accumulator's genesis value.
    pub fn generator(&self) -> &BigUint {
        &self.generator
    }

    /// Byte width of the fixed-width wire encoding for group values.
    pub fn value_width(&self) -> usize {
        self.value_width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsa2048_shape() {
        let params = AccumulatorParams::rsa2048();
        assert_eq!(params.modulus().bits(), 2048);
        assert_eq!(params.value_width(), 256);
        assert_eq!(params.generator(), &BigUint::from(2u32));
    }

    #[test]
    fn test_insecure_test_params() {
        let params = AccumulatorParams::insecure_test();
        assert_eq!(params.modulus(), &BigUint::from(13u32));
        assert_eq!(params.value_width(), 1);
    }

    #[test]
    fn test_insecure_test_wide_params() {
        let params = AccumulatorParams::insecure_test_wide();
        assert_eq!(params.modulus().bits(), 64);
        assert_eq!(params.value_width(), 8);
        assert!((params.modulus() % 2u32) == BigUint::one());
    }

    #[test]
    fn test_new_validates() {
        assert_eq!(
            AccumulatorParams::new(BigUint::from(3u32), BigUint::from(2u32)),
            Err(CryptoError::InvalidModulus)
        );
        assert_eq!(
            AccumulatorParams::new(BigUint::from(16u32), BigUint::from(2u32)),
            Err(CryptoError::InvalidModulus)
        );
        assert_eq!(
            AccumulatorParams::new(BigUint::from(13u32), BigUint::from(1u32)),
            Err(CryptoError::InvalidGenerator)
        );
        assert_eq!(
            AccumulatorParams::new(BigUint::from(13u32), BigUint::from(13u32)),
            Err(CryptoError::InvalidGenerator)
        );
        assert!(AccumulatorParams::new(BigUint::from(13u32), BigUint::from(2u32)).is_ok());
    }

    #[test]
    fn test_lambda_bound() {
        assert_eq!(LAMBDA, (1u64 << 63) - 1);
    }
}
