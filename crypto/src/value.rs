//! Value newtypes for accumulator arithmetic
//!
//! Three distinct integer roles flow through the protocol and are easy to
//! confuse: group values (accumulator states and witnesses, bounded by the
//! modulus), prime elements (word-sized, bounded by λ), and element products
//! (unbounded). Each gets its own type so the compiler keeps them apart.

use std::fmt;

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};

use crate::errors::{CryptoError, CryptoResult};

/// Wire width of a prime element: 8 little-endian bytes.
pub const ELEMENT_WIDTH: usize = 8;

/// An accumulator group value: a state or a membership witness.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateValue(BigUint);

impl StateValue {
    pub fn new(value: BigUint) -> Self {
        Self(value)
    }

    pub fn as_uint(&self) -> &BigUint {
        &self.0
    }

    pub fn into_uint(self) -> BigUint {
        self.0
    }

    /// Fixed-width little-endian encoding, zero-padded to `width` bytes.
    pub fn to_wire_bytes(&self, width: usize) -> CryptoResult<Vec<u8>> {
        let mut bytes = self.0.to_bytes_le();
        if bytes.len() > width {
            return Err(CryptoError::ValueTooWide {
                needed: bytes.len(),
                width,
            });
        }
        bytes.resize(width, 0);
        Ok(bytes)
    }

    /// Decode a fixed-width little-endian value of exactly `width` bytes.
    pub fn from_wire_bytes(bytes: &[u8], width: usize) -> CryptoResult<Self> {
        if bytes.len() != width {
            return Err(CryptoError::WireWidthMismatch {
                expected: width,
                actual: bytes.len(),
            });
        }
        Ok(Self(BigUint::from_bytes_le(bytes)))
    }
}

impl From<u64> for StateValue {
    fn from(value: u64) -> Self {
        Self(BigUint::from(value))
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_bytes_be();
        if bytes.len() <= 8 {
            write!(f, "{}", hex::encode(&bytes))
        } else {
            // Long values show head..tail so logs stay readable.
            write!(
                f,
                "{}..{}",
                hex::encode(&bytes[..4]),
                hex::encode(&bytes[bytes.len() - 4..])
            )
        }
    }
}

impl fmt::Debug for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateValue({})", self)
    }
}

/// A prime element representing one coin in the accumulator.
///
/// Elements are produced by hash-to-prime and always lie below λ, so they fit
/// a machine word even though exponent arithmetic promotes them to big
/// integers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Element(u64);

impl Element {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn to_uint(&self) -> BigUint {
        BigUint::from(self.0)
    }

    /// 8-byte little-endian encoding.
    pub fn to_wire_bytes(&self) -> [u8; ELEMENT_WIDTH] {
        self.0.to_le_bytes()
    }

    pub fn from_wire_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; ELEMENT_WIDTH] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::WireWidthMismatch {
                    expected: ELEMENT_WIDTH,
                    actual: bytes.len(),
                })?;
        Ok(Self(u64::from_le_bytes(arr)))
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Element({})", self.0)
    }
}

/// The product of a set of prime elements, used as a batch exponent.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementProduct(BigUint);

impl ElementProduct {
    /// The empty product.
    pub fn identity() -> Self {
        Self(BigUint::one())
    }

    pub fn new(value: BigUint) -> Self {
        Self(value)
    }

    /// Multiply out a set of elements.
    pub fn of(elements: &[Element]) -> Self {
        let mut product = BigUint::one();
        for elem in elements {
            product *= elem.to_uint();
        }
        Self(product)
    }

    pub fn as_uint(&self) -> &BigUint {
        &self.0
    }

    pub fn is_identity(&self) -> bool {
        self.0.is_one()
    }

    pub fn push(&mut self, element: Element) {
        self.0 *= element.to_uint();
    }

    /// Divide out a sub-product, if it divides this one exactly.
    pub fn checked_div(&self, divisor: &ElementProduct) -> Option<ElementProduct> {
        // div_rem panics on a zero divisor.
        if divisor.0.is_zero() {
            return None;
        }
        let (quotient, remainder) = self.0.div_rem(&divisor.0);
        if remainder.is_zero() {
            Some(ElementProduct(quotient))
        } else {
            None
        }
    }
}

impl From<Element> for ElementProduct {
    fn from(element: Element) -> Self {
        Self(element.to_uint())
    }
}

impl From<u64> for ElementProduct {
    fn from(value: u64) -> Self {
        Self(BigUint::from(value))
    }
}

impl fmt::Display for ElementProduct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.bits() <= 64 {
            write!(f, "{}", self.0)
        } else {
            write!(f, "<product of {} bits>", self.0.bits())
        }
    }
}

impl fmt::Debug for ElementProduct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElementProduct({})", self)
    }
}
