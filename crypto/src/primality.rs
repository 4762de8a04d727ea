//! Deterministic primality testing for word-sized candidates
//!
//! Hash-to-prime only ever produces candidates below λ < 2^63, so a
//! Miller-Rabin pass over a fixed witness base decides primality exactly —
//! the twelve smallest primes are a proven-deterministic base set for all
//! 64-bit integers.

const WITNESS_BASES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

fn mul_mod(a: u64, b: u64, modulus: u64) -> u64 {
    ((a as u128 * b as u128) % modulus as u128) as u64
}

fn pow_mod(mut base: u64, mut exp: u64, modulus: u64) -> u64 {
    let mut result = 1u64;
    base %= modulus;
    while exp > 0 {
        if exp & 1 == 1 {
            result = mul_mod(result, base, modulus);
        }
        base = mul_mod(base, base, modulus);
        exp >>= 1;
    }
    result
}

/// Deterministic Miller-Rabin for any `u64`.
pub fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    for &p in &WITNESS_BASES {
        if n % p == 0 {
            return n == p;
        }
    }

    // n - 1 = 2^r * d with d odd
    let r = (n - 1).trailing_zeros();
    let d = (n - 1) >> r;

    'witness: for &a in &WITNESS_BASES {
        let mut x = pow_mod(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..r {
            x = mul_mod(x, x, n);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}
