//! Proof-of-work difficulty check
//!
//! Decides whether a 256-bit PoW hash satisfies a 64-bit difficulty using
//! exact integer arithmetic: the hash, read as a little-endian 256-bit
//! integer, is accepted iff `hash * difficulty` still fits in 256 bits.
//! Floating point would lose precision on consensus-critical boundaries, so
//! the product is evaluated limb by limb with explicit carries.

use crate::crypto::Hash;

/// 64x64 -> 128 bit multiply, split into (low, high) words
#[inline]
fn mul(a: u64, b: u64) -> (u64, u64) {
    let product = (a as u128) * (b as u128);
    (product as u64, (product >> 64) as u64)
}

/// Carry out of `a + b`
#[inline]
fn cadd(a: u64, b: u64) -> bool {
    a.wrapping_add(b) < a
}

/// Carry out of `a + b + c` where `c` is an incoming carry bit
#[inline]
fn cadc(a: u64, b: u64, c: bool) -> bool {
    let sum = a.wrapping_add(b);
    sum < a || (c && sum == u64::MAX)
}

/// Check whether `hash` satisfies `difficulty`
///
/// The hash is four little-endian 64-bit limbs, least significant first.
/// The most significant limb is multiplied first: for a random hash its
/// product overflows almost always, so the common case returns without
/// touching the remaining limbs.
pub fn check_hash(hash: &Hash, difficulty: u64) -> bool {
    let limbs = hash.as_u64_limbs();

    let (top, high) = mul(limbs[3], difficulty);
    if high != 0 {
        return false;
    }

    let (_, mut cur) = mul(limbs[0], difficulty);
    let (low, high) = mul(limbs[1], difficulty);
    let mut carry = cadd(cur, low);
    cur = high;

    let (low, high) = mul(limbs[2], difficulty);
    carry = cadc(cur, low, carry);
    carry = cadc(high, top, carry);

    !carry
}
