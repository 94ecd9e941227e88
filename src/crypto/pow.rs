//! Proof-of-work hash algorithm registry
//!
//! The PoW function is selected by the block's major version so the network
//! can hard-fork to a new algorithm without touching the relay layer. The
//! registry maps a version byte to the hashing function; versions without
//! an entry are rejected at the protocol boundary, never a panic, since the
//! version byte arrives from untrusted peers.

use super::hash::{double_sha256, sha256, Hash};

/// A proof-of-work hashing function over a block hashing blob
pub type PowHashFn = fn(&[u8]) -> Hash;

/// Block major version using double SHA-256 proof of work
pub const BLOCK_MAJOR_VERSION_1: u8 = 1;

/// Block major version using single SHA-256 proof of work
pub const BLOCK_MAJOR_VERSION_2: u8 = 2;

/// Highest block major version this node understands
pub const CURRENT_BLOCK_MAJOR_VERSION: u8 = BLOCK_MAJOR_VERSION_2;

/// Look up the PoW hashing algorithm for a block major version
///
/// Returns `None` for versions this node does not know, which callers must
/// treat as a rejection of the block rather than an internal error.
pub fn pow_hash_for_version(major_version: u8) -> Option<PowHashFn> {
    match major_version {
        BLOCK_MAJOR_VERSION_1 => Some(double_sha256 as PowHashFn),
        BLOCK_MAJOR_VERSION_2 => Some(sha256 as PowHashFn),
        _ => None,
    }
}
