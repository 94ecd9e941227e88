//! Cryptographic utilities for the node
//!
//! This module provides:
//! - SHA-256 hashing and the 32-byte `Hash` type
//! - Merkle tree root calculation
//! - Proof-of-work algorithm selection by block version

pub mod hash;
pub mod merkle;
pub mod pow;

pub use hash::{double_sha256, sha256, Hash, HASH_SIZE};
pub use merkle::tree_hash;
pub use pow::{
    pow_hash_for_version, PowHashFn, BLOCK_MAJOR_VERSION_1, BLOCK_MAJOR_VERSION_2,
    CURRENT_BLOCK_MAJOR_VERSION,
};
