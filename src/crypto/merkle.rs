//! Merkle tree hash for block transaction lists
//!
//! A block commits to its transactions through a binary hash tree over the
//! ordered list of transaction hashes. Only the root is needed here; proof
//! generation lives with the SPV side of the network, which this node does
//! not implement.

use super::hash::{sha256, Hash, HASH_SIZE};

/// Calculate the merkle tree root of an ordered list of hashes
///
/// Pairs are combined left-to-right; an odd trailing hash is paired with
/// itself. An empty list hashes to the hash of no data, which can never
/// collide with a real transaction list.
pub fn tree_hash(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return sha256(b"");
    }

    if hashes.len() == 1 {
        return hashes[0];
    }

    let mut current_level: Vec<Hash> = hashes.to_vec();

    while current_level.len() > 1 {
        let mut next_level = Vec::with_capacity((current_level.len() + 1) / 2);

        for chunk in current_level.chunks(2) {
            let mut data = [0u8; HASH_SIZE * 2];
            data[..HASH_SIZE].copy_from_slice(chunk[0].as_bytes());
            if chunk.len() == 2 {
                data[HASH_SIZE..].copy_from_slice(chunk[1].as_bytes());
            } else {
                data[HASH_SIZE..].copy_from_slice(chunk[0].as_bytes());
            }
            next_level.push(sha256(&data));
        }

        current_level = next_level;
    }

    current_level[0]
}
