//! Lazily hashed view of a block template
//!
//! Every hash derived from a block (transaction tree root, identity hash,
//! proof-of-work hash) is needed several times while a block moves through
//! the relay pipeline. `CachedBlock` computes each of them at most once and
//! keeps the result for its lifetime; the wrapped template is immutable, so
//! there is no invalidation path.

use crate::core::block::{BlockError, BlockTemplate, TxInput};
use crate::crypto::{double_sha256, pow_hash_for_version, tree_hash, Hash};
use once_cell::unsync::OnceCell;

/// Hash function applied to serialized objects and hashing blobs
pub type ObjectHashFn = fn(&[u8]) -> Hash;

/// A block template with memoized derived hashes
pub struct CachedBlock {
    block: BlockTemplate,
    object_hash: ObjectHashFn,
    transaction_tree_hash: OnceCell<Hash>,
    hashing_blob: OnceCell<Vec<u8>>,
    block_hash: OnceCell<Hash>,
    block_long_hash: OnceCell<Hash>,
    block_index: OnceCell<u32>,
}

impl CachedBlock {
    /// Wrap a block template
    pub fn new(block: BlockTemplate) -> Self {
        Self::with_object_hash(block, double_sha256)
    }

    /// Wrap a block template with a custom object-hash function
    ///
    /// The relay layer always uses the default; tests inject a counting
    /// hasher to observe memoization.
    pub fn with_object_hash(block: BlockTemplate, object_hash: ObjectHashFn) -> Self {
        Self {
            block,
            object_hash,
            transaction_tree_hash: OnceCell::new(),
            hashing_blob: OnceCell::new(),
            block_hash: OnceCell::new(),
            block_long_hash: OnceCell::new(),
            block_index: OnceCell::new(),
        }
    }

    /// The wrapped template
    pub fn block(&self) -> &BlockTemplate {
        &self.block
    }

    /// Merkle root over the base transaction hash followed by the announced
    /// transaction hashes, in order
    pub fn transaction_tree_hash(&self) -> Hash {
        *self.transaction_tree_hash.get_or_init(|| {
            let mut hashes = Vec::with_capacity(self.block.transaction_hashes.len() + 1);
            let base_bytes = bincode::serialize(&self.block.base_transaction)
                .expect("base transaction serialization is infallible");
            hashes.push((self.object_hash)(&base_bytes));
            hashes.extend_from_slice(&self.block.transaction_hashes);
            tree_hash(&hashes)
        })
    }

    /// The byte array the block's identity and PoW hashes are computed over:
    /// serialized header, transaction tree root, varint transaction count
    pub fn hashing_blob(&self) -> &[u8] {
        self.hashing_blob.get_or_init(|| {
            // The header is locally held and well formed by construction;
            // a serialization failure here is a broken invariant, not input.
            let mut blob = bincode::serialize(&self.block.header)
                .expect("block header serialization is infallible");
            blob.extend_from_slice(self.transaction_tree_hash().as_bytes());
            write_varint(self.block.transaction_hashes.len() as u64 + 1, &mut blob);
            blob
        })
    }

    /// Block identity hash
    pub fn block_hash(&self) -> Hash {
        *self
            .block_hash
            .get_or_init(|| (self.object_hash)(self.hashing_blob()))
    }

    /// Proof-of-work hash, algorithm selected by the block's major version
    ///
    /// Fails with `UnknownBlockVersion` for version bytes this node does not
    /// know; the version arrives from untrusted peers, so this is a
    /// recoverable rejection.
    pub fn block_long_hash(&self) -> Result<Hash, BlockError> {
        self.block_long_hash
            .get_or_try_init(|| {
                let version = self.block.header.major_version;
                let pow = pow_hash_for_version(version)
                    .ok_or(BlockError::UnknownBlockVersion(version))?;
                Ok(pow(self.hashing_blob()))
            })
            .copied()
    }

    /// The block index named by the base transaction's coinbase input,
    /// or 0 when the base transaction is not a well-formed coinbase
    pub fn block_index(&self) -> u32 {
        *self.block_index.get_or_init(|| {
            match self.block.base_transaction.inputs.as_slice() {
                [TxInput::Coinbase { block_index }] => *block_index,
                _ => 0,
            }
        })
    }
}

/// Append the LEB128 varint encoding of `value`
fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}
