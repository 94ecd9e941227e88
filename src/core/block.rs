//! Block and transaction data model
//!
//! A `BlockTemplate` is the form a block travels in on the relay layer:
//! header, base (coinbase) transaction and the ordered list of transaction
//! hashes. Transaction bodies are carried separately so a lite-block
//! announcement can omit them entirely.

use crate::crypto::{double_sha256, Hash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Limits
// =============================================================================

/// Maximum number of transaction hashes a block may reference
pub const MAX_BLOCK_TXS: usize = 10_000;

/// Maximum serialized transaction size in bytes
pub const MAX_TX_SIZE: usize = 1_000_000;

// =============================================================================
// Errors
// =============================================================================

/// Block-level errors reachable from peer input
#[derive(Error, Debug)]
pub enum BlockError {
    #[error("Unknown block major version: {0}")]
    UnknownBlockVersion(u8),
    #[error("Too many transactions: {0} (max: {1})")]
    TooManyTransactions(usize, usize),
    #[error("Transaction count mismatch: header lists {0}, body carries {1}")]
    TransactionCountMismatch(usize, usize),
}

// =============================================================================
// Transactions
// =============================================================================

/// A transaction input
///
/// The base transaction of a block spends nothing and instead names the
/// block index it was created for; every other input spends an output by
/// key image. Matching is exhaustive, there is no runtime type tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxInput {
    /// Coinbase input of a block's base transaction
    Coinbase { block_index: u32 },
    /// Regular input spending a previous output
    Key { amount: u64, key_image: Hash },
}

/// A transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub amount: u64,
    pub target_key: Hash,
}

/// A transaction as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u8,
    pub unlock_time: u64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub extra: Vec<u8>,
}

impl Transaction {
    /// Build the base (coinbase) transaction for a block index
    pub fn base(block_index: u32, reward: u64, target_key: Hash) -> Self {
        Self {
            version: 1,
            unlock_time: 0,
            inputs: vec![TxInput::Coinbase { block_index }],
            outputs: vec![TxOutput {
                amount: reward,
                target_key,
            }],
            extra: Vec::new(),
        }
    }

    /// Transaction identity hash: hash of the serialized body
    pub fn hash(&self) -> Hash {
        // A Transaction is a plain owned value; serializing one cannot fail.
        let bytes = bincode::serialize(self).expect("transaction serialization is infallible");
        double_sha256(&bytes)
    }

    /// Serialized size in bytes
    pub fn binary_size(&self) -> usize {
        bincode::serialized_size(self).map(|n| n as usize).unwrap_or(0)
    }
}

// =============================================================================
// Blocks
// =============================================================================

/// The header fields that are hashed for block identity and proof of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Major version, selects the proof-of-work algorithm
    pub major_version: u8,
    /// Minor version, advisory
    pub minor_version: u8,
    /// Unix timestamp the block was created at
    pub timestamp: u64,
    /// Identity hash of the previous block
    pub previous_hash: Hash,
    /// Proof-of-work nonce
    pub nonce: u32,
}

/// A block without transaction bodies
///
/// This is the shape blocks are announced in: the header, the base
/// transaction, and the ordered hashes of every other transaction. The hash
/// order is normative; reconstructing the full block must preserve it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTemplate {
    pub header: BlockHeader,
    pub base_transaction: Transaction,
    pub transaction_hashes: Vec<Hash>,
}

impl BlockTemplate {
    /// Total number of transactions including the base transaction
    pub fn transaction_count(&self) -> usize {
        self.transaction_hashes.len() + 1
    }
}

/// A fully reconstructed block: template plus transaction bodies in the
/// order the template's hash list prescribes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullBlock {
    pub template: BlockTemplate,
    pub transactions: Vec<Transaction>,
}

impl FullBlock {
    /// Pair a template with its ordered transaction bodies
    pub fn new(template: BlockTemplate, transactions: Vec<Transaction>) -> Result<Self, BlockError> {
        if transactions.len() != template.transaction_hashes.len() {
            return Err(BlockError::TransactionCountMismatch(
                template.transaction_hashes.len(),
                transactions.len(),
            ));
        }
        Ok(Self {
            template,
            transactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256;

    fn sample_tx(tag: &[u8]) -> Transaction {
        Transaction {
            version: 1,
            unlock_time: 0,
            inputs: vec![TxInput::Key {
                amount: 10,
                key_image: sha256(tag),
            }],
            outputs: vec![TxOutput {
                amount: 9,
                target_key: sha256(b"out"),
            }],
            extra: Vec::new(),
        }
    }

    #[test]
    fn test_tx_hash_deterministic() {
        let tx = sample_tx(b"a");
        assert_eq!(tx.hash(), tx.hash());
        assert_ne!(tx.hash(), sample_tx(b"b").hash());
    }

    #[test]
    fn test_base_transaction_shape() {
        let tx = Transaction::base(7, 50, sha256(b"miner"));
        assert_eq!(tx.inputs.len(), 1);
        assert!(matches!(tx.inputs[0], TxInput::Coinbase { block_index: 7 }));
    }

    #[test]
    fn test_full_block_count_mismatch() {
        let template = BlockTemplate {
            header: BlockHeader {
                major_version: 1,
                minor_version: 0,
                timestamp: 0,
                previous_hash: Hash::ZERO,
                nonce: 0,
            },
            base_transaction: Transaction::base(0, 50, sha256(b"m")),
            transaction_hashes: vec![sha256(b"t1")],
        };

        assert!(FullBlock::new(template.clone(), vec![]).is_err());
        assert!(FullBlock::new(template, vec![sample_tx(b"t1")]).is_ok());
    }
}
