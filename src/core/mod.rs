//! Core block data model and validation gates
//!
//! This module provides:
//! - Block and transaction types as they travel on the relay layer
//! - The memoizing block hasher
//! - The exact 256-bit proof-of-work difficulty check
//! - Collaborator traits for the chain, validator and transaction pool

pub mod block;
pub mod cached_block;
pub mod difficulty;
pub mod traits;

pub use block::{
    BlockError, BlockHeader, BlockTemplate, FullBlock, Transaction, TxInput, TxOutput,
    MAX_BLOCK_TXS, MAX_TX_SIZE,
};
pub use cached_block::{CachedBlock, ObjectHashFn};
pub use difficulty::check_hash;
pub use traits::{BlockValidator, ChainState, CoreSyncData, SubmitResult, TxPool, TxPoolObserver};
