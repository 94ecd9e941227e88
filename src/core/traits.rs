//! Collaborator interfaces consumed by the relay layer
//!
//! The networking core does not validate transactions or store the chain;
//! it talks to those subsystems through the narrow capabilities below. Each
//! consumer receives exactly the trait it needs via constructor injection,
//! there is no node-wide god interface.

use crate::core::block::{FullBlock, Transaction};
use crate::core::cached_block::CachedBlock;
use crate::crypto::Hash;
use serde::{Deserialize, Serialize};

/// Outcome of handing a reconstructed block to the validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitResult {
    Accepted,
    Rejected { reason: String },
}

/// Chain-side block acceptance
pub trait BlockValidator: Send + Sync {
    /// Submit a fully reconstructed block together with its cached hashes
    fn submit_block(&self, block: &CachedBlock, full: FullBlock) -> SubmitResult;
}

/// Read access to the local transaction pool
pub trait TxPool: Send + Sync {
    /// Whether the pool (or chain) already holds this transaction
    fn has_transaction(&self, hash: &Hash) -> bool;

    /// Fetch a transaction body by hash
    fn get_transaction(&self, hash: &Hash) -> Option<Transaction>;

    /// Offer a relayed transaction to the pool; returns true if it was new
    fn add_transaction(&self, tx: Transaction) -> bool;
}

/// Notifications the pool pushes back to its subscribers
///
/// The node registers one of these so mempool-dependent state (the relay
/// filter) stays consistent when the pool drops transactions.
pub trait TxPoolObserver: Send + Sync {
    fn tx_deleted_from_pool(&self, hash: &Hash);
}

/// Chain state snapshot provider
pub trait ChainState: Send + Sync {
    /// Synchronization summary advertised in handshakes and timed syncs
    fn core_sync_data(&self) -> CoreSyncData;

    /// Difficulty target the next block must satisfy
    fn difficulty_for_next_block(&self) -> u64;
}

/// A node's synchronization summary
///
/// Recomputed from [`ChainState`] every time it is sent; never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreSyncData {
    pub current_height: u64,
    pub top_block_hash: Hash,
}
