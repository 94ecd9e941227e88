//! Litenet: the P2P networking core of a cryptocurrency full node
//!
//! This crate provides the relay layer of a full node:
//! - Peer discovery with white/gray reputation lists and LRU eviction
//! - Handshake and periodic peer-exchange protocol over framed TCP
//! - Lite-block propagation: block announcements carry only the header and
//!   transaction hashes, missing bodies are fetched in one round trip
//! - Cached block hashing and an exact 256-bit difficulty check gating
//!   every announced block
//!
//! Consensus, transaction validation and storage stay behind the
//! collaborator traits in [`core::traits`]; the node only moves and gates
//! data.
//!
//! # Example
//!
//! ```rust
//! use litenet::core::{check_hash, BlockHeader, BlockTemplate, CachedBlock, Transaction};
//! use litenet::crypto::sha256;
//!
//! let template = BlockTemplate {
//!     header: BlockHeader {
//!         major_version: 1,
//!         minor_version: 0,
//!         timestamp: 1_700_000_000,
//!         previous_hash: sha256(b"genesis"),
//!         nonce: 0,
//!     },
//!     base_transaction: Transaction::base(1, 50, sha256(b"miner")),
//!     transaction_hashes: vec![],
//! };
//!
//! // Hashes are computed once and memoized
//! let cached = CachedBlock::new(template);
//! let pow_hash = cached.block_long_hash().unwrap();
//! assert_eq!(cached.block_hash(), cached.block_hash());
//!
//! // Difficulty 1 accepts any hash
//! assert!(check_hash(&pow_hash, 1));
//! ```

pub mod core;
pub mod crypto;
pub mod network;
pub mod storage;

// Re-export commonly used types
pub use crate::core::{
    check_hash, BlockError, BlockHeader, BlockTemplate, BlockValidator, CachedBlock, ChainState,
    CoreSyncData, FullBlock, SubmitResult, Transaction, TxInput, TxOutput, TxPool, TxPoolObserver,
};
pub use crypto::{sha256, Hash};
pub use network::{
    LiteBlock, Message, NetworkAddress, Node, NodeConfig, PeerlistEntry, PeerlistManager,
};
pub use storage::PeerStore;
