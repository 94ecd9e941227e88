//! Lite-block reconstruction state
//!
//! A lite-block announcement names its transactions by hash only. Whatever
//! the local pool cannot supply is requested back from the announcing peer;
//! this module tracks those in-flight reconstructions and reassembles the
//! full block in exactly the announced order once every body is on hand.

use crate::core::block::{FullBlock, Transaction};
use crate::core::traits::TxPool;
use crate::crypto::Hash;
use crate::network::message::LiteBlock;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

/// An in-progress lite-block reconstruction
#[derive(Debug, Clone)]
pub struct PendingLiteBlock {
    /// The announcement as received
    pub announce: LiteBlock,
    /// Transaction hashes still outstanding
    pub missed_transactions: HashSet<Hash>,
    /// Bodies supplied by the peer so far, keyed by hash
    pub received: HashMap<Hash, Transaction>,
}

/// Outcome of feeding a missing-transactions response into the table
#[derive(Debug)]
pub enum FillOutcome {
    /// Every missing body arrived; the reconstruction is ready to assemble
    Complete(PendingLiteBlock),
    /// The peer answered but left some requested transactions out
    Incomplete,
    /// The response contained a transaction that was never requested
    Unrequested,
    /// No reconstruction is pending for this (peer, block) pair
    Unknown,
}

/// Pending reconstructions, at most one per (peer, block hash) pair
#[derive(Default)]
pub struct LiteBlockTable {
    pending: HashMap<(SocketAddr, Hash), PendingLiteBlock>,
}

impl LiteBlockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Track a new reconstruction; a re-announcement of the same block by
    /// the same peer restarts it
    pub fn insert(
        &mut self,
        peer: SocketAddr,
        block_hash: Hash,
        announce: LiteBlock,
        missed_transactions: HashSet<Hash>,
    ) {
        self.pending.insert(
            (peer, block_hash),
            PendingLiteBlock {
                announce,
                missed_transactions,
                received: HashMap::new(),
            },
        );
    }

    /// Feed a peer's missing-transactions response into its pending entry
    ///
    /// Bodies are matched to the request by hashing them; anything the
    /// request did not name is a protocol violation. Whatever the outcome,
    /// a finished or failed entry leaves the table.
    pub fn fill(
        &mut self,
        peer: SocketAddr,
        block_hash: Hash,
        transactions: Vec<Transaction>,
    ) -> FillOutcome {
        // The response is one-shot: whatever the outcome, the entry is done
        let Some(mut entry) = self.pending.remove(&(peer, block_hash)) else {
            return FillOutcome::Unknown;
        };

        for tx in transactions {
            let hash = tx.hash();
            if !entry.missed_transactions.remove(&hash) {
                return FillOutcome::Unrequested;
            }
            entry.received.insert(hash, tx);
        }

        if entry.missed_transactions.is_empty() {
            FillOutcome::Complete(entry)
        } else {
            FillOutcome::Incomplete
        }
    }

    /// Drop every reconstruction pending from a disconnected peer
    pub fn remove_peer(&mut self, peer: &SocketAddr) -> usize {
        let before = self.pending.len();
        self.pending.retain(|(p, _), _| p != peer);
        before - self.pending.len()
    }
}

/// Transaction hashes of an announcement the local pool cannot supply,
/// in announced order
pub fn missing_transactions(announce: &LiteBlock, pool: &dyn TxPool) -> Vec<Hash> {
    announce
        .block
        .transaction_hashes
        .iter()
        .filter(|h| !pool.has_transaction(h))
        .copied()
        .collect()
}

/// Reassemble the full block in the exact announced transaction order
///
/// Bodies come from the reconstruction's received map first, the pool
/// otherwise. Returns `None` if any body is unavailable, which means the
/// pool dropped a transaction mid-reconstruction.
pub fn assemble_block(
    announce: &LiteBlock,
    received: &HashMap<Hash, Transaction>,
    pool: &dyn TxPool,
) -> Option<FullBlock> {
    let template = &announce.block;
    let mut transactions = Vec::with_capacity(template.transaction_hashes.len());

    for hash in &template.transaction_hashes {
        let tx = match received.get(hash) {
            Some(tx) => tx.clone(),
            None => pool.get_transaction(hash)?,
        };
        transactions.push(tx);
    }

    FullBlock::new(template.clone(), transactions).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::{BlockHeader, BlockTemplate, TxInput, TxOutput};
    use crate::crypto::sha256;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;

    struct FakePool {
        txs: Mutex<HashMap<Hash, Transaction>>,
    }

    impl FakePool {
        fn with(txs: Vec<Transaction>) -> Self {
            Self {
                txs: Mutex::new(txs.into_iter().map(|tx| (tx.hash(), tx)).collect()),
            }
        }
    }

    impl TxPool for FakePool {
        fn has_transaction(&self, hash: &Hash) -> bool {
            self.txs.lock().unwrap().contains_key(hash)
        }

        fn get_transaction(&self, hash: &Hash) -> Option<Transaction> {
            self.txs.lock().unwrap().get(hash).cloned()
        }

        fn add_transaction(&self, tx: Transaction) -> bool {
            self.txs.lock().unwrap().insert(tx.hash(), tx).is_none()
        }
    }

    fn tx(tag: u8) -> Transaction {
        Transaction {
            version: 1,
            unlock_time: 0,
            inputs: vec![TxInput::Key {
                amount: tag as u64,
                key_image: sha256(&[tag]),
            }],
            outputs: vec![TxOutput {
                amount: 1,
                target_key: sha256(b"out"),
            }],
            extra: Vec::new(),
        }
    }

    fn announce_for(txs: &[&Transaction]) -> LiteBlock {
        LiteBlock {
            block: BlockTemplate {
                header: BlockHeader {
                    major_version: 1,
                    minor_version: 0,
                    timestamp: 0,
                    previous_hash: Hash::ZERO,
                    nonce: 0,
                },
                base_transaction: Transaction::base(1, 50, sha256(b"miner")),
                transaction_hashes: txs.iter().map(|t| t.hash()).collect(),
            },
            current_height: 1,
        }
    }

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)), 18080)
    }

    #[test]
    fn test_requests_exactly_the_missing_hashes() {
        let (t1, t2, t3) = (tx(1), tx(2), tx(3));
        let pool = FakePool::with(vec![t1.clone(), t3.clone()]);
        let announce = announce_for(&[&t1, &t2, &t3]);

        let missing = missing_transactions(&announce, &pool);
        assert_eq!(missing, vec![t2.hash()]);
    }

    #[test]
    fn test_reconstruction_preserves_announced_order() {
        let (t1, t2, t3) = (tx(1), tx(2), tx(3));
        let pool = FakePool::with(vec![t2.clone()]);
        let announce = announce_for(&[&t1, &t2, &t3]);

        let mut table = LiteBlockTable::new();
        let missing: HashSet<Hash> = missing_transactions(&announce, &pool).into_iter().collect();
        assert_eq!(missing.len(), 2);
        table.insert(peer(), sha256(b"bh"), announce.clone(), missing);

        // Bodies arrive in reverse of the announced order
        let outcome = table.fill(peer(), sha256(b"bh"), vec![t3.clone(), t1.clone()]);
        let FillOutcome::Complete(entry) = outcome else {
            panic!("expected completion");
        };

        let block = assemble_block(&announce, &entry.received, &pool).unwrap();
        let order: Vec<Hash> = block.transactions.iter().map(|t| t.hash()).collect();
        assert_eq!(order, vec![t1.hash(), t2.hash(), t3.hash()]);
    }

    #[test]
    fn test_partial_response_is_incomplete() {
        let (t1, t2) = (tx(1), tx(2));
        let announce = announce_for(&[&t1, &t2]);

        let mut table = LiteBlockTable::new();
        table.insert(
            peer(),
            sha256(b"bh"),
            announce,
            [t1.hash(), t2.hash()].into_iter().collect(),
        );

        assert!(matches!(
            table.fill(peer(), sha256(b"bh"), vec![t1]),
            FillOutcome::Incomplete
        ));
        // A failed reconstruction does not linger
        assert!(table.is_empty());
    }

    #[test]
    fn test_unrequested_transaction_is_flagged() {
        let (t1, t2) = (tx(1), tx(2));
        let announce = announce_for(&[&t1]);

        let mut table = LiteBlockTable::new();
        table.insert(
            peer(),
            sha256(b"bh"),
            announce,
            [t1.hash()].into_iter().collect(),
        );

        assert!(matches!(
            table.fill(peer(), sha256(b"bh"), vec![t2]),
            FillOutcome::Unrequested
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn test_unsolicited_response_is_unknown() {
        let mut table = LiteBlockTable::new();
        assert!(matches!(
            table.fill(peer(), sha256(b"bh"), vec![tx(1)]),
            FillOutcome::Unknown
        ));
    }

    #[test]
    fn test_disconnect_drops_peer_entries() {
        let t1 = tx(1);
        let announce = announce_for(&[&t1]);

        let mut table = LiteBlockTable::new();
        table.insert(
            peer(),
            sha256(b"a"),
            announce.clone(),
            [t1.hash()].into_iter().collect(),
        );
        table.insert(
            peer(),
            sha256(b"b"),
            announce,
            [t1.hash()].into_iter().collect(),
        );

        assert_eq!(table.remove_peer(&peer()), 2);
        assert!(table.is_empty());
    }
}
