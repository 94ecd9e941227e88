//! Litenet daemon
//!
//! Thin CLI wrapper around the P2P node: loads the peer store, runs the
//! node until interrupted, saves the peer store on the way out. The chain,
//! validator and pool collaborators are in-memory stand-ins; a full node
//! wires its consensus engine and mempool in here instead.

use clap::Parser;
use litenet::core::{
    BlockValidator, CachedBlock, ChainState, CoreSyncData, FullBlock, SubmitResult, Transaction,
    TxPool, TxPoolObserver,
};
use litenet::crypto::Hash;
use litenet::network::{NetworkAddress, Node, NodeConfig};
use litenet::storage::PeerStore;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How often the peer store is flushed to disk
const PEER_STORE_SAVE_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[derive(Parser)]
#[command(name = "litenetd")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "Peer-to-peer relay node with lite-block propagation", long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value_t = 18080)]
    port: u16,

    /// Data directory for the peer store
    #[arg(short, long, default_value = ".litenet_data")]
    data_dir: PathBuf,

    /// Peers to connect to at startup (ip:port), repeatable
    #[arg(long = "add-peer")]
    add_peers: Vec<String>,

    /// Outbound connections to maintain
    #[arg(long, default_value_t = 8)]
    outbound: usize,

    /// Maximum inbound connections
    #[arg(long, default_value_t = 32)]
    inbound: usize,
}

/// Fixed-height chain stand-in for relay-only deployments
struct DevChainState;

impl ChainState for DevChainState {
    fn core_sync_data(&self) -> CoreSyncData {
        CoreSyncData {
            current_height: 0,
            top_block_hash: Hash::ZERO,
        }
    }

    fn difficulty_for_next_block(&self) -> u64 {
        1
    }
}

/// Accepts every reconstructed block and evicts its transactions from the
/// pool, the way a real chain would once they are mined
struct EvictingValidator {
    pool: Arc<InMemoryTxPool>,
}

impl BlockValidator for EvictingValidator {
    fn submit_block(&self, block: &CachedBlock, full: FullBlock) -> SubmitResult {
        log::info!(
            "Block {} reconstructed with {} transaction(s)",
            block.block_hash(),
            full.transactions.len()
        );
        for tx in &full.transactions {
            self.pool.remove_transaction(&tx.hash());
        }
        SubmitResult::Accepted
    }
}

/// Minimal in-memory transaction pool
#[derive(Default)]
struct InMemoryTxPool {
    txs: Mutex<HashMap<Hash, Transaction>>,
    observers: Mutex<Vec<Arc<dyn TxPoolObserver>>>,
}

impl InMemoryTxPool {
    fn register_observer(&self, observer: Arc<dyn TxPoolObserver>) {
        self.observers.lock().unwrap().push(observer);
    }

    fn remove_transaction(&self, hash: &Hash) {
        if self.txs.lock().unwrap().remove(hash).is_some() {
            for observer in self.observers.lock().unwrap().iter() {
                observer.tx_deleted_from_pool(hash);
            }
        }
    }
}

impl TxPool for InMemoryTxPool {
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

fn parse_peers(specs: &[String]) -> Vec<NetworkAddress> {
    specs
        .iter()
        .filter_map(|spec| match spec.parse::<SocketAddr>() {
            Ok(addr) => NetworkAddress::from_socket_addr(&addr),
            Err(e) => {
                log::warn!("Ignoring invalid peer address {}: {}", spec, e);
                None
            }
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();
    let cli = Cli::parse();

    let config = NodeConfig {
        port: cli.port,
        desired_outbound: cli.outbound,
        max_inbound: cli.inbound,
        bootstrap_peers: parse_peers(&cli.add_peers),
        ..Default::default()
    };

    let store = Arc::new(PeerStore::open(&cli.data_dir)?);
    let peerlist = store.load(config.white_capacity, config.gray_capacity)?;

    let pool = Arc::new(InMemoryTxPool::default());
    let validator = Arc::new(EvictingValidator { pool: pool.clone() });
    let node = Node::new(
        config,
        Arc::new(DevChainState),
        validator,
        pool.clone(),
        peerlist,
    );
    pool.register_observer(node.tx_pool_observer());

    let stopper = node.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupt received, stopping node");
            stopper.stop();
        }
    });

    // Periodic peer-store flush; the final save happens after run() returns
    let saver_node = node.clone();
    let saver_store = store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PEER_STORE_SAVE_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            let (white, gray) = saver_node.peerlist_snapshot().await;
            if let Err(e) = saver_store.save(&white, &gray) {
                log::warn!("Failed to save peer store: {}", e);
            }
        }
    });

    node.run().await?;

    let (white, gray) = node.peerlist_snapshot().await;
    store.save(&white, &gray)?;
    log::info!("Saved {} white / {} gray peers", white.len(), gray.len());

    Ok(())
}
