//! P2P node orchestration
//!
//! The node owns the accept loop, the outbound connector, the periodic
//! timed-sync loop and the single dispatch loop every connection feeds
//! into. Peer-list state, the pending lite-block table and all protocol
//! decisions live behind that dispatch loop, so protocol handling is
//! serialized even though I/O is not.

use crate::core::block::{FullBlock, Transaction, MAX_BLOCK_TXS, MAX_TX_SIZE};
use crate::core::cached_block::CachedBlock;
use crate::core::difficulty::check_hash;
use crate::core::traits::{
    BlockValidator, ChainState, CoreSyncData, SubmitResult, TxPool, TxPoolObserver,
};
use crate::crypto::Hash;
use crate::network::lite_block::{
    assemble_block, missing_transactions, FillOutcome, LiteBlockTable,
};
use crate::network::message::{
    BasicNodeData, LiteBlock, Message, MissingTxsRequest, MissingTxsResponse, NetworkAddress,
    NodeFlags, PeerlistEntry, MAINNET_NETWORK_ID, MAX_PEERS_IN_HANDSHAKE, MIN_PROTOCOL_VERSION,
    PROTOCOL_VERSION,
};
use crate::network::peer::{
    ConnectionState, PeerError, PeerInfo, PeerManager, DESIRED_OUTBOUND, MAX_INBOUND,
};
use crate::network::peerlist::{
    unix_now, PeerlistManager, GRAY_LIST_CAPACITY, WHITE_LIST_CAPACITY,
};
use crate::network::server::{connect_to_peer, run_connection, Listener, NetEvent};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinSet;

/// Depth of the dispatch event queue
const EVENT_QUEUE_DEPTH: usize = 1000;

/// Node errors surfaced from `run`
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Node already running")]
    AlreadyRunning,
}

/// P2P node configuration
#[derive(Clone)]
pub struct NodeConfig {
    /// Port to listen on
    pub port: u16,
    /// Network this node belongs to
    pub network_id: [u8; 16],
    /// Outbound connection count the connector maintains
    pub desired_outbound: usize,
    /// Maximum inbound connections
    pub max_inbound: usize,
    /// Connector retry interval
    pub connect_interval: Duration,
    /// Timed-sync and keepalive interval
    pub timed_sync_interval: Duration,
    /// How long a handshake may stay incomplete
    pub handshake_timeout: Duration,
    /// Disconnect an established peer after this long without a message
    pub idle_timeout: Duration,
    /// White peer-list capacity
    pub white_capacity: usize,
    /// Gray peer-list capacity
    pub gray_capacity: usize,
    /// Initial peers to connect to
    pub bootstrap_peers: Vec<NetworkAddress>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: 18080,
            network_id: MAINNET_NETWORK_ID,
            desired_outbound: DESIRED_OUTBOUND,
            max_inbound: MAX_INBOUND,
            connect_interval: Duration::from_secs(10),
            timed_sync_interval: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(300),
            white_capacity: WHITE_LIST_CAPACITY,
            gray_capacity: GRAY_LIST_CAPACITY,
            bootstrap_peers: Vec::new(),
        }
    }
}

/// Recently relayed transaction hashes
///
/// Keeps the node from re-relaying a transaction every peer announces back
/// to us. Registered with the pool as an observer so hashes the pool drops
/// become relayable again.
pub struct RelayFilter {
    seen: StdMutex<HashSet<Hash>>,
}

impl RelayFilter {
    fn new() -> Self {
        Self {
            seen: StdMutex::new(HashSet::new()),
        }
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.seen.lock().unwrap().contains(hash)
    }

    pub fn insert(&self, hash: Hash) {
        self.seen.lock().unwrap().insert(hash);
    }
}

impl TxPoolObserver for RelayFilter {
    fn tx_deleted_from_pool(&self, hash: &Hash) {
        self.seen.lock().unwrap().remove(hash);
    }
}

/// The P2P node
pub struct Node {
    config: NodeConfig,
    peer_id: u64,
    peerlist: RwLock<PeerlistManager>,
    peer_manager: Arc<PeerManager>,
    chain: Arc<dyn ChainState>,
    validator: Arc<dyn BlockValidator>,
    tx_pool: Arc<dyn TxPool>,
    relay_filter: Arc<RelayFilter>,
    events_tx: mpsc::Sender<NetEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<NetEvent>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: StdMutex<JoinSet<()>>,
}

impl Node {
    /// Create a new node around its collaborators and a peer list
    /// (typically restored from the peer store at startup)
    pub fn new(
        config: NodeConfig,
        chain: Arc<dyn ChainState>,
        validator: Arc<dyn BlockValidator>,
        tx_pool: Arc<dyn TxPool>,
        peerlist: PeerlistManager,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (shutdown_tx, _) = watch::channel(false);
        let max_inbound = config.max_inbound;
        let desired_outbound = config.desired_outbound;

        Arc::new(Self {
            config,
            peer_id: rand::random(),
            peerlist: RwLock::new(peerlist),
            peer_manager: Arc::new(PeerManager::new(max_inbound, desired_outbound)),
            chain,
            validator,
            tx_pool,
            relay_filter: Arc::new(RelayFilter::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            shutdown_tx,
            tasks: StdMutex::new(JoinSet::new()),
        })
    }

    /// This node's peer id
    pub fn peer_id(&self) -> u64 {
        self.peer_id
    }

    /// The connection manager, for status inspection
    pub fn peer_manager(&self) -> Arc<PeerManager> {
        self.peer_manager.clone()
    }

    /// Observer handle to register with the transaction pool
    pub fn tx_pool_observer(&self) -> Arc<dyn TxPoolObserver> {
        self.relay_filter.clone()
    }

    /// Snapshot the peer lists for persistence
    pub async fn peerlist_snapshot(&self) -> (Vec<PeerlistEntry>, Vec<PeerlistEntry>) {
        self.peerlist.read().await.snapshot()
    }

    /// Signal every task to unwind; `run` returns once they have
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Run the node until stopped
    ///
    /// Spawns the accept, connector and timed-sync loops, then serves as
    /// the dispatch loop. Returns after every spawned task has finished
    /// unwinding, so the caller can persist the peer list immediately.
    pub async fn run(self: &Arc<Self>) -> Result<(), NodeError> {
        let mut events_rx = self
            .events_rx
            .lock()
            .await
            .take()
            .ok_or(NodeError::AlreadyRunning)?;

        if *self.shutdown_tx.borrow() {
            return Ok(());
        }

        let listener = Listener::bind(self.config.port).await?;
        let mut shutdown = self.shutdown_tx.subscribe();

        let node = self.clone();
        self.spawn_task(async move { node.accept_loop(listener).await });
        let node = self.clone();
        self.spawn_task(async move { node.connector_loop().await });
        let node = self.clone();
        self.spawn_task(async move { node.timed_sync_loop().await });

        for address in self.config.bootstrap_peers.clone() {
            self.spawn_connect(address);
        }

        log::info!(
            "Node {:016x} started on port {}",
            self.peer_id,
            self.config.port
        );

        let mut pending = LiteBlockTable::new();
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        log::info!("Node shutting down...");
                        break;
                    }
                }
                event = events_rx.recv() => {
                    match event {
                        Some(NetEvent::Message { from, message }) => {
                            self.handle_message(from, message, &mut pending).await;
                        }
                        Some(NetEvent::Disconnected { from }) => {
                            self.handle_disconnect(from, &mut pending).await;
                        }
                        None => break,
                    }
                }
            }
        }

        // Shutdown barrier: every task observes the signal, releases its
        // socket and exits before run() returns
        let _ = self.shutdown_tx.send(true);
        let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    if joined.is_none() {
                        break;
                    }
                }
                Some(_) = events_rx.recv() => {
                    // Discard events raised while connections unwind
                }
            }
        }

        log::info!("Node stopped");
        Ok(())
    }

    // =========================================================================
    // Task spawning
    // =========================================================================

    fn spawn_task<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.lock().unwrap().spawn(fut);
    }

    fn spawn_connect(self: &Arc<Self>, address: NetworkAddress) {
        let node = self.clone();
        self.spawn_task(async move {
            match connect_to_peer(address.to_socket_addr()).await {
                Ok(stream) => {
                    let greeting = Message::HandshakeRequest {
                        node: node.basic_node_data(),
                        sync: node.chain.core_sync_data(),
                    };
                    run_connection(
                        stream,
                        address.to_socket_addr(),
                        true,
                        Some(address),
                        node.peer_manager.clone(),
                        node.events_tx.clone(),
                        Some(greeting),
                        node.shutdown_tx.subscribe(),
                    )
                    .await;
                }
                Err(e) => {
                    log::debug!("Failed to connect to {}: {}", address, e);
                    node.peerlist.write().await.mark_failed(address);
                }
            }
        });
    }

    // =========================================================================
    // Background loops
    // =========================================================================

    async fn accept_loop(self: Arc<Self>, listener: Listener) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            if self.peer_manager.inbound_count().await >= self.config.max_inbound {
                                log::debug!("Inbound slots full, dropping {}", addr);
                                continue;
                            }
                            log::info!("Incoming connection from {}", addr);
                            let pm = self.peer_manager.clone();
                            let events_tx = self.events_tx.clone();
                            let conn_shutdown = self.shutdown_tx.subscribe();
                            self.spawn_task(async move {
                                run_connection(
                                    stream, addr, false, None, pm, events_tx, None, conn_shutdown,
                                )
                                .await;
                            });
                        }
                        Err(e) => {
                            log::error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn connector_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut interval = tokio::time::interval(self.config.connect_interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.connect_peers().await;
                }
            }
        }
    }

    /// Fill the gap between desired and current outbound connections,
    /// white list first, then gray
    async fn connect_peers(self: &Arc<Self>) {
        let outbound = self.peer_manager.outbound_count().await;
        if outbound >= self.config.desired_outbound {
            return;
        }
        let gap = self.config.desired_outbound - outbound;

        let exclude = self.peer_manager.connected_addresses().await;
        let candidates = self
            .peerlist
            .read()
            .await
            .connection_candidates(gap, &exclude);

        for address in candidates {
            log::debug!("Dialing {}", address);
            self.spawn_connect(address);
        }
    }

    async fn timed_sync_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut interval = tokio::time::interval(self.config.timed_sync_interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.sweep_stalled_connections().await;
                    let sync = self.chain.core_sync_data();
                    self.peer_manager
                        .broadcast(Message::TimedSyncRequest { sync })
                        .await;
                    self.peer_manager.broadcast(Message::Ping(rand::random())).await;
                }
            }
        }
    }

    /// Disconnect handshakes that never completed and idle peers
    async fn sweep_stalled_connections(&self) {
        for info in self.peer_manager.all_peer_info().await {
            match info.state {
                ConnectionState::Handshaking
                    if info.connected_at.elapsed() > self.config.handshake_timeout =>
                {
                    log::info!("Handshake with {} timed out", info.addr);
                    if info.outbound {
                        if let Some(listed) = info.listed_address {
                            self.peerlist.write().await.mark_failed(listed);
                        }
                    }
                    self.peer_manager.disconnect(&info.addr).await;
                }
                ConnectionState::Established
                    if info.last_message_at.elapsed() > self.config.idle_timeout =>
                {
                    log::info!("Peer {} idle, disconnecting", info.addr);
                    if let Some(listed) = info.listed_address {
                        self.peerlist.write().await.mark_failed(listed);
                    }
                    self.peer_manager.disconnect(&info.addr).await;
                }
                _ => {}
            }
        }
    }

    // =========================================================================
    // Message dispatch
    // =========================================================================

    async fn handle_message(&self, from: SocketAddr, msg: Message, pending: &mut LiteBlockTable) {
        log::debug!("Received {} from {}", msg.type_name(), from);
        self.peer_manager.touch(&from).await;

        let Some(info) = self.peer_manager.get_peer_info(&from).await else {
            return;
        };

        match info.state {
            ConnectionState::Handshaking => match msg {
                Message::HandshakeRequest { node, sync } if !info.outbound => {
                    self.handle_handshake_request(&info, node, sync).await;
                }
                Message::HandshakeResponse { node, sync, peers } if info.outbound => {
                    self.handle_handshake_response(&info, node, sync, peers).await;
                }
                other => {
                    log::warn!(
                        "Protocol violation from {}: {} before handshake",
                        from,
                        other.type_name()
                    );
                    self.peer_manager.disconnect(&from).await;
                }
            },
            ConnectionState::Established => {
                self.handle_established_message(from, msg, pending).await;
            }
            // Messages racing a teardown are dropped
            _ => {}
        }
    }

    async fn handle_established_message(
        &self,
        from: SocketAddr,
        msg: Message,
        pending: &mut LiteBlockTable,
    ) {
        match msg {
            Message::HandshakeRequest { .. } | Message::HandshakeResponse { .. } => {
                log::warn!("Repeated handshake from {}", from);
                self.penalize_and_disconnect(from).await;
            }

            Message::TimedSyncRequest { sync } => {
                self.peer_manager.update_sync_data(&from, sync).await;
                let response = Message::TimedSyncResponse {
                    sync: self.chain.core_sync_data(),
                    peers: self
                        .peerlist
                        .read()
                        .await
                        .peers_for_exchange(MAX_PEERS_IN_HANDSHAKE),
                };
                if let Err(e) = self.peer_manager.send_to(&from, response).await {
                    log::warn!("Failed to answer timed sync from {}: {}", from, e);
                }
            }

            Message::TimedSyncResponse { sync, mut peers } => {
                self.peer_manager.update_sync_data(&from, sync).await;
                peers.truncate(MAX_PEERS_IN_HANDSHAKE);
                self.peerlist.write().await.merge_peerlist(&peers);
            }

            Message::Ping(nonce) => {
                if let Err(e) = self.peer_manager.send_to(&from, Message::Pong(nonce)).await {
                    log::warn!("Failed to send pong to {}: {}", from, e);
                }
            }

            Message::Pong(_) => {
                // Peer is alive, nothing to do
            }

            Message::NewLiteBlock(lite) => {
                self.handle_lite_block(from, lite, pending).await;
            }

            Message::MissingTxsRequest(request) => {
                self.handle_missing_txs_request(from, request).await;
            }

            Message::MissingTxsResponse(response) => {
                self.handle_missing_txs_response(from, response, pending).await;
            }

            Message::NewTransactions(txs) => {
                self.handle_new_transactions(from, txs).await;
            }
        }
    }

    async fn handle_disconnect(&self, from: SocketAddr, pending: &mut LiteBlockTable) {
        let dropped = pending.remove_peer(&from);
        if dropped > 0 {
            log::debug!(
                "Abandoned {} pending lite block(s) from disconnected {}",
                dropped,
                from
            );
        }

        if let Some(info) = self.peer_manager.remove_peer(&from).await {
            // An outbound dial that never completed its handshake counts
            // as a connection failure for the dialed address
            if info.outbound && info.node_data.is_none() {
                if let Some(listed) = info.listed_address {
                    self.peerlist.write().await.mark_failed(listed);
                }
            }
        }
    }

    // =========================================================================
    // Handshake
    // =========================================================================

    fn basic_node_data(&self) -> BasicNodeData {
        BasicNodeData {
            network_id: self.config.network_id,
            version: PROTOCOL_VERSION,
            peer_id: self.peer_id,
            local_time: unix_now(),
            my_port: self.config.port,
            flags: NodeFlags::LITE_BLOCKS,
        }
    }

    fn validate_node_data(&self, node: &BasicNodeData) -> Result<(), PeerError> {
        if node.network_id != self.config.network_id {
            return Err(PeerError::WrongNetwork);
        }
        if node.version < MIN_PROTOCOL_VERSION {
            return Err(PeerError::IncompatibleVersion(node.version));
        }
        if node.peer_id == self.peer_id {
            return Err(PeerError::ProtocolViolation("connected to self".into()));
        }
        Ok(())
    }

    async fn handle_handshake_request(&self, info: &PeerInfo, node: BasicNodeData, sync: CoreSyncData) {
        if let Err(e) = self.validate_node_data(&node) {
            // Unidentified or incompatible peers never enter the peer lists
            log::info!("Rejecting handshake from {}: {}", info.addr, e);
            self.peer_manager.disconnect(&info.addr).await;
            return;
        }

        let listed = listed_address_for_inbound(&info.addr, node.my_port);

        let response = Message::HandshakeResponse {
            node: self.basic_node_data(),
            sync: self.chain.core_sync_data(),
            peers: self
                .peerlist
                .read()
                .await
                .peers_for_exchange(MAX_PEERS_IN_HANDSHAKE),
        };
        if let Err(e) = self.peer_manager.send_to(&info.addr, response).await {
            log::warn!("Failed to answer handshake from {}: {}", info.addr, e);
            return;
        }

        self.peer_manager
            .set_established(&info.addr, node, sync, listed)
            .await;
        if let Some(address) = listed {
            self.peerlist
                .write()
                .await
                .mark_connected(address, node.peer_id, 0);
        }
    }

    async fn handle_handshake_response(
        &self,
        info: &PeerInfo,
        node: BasicNodeData,
        sync: CoreSyncData,
        mut peers: Vec<PeerlistEntry>,
    ) {
        if let Err(e) = self.validate_node_data(&node) {
            log::info!("Rejecting handshake response from {}: {}", info.addr, e);
            if let Some(listed) = info.listed_address {
                self.peerlist.write().await.mark_failed(listed);
            }
            self.peer_manager.disconnect(&info.addr).await;
            return;
        }

        peers.truncate(MAX_PEERS_IN_HANDSHAKE);
        self.peerlist.write().await.merge_peerlist(&peers);

        self.peer_manager
            .set_established(&info.addr, node, sync, info.listed_address)
            .await;
        if let Some(address) = info.listed_address {
            self.peerlist
                .write()
                .await
                .mark_connected(address, node.peer_id, 0);
        }
    }

    // =========================================================================
    // Lite-block relay
    // =========================================================================

    async fn handle_lite_block(
        &self,
        from: SocketAddr,
        lite: LiteBlock,
        pending: &mut LiteBlockTable,
    ) {
        if lite.block.transaction_hashes.len() > MAX_BLOCK_TXS {
            log::warn!("Oversized lite block from {}", from);
            self.penalize_and_disconnect(from).await;
            return;
        }

        let cached = CachedBlock::new(lite.block.clone());

        let long_hash = match cached.block_long_hash() {
            Ok(hash) => hash,
            Err(e) => {
                log::warn!("Rejecting lite block from {}: {}", from, e);
                self.penalize_and_disconnect(from).await;
                return;
            }
        };

        let difficulty = self.chain.difficulty_for_next_block();
        if !check_hash(&long_hash, difficulty) {
            log::warn!(
                "Lite block from {} fails difficulty {} (pow {})",
                from,
                difficulty,
                long_hash
            );
            self.penalize_and_disconnect(from).await;
            return;
        }

        let block_hash = cached.block_hash();
        let missing = missing_transactions(&lite, self.tx_pool.as_ref());

        if missing.is_empty() {
            // Complete without a round trip
            self.submit_reconstructed(from, &lite, &HashMap::new()).await;
        } else {
            log::debug!(
                "Lite block {} from {}: requesting {} missing tx(s)",
                block_hash,
                from,
                missing.len()
            );
            let request = MissingTxsRequest {
                block_hash,
                tx_hashes: missing.clone(),
            };
            pending.insert(from, block_hash, lite, missing.into_iter().collect());
            if let Err(e) = self
                .peer_manager
                .send_to(&from, Message::MissingTxsRequest(request))
                .await
            {
                log::warn!("Failed to request missing txs from {}: {}", from, e);
                pending.remove_peer(&from);
            }
        }
    }

    async fn handle_missing_txs_request(&self, from: SocketAddr, request: MissingTxsRequest) {
        if request.tx_hashes.len() > MAX_BLOCK_TXS {
            self.penalize_and_disconnect(from).await;
            return;
        }

        let mut transactions = Vec::with_capacity(request.tx_hashes.len());
        for hash in &request.tx_hashes {
            match self.tx_pool.get_transaction(hash) {
                Some(tx) => transactions.push(tx),
                None => log::warn!(
                    "Peer {} requested tx {} we no longer have",
                    from,
                    hash
                ),
            }
        }

        let response = MissingTxsResponse {
            block_hash: request.block_hash,
            transactions,
        };
        if let Err(e) = self
            .peer_manager
            .send_to(&from, Message::MissingTxsResponse(response))
            .await
        {
            log::warn!("Failed to send missing txs to {}: {}", from, e);
        }
    }

    async fn handle_missing_txs_response(
        &self,
        from: SocketAddr,
        response: MissingTxsResponse,
        pending: &mut LiteBlockTable,
    ) {
        match pending.fill(from, response.block_hash, response.transactions) {
            FillOutcome::Complete(entry) => {
                self.submit_reconstructed(from, &entry.announce, &entry.received)
                    .await;
            }
            FillOutcome::Incomplete => {
                log::warn!(
                    "Peer {} could not supply all transactions it announced for {}",
                    from,
                    response.block_hash
                );
                self.penalize_and_disconnect(from).await;
            }
            FillOutcome::Unrequested => {
                log::warn!("Peer {} sent transactions we never requested", from);
                self.penalize_and_disconnect(from).await;
            }
            FillOutcome::Unknown => {
                log::warn!(
                    "Unsolicited missing-txs response from {} for {}",
                    from,
                    response.block_hash
                );
                self.penalize_and_disconnect(from).await;
            }
        }
    }

    /// Assemble a completed lite block and hand it to the validator
    async fn submit_reconstructed(
        &self,
        from: SocketAddr,
        announce: &LiteBlock,
        received: &HashMap<Hash, Transaction>,
    ) {
        let Some(full) = assemble_block(announce, received, self.tx_pool.as_ref()) else {
            log::warn!(
                "Pool dropped a transaction while reconstructing block from {}",
                from
            );
            return;
        };

        let cached = CachedBlock::new(full.template.clone());
        let block_hash = cached.block_hash();

        match self.validator.submit_block(&cached, full) {
            SubmitResult::Accepted => {
                log::info!("Accepted block {} from {}", block_hash, from);
                let relay = LiteBlock {
                    block: announce.block.clone(),
                    current_height: self.chain.core_sync_data().current_height,
                };
                self.peer_manager
                    .broadcast_except(Message::NewLiteBlock(relay), &from)
                    .await;
            }
            SubmitResult::Rejected { reason } => {
                log::warn!("Validator rejected block {} from {}: {}", block_hash, from, reason);
            }
        }
    }

    // =========================================================================
    // Transaction relay
    // =========================================================================

    async fn handle_new_transactions(&self, from: SocketAddr, txs: Vec<Transaction>) {
        let mut relay = Vec::new();

        for tx in txs {
            if tx.binary_size() > MAX_TX_SIZE {
                log::warn!("Oversized transaction from {}", from);
                self.penalize_and_disconnect(from).await;
                return;
            }

            let hash = tx.hash();
            if self.relay_filter.contains(&hash) {
                continue;
            }
            if self.tx_pool.add_transaction(tx.clone()) {
                self.relay_filter.insert(hash);
                relay.push(tx);
            }
        }

        if !relay.is_empty() {
            self.peer_manager
                .broadcast_except(Message::NewTransactions(relay), &from)
                .await;
        }
    }

    // =========================================================================
    // Outward-facing broadcast helpers
    // =========================================================================

    /// Announce a locally produced block to every established peer
    pub async fn broadcast_block(&self, block: &FullBlock) {
        let announce = LiteBlock {
            block: block.template.clone(),
            current_height: self.chain.core_sync_data().current_height,
        };
        self.peer_manager
            .broadcast(Message::NewLiteBlock(announce))
            .await;
    }

    /// Relay locally submitted transactions
    pub async fn broadcast_transactions(&self, txs: Vec<Transaction>) {
        for tx in &txs {
            self.relay_filter.insert(tx.hash());
        }
        self.peer_manager
            .broadcast(Message::NewTransactions(txs))
            .await;
    }

    /// Current node status
    pub async fn status(&self) -> NodeStatus {
        NodeStatus {
            port: self.config.port,
            height: self.chain.core_sync_data().current_height,
            peers: self.peer_manager.peer_count().await,
            outbound: self.peer_manager.outbound_count().await,
            inbound: self.peer_manager.inbound_count().await,
        }
    }

    // =========================================================================
    // Reputation
    // =========================================================================

    /// Drop a misbehaving connection and debit its peer-list entry
    async fn penalize_and_disconnect(&self, from: SocketAddr) {
        if let Some(info) = self.peer_manager.get_peer_info(&from).await {
            if let Some(listed) = info.listed_address {
                self.peerlist.write().await.mark_failed(listed);
            }
        }
        self.peer_manager.disconnect(&from).await;
    }
}

/// The address an inbound peer is reachable at: its source IP plus the
/// listening port it advertised. Peers that do not listen advertise port 0
/// and stay unlisted.
fn listed_address_for_inbound(addr: &SocketAddr, my_port: u16) -> Option<NetworkAddress> {
    if my_port == 0 {
        return None;
    }
    let source = NetworkAddress::from_socket_addr(addr)?;
    Some(NetworkAddress {
        ip: source.ip,
        port: my_port,
    })
}

/// Node status information
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub port: u16,
    pub height: u64,
    pub peers: usize,
    pub outbound: usize,
    pub inbound: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::{BlockHeader, BlockTemplate, TxInput, TxOutput};
    use crate::core::traits::CoreSyncData;
    use crate::crypto::sha256;
    use crate::network::peer::PeerHandle;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    struct MockChain {
        height: u64,
        difficulty: u64,
    }

    impl ChainState for MockChain {
        fn core_sync_data(&self) -> CoreSyncData {
            CoreSyncData {
                current_height: self.height,
                top_block_hash: Hash::ZERO,
            }
        }

        fn difficulty_for_next_block(&self) -> u64 {
            self.difficulty
        }
    }

    #[derive(Default)]
    struct RecordingValidator {
        accepted: StdMutex<Vec<FullBlock>>,
    }

    impl BlockValidator for RecordingValidator {
        fn submit_block(&self, _block: &CachedBlock, full: FullBlock) -> SubmitResult {
            self.accepted.lock().unwrap().push(full);
            SubmitResult::Accepted
        }
    }

    #[derive(Default)]
    struct FakePool {
        txs: StdMutex<HashMap<Hash, Transaction>>,
    }

    impl FakePool {
        fn preload(&self, txs: &[Transaction]) {
            let mut map = self.txs.lock().unwrap();
            for tx in txs {
                map.insert(tx.hash(), tx.clone());
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

    struct Harness {
        node: Arc<Node>,
        validator: Arc<RecordingValidator>,
        pool: Arc<FakePool>,
    }

    fn harness(difficulty: u64) -> Harness {
        let validator = Arc::new(RecordingValidator::default());
        let pool = Arc::new(FakePool::default());
        let chain = Arc::new(MockChain {
            height: 10,
            difficulty,
        });
        let node = Node::new(
            NodeConfig::default(),
            chain,
            validator.clone(),
            pool.clone(),
            PeerlistManager::default(),
        );
        Harness {
            node,
            validator,
            pool,
        }
    }

    fn sock(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 1)), port)
    }

    async fn register_peer(
        node: &Arc<Node>,
        addr: SocketAddr,
        outbound: bool,
    ) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(64);
        let handle = PeerHandle {
            addr,
            tx,
            close: Arc::new(Notify::new()),
        };
        node.peer_manager
            .add_peer(addr, handle, outbound, None)
            .await
            .unwrap();
        rx
    }

    async fn establish_peer(
        node: &Arc<Node>,
        addr: SocketAddr,
    ) -> mpsc::Receiver<Message> {
        let rx = register_peer(node, addr, false).await;
        let peer_node = BasicNodeData {
            network_id: MAINNET_NETWORK_ID,
            version: PROTOCOL_VERSION,
            peer_id: 0xbeef,
            local_time: 0,
            my_port: 18080,
            flags: NodeFlags::LITE_BLOCKS,
        };
        let sync = CoreSyncData {
            current_height: 10,
            top_block_hash: Hash::ZERO,
        };
        node.peer_manager
            .set_established(&addr, peer_node, sync, None)
            .await;
        rx
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

    fn lite_block_with(txs: &[&Transaction]) -> LiteBlock {
        LiteBlock {
            block: BlockTemplate {
                header: BlockHeader {
                    major_version: 1,
                    minor_version: 0,
                    timestamp: 1_700_000_000,
                    previous_hash: Hash::ZERO,
                    nonce: 3,
                },
                base_transaction: Transaction::base(11, 50, sha256(b"miner")),
                transaction_hashes: txs.iter().map(|t| t.hash()).collect(),
            },
            current_height: 11,
        }
    }

    #[tokio::test]
    async fn test_wrong_network_id_rejected_and_unlisted() {
        let h = harness(0);
        let addr = sock(40001);
        let mut rx = register_peer(&h.node, addr, false).await;

        let mut pending = LiteBlockTable::new();
        let bad = BasicNodeData {
            network_id: [0xff; 16],
            version: PROTOCOL_VERSION,
            peer_id: 0xbeef,
            local_time: 0,
            my_port: 18080,
            flags: NodeFlags::LITE_BLOCKS,
        };
        let sync = CoreSyncData {
            current_height: 1,
            top_block_hash: Hash::ZERO,
        };
        h.node
            .handle_message(
                addr,
                Message::HandshakeRequest { node: bad, sync },
                &mut pending,
            )
            .await;

        // No response was sent and the peer entered neither list
        assert!(rx.try_recv().is_err());
        let peerlist = h.node.peerlist.read().await;
        assert!(peerlist.white().is_empty());
        assert!(peerlist.gray().is_empty());
        drop(peerlist);

        let info = h.node.peer_manager.get_peer_info(&addr).await.unwrap();
        assert_eq!(info.state, ConnectionState::Draining);
    }

    #[tokio::test]
    async fn test_good_handshake_promotes_to_white() {
        let h = harness(0);
        let addr = sock(40002);
        let mut rx = register_peer(&h.node, addr, false).await;

        let mut pending = LiteBlockTable::new();
        let node_data = BasicNodeData {
            network_id: MAINNET_NETWORK_ID,
            version: PROTOCOL_VERSION,
            peer_id: 0xbeef,
            local_time: 0,
            my_port: 18081,
            flags: NodeFlags::LITE_BLOCKS,
        };
        let sync = CoreSyncData {
            current_height: 1,
            top_block_hash: Hash::ZERO,
        };
        h.node
            .handle_message(
                addr,
                Message::HandshakeRequest {
                    node: node_data,
                    sync,
                },
                &mut pending,
            )
            .await;

        assert!(matches!(
            rx.try_recv(),
            Ok(Message::HandshakeResponse { .. })
        ));
        let peerlist = h.node.peerlist.read().await;
        assert_eq!(peerlist.white().len(), 1);
        let entry = &peerlist.white().entries()[0];
        assert_eq!(entry.address.port, 18081);
        assert_eq!(entry.peer_id, 0xbeef);
    }

    #[tokio::test]
    async fn test_all_known_lite_block_submits_without_round_trip() {
        let h = harness(0);
        let (t1, t2) = (tx(1), tx(2));
        h.pool.preload(&[t1.clone(), t2.clone()]);

        let addr = sock(40003);
        let mut rx = establish_peer(&h.node, addr).await;

        let mut pending = LiteBlockTable::new();
        let lite = lite_block_with(&[&t1, &t2]);
        h.node
            .handle_message(addr, Message::NewLiteBlock(lite), &mut pending)
            .await;

        // Submitted directly, no MissingTxsRequest round trip
        assert_eq!(h.validator.accepted.lock().unwrap().len(), 1);
        assert!(pending.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_txs_requested_and_order_preserved() {
        let h = harness(0);
        let (t1, t2, t3) = (tx(1), tx(2), tx(3));
        h.pool.preload(&[t1.clone(), t3.clone()]);

        let addr = sock(40004);
        let mut rx = establish_peer(&h.node, addr).await;

        let mut pending = LiteBlockTable::new();
        let lite = lite_block_with(&[&t1, &t2, &t3]);
        h.node
            .handle_message(addr, Message::NewLiteBlock(lite), &mut pending)
            .await;

        // Exactly the one absent hash is requested
        let Ok(Message::MissingTxsRequest(request)) = rx.try_recv() else {
            panic!("expected a missing-txs request");
        };
        assert_eq!(request.tx_hashes, vec![t2.hash()]);
        assert_eq!(pending.len(), 1);

        h.node
            .handle_message(
                addr,
                Message::MissingTxsResponse(MissingTxsResponse {
                    block_hash: request.block_hash,
                    transactions: vec![t2.clone()],
                }),
                &mut pending,
            )
            .await;

        let accepted = h.validator.accepted.lock().unwrap();
        assert_eq!(accepted.len(), 1);
        let order: Vec<Hash> = accepted[0].transactions.iter().map(|t| t.hash()).collect();
        assert_eq!(order, vec![t1.hash(), t2.hash(), t3.hash()]);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_pow_failure_disconnects_without_submit() {
        // u64::MAX difficulty rejects any nonzero hash
        let h = harness(u64::MAX);
        let t1 = tx(1);
        h.pool.preload(&[t1.clone()]);

        let addr = sock(40005);
        let _rx = establish_peer(&h.node, addr).await;

        let mut pending = LiteBlockTable::new();
        let lite = lite_block_with(&[&t1]);
        h.node
            .handle_message(addr, Message::NewLiteBlock(lite), &mut pending)
            .await;

        assert!(h.validator.accepted.lock().unwrap().is_empty());
        let info = h.node.peer_manager.get_peer_info(&addr).await.unwrap();
        assert_eq!(info.state, ConnectionState::Draining);
    }

    #[tokio::test]
    async fn test_unknown_block_version_disconnects() {
        let h = harness(0);
        let t1 = tx(1);
        h.pool.preload(&[t1.clone()]);

        let addr = sock(40006);
        let _rx = establish_peer(&h.node, addr).await;

        let mut pending = LiteBlockTable::new();
        let mut lite = lite_block_with(&[&t1]);
        lite.block.header.major_version = 42;
        h.node
            .handle_message(addr, Message::NewLiteBlock(lite), &mut pending)
            .await;

        assert!(h.validator.accepted.lock().unwrap().is_empty());
        let info = h.node.peer_manager.get_peer_info(&addr).await.unwrap();
        assert_eq!(info.state, ConnectionState::Draining);
    }

    #[tokio::test]
    async fn test_partial_missing_txs_response_is_protocol_error() {
        let h = harness(0);
        let (t1, t2) = (tx(1), tx(2));

        let addr = sock(40007);
        let mut rx = establish_peer(&h.node, addr).await;

        let mut pending = LiteBlockTable::new();
        let lite = lite_block_with(&[&t1, &t2]);
        h.node
            .handle_message(addr, Message::NewLiteBlock(lite), &mut pending)
            .await;

        let Ok(Message::MissingTxsRequest(request)) = rx.try_recv() else {
            panic!("expected a missing-txs request");
        };
        assert_eq!(request.tx_hashes.len(), 2);

        // Peer only supplies one of the two requested bodies
        h.node
            .handle_message(
                addr,
                Message::MissingTxsResponse(MissingTxsResponse {
                    block_hash: request.block_hash,
                    transactions: vec![t1],
                }),
                &mut pending,
            )
            .await;

        assert!(h.validator.accepted.lock().unwrap().is_empty());
        assert!(pending.is_empty());
        let info = h.node.peer_manager.get_peer_info(&addr).await.unwrap();
        assert_eq!(info.state, ConnectionState::Draining);
    }

    #[tokio::test]
    async fn test_new_transactions_relayed_once() {
        let h = harness(0);
        let addr = sock(40008);
        let other = sock(40009);
        let _rx = establish_peer(&h.node, addr).await;
        let mut other_rx = establish_peer(&h.node, other).await;

        let mut pending = LiteBlockTable::new();
        let t1 = tx(1);
        h.node
            .handle_message(
                addr,
                Message::NewTransactions(vec![t1.clone()]),
                &mut pending,
            )
            .await;

        assert!(matches!(
            other_rx.try_recv(),
            Ok(Message::NewTransactions(txs)) if txs.len() == 1
        ));

        // The same transaction arriving again is not re-relayed
        h.node
            .handle_message(addr, Message::NewTransactions(vec![t1]), &mut pending)
            .await;
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relay_filter_forgets_deleted_pool_txs() {
        let h = harness(0);
        let t1 = tx(1);
        let observer = h.node.tx_pool_observer();

        h.node.relay_filter.insert(t1.hash());
        assert!(h.node.relay_filter.contains(&t1.hash()));

        observer.tx_deleted_from_pool(&t1.hash());
        assert!(!h.node.relay_filter.contains(&t1.hash()));
    }

    #[tokio::test]
    async fn test_non_handshake_message_before_handshake_disconnects() {
        let h = harness(0);
        let addr = sock(40010);
        let _rx = register_peer(&h.node, addr, false).await;

        let mut pending = LiteBlockTable::new();
        h.node
            .handle_message(addr, Message::Ping(1), &mut pending)
            .await;

        let info = h.node.peer_manager.get_peer_info(&addr).await.unwrap();
        assert_eq!(info.state, ConnectionState::Draining);
    }

    #[tokio::test]
    async fn test_disconnect_cleans_pending_table() {
        let h = harness(0);
        let (t1, t2) = (tx(1), tx(2));

        let addr = sock(40011);
        let mut rx = establish_peer(&h.node, addr).await;

        let mut pending = LiteBlockTable::new();
        let lite = lite_block_with(&[&t1, &t2]);
        h.node
            .handle_message(addr, Message::NewLiteBlock(lite), &mut pending)
            .await;
        assert!(matches!(rx.try_recv(), Ok(Message::MissingTxsRequest(_))));
        assert_eq!(pending.len(), 1);

        h.node.handle_disconnect(addr, &mut pending).await;
        assert!(pending.is_empty());
        assert!(h.node.peer_manager.get_peer_info(&addr).await.is_none());
    }
}
