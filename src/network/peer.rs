//! Live connection tracking
//!
//! One `PeerInfo` per live socket, keyed by remote socket address, plus the
//! mpsc handles used to queue outgoing messages. The connection state
//! machine (`Dialing → Handshaking → Established → Draining → Closed`)
//! advances here; the node's dispatch loop drives the transitions.

use crate::core::traits::CoreSyncData;
use crate::network::message::{BasicNodeData, Message, NetworkAddress};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, Notify, RwLock};

/// Default maximum inbound connections
pub const MAX_INBOUND: usize = 32;

/// Default number of outbound connections the connector maintains
pub const DESIRED_OUTBOUND: usize = 8;

/// Peer connection errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),
    #[error("Peer disconnected")]
    Disconnected,
    #[error("Connection limit reached")]
    MaxPeersReached,
    #[error("Wrong network id")]
    WrongNetwork,
    #[error("Incompatible protocol version: {0}")]
    IncompatibleVersion(u8),
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Outbound TCP connect in progress
    Dialing,
    /// Socket open, waiting for the handshake to complete
    Handshaking,
    /// Handshake done, steady-state message exchange
    Established,
    /// Send side flushing before close
    Draining,
    /// Terminal
    Closed,
}

/// Information about a connected peer
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Remote socket address of this connection
    pub addr: SocketAddr,
    pub state: ConnectionState,
    /// True if we initiated the connection
    pub outbound: bool,
    /// Identity from the peer's handshake
    pub node_data: Option<BasicNodeData>,
    /// The peer's advertised chain summary
    pub sync_data: Option<CoreSyncData>,
    /// The address this peer is reachable at, once known
    pub listed_address: Option<NetworkAddress>,
    /// When the socket was opened
    pub connected_at: Instant,
    /// Last time any message arrived
    pub last_message_at: Instant,
}

impl PeerInfo {
    pub fn new(addr: SocketAddr, outbound: bool, listed_address: Option<NetworkAddress>) -> Self {
        let now = Instant::now();
        Self {
            addr,
            state: ConnectionState::Handshaking,
            outbound,
            node_data: None,
            sync_data: None,
            listed_address,
            connected_at: now,
            last_message_at: now,
        }
    }
}

/// Handle for queueing messages to a peer's writer task
#[derive(Clone)]
pub struct PeerHandle {
    pub addr: SocketAddr,
    pub tx: mpsc::Sender<Message>,
    /// Signals the connection task to tear the socket down
    pub close: Arc<Notify>,
}

impl PeerHandle {
    pub async fn send(&self, msg: Message) -> Result<(), PeerError> {
        self.tx.send(msg).await.map_err(|_| PeerError::Disconnected)
    }
}

/// Manages all live peer connections
pub struct PeerManager {
    peers: RwLock<HashMap<SocketAddr, PeerInfo>>,
    handles: RwLock<HashMap<SocketAddr, PeerHandle>>,
    max_inbound: usize,
    max_outbound: usize,
}

impl PeerManager {
    pub fn new(max_inbound: usize, max_outbound: usize) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            handles: RwLock::new(HashMap::new()),
            max_inbound,
            max_outbound,
        }
    }

    /// Register a new connection, enforcing the per-direction caps
    pub async fn add_peer(
        &self,
        addr: SocketAddr,
        handle: PeerHandle,
        outbound: bool,
        listed_address: Option<NetworkAddress>,
    ) -> Result<(), PeerError> {
        let mut peers = self.peers.write().await;

        let same_direction = peers.values().filter(|p| p.outbound == outbound).count();
        let cap = if outbound {
            self.max_outbound
        } else {
            self.max_inbound
        };
        if same_direction >= cap {
            return Err(PeerError::MaxPeersReached);
        }

        peers.insert(addr, PeerInfo::new(addr, outbound, listed_address));
        self.handles.write().await.insert(addr, handle);

        log::info!("Added peer: {} (outbound: {})", addr, outbound);
        Ok(())
    }

    /// Remove a peer entirely; returns the final info if it was known
    pub async fn remove_peer(&self, addr: &SocketAddr) -> Option<PeerInfo> {
        self.handles.write().await.remove(addr);
        let mut peers = self.peers.write().await;
        let mut info = peers.remove(addr);
        if let Some(info) = info.as_mut() {
            info.state = ConnectionState::Closed;
            log::info!("Removed peer: {}", addr);
        }
        info
    }

    /// Mark a handshake as completed
    pub async fn set_established(
        &self,
        addr: &SocketAddr,
        node_data: BasicNodeData,
        sync_data: CoreSyncData,
        listed_address: Option<NetworkAddress>,
    ) {
        let mut peers = self.peers.write().await;
        if let Some(peer) = peers.get_mut(addr) {
            peer.state = ConnectionState::Established;
            peer.node_data = Some(node_data);
            peer.sync_data = Some(sync_data);
            if listed_address.is_some() {
                peer.listed_address = listed_address;
            }
            log::info!(
                "Peer {} established: id={:016x}, height={}",
                addr,
                node_data.peer_id,
                sync_data.current_height
            );
        }
    }

    /// Refresh a peer's advertised sync state
    pub async fn update_sync_data(&self, addr: &SocketAddr, sync_data: CoreSyncData) {
        if let Some(peer) = self.peers.write().await.get_mut(addr) {
            peer.sync_data = Some(sync_data);
        }
    }

    /// Record message receipt time
    pub async fn touch(&self, addr: &SocketAddr) {
        if let Some(peer) = self.peers.write().await.get_mut(addr) {
            peer.last_message_at = Instant::now();
        }
    }

    /// Move a peer into the draining state ahead of socket teardown
    pub async fn begin_drain(&self, addr: &SocketAddr) {
        self.handles.write().await.remove(addr);
        if let Some(peer) = self.peers.write().await.get_mut(addr) {
            peer.state = ConnectionState::Draining;
        }
    }

    /// Ask a connection to close
    ///
    /// Marks the peer as draining and signals its connection task, which
    /// performs the actual teardown and reports back through the event
    /// queue. Safe to call for peers that are already gone.
    pub async fn disconnect(&self, addr: &SocketAddr) {
        let handle = self.handles.read().await.get(addr).cloned();
        if let Some(peer) = self.peers.write().await.get_mut(addr) {
            peer.state = ConnectionState::Draining;
        }
        if let Some(handle) = handle {
            handle.close.notify_one();
        }
    }

    pub async fn get_peer_info(&self, addr: &SocketAddr) -> Option<PeerInfo> {
        self.peers.read().await.get(addr).cloned()
    }

    pub async fn all_peer_info(&self) -> Vec<PeerInfo> {
        self.peers.read().await.values().cloned().collect()
    }

    /// Socket addresses of all established peers
    pub async fn established_peers(&self) -> Vec<SocketAddr> {
        self.peers
            .read()
            .await
            .values()
            .filter(|p| p.state == ConnectionState::Established)
            .map(|p| p.addr)
            .collect()
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn outbound_count(&self) -> usize {
        self.peers
            .read()
            .await
            .values()
            .filter(|p| p.outbound && p.state != ConnectionState::Closed)
            .count()
    }

    pub async fn inbound_count(&self) -> usize {
        self.peers
            .read()
            .await
            .values()
            .filter(|p| !p.outbound && p.state != ConnectionState::Closed)
            .count()
    }

    /// Listed addresses of all live connections, for connector dedup
    pub async fn connected_addresses(&self) -> HashSet<NetworkAddress> {
        self.peers
            .read()
            .await
            .values()
            .filter_map(|p| p.listed_address)
            .collect()
    }

    /// Send a message to a specific peer
    pub async fn send_to(&self, addr: &SocketAddr, msg: Message) -> Result<(), PeerError> {
        let handle = {
            let handles = self.handles.read().await;
            handles.get(addr).cloned()
        };
        match handle {
            Some(handle) => handle.send(msg).await,
            None => Err(PeerError::Disconnected),
        }
    }

    /// Broadcast a message to all established peers
    pub async fn broadcast(&self, msg: Message) {
        self.broadcast_filtered(msg, None).await;
    }

    /// Broadcast a message to all established peers except one
    pub async fn broadcast_except(&self, msg: Message, except: &SocketAddr) {
        self.broadcast_filtered(msg, Some(*except)).await;
    }

    async fn broadcast_filtered(&self, msg: Message, except: Option<SocketAddr>) {
        // Snapshot the handles so concurrent removals during the sends
        // cannot invalidate the iteration
        let targets: Vec<PeerHandle> = {
            let peers = self.peers.read().await;
            let handles = self.handles.read().await;
            handles
                .values()
                .filter(|h| Some(h.addr) != except)
                .filter(|h| {
                    peers
                        .get(&h.addr)
                        .map(|p| p.state == ConnectionState::Established)
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        };

        for handle in targets {
            if let Err(e) = handle.send(msg.clone()).await {
                log::warn!("Failed to send to {}: {}", handle.addr, e);
            }
        }
    }
}
