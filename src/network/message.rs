//! Network message types for P2P communication
//!
//! Defines the wire protocol: handshake, timed peer-list sync, keepalive,
//! and the lite-block relay messages. All messages travel as bincode inside
//! a magic-and-length frame (see `server::MessageCodec`).

use crate::core::block::{BlockTemplate, Transaction};
use crate::core::traits::CoreSyncData;
use crate::crypto::Hash;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Oldest protocol version this node still talks to
pub const MIN_PROTOCOL_VERSION: u8 = 1;

/// Magic bytes for message framing
pub const MAGIC: [u8; 4] = [0x4C, 0x49, 0x54, 0x45]; // "LITE"

/// Network identifier; nodes with a different id are a different network
pub const MAINNET_NETWORK_ID: [u8; 16] = [
    0x6c, 0x69, 0x74, 0x65, 0x6e, 0x65, 0x74, 0x2d, 0x6d, 0x61, 0x69, 0x6e, 0x2d, 0x76, 0x30,
    0x31,
];

/// Hard cap on a framed message payload
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

/// Maximum peer-list entries in a handshake or timed-sync response
pub const MAX_PEERS_IN_HANDSHAKE: usize = 250;

bitflags! {
    /// Capability flags advertised in the handshake
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct NodeFlags: u32 {
        /// Peer understands lite-block announcements
        const LITE_BLOCKS = 0b0000_0001;
    }
}

// =============================================================================
// Addresses and peer-list entries
// =============================================================================

/// An IPv4 peer address as carried in peer lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkAddress {
    /// IPv4 address packed big-endian
    pub ip: u32,
    pub port: u16,
}

impl NetworkAddress {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self {
            ip: u32::from(ip),
            port,
        }
    }

    /// Build from a socket address; `None` for IPv6 peers
    pub fn from_socket_addr(addr: &SocketAddr) -> Option<Self> {
        match addr {
            SocketAddr::V4(v4) => Some(Self::new(*v4.ip(), v4.port())),
            SocketAddr::V6(_) => None,
        }
    }

    pub fn ip_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ip)
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip_addr(), self.port))
    }

    /// Loopback and unspecified addresses never enter the peer lists
    pub fn is_routable(&self) -> bool {
        let ip = self.ip_addr();
        !ip.is_loopback() && !ip.is_unspecified() && self.port != 0
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip_addr(), self.port)
    }
}

/// One known peer, as exchanged between nodes and persisted on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerlistEntry {
    pub address: NetworkAddress,
    pub peer_id: u64,
    /// Unix seconds of the last successful contact
    pub last_seen: u64,
    pub pruning_seed: u32,
}

// =============================================================================
// Handshake payloads
// =============================================================================

/// Node identity exchanged at handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicNodeData {
    pub network_id: [u8; 16],
    pub version: u8,
    pub peer_id: u64,
    pub local_time: u64,
    /// Port this node accepts connections on; 0 when not listening
    pub my_port: u16,
    pub flags: NodeFlags,
}

// =============================================================================
// Lite-block relay payloads
// =============================================================================

/// A block announcement without transaction bodies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiteBlock {
    pub block: BlockTemplate,
    /// Announcing node's chain height
    pub current_height: u64,
}

/// Request for transaction bodies missing from a lite block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingTxsRequest {
    pub block_hash: Hash,
    pub tx_hashes: Vec<Hash>,
}

/// Response carrying the requested transaction bodies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingTxsResponse {
    pub block_hash: Hash,
    pub transactions: Vec<Transaction>,
}

// =============================================================================
// Messages
// =============================================================================

/// Network message types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Opening message of every connection, sent by the dialing side
    HandshakeRequest {
        node: BasicNodeData,
        sync: CoreSyncData,
    },

    /// Reply to a handshake, carries a white-list snippet
    HandshakeResponse {
        node: BasicNodeData,
        sync: CoreSyncData,
        peers: Vec<PeerlistEntry>,
    },

    /// Periodic sync-state announcement and peer-list request
    TimedSyncRequest { sync: CoreSyncData },

    /// Reply with our sync state and a white-list snippet
    TimedSyncResponse {
        sync: CoreSyncData,
        peers: Vec<PeerlistEntry>,
    },

    /// Keep-alive ping
    Ping(u64),

    /// Keep-alive pong response
    Pong(u64),

    /// Announce a newly mined block without transaction bodies
    NewLiteBlock(LiteBlock),

    /// Ask the announcing peer for transaction bodies we lack
    MissingTxsRequest(MissingTxsRequest),

    /// Supply requested transaction bodies
    MissingTxsResponse(MissingTxsResponse),

    /// Broadcast of new pool transactions
    NewTransactions(Vec<Transaction>),
}

impl Message {
    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize message from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    /// Get message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::HandshakeRequest { .. } => "HandshakeRequest",
            Message::HandshakeResponse { .. } => "HandshakeResponse",
            Message::TimedSyncRequest { .. } => "TimedSyncRequest",
            Message::TimedSyncResponse { .. } => "TimedSyncResponse",
            Message::Ping(_) => "Ping",
            Message::Pong(_) => "Pong",
            Message::NewLiteBlock(_) => "NewLiteBlock",
            Message::MissingTxsRequest(_) => "MissingTxsRequest",
            Message::MissingTxsResponse(_) => "MissingTxsResponse",
            Message::NewTransactions(_) => "NewTransactions",
        }
    }

    /// Whether this message is valid before the handshake completed
    pub fn is_handshake(&self) -> bool {
        matches!(
            self,
            Message::HandshakeRequest { .. } | Message::HandshakeResponse { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialization() {
        let msg = Message::Ping(12345);
        let bytes = msg.to_bytes().unwrap();
        let decoded = Message::from_bytes(&bytes).unwrap();

        if let Message::Ping(nonce) = decoded {
            assert_eq!(nonce, 12345);
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_network_address_round_trip() {
        let addr = NetworkAddress::new(Ipv4Addr::new(203, 0, 113, 7), 18080);
        let socket = addr.to_socket_addr();
        assert_eq!(NetworkAddress::from_socket_addr(&socket), Some(addr));
        assert_eq!(addr.to_string(), "203.0.113.7:18080");
    }

    #[test]
    fn test_routability() {
        assert!(!NetworkAddress::new(Ipv4Addr::LOCALHOST, 18080).is_routable());
        assert!(!NetworkAddress::new(Ipv4Addr::UNSPECIFIED, 18080).is_routable());
        assert!(!NetworkAddress::new(Ipv4Addr::new(8, 8, 8, 8), 0).is_routable());
        assert!(NetworkAddress::new(Ipv4Addr::new(8, 8, 8, 8), 18080).is_routable());
    }

    #[test]
    fn test_handshake_gate() {
        let node = BasicNodeData {
            network_id: MAINNET_NETWORK_ID,
            version: PROTOCOL_VERSION,
            peer_id: 1,
            local_time: 0,
            my_port: 18080,
            flags: NodeFlags::LITE_BLOCKS,
        };
        let sync = CoreSyncData {
            current_height: 0,
            top_block_hash: Hash::ZERO,
        };
        assert!(Message::HandshakeRequest { node, sync }.is_handshake());
        assert!(!Message::Ping(1).is_handshake());
    }
}
