//! P2P networking module
//!
//! Provides the peer-to-peer relay layer of the node:
//! - Framed TCP connections with handshake gating
//! - White/gray peer lists with reputation tracking
//! - Periodic peer exchange (timed sync) and keepalive
//! - Lite-block propagation with missing-transaction recovery

pub mod lite_block;
pub mod message;
pub mod node;
pub mod peer;
pub mod peerlist;
pub mod server;

pub use lite_block::{
    assemble_block, missing_transactions, FillOutcome, LiteBlockTable, PendingLiteBlock,
};
pub use message::{
    BasicNodeData, LiteBlock, Message, MissingTxsRequest, MissingTxsResponse, NetworkAddress,
    NodeFlags, PeerlistEntry, MAGIC, MAINNET_NETWORK_ID, MAX_MESSAGE_SIZE,
    MAX_PEERS_IN_HANDSHAKE, MIN_PROTOCOL_VERSION, PROTOCOL_VERSION,
};
pub use node::{Node, NodeConfig, NodeError, NodeStatus, RelayFilter};
pub use peer::{
    ConnectionState, PeerError, PeerHandle, PeerInfo, PeerManager, DESIRED_OUTBOUND, MAX_INBOUND,
};
pub use peerlist::{
    Peerlist, PeerlistManager, GRAY_LIST_CAPACITY, MAX_CONNECT_FAILURES, WHITE_LIST_CAPACITY,
};
pub use server::{connect_to_peer, Listener, MessageCodec, CONNECT_TIMEOUT, DRAIN_TIMEOUT};
