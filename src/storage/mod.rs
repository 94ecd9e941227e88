//! Persistence layer
//!
//! Only the peer lists survive restarts here; blockchain storage belongs to
//! the chain collaborator.

pub mod peerstore;

pub use peerstore::{PeerStore, StoreError};
