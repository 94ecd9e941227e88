//! Peer-list persistence
//!
//! Saves the white and gray lists to a JSON file at shutdown and reloads
//! them at startup, so a restarted node does not have to rediscover the
//! network from its bootstrap peers. Writes go through a temporary file and
//! an atomic rename; a crash mid-write leaves the previous file intact.

use crate::network::message::PeerlistEntry;
use crate::network::peerlist::PeerlistManager;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;
use thiserror::Error;

/// Current on-disk format version
const STORE_VERSION: u32 = 1;

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Unsupported peer store version: {0}")]
    UnsupportedVersion(u32),
}

/// On-disk shape of the peer lists
#[derive(Debug, Serialize, Deserialize)]
struct PeerStoreFile {
    version: u32,
    white: Vec<PeerlistEntry>,
    gray: Vec<PeerlistEntry>,
}

/// Peer-list storage manager
pub struct PeerStore {
    path: PathBuf,
}

impl PeerStore {
    /// Create a store at `dir/peers.json`, creating the directory if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            path: dir.join("peers.json"),
        })
    }

    /// Whether a saved peer list exists
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Persist both peer lists
    pub fn save(&self, white: &[PeerlistEntry], gray: &[PeerlistEntry]) -> Result<(), StoreError> {
        let data = PeerStoreFile {
            version: STORE_VERSION,
            white: white.to_vec(),
            gray: gray.to_vec(),
        };

        // Write to a temporary file first, then rename into place
        let temp_path = self.path.with_extension("tmp");
        let file = fs::File::create(&temp_path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &data)?;
        fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    /// Load a peer-list manager with the given capacities
    ///
    /// A missing file yields an empty manager; a file written by a newer
    /// format version is refused rather than misread.
    pub fn load(
        &self,
        white_capacity: usize,
        gray_capacity: usize,
    ) -> Result<PeerlistManager, StoreError> {
        if !self.exists() {
            return Ok(PeerlistManager::new(white_capacity, gray_capacity));
        }

        let file = fs::File::open(&self.path)?;
        let reader = BufReader::new(file);
        let data: PeerStoreFile = serde_json::from_reader(reader)?;

        if data.version > STORE_VERSION {
            return Err(StoreError::UnsupportedVersion(data.version));
        }

        Ok(PeerlistManager::from_entries(
            white_capacity,
            gray_capacity,
            data.white,
            data.gray,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::message::NetworkAddress;
    use crate::network::peerlist::{GRAY_LIST_CAPACITY, WHITE_LIST_CAPACITY};
    use std::net::Ipv4Addr;

    fn entry(last_octet: u8) -> PeerlistEntry {
        PeerlistEntry {
            address: NetworkAddress::new(Ipv4Addr::new(8, 8, 8, last_octet), 18080),
            peer_id: last_octet as u64,
            last_seen: 1_700_000_000,
            pruning_seed: 0,
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = PeerStore::open(dir.path()).unwrap();

        store.save(&[entry(1), entry(2)], &[entry(3)]).unwrap();
        assert!(store.exists());

        let mgr = store.load(WHITE_LIST_CAPACITY, GRAY_LIST_CAPACITY).unwrap();
        assert_eq!(mgr.white().len(), 2);
        assert_eq!(mgr.gray().len(), 1);
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = PeerStore::open(dir.path()).unwrap();

        let mgr = store.load(WHITE_LIST_CAPACITY, GRAY_LIST_CAPACITY).unwrap();
        assert!(mgr.white().is_empty());
        assert!(mgr.gray().is_empty());
    }

    #[test]
    fn test_newer_version_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = PeerStore::open(dir.path()).unwrap();

        let data = PeerStoreFile {
            version: STORE_VERSION + 1,
            white: vec![],
            gray: vec![],
        };
        fs::write(
            dir.path().join("peers.json"),
            serde_json::to_string(&data).unwrap(),
        )
        .unwrap();

        assert!(matches!(
            store.load(WHITE_LIST_CAPACITY, GRAY_LIST_CAPACITY),
            Err(StoreError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_save_overwrites_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = PeerStore::open(dir.path()).unwrap();

        store.save(&[entry(1)], &[]).unwrap();
        store.save(&[entry(2)], &[]).unwrap();

        let mgr = store.load(WHITE_LIST_CAPACITY, GRAY_LIST_CAPACITY).unwrap();
        assert_eq!(mgr.white().len(), 1);
        assert_eq!(
            mgr.white().entries()[0].address,
            NetworkAddress::new(Ipv4Addr::new(8, 8, 8, 2), 18080)
        );
        assert!(!dir.path().join("peers.tmp").exists());
    }
}
