//! White and gray peer lists
//!
//! Reputation-tiered address book: the white list holds peers with a
//! confirmed handshake history, the gray list holds candidates we heard of
//! but never verified. Both are bounded and ordered most-recently-seen
//! first so eviction is a truncation.

use crate::network::message::{NetworkAddress, PeerlistEntry};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

// =============================================================================
// Constants
// =============================================================================

/// Default capacity of the white list
pub const WHITE_LIST_CAPACITY: usize = 1000;

/// Default capacity of the gray list
pub const GRAY_LIST_CAPACITY: usize = 500;

/// Connection failures before an address is dropped entirely
pub const MAX_CONNECT_FAILURES: u32 = 3;

/// Seconds a freshly failed address is skipped by the connector
const FAILURE_COOLDOWN_SECS: u64 = 60;

/// Current unix time in seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// =============================================================================
// A single bounded, recency-ordered list
// =============================================================================

/// One peer list tier, ordered most-recently-seen first
#[derive(Debug, Clone)]
pub struct Peerlist {
    entries: Vec<PeerlistEntry>,
    capacity: usize,
}

impl Peerlist {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, address: &NetworkAddress) -> bool {
        self.entries.iter().any(|e| e.address == *address)
    }

    pub fn get(&self, address: &NetworkAddress) -> Option<&PeerlistEntry> {
        self.entries.iter().find(|e| e.address == *address)
    }

    /// Entries most-recently-seen first
    pub fn entries(&self) -> &[PeerlistEntry] {
        &self.entries
    }

    /// Insert or refresh an entry, keeping recency order and capacity
    ///
    /// An existing entry for the same address is replaced only if the new
    /// sighting is at least as recent. Overflow evicts the stalest entries.
    pub fn upsert(&mut self, entry: PeerlistEntry) {
        if let Some(pos) = self.entries.iter().position(|e| e.address == entry.address) {
            if self.entries[pos].last_seen > entry.last_seen {
                return;
            }
            self.entries.remove(pos);
        }

        let pos = self
            .entries
            .partition_point(|e| e.last_seen >= entry.last_seen);
        self.entries.insert(pos, entry);
        self.entries.truncate(self.capacity);
    }

    pub fn remove(&mut self, address: &NetworkAddress) -> Option<PeerlistEntry> {
        let pos = self.entries.iter().position(|e| e.address == *address)?;
        Some(self.entries.remove(pos))
    }
}

// =============================================================================
// Manager over both tiers
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    count: u32,
    last_at: u64,
}

/// Owns the white and gray lists and the failure bookkeeping
///
/// Invariant: an address is never in both lists at once.
#[derive(Debug)]
pub struct PeerlistManager {
    white: Peerlist,
    gray: Peerlist,
    failures: HashMap<NetworkAddress, FailureRecord>,
}

impl PeerlistManager {
    pub fn new(white_capacity: usize, gray_capacity: usize) -> Self {
        Self {
            white: Peerlist::new(white_capacity),
            gray: Peerlist::new(gray_capacity),
            failures: HashMap::new(),
        }
    }

    /// Restore from persisted entries
    pub fn from_entries(
        white_capacity: usize,
        gray_capacity: usize,
        white: Vec<PeerlistEntry>,
        gray: Vec<PeerlistEntry>,
    ) -> Self {
        let mut mgr = Self::new(white_capacity, gray_capacity);
        for entry in white {
            if entry.address.is_routable() {
                mgr.white.upsert(entry);
            }
        }
        for entry in gray {
            if entry.address.is_routable() && !mgr.white.contains(&entry.address) {
                mgr.gray.upsert(entry);
            }
        }
        mgr
    }

    pub fn white(&self) -> &Peerlist {
        &self.white
    }

    pub fn gray(&self) -> &Peerlist {
        &self.gray
    }

    /// Snapshot both lists for persistence
    pub fn snapshot(&self) -> (Vec<PeerlistEntry>, Vec<PeerlistEntry>) {
        (
            self.white.entries().to_vec(),
            self.gray.entries().to_vec(),
        )
    }

    /// Merge peer-list entries received from a remote node
    ///
    /// Unverified entries only ever land in gray; an address we already
    /// trust stays white with a refreshed timestamp at most. Remote
    /// timestamps are clamped to our clock so a malicious peer cannot pin
    /// entries at the head of the list.
    pub fn merge_peerlist(&mut self, entries: &[PeerlistEntry]) {
        let now = unix_now();
        for entry in entries {
            if !entry.address.is_routable() {
                continue;
            }
            let mut entry = *entry;
            entry.last_seen = entry.last_seen.min(now);

            if self.white.contains(&entry.address) {
                self.white.upsert(entry);
            } else {
                self.gray.upsert(entry);
            }
        }
    }

    /// White-list snippet for handshake and timed-sync replies
    ///
    /// Gray entries are never shared; handing out unverified addresses
    /// would amplify them across the network.
    pub fn peers_for_exchange(&self, count: usize) -> Vec<PeerlistEntry> {
        self.white.entries().iter().take(count).copied().collect()
    }

    /// Record a successful handshake with an address
    pub fn mark_connected(&mut self, address: NetworkAddress, peer_id: u64, pruning_seed: u32) {
        if !address.is_routable() {
            return;
        }
        self.gray.remove(&address);
        self.failures.remove(&address);
        self.white.upsert(PeerlistEntry {
            address,
            peer_id,
            last_seen: unix_now(),
            pruning_seed,
        });
    }

    /// Record a failed connection attempt or handshake
    ///
    /// A white entry is demoted to gray; repeated failures evict the
    /// address from both lists so dead peers cannot crowd out live ones.
    pub fn mark_failed(&mut self, address: NetworkAddress) {
        let record = self.failures.entry(address).or_insert(FailureRecord {
            count: 0,
            last_at: 0,
        });
        record.count += 1;
        record.last_at = unix_now();
        let count = record.count;

        if let Some(entry) = self.white.remove(&address) {
            self.gray.upsert(entry);
        }

        if count >= MAX_CONNECT_FAILURES {
            self.gray.remove(&address);
            self.failures.remove(&address);
        }
    }

    /// Addresses for the connector to dial: white first, then a random
    /// sample of gray, skipping excluded and recently failed addresses
    pub fn connection_candidates(
        &self,
        count: usize,
        exclude: &HashSet<NetworkAddress>,
    ) -> Vec<NetworkAddress> {
        let now = unix_now();
        let usable = |address: &NetworkAddress| {
            if exclude.contains(address) {
                return false;
            }
            match self.failures.get(address) {
                Some(r) => now.saturating_sub(r.last_at) >= FAILURE_COOLDOWN_SECS,
                None => true,
            }
        };

        let mut candidates: Vec<NetworkAddress> = self
            .white
            .entries()
            .iter()
            .map(|e| e.address)
            .filter(|a| usable(a))
            .take(count)
            .collect();

        if candidates.len() < count {
            let mut rng = rand::thread_rng();
            let gray_pool: Vec<NetworkAddress> = self
                .gray
                .entries()
                .iter()
                .map(|e| e.address)
                .filter(|a| usable(a) && !candidates.contains(a))
                .collect();
            candidates.extend(
                gray_pool
                    .choose_multiple(&mut rng, count - candidates.len())
                    .copied(),
            );
        }

        candidates
    }
}

impl Default for PeerlistManager {
    fn default() -> Self {
        Self::new(WHITE_LIST_CAPACITY, GRAY_LIST_CAPACITY)
    }
}

// =============================================================================
// Tests
// =============================================================================
