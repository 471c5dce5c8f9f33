use std::collections::BTreeSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::hub::types::PeerId;
use crate::table::types::Id;

/// Position on the ring. The keyspace is fixed at `[0, 2^16)`.
pub type Key = u16;

/// Maximum number of fingers; also the width of the keyspace in bits.
pub const M: usize = 16;

/// Ring key of a peer, derived from its address.
pub fn peer_key(peer: &PeerId) -> Key {
    hash_key(peer.address())
}

/// Ring key of an index entry.
pub fn hash_key(data: &str) -> Key {
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    hasher.finish() as Key
}

/// The ith finger tracks the best-known successor of `own_key + 2^i`.
#[derive(Debug, Clone)]
pub struct Finger {
    pub base_key: Key,
    pub peer: PeerId,
}

/// One replicated index entry: the peers registered under a key (chunk
/// holders, or listeners of a spatial cell) and the chunk ids registered
/// under it (spatial cells only).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexEntry {
    pub peers: BTreeSet<PeerId>,
    pub chunks: BTreeSet<Id>,
}

impl IndexEntry {
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty() && self.chunks.is_empty()
    }

    pub fn merge(&mut self, other: IndexEntry) {
        self.peers.extend(other.peers);
        self.chunks.extend(other.chunks);
    }
}

/// Store key under which a chunk's holder set is indexed.
pub fn chunk_entry_key(chunk_id: &Id) -> String {
    format!("chunk/{}", chunk_id.hex())
}
