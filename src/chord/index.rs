use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use dashmap::DashMap;

use crate::hub::service::Hub;
use crate::hub::types::PeerId;
use crate::table::types::Id;

use super::protocol::*;
use super::types::{chunk_entry_key, hash_key, peer_key, Finger, IndexEntry, Key, M};

/// Ring arithmetic: true when the clockwise arc from `from` (inclusive) to
/// `to` (exclusive) covers `key`. `from == to` denotes the full ring.
pub fn is_in(key: Key, from_inclusive: Key, to_exclusive: Key) -> bool {
    if key == from_inclusive {
        return true;
    }
    if from_inclusive == to_exclusive {
        return true;
    }
    arc_strictly_between(key, from_inclusive, to_exclusive)
}

fn arc_strictly_between(key: Key, from: Key, to: Key) -> bool {
    if from <= to {
        from < key && key < to
    } else {
        // The arc passes 0.
        from < key || key < to
    }
}

/// `(from, to]`: the range a successor is responsible for.
fn in_successor_range(key: Key, from: Key, to: Key) -> bool {
    if from == to {
        return true;
    }
    if key == to {
        return true;
    }
    if key == from {
        return false;
    }
    arc_strictly_between(key, from, to)
}

struct RingState {
    predecessor: PeerId,
    successor: PeerId,
    fingers: Vec<Finger>,
    /// Known remote ring peers; recomputed from the links so that records
    /// nothing references are dropped.
    bag: BTreeSet<PeerId>,
}

impl RingState {
    fn recompute_bag(&mut self, own: &PeerId) {
        self.bag.clear();
        for finger in &self.fingers {
            if &finger.peer != own {
                self.bag.insert(finger.peer.clone());
            }
        }
        if &self.successor != own {
            self.bag.insert(self.successor.clone());
        }
        if &self.predecessor != own {
            self.bag.insert(self.predecessor.clone());
        }
    }
}

/// One ring membership of this peer. Handles both the routing state and the
/// index entries this peer is responsible for.
pub struct ChordIndex {
    table: String,
    hub: Arc<Hub>,
    finger_count: usize,
    own_key: Key,
    initialized: AtomicBool,
    terminating: AtomicBool,
    ring: Mutex<RingState>,
    entries: DashMap<String, IndexEntry>,
}

impl ChordIndex {
    pub fn new(table: impl Into<String>, hub: Arc<Hub>, finger_count: usize) -> Arc<Self> {
        let own = hub.own_id().clone();
        let own_key = peer_key(&own);
        let finger_count = finger_count.clamp(1, M);
        let fingers = (0..finger_count)
            .map(|i| Finger {
                base_key: own_key.wrapping_add(1 << i),
                peer: own.clone(),
            })
            .collect();
        Arc::new(Self {
            table: table.into(),
            hub,
            finger_count,
            own_key,
            initialized: AtomicBool::new(false),
            terminating: AtomicBool::new(false),
            ring: Mutex::new(RingState {
                predecessor: own.clone(),
                successor: own,
                fingers,
                bag: BTreeSet::new(),
            }),
            entries: DashMap::new(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn own_key(&self) -> Key {
        self.own_key
    }

    fn own_id(&self) -> &PeerId {
        self.hub.own_id()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Starts a fresh ring of one.
    pub fn create(&self) {
        tracing::info!(
            "Creating index for table {} with key {}",
            self.table,
            self.own_key
        );
        let mut ring = self.ring.lock().unwrap();
        let own = self.own_id().clone();
        for finger in ring.fingers.iter_mut() {
            finger.peer = own.clone();
        }
        ring.successor = own.clone();
        ring.predecessor = own;
        ring.bag.clear();
        drop(ring);
        self.initialized.store(true, Ordering::SeqCst);
    }

    /// Joins an existing ring through `other`: one find-successor per
    /// finger, then an eager notify to both neighbors.
    pub async fn join(&self, other: &PeerId) -> Result<()> {
        tracing::info!(
            "Joining index for table {} via {} (own key {})",
            self.table,
            other,
            self.own_key
        );
        let mut fingers = Vec::with_capacity(self.finger_count);
        for i in 0..self.finger_count {
            let base_key = self.own_key.wrapping_add(1 << i);
            let peer = self.find_successor_rpc(other, base_key).await?;
            fingers.push(Finger { base_key, peer });
        }
        let successor = fingers[0].peer.clone();
        let predecessor = self.get_predecessor_rpc(&successor).await?;
        anyhow::ensure!(
            peer_key(&predecessor) != self.own_key,
            "key collision joining ring of table {}: {} vs {}",
            self.table,
            predecessor,
            self.own_id()
        );

        {
            let mut ring = self.ring.lock().unwrap();
            ring.fingers = fingers;
            ring.successor = successor.clone();
            ring.predecessor = predecessor.clone();
            let own = self.own_id().clone();
            ring.recompute_bag(&own);
        }
        self.initialized.store(true, Ordering::SeqCst);

        self.notify_rpc(&predecessor).await?;
        self.notify_rpc(&successor).await?;
        Ok(())
    }

    /// Who holds the information associated with `key`.
    pub async fn find_successor(&self, key: Key) -> Result<PeerId> {
        anyhow::ensure!(
            self.is_initialized() && !self.terminating.load(Ordering::SeqCst),
            "index for table {} not initialized",
            self.table
        );
        if key == self.own_key {
            // Own responsibility range is (predecessor, own]; every node
            // answers the same for a node's own key.
            return Ok(self.own_id().clone());
        }
        let hop = {
            let ring = self.ring.lock().unwrap();
            if in_successor_range(key, self.own_key, peer_key(&ring.successor)) {
                return Ok(ring.successor.clone());
            }
            self.closest_preceding_finger(&ring, key)
        };
        if &hop == self.own_id() {
            // No closer finger known; the successor is the best answer.
            let ring = self.ring.lock().unwrap();
            return Ok(ring.successor.clone());
        }
        self.find_successor_rpc(&hop, key).await
    }

    fn closest_preceding_finger(&self, ring: &RingState, key: Key) -> PeerId {
        for finger in ring.fingers.iter().rev() {
            let finger_key = peer_key(&finger.peer);
            if finger_key != self.own_key
                && finger_key != key
                && arc_strictly_between(finger_key, self.own_key, key)
            {
                return finger.peer.clone();
            }
        }
        self.own_id().clone()
    }

    /// Leaves the ring: index entries migrate to the successor, then the
    /// leave is multicast so everyone drops the stale links.
    pub async fn leave(&self) {
        if !self.is_initialized() {
            return;
        }
        self.terminating.store(true, Ordering::SeqCst);
        let (successor, predecessor, bag) = {
            let ring = self.ring.lock().unwrap();
            (
                ring.successor.clone(),
                ring.predecessor.clone(),
                ring.bag.clone(),
            )
        };

        if &successor != self.own_id() {
            let entries: Vec<(String, IndexEntry)> = self
                .entries
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect();
            if !entries.is_empty() {
                let request = MigrateRequest {
                    table: self.table.clone(),
                    entries,
                };
                if self
                    .hub
                    .try_request(&successor, MSG_MIGRATE, &request)
                    .await
                    .is_none()
                {
                    tracing::warn!(
                        "Could not migrate index entries of table {} to {}",
                        self.table,
                        successor
                    );
                }
            }
        }

        let leave = LeaveRequest {
            table: self.table.clone(),
            leaver: self.own_id().clone(),
            predecessor,
            successor,
        };
        for peer in bag {
            self.hub.try_request(&peer, MSG_LEAVE, &leave).await;
        }
        self.entries.clear();
        self.initialized.store(false, Ordering::SeqCst);
    }

    // ========
    // HANDLERS
    // ========

    pub async fn handle_find_successor(&self, key: Key) -> Result<PeerId> {
        self.find_successor(key).await
    }

    pub fn handle_get_predecessor(&self) -> Result<PeerId> {
        anyhow::ensure!(
            self.is_initialized(),
            "index for table {} not initialized",
            self.table
        );
        Ok(self.ring.lock().unwrap().predecessor.clone())
    }

    /// Atomically re-points every link the candidate is a better fit for.
    /// The candidate enters the peer bag iff it was wired anywhere.
    pub fn handle_notify(&self, candidate: PeerId) {
        if &candidate == self.own_id() {
            return;
        }
        let mut ring = self.ring.lock().unwrap();
        if ring.bag.contains(&candidate) {
            // Already aware of the node.
            return;
        }
        let candidate_key = peer_key(&candidate);
        for finger in ring.fingers.iter_mut() {
            if is_in(candidate_key, finger.base_key, peer_key(&finger.peer)) {
                // No break intended: multiple fingers can share a peer.
                finger.peer = candidate.clone();
            }
        }
        if is_in(candidate_key, self.own_key, peer_key(&ring.successor)) {
            ring.successor = candidate.clone();
        }
        if is_in(candidate_key, peer_key(&ring.predecessor), self.own_key) {
            ring.predecessor = candidate.clone();
        }
        let own = self.own_id().clone();
        ring.recompute_bag(&own);
    }

    pub fn handle_leave(&self, leaver: &PeerId, predecessor: &PeerId, successor: &PeerId) {
        let mut ring = self.ring.lock().unwrap();
        for finger in ring.fingers.iter_mut() {
            if &finger.peer == leaver {
                finger.peer = successor.clone();
            }
        }
        if &ring.successor == leaver {
            ring.successor = successor.clone();
        }
        if &ring.predecessor == leaver {
            ring.predecessor = predecessor.clone();
        }
        let own = self.own_id().clone();
        ring.recompute_bag(&own);
    }

    pub fn handle_index_add(
        &self,
        key: &str,
        peer: Option<PeerId>,
        chunk: Option<Id>,
    ) -> IndexEntry {
        let mut entry = self.entries.entry(key.to_string()).or_default();
        if let Some(peer) = peer {
            entry.peers.insert(peer);
        }
        if let Some(chunk) = chunk {
            entry.chunks.insert(chunk);
        }
        entry.clone()
    }

    pub fn handle_index_get(&self, key: &str) -> IndexEntry {
        self.entries
            .get(key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn handle_migrate(&self, entries: Vec<(String, IndexEntry)>) {
        for (key, incoming) in entries {
            self.entries.entry(key).or_default().merge(incoming);
        }
    }

    // ==========
    // INDEX DATA
    // ==========

    /// Registers this peer as a holder of `chunk_id`.
    pub async fn announce_possession(&self, chunk_id: &Id) -> Result<()> {
        self.index_add(
            &chunk_entry_key(chunk_id),
            Some(self.own_id().clone()),
            None,
        )
        .await?;
        Ok(())
    }

    /// The peers that claim to hold `chunk_id`.
    pub async fn seek_holders(&self, chunk_id: &Id) -> Result<BTreeSet<PeerId>> {
        Ok(self.index_get(&chunk_entry_key(chunk_id)).await?.peers)
    }

    /// Adds to the entry stored at the key's successor; returns the entry
    /// after the addition.
    pub async fn index_add(
        &self,
        key: &str,
        peer: Option<PeerId>,
        chunk: Option<Id>,
    ) -> Result<IndexEntry> {
        let responsible = self.find_successor(hash_key(key)).await?;
        if &responsible == self.own_id() {
            return Ok(self.handle_index_add(key, peer, chunk));
        }
        let request = IndexAddRequest {
            table: self.table.clone(),
            key: key.to_string(),
            peer,
            chunk,
        };
        let reply = self.hub.request(&responsible, MSG_INDEX_ADD, &request).await?;
        anyhow::ensure!(
            reply.is_type(MSG_ENTRY_RESPONSE),
            "index_add to {} answered {}",
            responsible,
            reply.msg_type
        );
        Ok(reply.payload::<EntryResponse>()?.entry)
    }

    pub async fn index_get(&self, key: &str) -> Result<IndexEntry> {
        let responsible = self.find_successor(hash_key(key)).await?;
        if &responsible == self.own_id() {
            return Ok(self.handle_index_get(key));
        }
        let request = IndexGetRequest {
            table: self.table.clone(),
            key: key.to_string(),
        };
        let reply = self.hub.request(&responsible, MSG_INDEX_GET, &request).await?;
        anyhow::ensure!(
            reply.is_type(MSG_ENTRY_RESPONSE),
            "index_get to {} answered {}",
            responsible,
            reply.msg_type
        );
        Ok(reply.payload::<EntryResponse>()?.entry)
    }

    // ====
    // RPCS
    // ====

    async fn find_successor_rpc(&self, to: &PeerId, key: Key) -> Result<PeerId> {
        let request = FindSuccessorRequest {
            table: self.table.clone(),
            key,
        };
        let reply = self.hub.request(to, MSG_FIND_SUCCESSOR, &request).await?;
        anyhow::ensure!(
            reply.is_type(MSG_PEER_RESPONSE),
            "find_successor to {} answered {}",
            to,
            reply.msg_type
        );
        Ok(reply.payload::<PeerResponse>()?.peer)
    }

    async fn get_predecessor_rpc(&self, to: &PeerId) -> Result<PeerId> {
        let request = GetPredecessorRequest {
            table: self.table.clone(),
        };
        let reply = self.hub.request(to, MSG_GET_PREDECESSOR, &request).await?;
        anyhow::ensure!(
            reply.is_type(MSG_PEER_RESPONSE),
            "get_predecessor to {} answered {}",
            to,
            reply.msg_type
        );
        Ok(reply.payload::<PeerResponse>()?.peer)
    }

    async fn notify_rpc(&self, to: &PeerId) -> Result<()> {
        let request = NotifyRequest {
            table: self.table.clone(),
            peer: self.own_id().clone(),
        };
        let reply = self.hub.request(to, MSG_NOTIFY, &request).await?;
        anyhow::ensure!(reply.is_ack(), "notify to {} answered {}", to, reply.msg_type);
        Ok(())
    }

    /// Successor link, exposed for the ring-closure checks.
    pub fn successor(&self) -> PeerId {
        self.ring.lock().unwrap().successor.clone()
    }

    pub fn predecessor(&self) -> PeerId {
        self.ring.lock().unwrap().predecessor.clone()
    }
}
