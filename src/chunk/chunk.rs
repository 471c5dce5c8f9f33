use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::time::Instant;

use crate::hub::service::Hub;
use crate::hub::types::{Envelope, PeerId, TYPE_ACK, TYPE_REDUNDANT};
use crate::table::store::TableStore;
use crate::table::types::{Id, Revision};
use crate::time::LogicalTime;

use super::lock::ChunkLock;
use super::protocol::*;

pub struct Chunk {
    id: Id,
    table: String,
    hub: Arc<Hub>,
    store: Arc<TableStore>,
    peers: RwLock<BTreeSet<PeerId>>,
    lock: ChunkLock,
    lock_timeout: Duration,
}

impl Chunk {
    /// A chunk created locally; the creator is the sole holder.
    pub fn new(
        id: Id,
        store: Arc<TableStore>,
        hub: Arc<Hub>,
        lock_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            table: store.name().to_string(),
            hub,
            store,
            peers: RwLock::new(BTreeSet::new()),
            lock: ChunkLock::new(),
            lock_timeout,
        })
    }

    /// A chunk installed from a state transfer. The snapshot's revisions
    /// are patched in before the chunk serves requests.
    pub fn from_snapshot(
        snapshot: ChunkSnapshot,
        store: Arc<TableStore>,
        hub: Arc<Hub>,
        lock_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let own = hub.own_id().clone();
        let peers: BTreeSet<PeerId> = snapshot
            .peers
            .into_iter()
            .filter(|peer| peer != &own)
            .collect();
        for revision in snapshot.revisions {
            store.patch(revision)?;
        }
        Ok(Arc::new(Self {
            id: snapshot.chunk_id,
            table: snapshot.table,
            hub,
            store,
            peers: RwLock::new(peers),
            lock: ChunkLock::new(),
            lock_timeout,
        }))
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn store(&self) -> &Arc<TableStore> {
        &self.store
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn peers(&self) -> BTreeSet<PeerId> {
        self.peers.read().unwrap().clone()
    }

    pub fn peer_size(&self) -> usize {
        self.peers.read().unwrap().len()
    }

    pub fn lock(&self) -> &ChunkLock {
        &self.lock
    }

    pub fn dump(&self, time: LogicalTime) -> std::collections::HashMap<Id, Revision> {
        self.store.dump_chunk(&self.id, time)
    }

    pub fn count(&self, time: LogicalTime) -> usize {
        self.dump(time).len()
    }

    // =========
    // READ LOCK
    // =========

    pub async fn read_lock(&self) -> Result<()> {
        self.lock
            .read_lock(Instant::now() + self.lock_timeout)
            .await
    }

    pub async fn read_unlock(&self) {
        self.lock.read_unlock().await;
    }

    // ==========
    // WRITE LOCK
    // ==========

    /// Acquires the distributed write lock. One voting round per retry:
    /// the request floods the holder star, the tally decides, a lost round
    /// releases its partial grants and backs off.
    pub async fn write_lock(&self) -> Result<()> {
        let own = self.hub.own_id().clone();
        let deadline = Instant::now() + self.lock_timeout;

        loop {
            self.lock.begin_local_candidacy(&own, deadline).await?;

            let peers = self.peers();
            let request_id = Id::generate();
            let mut tree: Vec<PeerId> = Vec::with_capacity(peers.len() + 1);
            tree.push(own.clone());
            tree.extend(peers.iter().cloned());

            let request = LockRequest {
                table: self.table.clone(),
                chunk_id: self.id.clone(),
                requester: own.clone(),
                request_id,
                tree,
            };

            // Own vote counts as a grant.
            let mut granted = 1usize;
            let mut conflicts = 0usize;
            let mut held_conflict = false;
            let mut reading = false;
            let mut rivals: Vec<PeerId> = Vec::new();
            let mut granted_peers: Vec<PeerId> = Vec::new();

            for peer in &peers {
                match self.hub.request(peer, MSG_LOCK, &request).await {
                    Ok(reply) if reply.is_type(MSG_LOCK_RESPONSE) => {
                        match reply.payload::<LockResponse>().map(|r| r.vote) {
                            Ok(LockVote::Granted) => {
                                granted += 1;
                                granted_peers.push(peer.clone());
                            }
                            Ok(LockVote::HaveSeen) => {}
                            Ok(LockVote::AmReading) => reading = true,
                            Ok(LockVote::Conflict { rival, held }) => {
                                conflicts += 1;
                                held_conflict |= held;
                                rivals.push(rival);
                            }
                            Err(e) => {
                                tracing::warn!("Bad lock response from {}: {}", peer, e);
                            }
                        }
                    }
                    Ok(reply) => {
                        tracing::warn!(
                            "Lock request to {} answered {}",
                            peer,
                            reply.msg_type
                        );
                    }
                    Err(e) => {
                        tracing::warn!("Lock request to {} failed: {}", peer, e);
                    }
                }
            }

            let won = !reading
                && !held_conflict
                && (granted > conflicts
                    || (granted == conflicts
                        && rivals.iter().all(|rival| &own < rival)));

            if won {
                self.lock.promote(&own).await;
                return Ok(());
            }

            // Lost round: release partial grants, back off, try again.
            let release = UnlockRequest {
                table: self.table.clone(),
                chunk_id: self.id.clone(),
                requester: own.clone(),
            };
            for peer in granted_peers {
                self.hub.try_request(&peer, MSG_UNLOCK, &release).await;
            }
            self.lock.revert(&own).await;

            if Instant::now() >= deadline {
                anyhow::bail!(
                    "write lock on chunk {} timed out after {:?}",
                    self.id,
                    self.lock_timeout
                );
            }
            let backoff = 3 + rand::random::<u64>() % 20;
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }
    }

    /// Releases the write lock towards the current peer set.
    pub async fn unlock(&self) {
        let peers = self.peers();
        self.unlock_peers(&peers).await;
    }

    /// Releases towards an explicit peer set (connect changes the set while
    /// the lock is held).
    async fn unlock_peers(&self, peers: &BTreeSet<PeerId>) {
        let own = self.hub.own_id().clone();
        let release = UnlockRequest {
            table: self.table.clone(),
            chunk_id: self.id.clone(),
            requester: own.clone(),
        };
        for peer in peers {
            self.hub.try_request(peer, MSG_UNLOCK, &release).await;
        }
        self.lock.release_local(&own).await;
    }

    // ===========
    // REPLICATION
    // ===========

    /// Insert under a freshly taken write lock.
    pub async fn insert(&self, time: LogicalTime, revision: &mut Revision) -> Result<()> {
        self.write_lock().await?;
        let result = self.insert_locked(time, revision).await;
        self.unlock().await;
        result
    }

    /// Insert while the caller holds the write lock.
    pub async fn insert_locked(&self, time: LogicalTime, revision: &mut Revision) -> Result<()> {
        revision.chunk_id = self.id.clone();
        self.store.insert(time, revision)?;
        self.multicast_revision(MSG_INSERT, revision).await
    }

    pub async fn bulk_insert_locked(
        &self,
        time: LogicalTime,
        revisions: &mut BTreeMap<Id, Revision>,
    ) -> Result<()> {
        for revision in revisions.values_mut() {
            self.insert_locked(time, revision).await?;
        }
        Ok(())
    }

    /// Update under a freshly taken write lock (CRU tables only). The
    /// update time is sampled after the lock is held, so it is strictly
    /// greater than every committed update time.
    pub async fn update(&self, revision: &mut Revision) -> Result<()> {
        self.write_lock().await?;
        let time = self.hub.sample();
        let result = self.update_locked(time, revision).await;
        self.unlock().await;
        result
    }

    pub async fn update_locked(&self, time: LogicalTime, revision: &mut Revision) -> Result<()> {
        revision.chunk_id = self.id.clone();
        self.store.update(time, revision)?;
        self.multicast_revision(MSG_UPDATE, revision).await
    }

    async fn multicast_revision(&self, msg_type: &str, revision: &Revision) -> Result<()> {
        let request = RevisionRequest {
            table: self.table.clone(),
            chunk_id: self.id.clone(),
            revision: revision.clone(),
        };
        self.multicast_expect_ack(msg_type, &request).await
    }

    async fn multicast_expect_ack<T: Serialize>(&self, msg_type: &str, payload: &T) -> Result<()> {
        for peer in self.peers() {
            let reply = self.hub.request(&peer, msg_type, payload).await?;
            anyhow::ensure!(
                reply.is_type(TYPE_ACK) || reply.is_type(TYPE_REDUNDANT),
                "{} to {} answered {}",
                msg_type,
                peer,
                reply.msg_type
            );
        }
        Ok(())
    }

    /// Asks every hub peer that is not yet a holder to participate;
    /// returns how many accepted.
    pub async fn request_participation(&self) -> usize {
        let holders = self.peers();
        let request = ParticipationRequest {
            table: self.table.clone(),
            chunk_id: self.id.clone(),
        };
        let mut accepted = 0;
        for peer in self.hub.peers() {
            if holders.contains(&peer) {
                continue;
            }
            match self.hub.request(&peer, MSG_PARTICIPATION, &request).await {
                Ok(reply) if reply.is_ack() => accepted += 1,
                Ok(reply) => {
                    tracing::info!("Peer {} declined participation: {}", peer, reply.msg_type)
                }
                Err(e) => tracing::warn!("Participation request to {} failed: {}", peer, e),
            }
        }
        accepted
    }

    /// Relinquishes this holder's copy. Serialized by the write lock so no
    /// unacknowledged write can be stranded.
    pub async fn leave(&self) -> Result<()> {
        self.write_lock().await?;
        let own = self.hub.own_id().clone();
        let request = PeerRequest {
            table: self.table.clone(),
            chunk_id: self.id.clone(),
            peer: own.clone(),
        };
        for peer in self.peers() {
            self.hub.try_request(&peer, MSG_LEAVE, &request).await;
        }
        // The other holders dropped us together with our lock state; only
        // the local state is left to clear.
        self.lock.release_local(&own).await;
        self.peers.write().unwrap().clear();
        Ok(())
    }

    // ========
    // HANDLERS
    // ========

    /// A peer wants the chunk: serialize the peer-set change with the write
    /// lock, tell the other holders, hand over the full state.
    pub async fn handle_connect(&self, requester: PeerId) -> Result<ChunkSnapshot> {
        self.write_lock().await?;
        let old_peers = self.peers();

        let new_peer = PeerRequest {
            table: self.table.clone(),
            chunk_id: self.id.clone(),
            peer: requester.clone(),
        };
        let mut result = Ok(());
        for peer in &old_peers {
            if let Err(e) = self.hub.request(peer, MSG_NEW_PEER, &new_peer).await {
                result = Err(e);
                break;
            }
        }

        let snapshot = if result.is_ok() {
            self.peers.write().unwrap().insert(requester.clone());
            let mut holder_list: Vec<PeerId> = old_peers.iter().cloned().collect();
            holder_list.push(self.hub.own_id().clone());
            Ok(ChunkSnapshot {
                table: self.table.clone(),
                chunk_id: self.id.clone(),
                peers: holder_list,
                revisions: self
                    .dump(self.hub.sample())
                    .into_values()
                    .collect(),
            })
        } else {
            Err(result.unwrap_err())
        };

        self.unlock_peers(&old_peers).await;
        snapshot
    }

    /// One step of the spanning-tree lock protocol: vote locally, then
    /// forward to every known holder not yet in the tree.
    pub async fn handle_lock_request(
        &self,
        requester: PeerId,
        request_id: Id,
        tree: Vec<PeerId>,
    ) -> LockVote {
        let vote = self.lock.vote(&requester, &request_id).await;
        if vote != LockVote::Granted {
            return vote;
        }

        let children: Vec<PeerId> = self
            .peers()
            .into_iter()
            .filter(|peer| !tree.contains(peer))
            .collect();
        if children.is_empty() {
            return LockVote::Granted;
        }

        let mut extended = tree;
        extended.push(self.hub.own_id().clone());
        extended.extend(children.iter().cloned());
        let request = LockRequest {
            table: self.table.clone(),
            chunk_id: self.id.clone(),
            requester: requester.clone(),
            request_id,
            tree: extended,
        };

        for child in children {
            match self.hub.request(&child, MSG_LOCK, &request).await {
                Ok(reply) if reply.is_type(MSG_LOCK_RESPONSE) => {
                    match reply.payload::<LockResponse>().map(|r| r.vote) {
                        Ok(LockVote::Granted) | Ok(LockVote::HaveSeen) => {}
                        Ok(other) => return other,
                        Err(e) => {
                            tracing::warn!("Bad lock response from {}: {}", child, e);
                        }
                    }
                }
                _ => {
                    tracing::warn!("Lock forward to {} failed", child);
                }
            }
        }
        LockVote::Granted
    }

    pub async fn handle_unlock(&self, requester: PeerId) -> Envelope {
        if self.lock.remote_release(&requester).await {
            Envelope::ack()
        } else {
            Envelope::redundant()
        }
    }

    pub fn handle_insert(&self, revision: Revision) -> Result<Envelope> {
        match self.store.patch(revision)? {
            crate::table::store::PatchOutcome::Applied => Ok(Envelope::ack()),
            crate::table::store::PatchOutcome::Redundant => Ok(Envelope::redundant()),
        }
    }

    pub fn handle_update(&self, revision: Revision) -> Result<Envelope> {
        self.handle_insert(revision)
    }

    pub fn handle_new_peer(&self, peer: PeerId) -> Envelope {
        let inserted = self.peers.write().unwrap().insert(peer);
        if inserted {
            Envelope::ack()
        } else {
            Envelope::redundant()
        }
    }

    pub async fn handle_leave(&self, leaver: PeerId) -> Envelope {
        self.peers.write().unwrap().remove(&leaver);
        self.lock.remote_release(&leaver).await;
        Envelope::ack()
    }
}
