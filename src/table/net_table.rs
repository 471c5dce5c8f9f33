use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::Result;

use crate::chord::index::ChordIndex;
use crate::chunk::chunk::Chunk;
use crate::chunk::protocol::{ChunkSnapshot, ConnectRequest, MSG_CONNECT, MSG_CONNECT_RESPONSE};
use crate::hub::service::Hub;
use crate::hub::types::PeerId;
use crate::spatial::{BoundingBox, SpatialIndex};
use crate::time::LogicalTime;

use super::store::TableStore;
use super::types::{Id, Revision, TableDescriptor, TableKind};

/// A named, templated collection whose items live in chunks. Owns the
/// local store, the locally held chunks and the per-table Chord index.
pub struct NetTable {
    store: Arc<TableStore>,
    hub: Arc<Hub>,
    chunks: RwLock<HashMap<Id, Arc<Chunk>>>,
    index: Mutex<Option<Arc<ChordIndex>>>,
    spatial: Mutex<Option<Arc<SpatialIndex>>>,
    lock_timeout: Duration,
    finger_count: usize,
}

impl NetTable {
    pub fn new(
        kind: TableKind,
        descriptor: TableDescriptor,
        hub: Arc<Hub>,
        linked: bool,
        lock_timeout: Duration,
        finger_count: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            store: Arc::new(TableStore::new(kind, descriptor, linked)),
            hub,
            chunks: RwLock::new(HashMap::new()),
            index: Mutex::new(None),
            spatial: Mutex::new(None),
            lock_timeout,
            finger_count,
        })
    }

    pub fn name(&self) -> String {
        self.store.name().to_string()
    }

    pub fn kind(&self) -> TableKind {
        self.store.kind()
    }

    pub fn store(&self) -> &Arc<TableStore> {
        &self.store
    }

    /// A fresh revision laid out after this table's template.
    pub fn new_revision(&self) -> Revision {
        Revision::from_template(self.store.descriptor())
    }

    // ======
    // CHUNKS
    // ======

    pub fn new_chunk(&self) -> Arc<Chunk> {
        self.new_chunk_with_id(Id::generate())
    }

    pub fn new_chunk_with_id(&self, chunk_id: Id) -> Arc<Chunk> {
        let chunk = Chunk::new(
            chunk_id.clone(),
            self.store.clone(),
            self.hub.clone(),
            self.lock_timeout,
        );
        let previous = self
            .chunks
            .write()
            .unwrap()
            .insert(chunk_id.clone(), chunk.clone());
        assert!(previous.is_none(), "chunk {} created twice", chunk_id);
        self.announce_possession(&chunk_id);
        chunk
    }

    fn announce_possession(&self, chunk_id: &Id) {
        if let Some(index) = self.index_handle() {
            let chunk_id = chunk_id.clone();
            let table = self.name();
            tokio::spawn(async move {
                if let Err(e) = index.announce_possession(&chunk_id).await {
                    tracing::warn!(
                        "Could not announce possession of {} in table {}: {}",
                        chunk_id,
                        table,
                        e
                    );
                }
            });
        }
    }

    pub fn has_chunk(&self, chunk_id: &Id) -> bool {
        self.chunks.read().unwrap().contains_key(chunk_id)
    }

    pub fn get_chunk_local(&self, chunk_id: &Id) -> Option<Arc<Chunk>> {
        self.chunks.read().unwrap().get(chunk_id).cloned()
    }

    pub fn active_chunk_count(&self) -> usize {
        self.chunks.read().unwrap().len()
    }

    pub fn active_chunk_ids(&self) -> BTreeSet<Id> {
        self.chunks.read().unwrap().keys().cloned().collect()
    }

    /// Local hit, or a lookup through the index followed by a connect to
    /// one of the holders.
    pub async fn get_chunk(&self, chunk_id: &Id) -> Result<Arc<Chunk>> {
        if let Some(chunk) = self.get_chunk_local(chunk_id) {
            return Ok(chunk);
        }
        let index = self
            .index_handle()
            .ok_or_else(|| anyhow::anyhow!("table {} has no index", self.name()))?;
        let holders = index.seek_holders(chunk_id).await?;
        for holder in holders {
            if &holder == self.hub.own_id() {
                continue;
            }
            match self.connect_to(chunk_id, &holder).await {
                Ok(chunk) => return Ok(chunk),
                Err(e) => {
                    tracing::warn!("Connect to holder {} failed: {}", holder, e);
                }
            }
        }
        anyhow::bail!(
            "no reachable holder of chunk {} in table {}",
            chunk_id,
            self.name()
        )
    }

    /// Becomes a holder of `chunk_id` by requesting the full state from
    /// `peer`. The state is installed before the chunk serves requests.
    pub async fn connect_to(&self, chunk_id: &Id, peer: &PeerId) -> Result<Arc<Chunk>> {
        let request = ConnectRequest {
            table: self.name(),
            chunk_id: chunk_id.clone(),
        };
        let reply = self.hub.request(peer, MSG_CONNECT, &request).await?;
        anyhow::ensure!(
            reply.is_type(MSG_CONNECT_RESPONSE),
            "connect to {} answered {}",
            peer,
            reply.msg_type
        );
        let snapshot: ChunkSnapshot = reply.payload()?;
        let chunk = Chunk::from_snapshot(
            snapshot,
            self.store.clone(),
            self.hub.clone(),
            self.lock_timeout,
        )?;

        let chunk = {
            let mut chunks = self.chunks.write().unwrap();
            chunks.entry(chunk_id.clone()).or_insert(chunk).clone()
        };
        self.announce_possession(chunk_id);
        Ok(chunk)
    }

    // ==========
    // DATA PLANE
    // ==========

    pub async fn insert(
        &self,
        time: LogicalTime,
        chunk: &Arc<Chunk>,
        revision: &mut Revision,
    ) -> Result<()> {
        chunk.insert(time, revision).await
    }

    /// Routes the update to the chunk named by the revision's `chunk_id`.
    pub async fn update(&self, revision: &mut Revision) -> Result<()> {
        anyhow::ensure!(
            self.kind() == TableKind::Cru,
            "table {} is insert-only",
            self.name()
        );
        let chunk = self.get_chunk(&revision.chunk_id.clone()).await?;
        chunk.update(revision).await
    }

    pub fn get_by_id(&self, id: &Id, time: LogicalTime) -> Option<Revision> {
        self.store.get_by_id(id, time)
    }

    pub fn dump(&self, time: LogicalTime) -> HashMap<Id, Revision> {
        self.store.dump(time)
    }

    pub fn count(&self, time: LogicalTime) -> usize {
        self.store.count(time)
    }

    // =====
    // INDEX
    // =====

    pub fn create_index(&self) {
        let index = ChordIndex::new(self.name(), self.hub.clone(), self.finger_count);
        index.create();
        let previous = self.index.lock().unwrap().replace(index);
        assert!(previous.is_none(), "index of {} built twice", self.name());
    }

    pub async fn join_index(&self, entry_point: &PeerId) -> Result<()> {
        let index = ChordIndex::new(self.name(), self.hub.clone(), self.finger_count);
        {
            let mut slot = self.index.lock().unwrap();
            assert!(slot.is_none(), "index of {} built twice", self.name());
            *slot = Some(index.clone());
        }
        index.join(entry_point).await
    }

    pub fn index_handle(&self) -> Option<Arc<ChordIndex>> {
        self.index.lock().unwrap().clone()
    }

    // =============
    // SPATIAL INDEX
    // =============

    /// The spatial overlay stores its cells in the table's Chord index,
    /// which therefore has to exist first.
    pub fn create_spatial_index(
        &self,
        bounds: BoundingBox,
        subdivision: Vec<usize>,
    ) -> Result<()> {
        let index = self
            .index_handle()
            .ok_or_else(|| anyhow::anyhow!("table {} has no index", self.name()))?;
        let spatial = SpatialIndex::new(self.name(), bounds, subdivision, index, self.hub.clone());
        let previous = self.spatial.lock().unwrap().replace(spatial);
        anyhow::ensure!(
            previous.is_none(),
            "spatial index of {} built twice",
            self.name()
        );
        Ok(())
    }

    pub fn spatial_handle(&self) -> Option<Arc<SpatialIndex>> {
        self.spatial.lock().unwrap().clone()
    }

    fn spatial(&self) -> Result<Arc<SpatialIndex>> {
        self.spatial_handle()
            .ok_or_else(|| anyhow::anyhow!("table {} has no spatial index", self.name()))
    }

    pub async fn register_chunk_in_space(
        &self,
        chunk_id: &Id,
        query: &BoundingBox,
    ) -> Result<()> {
        self.spatial()?.register_chunk(chunk_id, query).await
    }

    pub async fn get_chunks_in_bounding_box(&self, query: &BoundingBox) -> Result<BTreeSet<Id>> {
        self.spatial()?.chunks_in(query).await
    }

    pub async fn listen_to_space(&self, query: &BoundingBox) -> Result<()> {
        self.spatial()?.listen(query).await
    }

    // =========
    // LIFECYCLE
    // =========

    /// Requests participation on every active chunk; returns the total
    /// number of acceptances.
    pub async fn share_all_chunks(&self) -> usize {
        let chunks: Vec<Arc<Chunk>> = self.chunks.read().unwrap().values().cloned().collect();
        let mut accepted = 0;
        for chunk in chunks {
            accepted += chunk.request_participation().await;
        }
        accepted
    }

    pub async fn leave_all_chunks(&self) {
        let chunks: Vec<Arc<Chunk>> = self.chunks.read().unwrap().values().cloned().collect();
        for chunk in chunks {
            if let Err(e) = chunk.leave().await {
                tracing::warn!("Leaving chunk {} failed: {}", chunk.id(), e);
            }
        }
        self.chunks.write().unwrap().clear();
    }

    pub async fn kill(&self) {
        self.leave_all_chunks().await;
        let index = self.index.lock().unwrap().take();
        if let Some(index) = index {
            index.leave().await;
        }
        self.spatial.lock().unwrap().take();
    }
}
