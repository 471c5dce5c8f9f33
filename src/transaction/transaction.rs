use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;

use crate::chunk::chunk::Chunk;
use crate::hub::service::Hub;
use crate::table::net_table::NetTable;
use crate::table::types::{Id, Revision};
use crate::time::LogicalTime;

use super::chunk_transaction::{ChunkTransaction, Conflict};

/// Speculative view of one chunk's staged revisions while a parallel
/// commit is in flight.
pub struct CommitFuture {
    pub staged: HashMap<Id, Revision>,
}

/// `chunk_id -> CommitFuture` of an in-flight parallel commit.
pub type CommitFutureTree = HashMap<Id, CommitFuture>;

/// `table -> conflicts` produced by a merge.
pub type ConflictMap = HashMap<String, Vec<Conflict>>;

/// Serializable transaction over an arbitrary set of chunks.
pub struct Transaction {
    hub: Arc<Hub>,
    begin_time: LogicalTime,
    /// Keyed by chunk id; the ascending key order is the lock order.
    chunk_transactions: BTreeMap<Id, ChunkTransaction>,
    futures: Option<CommitFutureTree>,
    futures_detached: bool,
    commit_handle: Option<JoinHandle<Result<bool>>>,
    finalized: bool,
}

impl Transaction {
    pub fn begin(hub: Arc<Hub>) -> Self {
        let begin_time = hub.sample();
        Self {
            hub,
            begin_time,
            chunk_transactions: BTreeMap::new(),
            futures: None,
            futures_detached: false,
            commit_handle: None,
            finalized: false,
        }
    }

    /// A transaction that may read through the staged state of an in-flight
    /// parallel commit.
    pub fn begin_with_futures(hub: Arc<Hub>, futures: CommitFutureTree) -> Self {
        let mut transaction = Self::begin(hub);
        transaction.futures = Some(futures);
        transaction
    }

    pub fn begin_time(&self) -> LogicalTime {
        self.begin_time
    }

    fn assert_open(&self) {
        assert!(!self.finalized, "modifying a finalized transaction");
    }

    fn chunk_transaction(&mut self, chunk: &Arc<Chunk>) -> &mut ChunkTransaction {
        let begin_time = self.begin_time;
        self.chunk_transactions
            .entry(chunk.id().clone())
            .or_insert_with(|| ChunkTransaction::with_begin_time(begin_time, chunk.clone()))
    }

    pub fn insert(
        &mut self,
        table: &Arc<NetTable>,
        chunk: &Arc<Chunk>,
        revision: Revision,
    ) -> Result<()> {
        self.assert_open();
        anyhow::ensure!(
            chunk.table() == table.name(),
            "chunk {} does not belong to table {}",
            chunk.id(),
            table.name()
        );
        self.chunk_transaction(chunk).insert(revision)
    }

    /// Routes the update to the chunk named by the revision's `chunk_id`.
    pub async fn update(&mut self, table: &Arc<NetTable>, revision: Revision) -> Result<()> {
        self.assert_open();
        let chunk = table.get_chunk(&revision.chunk_id).await?;
        self.chunk_transaction(&chunk).update(revision)
    }

    /// Staged (or speculative, when futures are attached) value first,
    /// otherwise a read at this transaction's begin time.
    pub async fn get_by_id(
        &self,
        id: &Id,
        _table: &Arc<NetTable>,
        chunk: &Arc<Chunk>,
    ) -> Result<Option<Revision>> {
        if let Some(futures) = &self.futures {
            for future in futures.values() {
                if let Some(revision) = future.staged.get(id) {
                    return Ok(Some(revision.clone()));
                }
            }
        }
        if let Some(own) = self.chunk_transactions.get(chunk.id()) {
            return own.get_by_id(id).await;
        }
        ChunkTransaction::with_begin_time(self.begin_time, chunk.clone())
            .get_by_id(id)
            .await
    }

    pub async fn dump_chunk(&self, chunk: &Arc<Chunk>) -> Result<HashMap<Id, Revision>> {
        match self.chunk_transactions.get(chunk.id()) {
            Some(own) => own.dump().await,
            None => {
                ChunkTransaction::with_begin_time(self.begin_time, chunk.clone())
                    .dump()
                    .await
            }
        }
    }

    pub fn num_changed_items(&self) -> usize {
        self.chunk_transactions
            .values()
            .map(|ct| ct.change_count())
            .sum()
    }

    /// Serialized commit over all touched chunks. On success the staged
    /// state is consumed and the transaction is rebased at the commit, so
    /// it can be reused for the next batch.
    pub async fn commit(&mut self) -> Result<bool> {
        self.assert_open();
        assert!(
            self.futures.is_none() || self.futures_detached,
            "commit with attached parallel futures; join and detach them first"
        );
        let map = std::mem::take(&mut self.chunk_transactions);
        let (map, result) = commit_map(self.hub.clone(), map).await;
        match result {
            Ok(true) => {
                self.begin_time = self.hub.sample();
                Ok(true)
            }
            other => {
                self.chunk_transactions = map;
                other
            }
        }
    }

    /// Rebases a failed transaction: `(rebased, conflicts)` such that the
    /// rebased transaction commits against the post-state and every staged
    /// change is either carried over or reported as a conflict.
    pub async fn merge(&self) -> Result<(Transaction, ConflictMap)> {
        let mut rebased = Transaction::begin(self.hub.clone());
        let mut conflicts: ConflictMap = HashMap::new();
        for chunk_transaction in self.chunk_transactions.values() {
            let (rebased_ct, ct_conflicts) =
                chunk_transaction.merge(rebased.begin_time).await?;
            if !rebased_ct.is_empty() {
                rebased
                    .chunk_transactions
                    .insert(chunk_transaction.chunk().id().clone(), rebased_ct);
            }
            if !ct_conflicts.is_empty() {
                conflicts
                    .entry(chunk_transaction.chunk().table().to_string())
                    .or_default()
                    .extend(ct_conflicts);
            }
        }
        Ok((rebased, conflicts))
    }

    /// Starts the commit in the background and exposes the staged state as
    /// a speculative tree. The transaction is finalized: any further
    /// modification is a programming error.
    pub fn commit_in_parallel(&mut self) -> CommitFutureTree {
        self.assert_open();
        let mut tree = CommitFutureTree::new();
        for (chunk_id, chunk_transaction) in &self.chunk_transactions {
            tree.insert(
                chunk_id.clone(),
                CommitFuture {
                    staged: chunk_transaction.staged_view(),
                },
            );
        }
        let map = std::mem::take(&mut self.chunk_transactions);
        let hub = self.hub.clone();
        self.commit_handle = Some(tokio::spawn(async move {
            let (_, result) = commit_map(hub, map).await;
            result
        }));
        self.finalized = true;
        tree
    }

    /// Blocks on the parallel commit, if one is running.
    pub async fn join_parallel_commit(&mut self) -> Result<bool> {
        match self.commit_handle.take() {
            Some(handle) => handle.await?,
            None => Ok(true),
        }
    }

    /// Transitions a dependent transaction's reads from speculative to
    /// real. Must follow the dependee's join.
    pub fn detach_futures(&mut self) {
        self.futures_detached = true;
    }
}

/// Two-phase commit of a set of chunk transactions: lock every chunk in
/// ascending chunk-id order, check everything, write everything under one
/// commit time, unlock in reverse order. Fails atomically.
async fn commit_map(
    hub: Arc<Hub>,
    mut map: BTreeMap<Id, ChunkTransaction>,
) -> (BTreeMap<Id, ChunkTransaction>, Result<bool>) {
    let chunks: Vec<Arc<Chunk>> = map.values().map(|ct| ct.chunk().clone()).collect();

    // Lock phase.
    let mut locked: Vec<Arc<Chunk>> = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        match chunk.write_lock().await {
            Ok(()) => locked.push(chunk.clone()),
            Err(e) => {
                unlock_all(&locked).await;
                return (map, Err(e));
            }
        }
    }

    // Check phase.
    let all_clean = map.values().all(|ct| ct.check_locked());

    // Write phase.
    let mut result = Ok(all_clean);
    if all_clean {
        let commit_time = hub.sample();
        for chunk_transaction in map.values_mut() {
            if let Err(e) = chunk_transaction.checked_commit(commit_time).await {
                result = Err(e);
                break;
            }
        }
    }

    // Release phase.
    unlock_all(&locked).await;
    (map, result)
}

async fn unlock_all(locked: &[Arc<Chunk>]) {
    for chunk in locked.iter().rev() {
        chunk.unlock().await;
    }
}
