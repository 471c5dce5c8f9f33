use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;

use crate::chunk::chunk::Chunk;
use crate::table::types::{FieldValue, Id, Revision, TableKind};
use crate::time::LogicalTime;

/// Equality predicate evaluated at commit time; any matching row aborts
/// the transaction.
#[derive(Debug, Clone)]
pub struct ConflictCondition {
    pub field: String,
    pub value: FieldValue,
}

/// One item that could not be carried over by a merge: the currently
/// stored revision and the staged one.
#[derive(Debug, Clone)]
pub struct Conflict {
    pub ours: Option<Revision>,
    pub theirs: Revision,
}

/// Single-chunk optimistic transaction.
pub struct ChunkTransaction {
    begin_time: LogicalTime,
    chunk: Arc<Chunk>,
    insertions: BTreeMap<Id, Revision>,
    updates: BTreeMap<Id, Revision>,
    conflict_conditions: Vec<ConflictCondition>,
}

impl ChunkTransaction {
    pub fn new(chunk: Arc<Chunk>) -> Self {
        let begin_time = chunk.hub().sample();
        Self::with_begin_time(begin_time, chunk)
    }

    pub fn with_begin_time(begin_time: LogicalTime, chunk: Arc<Chunk>) -> Self {
        Self {
            begin_time,
            chunk,
            insertions: BTreeMap::new(),
            updates: BTreeMap::new(),
            conflict_conditions: Vec::new(),
        }
    }

    pub fn begin_time(&self) -> LogicalTime {
        self.begin_time
    }

    pub fn chunk(&self) -> &Arc<Chunk> {
        &self.chunk
    }

    /// Stages an insertion. The id must be fresh within this transaction.
    pub fn insert(&mut self, revision: Revision) -> Result<()> {
        anyhow::ensure!(
            revision.structure_match(self.chunk.store().descriptor()),
            "bad structure of insert revision"
        );
        anyhow::ensure!(
            !self.is_staged(&revision.id),
            "id {} already staged in this transaction",
            revision.id
        );
        self.insertions.insert(revision.id.clone(), revision);
        Ok(())
    }

    /// Stages an update. Only allowed on update-capable tables.
    pub fn update(&mut self, revision: Revision) -> Result<()> {
        anyhow::ensure!(
            self.chunk.store().kind() == TableKind::Cru,
            "table {} is insert-only",
            self.chunk.table()
        );
        anyhow::ensure!(
            revision.structure_match(self.chunk.store().descriptor()),
            "bad structure of update revision"
        );
        anyhow::ensure!(
            !self.is_staged(&revision.id),
            "id {} already staged in this transaction",
            revision.id
        );
        self.updates.insert(revision.id.clone(), revision);
        Ok(())
    }

    pub fn add_conflict_condition(&mut self, field: &str, value: FieldValue) {
        self.conflict_conditions.push(ConflictCondition {
            field: field.to_string(),
            value,
        });
    }

    fn is_staged(&self, id: &Id) -> bool {
        self.updates.contains_key(id) || self.insertions.contains_key(id)
    }

    fn staged(&self, id: &Id) -> Option<&Revision> {
        self.updates.get(id).or_else(|| self.insertions.get(id))
    }

    /// Staged value if present, otherwise a read-locked lookup at this
    /// transaction's begin time.
    pub async fn get_by_id(&self, id: &Id) -> Result<Option<Revision>> {
        if let Some(staged) = self.staged(id) {
            return Ok(Some(staged.clone()));
        }
        self.chunk.read_lock().await?;
        let result = self.chunk.store().get_by_id(id, self.begin_time);
        self.chunk.read_unlock().await;
        Ok(result)
    }

    /// The chunk's committed contents at this transaction's begin time.
    pub async fn dump(&self) -> Result<HashMap<Id, Revision>> {
        self.chunk.read_lock().await?;
        let result = self
            .chunk
            .store()
            .dump_chunk(self.chunk.id(), self.begin_time);
        self.chunk.read_unlock().await;
        Ok(result)
    }

    pub fn change_count(&self) -> usize {
        assert!(
            self.conflict_conditions.is_empty(),
            "change_count not compatible with conflict conditions"
        );
        self.insertions.len() + self.updates.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.insertions.is_empty() && self.updates.is_empty()
    }

    /// All staged revisions, updates shadowing insertions.
    pub(crate) fn staged_view(&self) -> HashMap<Id, Revision> {
        let mut view: HashMap<Id, Revision> = self
            .insertions
            .iter()
            .map(|(id, revision)| (id.clone(), revision.clone()))
            .collect();
        for (id, revision) in &self.updates {
            view.insert(id.clone(), revision.clone());
        }
        view
    }

    /// `Ok(true)`: committed. `Ok(false)`: a conflict was detected and the
    /// state is unchanged. `Err`: transport or lock failure.
    pub async fn commit(&mut self) -> Result<bool> {
        self.chunk.write_lock().await?;
        if !self.check_locked() {
            self.chunk.unlock().await;
            return Ok(false);
        }
        let commit_time = self.chunk.hub().sample();
        let result = self.checked_commit(commit_time).await;
        self.chunk.unlock().await;
        result.map(|_| true)
    }

    /// The conflict checks, run while the write lock is held.
    pub(crate) fn check_locked(&self) -> bool {
        let now = self.chunk.hub().sample();
        let stamps = self.chunk.store().chunk_stamps(self.chunk.id(), now);

        for id in self.insertions.keys() {
            if stamps.contains_key(id) {
                tracing::error!(
                    "Table {} already contains id {}",
                    self.chunk.table(),
                    id
                );
                return false;
            }
        }
        for id in self.updates.keys() {
            match stamps.get(id) {
                Some(stamp) if *stamp < self.begin_time => {}
                _ => return false,
            }
        }
        for condition in &self.conflict_conditions {
            let matches = self.chunk.store().count_by_field(
                Some(&condition.field),
                &condition.value,
                now,
            );
            if matches > 0 {
                return false;
            }
        }
        true
    }

    /// Writes and propagates all staged changes under the held lock.
    pub(crate) async fn checked_commit(&mut self, time: LogicalTime) -> Result<()> {
        self.chunk
            .bulk_insert_locked(time, &mut self.insertions)
            .await?;
        for revision in self.updates.values_mut() {
            self.chunk.update_locked(time, revision).await?;
        }
        Ok(())
    }

    /// Rebases this (typically failed) transaction at `rebased_time`:
    /// untouched changes move into the returned transaction, touched ones
    /// come back as conflicts.
    pub async fn merge(
        &self,
        rebased_time: LogicalTime,
    ) -> Result<(ChunkTransaction, Vec<Conflict>)> {
        assert!(
            self.conflict_conditions.is_empty(),
            "merge not compatible with conflict conditions"
        );
        let mut rebased = ChunkTransaction::with_begin_time(rebased_time, self.chunk.clone());
        let mut conflicts = Vec::new();

        self.chunk.read_lock().await?;
        let now = self.chunk.hub().sample();
        let stamps = self.chunk.store().chunk_stamps(self.chunk.id(), now);

        for (id, revision) in &self.insertions {
            if stamps.contains_key(id) {
                conflicts.push(Conflict {
                    ours: self.chunk.store().get_by_id(id, now),
                    theirs: revision.clone(),
                });
            } else {
                rebased.insertions.insert(id.clone(), revision.clone());
            }
        }
        for (id, revision) in &self.updates {
            match stamps.get(id) {
                Some(stamp) if *stamp >= self.begin_time => {
                    conflicts.push(Conflict {
                        ours: self.chunk.store().get_by_id(id, now),
                        theirs: revision.clone(),
                    });
                }
                _ => {
                    rebased.updates.insert(id.clone(), revision.clone());
                }
            }
        }
        self.chunk.read_unlock().await;
        Ok((rebased, conflicts))
    }
}
