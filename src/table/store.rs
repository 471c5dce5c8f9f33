//! Local Table Store
//!
//! Single-peer storage behind every table: per-id revision histories with
//! time-travel reads. The same store backs both kinds of tables; `Cr`
//! rejects updates, `Cru` appends multi-version updates.

use std::collections::HashMap;

use anyhow::Result;
use dashmap::DashMap;

use crate::time::LogicalTime;

use super::types::{FieldValue, Id, Revision, TableDescriptor, TableKind};

/// Outcome of installing a remotely produced revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    /// The `(id, update_time)` pair was already present; retried
    /// replication requests are idempotent.
    Redundant,
}

pub struct TableStore {
    descriptor: TableDescriptor,
    kind: TableKind,
    linked: bool,
    /// Per-id history, latest revision at the front.
    histories: DashMap<Id, Vec<Revision>>,
}

impl TableStore {
    pub fn new(kind: TableKind, descriptor: TableDescriptor, linked: bool) -> Self {
        Self {
            descriptor,
            kind,
            linked,
            histories: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }

    /// Inserts a new item. The id must be fresh; both timestamps are set to
    /// `time`.
    pub fn insert(&self, time: LogicalTime, revision: &mut Revision) -> Result<()> {
        anyhow::ensure!(
            revision.structure_match(&self.descriptor),
            "bad structure of insert revision for table {}",
            self.name()
        );
        anyhow::ensure!(!revision.id.0.is_empty(), "insert with invalid id");
        revision.insert_time = time;
        revision.update_time = time;
        revision.previous_time = None;
        revision.next_time = None;

        let mut history = self.histories.entry(revision.id.clone()).or_default();
        anyhow::ensure!(
            history.is_empty(),
            "table {} already contains id {}",
            self.name(),
            revision.id
        );
        history.push(revision.clone());
        Ok(())
    }

    /// Appends a new revision of an existing item. Only meaningful on CRU
    /// tables; the new update time must be strictly greater than the latest.
    pub fn update(&self, time: LogicalTime, revision: &mut Revision) -> Result<()> {
        anyhow::ensure!(
            self.kind == TableKind::Cru,
            "attempted to update insert-only table {}",
            self.name()
        );
        anyhow::ensure!(
            revision.structure_match(&self.descriptor),
            "bad structure of update revision for table {}",
            self.name()
        );

        let mut history = self
            .histories
            .get_mut(&revision.id)
            .ok_or_else(|| anyhow::anyhow!("update of unknown id {}", revision.id))?;
        let latest_time = history[0].update_time;
        anyhow::ensure!(
            latest_time < time,
            "stale update of id {}: {} >= {}",
            revision.id,
            latest_time,
            time
        );

        revision.insert_time = history[0].insert_time;
        revision.update_time = time;
        if self.linked {
            revision.previous_time = Some(latest_time);
            revision.next_time = None;
            history[0].next_time = Some(time);
        }
        history.insert(0, revision.clone());
        Ok(())
    }

    /// Installs a revision produced elsewhere, preserving its timestamps.
    /// Used by replication and state transfer.
    pub fn patch(&self, revision: Revision) -> Result<PatchOutcome> {
        anyhow::ensure!(
            revision.structure_match(&self.descriptor),
            "bad structure of patch revision for table {}",
            self.name()
        );
        let mut history = self.histories.entry(revision.id.clone()).or_default();
        if history
            .iter()
            .any(|existing| existing.update_time == revision.update_time)
        {
            return Ok(PatchOutcome::Redundant);
        }
        // Keep the history sorted, latest at the front.
        let position = history
            .iter()
            .position(|existing| existing.update_time < revision.update_time)
            .unwrap_or(history.len());
        history.insert(position, revision);
        Ok(PatchOutcome::Applied)
    }

    /// The latest revision of `id` with `update_time <= time`, if the item
    /// existed at `time`.
    pub fn get_by_id(&self, id: &Id, time: LogicalTime) -> Option<Revision> {
        let history = self.histories.get(id)?;
        history
            .iter()
            .find(|revision| revision.update_time <= time)
            .cloned()
    }

    pub fn latest_update_time(&self, id: &Id) -> Option<LogicalTime> {
        self.histories
            .get(id)
            .map(|history| history.value()[0].update_time)
    }

    /// Equality scan at `time`. `field = None` matches every row.
    pub fn find_by_field(
        &self,
        field: Option<&str>,
        value: &FieldValue,
        time: LogicalTime,
    ) -> HashMap<Id, Revision> {
        let mut result = HashMap::new();
        for entry in self.histories.iter() {
            if let Some(revision) = entry
                .value()
                .iter()
                .find(|revision| revision.update_time <= time)
            {
                let matches = match field {
                    Some(field) => revision.verify_eq(field, value),
                    None => true,
                };
                if matches {
                    result.insert(entry.key().clone(), revision.clone());
                }
            }
        }
        result
    }

    pub fn count_by_field(&self, field: Option<&str>, value: &FieldValue, time: LogicalTime) -> usize {
        self.find_by_field(field, value, time).len()
    }

    /// All items as of `time`.
    pub fn dump(&self, time: LogicalTime) -> HashMap<Id, Revision> {
        let mut result = HashMap::new();
        for entry in self.histories.iter() {
            if let Some(revision) = entry
                .value()
                .iter()
                .find(|revision| revision.update_time <= time)
            {
                result.insert(entry.key().clone(), revision.clone());
            }
        }
        result
    }

    /// Items of one chunk as of `time`.
    pub fn dump_chunk(&self, chunk_id: &Id, time: LogicalTime) -> HashMap<Id, Revision> {
        let mut result = self.dump(time);
        result.retain(|_, revision| &revision.chunk_id == chunk_id);
        result
    }

    /// Per-id update-time stamps of one chunk as of now; the conflict checks
    /// run over this.
    pub fn chunk_stamps(&self, chunk_id: &Id, time: LogicalTime) -> HashMap<Id, LogicalTime> {
        self.dump_chunk(chunk_id, time)
            .into_iter()
            .map(|(id, revision)| (id, revision.update_time))
            .collect()
    }

    pub fn count(&self, time: LogicalTime) -> usize {
        self.dump(time).len()
    }

    /// Complete history of one id, latest first.
    pub fn history(&self, id: &Id) -> Vec<Revision> {
        self.histories
            .get(id)
            .map(|history| history.value().clone())
            .unwrap_or_default()
    }
}
