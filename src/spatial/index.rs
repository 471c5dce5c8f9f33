use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::chord::index::ChordIndex;
use crate::hub::service::Hub;
use crate::hub::types::Envelope;
use crate::table::manager::TableManager;
use crate::table::types::Id;

/// One `Range<f64>` per dimension.
pub type BoundingBox = Vec<Range<f64>>;

/// Push notification for a chunk newly registered in a listened-to cell.
pub const MSG_TRIGGER: &str = "spatial.trigger";

#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub table: String,
    pub chunk_id: Id,
}

pub struct SpatialIndex {
    table: String,
    bounds: BoundingBox,
    subdivision: Vec<usize>,
    chord: Arc<ChordIndex>,
    hub: Arc<Hub>,
}

impl SpatialIndex {
    pub fn new(
        table: impl Into<String>,
        bounds: BoundingBox,
        subdivision: Vec<usize>,
        chord: Arc<ChordIndex>,
        hub: Arc<Hub>,
    ) -> Arc<Self> {
        assert_eq!(
            bounds.len(),
            subdivision.len(),
            "bounds and subdivision dimensionality differ"
        );
        assert!(
            subdivision.iter().all(|&cells| cells > 0),
            "zero cells in some dimension"
        );
        Arc::new(Self {
            table: table.into(),
            bounds,
            subdivision,
            chord,
            hub,
        })
    }

    /// Linear indices of every grid cell the box touches.
    pub fn cell_indices_of(&self, query: &BoundingBox) -> Vec<usize> {
        grid_cells(&self.bounds, &self.subdivision, query)
    }

    fn cell_key(cell: usize) -> String {
        format!("cell/{}", cell)
    }

    /// Adds the chunk to every touched cell and pushes it to the cells'
    /// listeners.
    pub async fn register_chunk(&self, chunk_id: &Id, query: &BoundingBox) -> Result<()> {
        let trigger = TriggerRequest {
            table: self.table.clone(),
            chunk_id: chunk_id.clone(),
        };
        for cell in self.cell_indices_of(query) {
            let entry = self
                .chord
                .index_add(&Self::cell_key(cell), None, Some(chunk_id.clone()))
                .await?;
            for listener in entry.peers {
                if &listener == self.hub.own_id() {
                    continue;
                }
                self.hub.try_request(&listener, MSG_TRIGGER, &trigger).await;
            }
        }
        Ok(())
    }

    /// Union of the chunk sets of every touched cell.
    pub async fn chunks_in(&self, query: &BoundingBox) -> Result<BTreeSet<Id>> {
        let mut chunks = BTreeSet::new();
        for cell in self.cell_indices_of(query) {
            let entry = self.chord.index_get(&Self::cell_key(cell)).await?;
            chunks.extend(entry.chunks);
        }
        Ok(chunks)
    }

    /// Announces this peer as a listener on every touched cell.
    pub async fn listen(&self, query: &BoundingBox) -> Result<()> {
        for cell in self.cell_indices_of(query) {
            self.chord
                .index_add(&Self::cell_key(cell), Some(self.hub.own_id().clone()), None)
                .await?;
        }
        Ok(())
    }
}

/// Linear indices of every grid cell the query box touches. Boxes are
/// clamped to the bounds; an empty or out-of-bounds box touches nothing. A
/// box ending exactly on a cell boundary does not touch the next cell.
pub(crate) fn grid_cells(
    bounds: &BoundingBox,
    subdivision: &[usize],
    query: &BoundingBox,
) -> Vec<usize> {
    assert_eq!(query.len(), bounds.len(), "query dimensionality");
    let mut per_dimension: Vec<Range<usize>> = Vec::with_capacity(bounds.len());
    for (dimension, range) in query.iter().enumerate() {
        let bound = &bounds[dimension];
        let cells = subdivision[dimension];
        let width = (bound.end - bound.start) / cells as f64;
        let low = range.start.max(bound.start);
        let high = range.end.min(bound.end);
        if low >= high {
            return Vec::new();
        }
        let first = ((low - bound.start) / width).floor() as usize;
        let last = (((high - bound.start) / width).ceil() as usize).clamp(first + 1, cells);
        per_dimension.push(first..last);
    }

    let mut indices = vec![0usize];
    for (dimension, cell_range) in per_dimension.iter().enumerate() {
        let stride: usize = subdivision[dimension + 1..].iter().product();
        let mut next = Vec::with_capacity(indices.len() * cell_range.len());
        for base in &indices {
            for cell in cell_range.clone() {
                next.push(base + cell * stride);
            }
        }
        indices = next;
    }
    indices.sort_unstable();
    indices
}

/// Listener side of the trigger: fetch the announced chunk so this peer
/// becomes a holder.
pub fn register_handlers(hub: &Arc<Hub>, tables: &Arc<TableManager>) {
    let manager = tables.clone();
    hub.register_handler(MSG_TRIGGER, move |envelope: Envelope| {
        let manager = manager.clone();
        async move {
            let request: TriggerRequest = match envelope.payload() {
                Ok(request) => request,
                Err(_) => return Envelope::invalid(),
            };
            let Some(table) = manager.get_table(&request.table) else {
                return Envelope::decline();
            };
            match table.get_chunk(&request.chunk_id).await {
                Ok(_) => Envelope::ack(),
                Err(e) => {
                    tracing::warn!("Trigger fetch of chunk {} failed: {}", request.chunk_id, e);
                    Envelope::cant_reach()
                }
            }
        }
    });
}
