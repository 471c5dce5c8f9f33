//! Spatial Index Module
//!
//! An axis-aligned bounding volume partitioned into a regular grid of
//! cells, layered on the table's Chord index: each touched cell keeps the
//! registered chunk ids and the listening peers as one replicated index
//! entry. Registering a chunk in space triggers a push to every listener of
//! the touched cells.

pub mod index;

pub use index::{register_handlers, BoundingBox, SpatialIndex};

#[cfg(test)]
mod tests;
