//! Map-API: a decentralized, peer-to-peer, replicated key-value store
//! for multi-agent robotic systems.
//!
//! Tables hold typed revisions partitioned into chunks; each chunk is an
//! autonomous replication group with its own peer set, its own distributed
//! read/write lock and its own history. Peers find chunk holders through a
//! per-table Chord index and mutate data through serialized multi-chunk
//! transactions.
//!
//! ## Architecture Modules
//! The crate is composed of the following subsystems:
//!
//! - **`hub`**: The network layer. Peer identity, the typed message envelope,
//!   the dispatch table for inbound requests, the retrying HTTP transport and
//!   the discovery bootstrap.
//! - **`time`**: The Lamport-style logical clock merged on every message.
//! - **`table`**: Local typed storage (insert-only and update-capable tables
//!   with per-item history), the table manager and the networked table that
//!   ties chunks and indices together.
//! - **`chord`**: The distributed index mapping a chunk id to the set of
//!   peers that hold it, one ring per table.
//! - **`chunk`**: The replicated unit: holder set, spanning-tree write lock,
//!   insert/update propagation and state transfer to new holders.
//! - **`transaction`**: Optimistic concurrency over one or many chunks, with
//!   conflict detection, three-way merge and parallel commit futures.
//! - **`spatial`**: An optional bounding-box to chunk-set index layered on
//!   the Chord index.
//! - **`raft`**: Experimental leader election over a fixed peer set.
//! - **`core`**: Process-wide lifecycle: one `MapCore` per peer, explicit
//!   init and shutdown.

pub mod chord;
pub mod chunk;
pub mod config;
pub mod core;
pub mod hub;
pub mod raft;
pub mod spatial;
pub mod table;
pub mod time;
pub mod transaction;

#[cfg(test)]
pub(crate) mod testing;
