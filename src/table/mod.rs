//! Table Module
//!
//! Typed local storage and its networked counterpart.
//!
//! ## Core Concepts
//! - **Revision**: a typed, field-addressed record. Revisions are immutable
//!   once stored; an update appends a new revision sharing the same id with
//!   a strictly greater update time, preserving the full per-id history.
//! - **CR vs CRU**: insert-only and update-capable tables are two variants
//!   of one store, switched by a kind tag rather than subclassing.
//! - **NetTable**: a named, templated collection whose items live in chunks.
//!   It owns the local store, the set of locally held chunks and the
//!   per-table Chord index used to find remote holders.
//! - **TableManager**: the `name -> table` map, populated at startup, plus
//!   the routing of inbound chunk messages to the addressed chunk. A request
//!   for a chunk this peer does not hold is declined, never forwarded.

pub mod manager;
pub mod net_table;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;
