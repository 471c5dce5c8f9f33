//! Chord Index Module
//!
//! The distributed index that maps a chunk id to the set of peers holding
//! it. Every table runs its own ring over the keyspace `[0, 2^16)`; a
//! peer's key is the hash of its address.
//!
//! ## Departures from stock Chord
//! Under the assumption of no sporadic connectivity loss, the periodic
//! maintenance tasks (stabilize, fix-fingers, check-predecessor) are left
//! out:
//! - **Eager notify**: a joining peer immediately notifies its predecessor
//!   and successor, which atomically re-point any finger the newcomer is a
//!   better fit for.
//! - **Deterministic leave**: a leaving peer first migrates its index
//!   entries to its successor, then multicasts the leave so every peer can
//!   drop the stale links directly.
//!
//! ## Index data
//! Each participating peer stores the entries whose key it is the successor
//! of: a set of peers (chunk holders or spatial listeners) and a set of
//! chunk ids per string key. Requests are routed with `find_successor` in
//! O(log N) expected hops.

pub mod handlers;
pub mod index;
pub mod protocol;
pub mod types;
