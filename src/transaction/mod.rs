//! Transaction Module
//!
//! Optimistic concurrency over chunks.
//!
//! ## Core Concepts
//! - **ChunkTransaction**: a staging buffer of insertions and updates
//!   against one chunk, begun at a captured logical time. Commit acquires
//!   the distributed write lock, checks for conflicting concurrent commits
//!   (fresh insert ids, update times before begin, zero rows matching the
//!   conflict conditions) and only then writes and propagates.
//! - **Transaction**: the multi-chunk variant. Commit locks every touched
//!   chunk in ascending chunk-id order (deadlock freedom), checks all parts
//!   and commits all-or-nothing under one global commit time.
//! - **Merge**: a failed transaction can be rebased; staged changes whose
//!   items were untouched move into the new transaction, the rest come back
//!   as `ours`/`theirs` conflict pairs.
//! - **Parallel commit**: a committing transaction exposes its staged
//!   revisions as a speculative `CommitFutureTree` a dependent transaction
//!   may read through; the dependent must join and detach the futures
//!   before committing itself.

pub mod chunk_transaction;
pub mod transaction;

pub use chunk_transaction::{ChunkTransaction, Conflict, ConflictCondition};
pub use transaction::{CommitFuture, CommitFutureTree, ConflictMap, Transaction};

#[cfg(test)]
mod tests;
