//! Chunk Module
//!
//! The chunk is the unit of data sharing among peers: a subset of one table
//! mirrored by a set of holders. By holding a chunk, a peer agrees to the
//! contract:
//!
//! 1. It always stores the latest committed revision of every item in the
//!    chunk.
//! 2. It forwards committed changes to every other holder before releasing
//!    the write lock.
//! 3. It serves the full chunk to any peer that requests data it does not
//!    hold; that peer becomes a holder as well.
//! 4. It participates in the distributed write lock serializing chunk
//!    modification.
//!
//! ## Distributed locking
//! Read locks are local: a reading holder defers incoming distributed
//! write-lock requests until it is done. Write locks span the holder set: a
//! request floods a spanning tree of the holders (a star under full
//! connectivity) and each peer votes `GRANTED`, `CONFLICT`, `AM_READING` or
//! `HAVE_SEEN`. Majority resolves races; an exact tie goes to the
//! lexicographically smaller peer address. Failed acquires release their
//! partial grants and retry with jittered backoff until a deadline.
//!
//! Peer-set changes (connect, leave) are serialized by the same lock as
//! data changes.

pub mod chunk;
pub mod handlers;
pub mod lock;
pub mod protocol;

#[cfg(test)]
mod tests;
