//! Raft Cluster Module (experimental)
//!
//! Classical Raft leader election over a fixed peer set, as groundwork for
//! strongly consistent metadata. Only election and term bookkeeping are
//! implemented; log replication is future work.
//!
//! A follower that misses heartbeats for a randomized election timeout
//! becomes a candidate, increments its term and solicits votes; a majority
//! makes it leader and it heartbeats all peers. A heartbeat with a higher
//! term always forces the receiver back to follower. Two leaders observed
//! in one term is an invariant violation and aborts the peer.

pub mod protocol;
pub mod service;

pub use service::{RaftCluster, RaftState};
