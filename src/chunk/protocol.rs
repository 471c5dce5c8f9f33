//! Chunk Wire Protocol
//!
//! Message types and DTOs for replication and the distributed write lock.
//! Every message names its table and chunk; a peer that does not hold the
//! addressed chunk declines instead of forwarding.

use serde::{Deserialize, Serialize};

use crate::hub::types::PeerId;
use crate::table::types::{Id, Revision};

pub const MSG_CONNECT: &str = "chunk.connect";
pub const MSG_CONNECT_RESPONSE: &str = "chunk.connect_response";
pub const MSG_PARTICIPATION: &str = "chunk.participation";
pub const MSG_INSERT: &str = "chunk.insert";
pub const MSG_UPDATE: &str = "chunk.update";
pub const MSG_LOCK: &str = "chunk.lock";
pub const MSG_LOCK_RESPONSE: &str = "chunk.lock_response";
pub const MSG_UNLOCK: &str = "chunk.unlock";
pub const MSG_NEW_PEER: &str = "chunk.new_peer";
pub const MSG_LEAVE: &str = "chunk.leave";

/// Request to become a holder of a chunk.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub table: String,
    pub chunk_id: Id,
}

/// Full chunk state handed to a joining holder: the peer list (the sender
/// included, the requester excluded) and every revision of the chunk.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkSnapshot {
    pub table: String,
    pub chunk_id: Id,
    pub peers: Vec<PeerId>,
    pub revisions: Vec<Revision>,
}

/// Invitation to become a holder; the receiver connects back.
#[derive(Debug, Serialize, Deserialize)]
pub struct ParticipationRequest {
    pub table: String,
    pub chunk_id: Id,
}

/// A committed revision propagated to the other holders.
#[derive(Debug, Serialize, Deserialize)]
pub struct RevisionRequest {
    pub table: String,
    pub chunk_id: Id,
    pub revision: Revision,
}

/// Distributed write-lock request. `tree` lists the peers already part of
/// the request's spanning tree; a receiver forwards to its holders outside
/// the tree before granting.
#[derive(Debug, Serialize, Deserialize)]
pub struct LockRequest {
    pub table: String,
    pub chunk_id: Id,
    pub requester: PeerId,
    pub request_id: Id,
    pub tree: Vec<PeerId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "vote")]
pub enum LockVote {
    Granted,
    /// Another candidate or holder owns this peer's lock state. `held` is
    /// true when the rival has fully acquired the lock; a candidate can
    /// never win a vote against an established holder.
    Conflict { rival: PeerId, held: bool },
    AmReading,
    HaveSeen,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockResponse {
    pub vote: LockVote,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnlockRequest {
    pub table: String,
    pub chunk_id: Id,
    pub requester: PeerId,
}

/// Peer-set change notification (`new_peer`, `leave`).
#[derive(Debug, Serialize, Deserialize)]
pub struct PeerRequest {
    pub table: String,
    pub chunk_id: Id,
    pub peer: PeerId,
}
