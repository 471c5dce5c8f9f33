//! Chord Wire Protocol
//!
//! Message types and DTOs of the ring RPCs. Every request names its table;
//! a peer without an index for that table declines.

use serde::{Deserialize, Serialize};

use crate::hub::types::PeerId;
use crate::table::types::Id;

use super::types::{IndexEntry, Key};

pub const MSG_FIND_SUCCESSOR: &str = "chord.find_successor";
pub const MSG_GET_PREDECESSOR: &str = "chord.get_predecessor";
pub const MSG_NOTIFY: &str = "chord.notify";
pub const MSG_LEAVE: &str = "chord.leave";
pub const MSG_INDEX_ADD: &str = "chord.index_add";
pub const MSG_INDEX_GET: &str = "chord.index_get";
pub const MSG_MIGRATE: &str = "chord.migrate";

/// Reply carrying a single peer.
pub const MSG_PEER_RESPONSE: &str = "chord.peer_response";
/// Reply carrying an index entry.
pub const MSG_ENTRY_RESPONSE: &str = "chord.entry_response";

#[derive(Debug, Serialize, Deserialize)]
pub struct FindSuccessorRequest {
    pub table: String,
    pub key: Key,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetPredecessorRequest {
    pub table: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyRequest {
    pub table: String,
    pub peer: PeerId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PeerResponse {
    pub peer: PeerId,
}

/// Multicast by a leaving peer so everyone drops the stale links directly.
#[derive(Debug, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub table: String,
    pub leaver: PeerId,
    pub predecessor: PeerId,
    pub successor: PeerId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexAddRequest {
    pub table: String,
    pub key: String,
    pub peer: Option<PeerId>,
    pub chunk: Option<Id>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexGetRequest {
    pub table: String,
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EntryResponse {
    pub entry: IndexEntry,
}

/// Entries handed to the successor before leaving the ring.
#[derive(Debug, Serialize, Deserialize)]
pub struct MigrateRequest {
    pub table: String,
    pub entries: Vec<(String, IndexEntry)>,
}
