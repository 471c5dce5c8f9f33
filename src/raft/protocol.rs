use serde::{Deserialize, Serialize};

pub const MSG_HEARTBEAT: &str = "raft.heartbeat";
pub const MSG_VOTE: &str = "raft.vote";
pub const MSG_VOTE_RESPONSE: &str = "raft.vote_response";

#[derive(Debug, Serialize, Deserialize)]
pub struct Heartbeat {
    pub term: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VoteResponse {
    pub granted: bool,
}
