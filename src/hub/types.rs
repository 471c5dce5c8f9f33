use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// HTTP endpoint all envelopes are POSTed to.
pub const ENDPOINT_RPC: &str = "/rpc";

// --- Standard response types ---

pub const TYPE_ACK: &str = "ack";
pub const TYPE_DECLINE: &str = "decline";
pub const TYPE_INVALID: &str = "invalid";
pub const TYPE_REDUNDANT: &str = "redundant";
pub const TYPE_CANT_REACH: &str = "cant_reach";

/// Announcement of a new peer to an existing one.
pub const MSG_ANNOUNCE: &str = "hub.announce";

/// Network identity of a peer: the `host:port` its RPC listener is bound
/// to. The derived ordering (lexicographic on the address string) is the
/// total order used for distributed tie-breaking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn address(&self) -> &str {
        &self.0
    }

    /// Base URL of the peer's RPC endpoint.
    pub fn rpc_url(&self) -> String {
        format!("http://{}{}", self.0, ENDPOINT_RPC)
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The wire unit: one request or one response.
///
/// `sender` and `logical_time` are stamped by the hub on the way out; the
/// receiving hub merges `logical_time` into its clock before dispatching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub msg_type: String,
    pub sender: PeerId,
    pub logical_time: u64,
    pub payload_json: String,
}

impl Envelope {
    /// A request or typed response carrying a serialized payload. Sender and
    /// time are filled in by the hub.
    pub fn typed<T: Serialize>(msg_type: &str, payload: &T) -> anyhow::Result<Self> {
        Ok(Self {
            msg_type: msg_type.to_string(),
            sender: PeerId::new(""),
            logical_time: 0,
            payload_json: serde_json::to_string(payload)?,
        })
    }

    fn standard(msg_type: &str) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            sender: PeerId::new(""),
            logical_time: 0,
            payload_json: String::new(),
        }
    }

    pub fn ack() -> Self {
        Self::standard(TYPE_ACK)
    }

    pub fn decline() -> Self {
        Self::standard(TYPE_DECLINE)
    }

    pub fn invalid() -> Self {
        Self::standard(TYPE_INVALID)
    }

    pub fn redundant() -> Self {
        Self::standard(TYPE_REDUNDANT)
    }

    pub fn cant_reach() -> Self {
        Self::standard(TYPE_CANT_REACH)
    }

    pub fn is_type(&self, msg_type: &str) -> bool {
        self.msg_type == msg_type
    }

    pub fn is_ack(&self) -> bool {
        self.is_type(TYPE_ACK)
    }

    pub fn is_decline(&self) -> bool {
        self.is_type(TYPE_DECLINE)
    }

    /// Deserializes the payload into the expected DTO.
    pub fn payload<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_str(&self.payload_json)
            .map_err(|e| anyhow::anyhow!("bad {} payload: {}", self.msg_type, e))
    }
}
