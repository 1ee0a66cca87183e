//! Wire-level data types: node identity, log entries, and the messages
//! nodes exchange over the [`crate::network::Bus`].

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// A cluster member's identity.
///
/// Newtype over `String` so node ids are never confused with arbitrary
/// strings at call sites. Derives `Ord` for sorting in tests and for use
/// as a `HashMap` key; deterministic iteration order over a cluster's
/// nodes comes from the registry's insertion-ordered `Vec<NodeId>` index,
/// not from this ordering.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A single entry in a Raft replicated log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub index: u64,
    pub command: String,
}

/// `RequestVote` RPC arguments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: u64,
    pub candidate_id: NodeId,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

/// `RequestVote` RPC result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: u64,
    pub vote_granted: bool,
}

/// `AppendEntries` RPC arguments (also used as the heartbeat when `entries`
/// is empty).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: u64,
    pub leader_id: NodeId,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

/// `AppendEntries` RPC result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: u64,
    pub success: bool,
    /// Index of the last log entry the follower holds after applying this
    /// request, valid only when `success` is true. Lets the leader advance
    /// `next_index`/`match_index` in one round trip instead of by one
    /// entry at a time.
    pub match_index: u64,
}

/// The payload carried by a [`Message`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessagePayload {
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    AppendEntriesRequest(AppendEntriesRequest),
    AppendEntriesResponse(AppendEntriesResponse),
}

impl MessagePayload {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessagePayload::VoteRequest(_) => MessageKind::VoteRequest,
            MessagePayload::VoteResponse(_) => MessageKind::VoteResponse,
            MessagePayload::AppendEntriesRequest(_) => MessageKind::AppendEntriesRequest,
            MessagePayload::AppendEntriesResponse(_) => MessageKind::AppendEntriesResponse,
        }
    }
}

/// Discriminant for [`MessagePayload`], used by network rules to match on
/// message kind without constructing a dummy payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    VoteRequest,
    VoteResponse,
    AppendEntriesRequest,
    AppendEntriesResponse,
}

/// An envelope routed through the bus from `from` to `to`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub from: NodeId,
    pub to: NodeId,
    pub payload: MessagePayload,
}

impl Message {
    pub fn new(from: NodeId, to: NodeId, payload: MessagePayload) -> Self {
        Self { from, to, payload }
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }
}
