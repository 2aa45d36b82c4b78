//! Browser Dispatch Shared Protocol Types
//!
//! This crate provides the shared protocol types and codec for communication
//! between browser agents, the control server, and remote driver endpoints.

pub mod codec;
pub mod state_machine;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

pub use state_machine::ItemStatus;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Protocol limits and defaults shared by agent and server
pub mod limits {
    /// Heartbeat interval in milliseconds
    pub const HEARTBEAT_INTERVAL_MS: u64 = 1000;

    /// Heartbeat timeout - the server drops an agent after this much silence
    pub const HEARTBEAT_TIMEOUT_MS: u64 = 10000;

    /// Maximum number of pending commands an agent queues by default
    pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;

    /// Per-command driver timeout
    pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 30000;

    /// Number of terminal queue items retained for history queries
    pub const DEFAULT_HISTORY_CAPACITY: usize = 200;

    /// Default `limit` for history queries that omit one
    pub const DEFAULT_HISTORY_LIMIT: usize = 20;

    /// How long the server waits for a response before giving up on a request
    pub const RESPONSE_TIMEOUT_MS: u64 = 35000;
}

/// Message type carried in every header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Command,
    Query,
    Response,
    Completion,
    Heartbeat,
}

/// Common envelope header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub agent_id: String,
    pub sequence_id: u64,
    pub timestamp_ms: u64,
    pub msg_type: MessageType,
}

impl Header {
    /// Create a new header with the given agent ID and message type
    pub fn new(agent_id: impl Into<String>, msg_type: MessageType, sequence_id: u64) -> Self {
        Self {
            agent_id: agent_id.into(),
            sequence_id,
            timestamp_ms: now_ms(),
            msg_type,
        }
    }
}

/// Top-level message exchanged between agent and server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub header: Header,
    pub payload: Payload,
}

impl Envelope {
    /// Wrap a payload, deriving the header message type from it
    pub fn new(agent_id: impl Into<String>, sequence_id: u64, payload: Payload) -> Self {
        Self {
            header: Header::new(agent_id, payload.message_type(), sequence_id),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Payload {
    Command(CommandRequest),
    Query(QueryRequest),
    Response(CommandResponse),
    Completion(CompletionReport),
    Heartbeat(Heartbeat),
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Command(_) => MessageType::Command,
            Payload::Query(_) => MessageType::Query,
            Payload::Response(_) => MessageType::Response,
            Payload::Completion(_) => MessageType::Completion,
            Payload::Heartbeat(_) => MessageType::Heartbeat,
        }
    }
}

/// How the agent should run a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DispatchMode {
    /// Run now, bypassing the queue
    Immediate,
    /// Admit into the priority queue (higher priority runs sooner)
    Queued { priority: i64 },
}

/// A command issued by the server
///
/// `message` is the raw inbound command `{kind, payload, authToken}`. It is
/// deliberately untyped: the agent validates it before anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub request_id: u64,
    #[serde(flatten)]
    pub mode: DispatchMode,
    pub message: Value,
}

/// Read-side queries against an agent's queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum Query {
    Status,
    History { limit: usize },
    ClearCompleted,
    /// One queue item by the id returned from a queued command
    Item { queue_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub request_id: u64,
    #[serde(flatten)]
    pub query: Query,
}

/// Outbound response for a command or query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub request_id: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Base64-encoded image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

impl CommandResponse {
    pub fn ok(request_id: u64, data: Value) -> Self {
        Self {
            request_id,
            success: true,
            data: Some(data),
            error: None,
            screenshot: None,
        }
    }

    pub fn error(request_id: u64, message: impl Into<String>) -> Self {
        Self {
            request_id,
            success: false,
            data: None,
            error: Some(message.into()),
            screenshot: None,
        }
    }
}

/// Pushed by the agent when a queued item reaches a terminal status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub queue_id: String,
    pub status: ItemStatus,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
    pub completed_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub uptime_ms: u64,
    pub pending: u32,
    pub executing: u32,
    pub healthy: bool,
}

impl Heartbeat {
    /// Create a new heartbeat message
    pub fn new(uptime_ms: u64, pending: u32, executing: u32, healthy: bool) -> Self {
        Self {
            uptime_ms,
            pending,
            executing,
            healthy,
        }
    }
}

/// Request sent from an agent to a remote browser-control endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverRequest {
    pub request_id: u64,
    pub command: Value,
}

/// Reply from a remote browser-control endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverReply {
    pub request_id: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Base64-encoded image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}
