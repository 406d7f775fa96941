// Typed errors for the task-dispatch protocol
//
// Setup and I/O elsewhere use anyhow; these are the conditions callers
// branch on.

use std::time::Duration;
use thiserror::Error;

/// A request the dispatcher refuses to act on
#[derive(Debug, Error)]
pub enum DispatchError {
    /// AssignTask named an operation with no registered handler
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// Payload did not match the shape its message type requires
    #[error("Malformed {kind} payload: {source}")]
    MalformedPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    /// Frame was not a message envelope at all
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
}

#[derive(Debug, Error)]
pub enum TaskClientError {
    #[error("Failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },

    #[error("Failed to send request to {endpoint}: {message}")]
    Send { endpoint: String, message: String },

    /// Connection closed before a reply frame arrived
    #[error("{endpoint} closed the connection without replying")]
    NoReply { endpoint: String },

    #[error("No reply from {endpoint} within {timeout:?}")]
    RequestTimeout { endpoint: String, timeout: Duration },

    /// Reply was not valid JSON or not the expected reply type
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Provider answered with an Error reply
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Task {task_id} is unknown to the provider")]
    UnknownTask { task_id: String },

    #[error("Task {task_id} not finished after {attempts} status polls")]
    Timeout { task_id: String, attempts: u32 },
}
