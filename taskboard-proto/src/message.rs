//! Task synchronization wire format.
//!
//! Defines the two disjoint tagged-union families carried over the
//! WebSocket (one JSON object per text frame, discriminated by the `type`
//! field), plus the parse-then-validate entry point the server runs on
//! every inbound frame. After [`parse_client_message`] succeeds, business
//! logic only ever sees the typed union — there is no "unknown shape" case
//! left to handle at runtime.

use serde::{Deserialize, Serialize};

/// Maximum allowed task title length in characters.
pub const MAX_TITLE_LENGTH: usize = 500;

/// A shared task as stored and broadcast by the server.
///
/// Server-owned: every `Task` a client sees in a broadcast is the
/// authoritative post-mutation row. Clients synthesize speculative tasks
/// with negative ids locally, but never put those on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Server-assigned positive identifier.
    pub id: i64,
    /// Task title, 1..=500 characters after trimming.
    pub title: String,
    /// Whether the task has been completed.
    pub completed: bool,
    /// Creation time, milliseconds since epoch.
    pub created_at: u64,
    /// Last mutation time, milliseconds since epoch.
    pub updated_at: u64,
}

/// Messages a client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Request creation of a task. `temp_id` is the client-generated
    /// correlation id echoed back on the resulting broadcast.
    #[serde(rename = "todo:create")]
    Create {
        /// Client-generated correlation id, non-empty.
        temp_id: String,
        /// Title for the new task.
        title: String,
    },
    /// Request a partial update of an existing task.
    #[serde(rename = "todo:update")]
    Update {
        /// Id of the task to update.
        id: i64,
        /// New title, if changing.
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        /// New completion state, if changing.
        #[serde(skip_serializing_if = "Option::is_none")]
        completed: Option<bool>,
    },
    /// Request deletion of an existing task.
    #[serde(rename = "todo:delete")]
    Delete {
        /// Id of the task to delete.
        id: i64,
    },
}

impl ClientMessage {
    /// Returns the wire `type` tag for this message.
    #[must_use]
    pub const fn type_tag(&self) -> &'static str {
        match self {
            Self::Create { .. } => "todo:create",
            Self::Update { .. } => "todo:update",
            Self::Delete { .. } => "todo:delete",
        }
    }

    /// Checks the semantic constraints that the serde shape alone cannot:
    /// trimmed title bounds, positive ids, non-empty `tempId`.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason if any constraint is violated.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Create { temp_id, title } => {
                if temp_id.is_empty() {
                    return Err("tempId must not be empty".to_string());
                }
                validate_title(title)
            }
            Self::Update {
                id,
                title,
                completed: _,
            } => {
                validate_id(*id)?;
                if let Some(title) = title {
                    validate_title(title)?;
                }
                Ok(())
            }
            Self::Delete { id } => validate_id(*id),
        }
    }
}

/// Messages the server sends to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// A task was created. `temp_id` is present only on the copy sent to
    /// the originating connection, so it can reconcile its speculative
    /// entry; all other peers receive `None`.
    #[serde(rename = "todo:created")]
    Created {
        /// Correlation id from the originating `todo:create`, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
        /// The authoritative post-insert row.
        data: Task,
    },
    /// A task was updated.
    #[serde(rename = "todo:updated")]
    Updated {
        /// The authoritative post-update row.
        data: Task,
    },
    /// A task was deleted.
    #[serde(rename = "todo:deleted")]
    Deleted {
        /// Id of the removed task.
        id: i64,
    },
    /// Full-state snapshot, sent on connect and after reconnects.
    /// Tasks are ordered most-recently-created first.
    #[serde(rename = "todo:sync")]
    Sync {
        /// The full current task list.
        data: Vec<Task>,
    },
    /// A request from this connection was rejected. Never broadcast.
    #[serde(rename = "error")]
    Error {
        /// Human-readable reason.
        message: String,
        /// Best-effort `type` tag of the offending payload.
        #[serde(skip_serializing_if = "Option::is_none")]
        original_type: Option<String>,
    },
}

/// Errors produced while turning an inbound text frame into a
/// [`ClientMessage`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The frame was not valid JSON at all.
    #[error("malformed JSON: {0}")]
    Malformed(String),
    /// The frame was valid JSON but failed the schema or its semantic
    /// constraints. Carries the `type` tag of the payload if one was
    /// present, so the rejection can name what the client attempted.
    #[error("invalid message: {reason}")]
    Schema {
        /// Why the payload was rejected.
        reason: String,
        /// Best-effort `type` field of the malformed payload.
        original_type: Option<String>,
    },
}

impl WireError {
    /// The `type` tag of the offending payload, when recoverable.
    #[must_use]
    pub fn original_type(&self) -> Option<&str> {
        match self {
            Self::Malformed(_) => None,
            Self::Schema { original_type, .. } => original_type.as_deref(),
        }
    }
}

/// Parses and validates one inbound text frame.
///
/// The payload is first read as untyped JSON (so a `type` tag can be
/// recovered even from payloads that fail the schema), then decoded into
/// the tagged union, then checked against the semantic constraints.
///
/// # Errors
///
/// [`WireError::Malformed`] for unparsable JSON, [`WireError::Schema`]
/// for well-formed payloads that fail the schema or its constraints.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, WireError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| WireError::Malformed(e.to_string()))?;
    let original_type = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .map(String::from);

    let msg: ClientMessage = serde_json::from_value(value).map_err(|e| WireError::Schema {
        reason: e.to_string(),
        original_type: original_type.clone(),
    })?;

    msg.validate().map_err(|reason| WireError::Schema {
        reason,
        original_type,
    })?;

    Ok(msg)
}

/// Encodes a [`ServerMessage`] as a JSON text frame.
///
/// # Errors
///
/// Returns an error string if serialization fails.
pub fn encode_server_message(msg: &ServerMessage) -> Result<String, String> {
    serde_json::to_string(msg).map_err(|e| format!("server message encode error: {e}"))
}

/// Decodes a [`ServerMessage`] from a JSON text frame (client side).
///
/// # Errors
///
/// Returns an error string if the frame is not a valid server message.
pub fn decode_server_message(text: &str) -> Result<ServerMessage, String> {
    serde_json::from_str(text).map_err(|e| format!("server message decode error: {e}"))
}

/// Encodes a [`ClientMessage`] as a JSON text frame (client side).
///
/// # Errors
///
/// Returns an error string if serialization fails.
pub fn encode_client_message(msg: &ClientMessage) -> Result<String, String> {
    serde_json::to_string(msg).map_err(|e| format!("client message encode error: {e}"))
}

fn validate_title(title: &str) -> Result<(), String> {
    if title.trim().is_empty() {
        return Err("title must not be empty".to_string());
    }
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(format!("title too long (max {MAX_TITLE_LENGTH} characters)"));
    }
    Ok(())
}

fn validate_id(id: i64) -> Result<(), String> {
    if id <= 0 {
        return Err(format!("id must be a positive integer, got {id}"));
    }
    Ok(())
}
