//! Chat streaming wire format.
//!
//! Types for the `POST /api/chat` request body and the `text/event-stream`
//! response: one JSON-encoded [`ChatEvent`] per SSE `data:` line.

use serde::{Deserialize, Serialize};

/// Maximum allowed chat message length in characters.
pub const MAX_CHAT_CONTENT_LENGTH: usize = 4000;

/// Request body for `POST /api/chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The user's message, 1..=4000 characters after trimming.
    pub content: String,
}

/// Who authored a persisted chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// A message typed by the user.
    User,
    /// A message produced by the completion provider.
    Assistant,
}

/// A task suggestion extracted from an assistant response and persisted
/// alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    /// Server-assigned suggestion id.
    pub id: i64,
    /// Id of the assistant message this suggestion came from.
    pub source_message_id: i64,
    /// Proposed task title.
    pub title: String,
    /// Whether the user has accepted the suggestion into the task list.
    pub accepted: bool,
}

/// Events pushed over the chat SSE stream, in order: zero or more `chunk`s,
/// then `suggestions`, then `done` — or a single terminal `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ChatEvent {
    /// An incremental fragment of the assistant's visible response text.
    Chunk {
        /// Raw text fragment as received from the provider.
        content: String,
    },
    /// All suggestions extracted from the completed response.
    Suggestions {
        /// Persisted suggestion rows, in order of appearance.
        items: Vec<Suggestion>,
    },
    /// The response completed successfully. Always the final event.
    Done {},
    /// The stream failed. Always terminal; the message is sanitized.
    Error {
        /// User-facing description of the failure.
        message: String,
    },
}

/// Encodes a [`ChatEvent`] for an SSE `data:` line.
///
/// # Errors
///
/// Returns an error string if serialization fails.
pub fn encode_chat_event(event: &ChatEvent) -> Result<String, String> {
    serde_json::to_string(event).map_err(|e| format!("chat event encode error: {e}"))
}

/// Decodes a [`ChatEvent`] from an SSE `data:` line (client side).
///
/// # Errors
///
/// Returns an error string if the payload is not a valid chat event.
pub fn decode_chat_event(text: &str) -> Result<ChatEvent, String> {
    serde_json::from_str(text).map_err(|e| format!("chat event decode error: {e}"))
}
