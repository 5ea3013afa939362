//! Streaming chat endpoint.
//!
//! `POST /api/chat` validates the request, persists the user message,
//! builds a system context describing the current task list, and relays
//! the provider's completion stream to the caller as SSE. When the stream
//! ends cleanly the accumulated text is scanned for suggestion markers,
//! the stripped text is persisted as the assistant message, and a
//! `suggestions` event followed by `done` closes the turn.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::{Stream, StreamExt};
use taskboard_proto::chat::{ChatEvent, ChatRequest, ChatRole, MAX_CHAT_CONTENT_LENGTH};
use taskboard_proto::message::Task;
use taskboard_proto::suggest::extract_suggestions;
use tracing::{debug, warn};

use crate::hub::AppState;
use crate::provider::ChatTurn;

/// Rejections for the chat endpoint, all answered with HTTP 400.
#[derive(Debug, thiserror::Error)]
pub enum ChatRequestError {
    #[error("message must not be empty")]
    Empty,
    #[error("message must be at most {MAX_CHAT_CONTENT_LENGTH} characters")]
    TooLong,
}

impl IntoResponse for ChatRequestError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.to_string() });
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

/// Renders the system context handed to the provider: the current task
/// list plus the instruction for emitting suggestion markers.
fn render_context(tasks: &[Task]) -> String {
    let mut out = String::from(
        "You are a helpful assistant for a shared todo list. \
         The current tasks are:\n",
    );
    if tasks.is_empty() {
        out.push_str("(the list is empty)\n");
    } else {
        for task in tasks {
            let mark = if task.completed { "x" } else { " " };
            out.push_str(&format!("- [{mark}] {}\n", task.title));
        }
    }
    out.push_str(
        "\nWhen you want to propose a new task, embed a marker of the form \
         [[suggest: \"task title\"]] inline in your reply. Escape any double \
         quote in the title as \\\" and any backslash as \\\\. Markers are \
         removed before the reply is shown, so keep the surrounding prose \
         readable without them.",
    );
    out
}

fn sse_event(event: &ChatEvent) -> Result<Event, Infallible> {
    // The discriminant travels in the JSON body, so a plain data-only
    // frame is enough on the wire.
    match serde_json::to_string(event) {
        Ok(json) => Ok(Event::default().data(json)),
        Err(e) => {
            warn!(error = %e, "failed to encode chat event");
            Ok(Event::default().data(r#"{"type":"error","message":"internal error"}"#))
        }
    }
}

/// Handles `POST /api/chat`.
///
/// # Errors
///
/// Returns 400 when the message is empty after trimming or exceeds
/// [`MAX_CHAT_CONTENT_LENGTH`] characters.
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ChatRequestError> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ChatRequestError::Empty);
    }
    if content.chars().count() > MAX_CHAT_CONTENT_LENGTH {
        return Err(ChatRequestError::TooLong);
    }

    let user_message = state.store.append_message(ChatRole::User, &content).await;
    debug!(message_id = user_message.id, "chat turn started");

    let system_context = render_context(&state.service.list().await);
    let history: Vec<ChatTurn> = state
        .store
        .list_messages()
        .await
        .into_iter()
        .map(|m| ChatTurn {
            role: m.role,
            content: m.content,
        })
        .collect();

    let state = Arc::clone(&state);
    let stream = async_stream::stream! {
        let mut fragments = match state
            .provider
            .stream_completion(&system_context, &history)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "completion request failed");
                yield sse_event(&ChatEvent::Error {
                    message: e.user_message().to_string(),
                });
                return;
            }
        };

        let mut buffer = String::new();
        while let Some(fragment) = fragments.next().await {
            match fragment {
                Ok(text) => {
                    buffer.push_str(&text);
                    yield sse_event(&ChatEvent::Chunk { content: text });
                }
                Err(e) => {
                    // The turn is abandoned: nothing persisted, the client
                    // keeps whatever partial text it already rendered.
                    warn!(error = %e, "completion stream failed");
                    yield sse_event(&ChatEvent::Error {
                        message: e.user_message().to_string(),
                    });
                    return;
                }
            }
        }

        let extraction = extract_suggestions(&buffer);
        let assistant = state
            .store
            .append_message(ChatRole::Assistant, extraction.text.trim())
            .await;
        let mut items = Vec::with_capacity(extraction.titles.len());
        for title in &extraction.titles {
            items.push(state.store.add_suggestion(assistant.id, title).await);
        }
        debug!(
            message_id = assistant.id,
            suggestions = items.len(),
            "chat turn finished"
        );

        yield sse_event(&ChatEvent::Suggestions { items });
        yield sse_event(&ChatEvent::Done {});
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
