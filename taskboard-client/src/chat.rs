//! Client side of the chat stream.
//!
//! [`SseParser`] turns raw SSE bytes into [`ChatEvent`]s, buffering across
//! chunk boundaries since an event frame can arrive split. [`ChatConsumer`]
//! folds the events of one turn into an [`AssistantTurn`].

use taskboard_proto::chat::{ChatEvent, Suggestion, decode_chat_event};

/// Incremental parser for an SSE response body.
///
/// Feed it raw chunks as they arrive; it yields every complete event and
/// keeps any trailing partial frame buffered for the next feed.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes a raw chunk and returns the chat events completed by it.
    ///
    /// Frames that are not valid chat events are skipped with a log line;
    /// comment lines and other SSE fields are ignored.
    pub fn feed(&mut self, chunk: &str) -> Vec<ChatEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find("\n\n") {
            let frame = self.buffer[..pos].to_string();
            self.buffer.drain(..pos + 2);

            for line in frame.lines() {
                let Some(payload) = line.strip_prefix("data:") else {
                    continue;
                };
                match decode_chat_event(payload.trim()) {
                    Ok(event) => events.push(event),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping malformed chat event");
                    }
                }
            }
        }

        events
    }
}

/// Accumulated state of one assistant turn.
#[derive(Debug, Default, Clone)]
pub struct AssistantTurn {
    /// Visible text streamed so far.
    pub text: String,
    /// Suggestions delivered at the end of the stream.
    pub suggestions: Vec<Suggestion>,
    /// Set once the terminal `done` event arrives.
    pub done: bool,
    /// Set if the server reported a failure. Partial text stays readable.
    pub error: Option<String>,
}

/// Folds chat events into an [`AssistantTurn`].
#[derive(Debug, Default)]
pub struct ChatConsumer {
    turn: AssistantTurn,
}

impl ChatConsumer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event to the turn.
    pub fn apply(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::Chunk { content } => self.turn.text.push_str(&content),
            ChatEvent::Suggestions { items } => self.turn.suggestions = items,
            ChatEvent::Done {} => self.turn.done = true,
            ChatEvent::Error { message } => self.turn.error = Some(message),
        }
    }

    /// The turn as accumulated so far.
    #[must_use]
    pub fn turn(&self) -> &AssistantTurn {
        &self.turn
    }

    /// Finishes the turn, consuming the consumer.
    #[must_use]
    pub fn into_turn(self) -> AssistantTurn {
        self.turn
    }
}
