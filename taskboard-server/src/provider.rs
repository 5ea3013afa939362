//! Streaming completion provider client.
//!
//! [`CompletionProvider`] is the seam between the chat orchestrator and
//! the upstream language model: the orchestrator only ever sees a lazy
//! stream of text fragments. [`OpenAiProvider`] implements it against any
//! OpenAI-compatible `/chat/completions` endpoint with `stream: true`,
//! parsing the upstream SSE frames (`data:` lines, `[DONE]` terminator)
//! into delta text.

use std::pin::Pin;

use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use taskboard_proto::chat::ChatRole;

/// Errors from the completion provider.
///
/// Raw upstream detail stays in these variants for logs; anything shown
/// to a user goes through [`ProviderError::user_message`], which never
/// leaks credentials, stack detail, or provider-specific error shapes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The provider rejected our credentials (401/403).
    #[error("completion provider rejected credentials")]
    Auth,
    /// The provider rate-limited the request (429).
    #[error("completion provider rate limited the request")]
    RateLimited,
    /// Could not reach the provider, or the connection dropped mid-stream.
    #[error("completion provider network failure: {0}")]
    Network(String),
    /// The provider answered with something we could not use.
    #[error("completion provider protocol error: {0}")]
    Protocol(String),
}

impl ProviderError {
    /// Sanitized, user-facing description of the failure.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::Auth => "the assistant is not configured correctly",
            Self::RateLimited => "the assistant is busy, please try again shortly",
            Self::Network(_) | Self::Protocol(_) => {
                "the assistant is unavailable right now, please try again"
            }
        }
    }
}

/// One prior message handed to the provider as conversation history.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    /// Author of the turn.
    pub role: ChatRole,
    /// Turn text.
    pub content: String,
}

/// Lazy sequence of assistant text fragments.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Seam to the upstream language model.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Starts a streamed completion for the given system context and
    /// conversation history.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the request cannot be started; errors
    /// after streaming begins surface as `Err` items in the stream.
    async fn stream_completion(
        &self,
        system_context: &str,
        history: &[ChatTurn],
    ) -> Result<CompletionStream, ProviderError>;
}

/// Client for OpenAI-compatible streaming chat-completion endpoints.
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiProvider {
    /// Creates a provider client. `base_url` is the API root, without the
    /// `/chat/completions` suffix.
    #[must_use]
    pub fn new(base_url: &str, api_key: Option<String>, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

/// Extracts the delta text from one upstream SSE payload, if any.
fn parse_delta(payload: &str) -> Option<String> {
    let parsed: StreamResponse = serde_json::from_str(payload).ok()?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn stream_completion(
        &self,
        system_context: &str,
        history: &[ChatTurn],
    ) -> Result<CompletionStream, ProviderError> {
        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": system_context,
        })];
        for turn in history {
            messages.push(serde_json::json!({
                "role": turn.role,
                "content": turn.content,
            }));
        }

        let body = serde_json::json!({
            "model": self.model,
            "stream": true,
            "messages": messages,
        });

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::Auth);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            return Err(ProviderError::Protocol(format!("status {status}")));
        }

        let mut bytes = resp.bytes_stream();
        let stream = try_stream! {
            let mut buffer = String::new();
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| ProviderError::Network(e.to_string()))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buffer.find("\n\n") {
                    let frame = buffer[..pos].to_string();
                    buffer = buffer[pos + 2..].to_string();
                    for line in frame.lines() {
                        let Some(payload) = line.strip_prefix("data:") else {
                            continue;
                        };
                        let payload = payload.trim();
                        if payload == "[DONE]" {
                            break 'read;
                        }
                        if let Some(delta) = parse_delta(payload) {
                            if !delta.is_empty() {
                                yield delta;
                            }
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
