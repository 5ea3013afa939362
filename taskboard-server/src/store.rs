//! In-memory row store for tasks, chat messages, and suggestions.
//!
//! The [`Store`] is the single serialization point for task mutations:
//! every create/update/delete takes the write lock, so two mutations are
//! never applied concurrently against the same row. Ids are positive and
//! monotonically increasing, read-your-writes consistent.

use std::time::{SystemTime, UNIX_EPOCH};

use taskboard_proto::chat::{ChatRole, Suggestion};
use taskboard_proto::message::Task;
use tokio::sync::RwLock;

/// A persisted chat message, user- or assistant-authored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Server-assigned message id.
    pub id: i64,
    /// Who authored the message.
    pub role: ChatRole,
    /// Message text. For assistant messages this is marker-stripped.
    pub content: String,
    /// Creation time, milliseconds since epoch.
    pub created_at: u64,
}

#[derive(Debug, Default)]
struct Inner {
    /// Most-recently-created first.
    tasks: Vec<Task>,
    messages: Vec<ChatMessage>,
    suggestions: Vec<Suggestion>,
    next_task_id: i64,
    next_message_id: i64,
    next_suggestion_id: i64,
}

/// Thread-safe in-memory store.
#[derive(Debug, Default)]
pub struct Store {
    inner: RwLock<Inner>,
}

impl Store {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current time in milliseconds since epoch.
    fn now_ms() -> u64 {
        u64::try_from(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis(),
        )
        .unwrap_or(u64::MAX)
    }

    /// Inserts a new task at the head of the list and returns the row.
    pub async fn insert_task(&self, title: &str) -> Task {
        let now = Self::now_ms();
        let mut inner = self.inner.write().await;
        inner.next_task_id += 1;
        let task = Task {
            id: inner.next_task_id,
            title: title.to_string(),
            completed: false,
            created_at: now,
            updated_at: now,
        };
        inner.tasks.insert(0, task.clone());
        task
    }

    /// Applies a partial update to a task, returning the new row, or
    /// `None` if the id is unknown.
    pub async fn update_task(
        &self,
        id: i64,
        title: Option<&str>,
        completed: Option<bool>,
    ) -> Option<Task> {
        let now = Self::now_ms();
        let mut inner = self.inner.write().await;
        let task = inner.tasks.iter_mut().find(|t| t.id == id)?;
        if let Some(title) = title {
            task.title = title.to_string();
        }
        if let Some(completed) = completed {
            task.completed = completed;
        }
        task.updated_at = now;
        Some(task.clone())
    }

    /// Removes a task. Returns `true` if a row was removed.
    pub async fn remove_task(&self, id: i64) -> bool {
        let mut inner = self.inner.write().await;
        let before = inner.tasks.len();
        inner.tasks.retain(|t| t.id != id);
        inner.tasks.len() != before
    }

    /// Returns all tasks, most-recently-created first.
    pub async fn list_tasks(&self) -> Vec<Task> {
        self.inner.read().await.tasks.clone()
    }

    /// Appends a chat message and returns the persisted row.
    pub async fn append_message(&self, role: ChatRole, content: &str) -> ChatMessage {
        let now = Self::now_ms();
        let mut inner = self.inner.write().await;
        inner.next_message_id += 1;
        let message = ChatMessage {
            id: inner.next_message_id,
            role,
            content: content.to_string(),
            created_at: now,
        };
        inner.messages.push(message.clone());
        message
    }

    /// Returns all chat messages in insertion order.
    pub async fn list_messages(&self) -> Vec<ChatMessage> {
        self.inner.read().await.messages.clone()
    }

    /// Persists a suggestion linked to an assistant message.
    pub async fn add_suggestion(&self, source_message_id: i64, title: &str) -> Suggestion {
        let mut inner = self.inner.write().await;
        inner.next_suggestion_id += 1;
        let suggestion = Suggestion {
            id: inner.next_suggestion_id,
            source_message_id,
            title: title.to_string(),
            accepted: false,
        };
        inner.suggestions.push(suggestion.clone());
        suggestion
    }

    /// Returns all persisted suggestions in insertion order.
    pub async fn list_suggestions(&self) -> Vec<Suggestion> {
        self.inner.read().await.suggestions.clone()
    }
}
