//! Optimistic task-list reconciliation.
//!
//! Local mutations apply instantly to a speculative view of the list; each
//! mutation also produces the [`ClientMessage`] to send. Server broadcasts
//! fold back in via [`Reconciler::apply`], taking the authoritative value
//! as ground truth (last write wins, no client-side merging).
//!
//! Speculative tasks carry negative ids so they can never collide with a
//! server-assigned id, and a pending-creates map ties each one to the
//! `tempId` the server will echo back in `todo:created`.

use std::collections::HashMap;

use taskboard_proto::message::{ClientMessage, ServerMessage, Task};

/// Client-side view of the task list, newest first.
#[derive(Debug, Default)]
pub struct Reconciler {
    tasks: Vec<Task>,
    /// tempId -> speculative (negative) id of the placeholder task.
    pending: HashMap<String, i64>,
    next_speculative_id: i64,
}

impl Reconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current local view.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Number of creates awaiting server confirmation.
    #[must_use]
    pub fn pending_creates(&self) -> usize {
        self.pending.len()
    }

    /// Creates a task optimistically: a speculative entry goes to the head
    /// of the list, and the returned message asks the server to confirm it.
    pub fn create(&mut self, title: &str) -> ClientMessage {
        self.next_speculative_id -= 1;
        let temp_id = uuid::Uuid::now_v7().to_string();

        self.tasks.insert(
            0,
            Task {
                id: self.next_speculative_id,
                title: title.to_string(),
                completed: false,
                created_at: 0,
                updated_at: 0,
            },
        );
        self.pending
            .insert(temp_id.clone(), self.next_speculative_id);

        ClientMessage::Create {
            temp_id,
            title: title.to_string(),
        }
    }

    /// Toggles completion locally and returns the update to send.
    pub fn set_completed(&mut self, id: i64, completed: bool) -> ClientMessage {
        if let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) {
            task.completed = completed;
        }
        ClientMessage::Update {
            id,
            title: None,
            completed: Some(completed),
        }
    }

    /// Renames locally and returns the update to send.
    pub fn rename(&mut self, id: i64, title: &str) -> ClientMessage {
        if let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) {
            task.title = title.to_string();
        }
        ClientMessage::Update {
            id,
            title: Some(title.to_string()),
            completed: None,
        }
    }

    /// Removes locally and returns the delete to send.
    pub fn remove(&mut self, id: i64) -> ClientMessage {
        self.tasks.retain(|t| t.id != id);
        ClientMessage::Delete { id }
    }

    /// Folds a server broadcast into the local view.
    pub fn apply(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::Created { temp_id, data } => self.apply_created(temp_id, data),
            ServerMessage::Updated { data } => {
                if let Some(task) = self.tasks.iter_mut().find(|t| t.id == data.id) {
                    *task = data;
                } else {
                    // An update for a task we never saw (raced a create
                    // broadcast); adopt it.
                    self.tasks.insert(0, data);
                }
            }
            ServerMessage::Deleted { id } => {
                self.tasks.retain(|t| t.id != id);
            }
            ServerMessage::Sync { data } => {
                // Fresh snapshot supersedes everything, including creates
                // that never got confirmed before a disconnect.
                self.tasks = data;
                self.pending.clear();
            }
            ServerMessage::Error { .. } => {}
        }
    }

    fn apply_created(&mut self, temp_id: Option<String>, data: Task) {
        if let Some(speculative_id) = temp_id.and_then(|t| self.pending.remove(&t)) {
            // Our own create confirmed: swap in the authoritative task
            // without moving it in the list.
            if let Some(task) = self.tasks.iter_mut().find(|t| t.id == speculative_id) {
                *task = data;
                return;
            }
        }
        // Another client's create (or our placeholder vanished); insert
        // only if the id is new.
        if !self.tasks.iter().any(|t| t.id == data.id) {
            self.tasks.insert(0, data);
        }
    }
}
