//! Task service: the validating mutation facade over the store.
//!
//! The hub (and any other caller, such as a REST surface) goes through the
//! service, never the store directly, so every mutation is validated the
//! same way and every broadcast carries the authoritative post-mutation
//! row.

use std::sync::Arc;

use taskboard_proto::message::{MAX_TITLE_LENGTH, Task};

use crate::store::Store;

/// Errors produced by task mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// Task title was empty after trimming.
    #[error("title must not be empty")]
    TitleEmpty,
    /// Task title exceeded the maximum length.
    #[error("title too long (max {MAX_TITLE_LENGTH} characters)")]
    TitleTooLong,
    /// An update carried neither a title nor a completion change.
    #[error("nothing to update")]
    EmptyUpdate,
    /// No task exists with the given id.
    #[error("todo not found: {0}")]
    NotFound(i64),
}

/// Business-logic facade for task mutations.
#[derive(Clone)]
pub struct TaskService {
    store: Arc<Store>,
}

impl TaskService {
    /// Creates a service over the given store.
    #[must_use]
    pub const fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Returns all tasks, most-recently-created first.
    pub async fn list(&self) -> Vec<Task> {
        self.store.list_tasks().await
    }

    /// Creates a task from a title. The stored title is trimmed.
    ///
    /// # Errors
    ///
    /// [`ServiceError::TitleEmpty`] or [`ServiceError::TitleTooLong`].
    pub async fn create(&self, title: &str) -> Result<Task, ServiceError> {
        let title = validate_title(title)?;
        Ok(self.store.insert_task(title).await)
    }

    /// Applies a partial update to a task.
    ///
    /// # Errors
    ///
    /// [`ServiceError::EmptyUpdate`] if neither field is given, title
    /// validation errors, or [`ServiceError::NotFound`].
    pub async fn update(
        &self,
        id: i64,
        title: Option<&str>,
        completed: Option<bool>,
    ) -> Result<Task, ServiceError> {
        if title.is_none() && completed.is_none() {
            return Err(ServiceError::EmptyUpdate);
        }
        let title = title.map(validate_title).transpose()?;
        self.store
            .update_task(id, title, completed)
            .await
            .ok_or(ServiceError::NotFound(id))
    }

    /// Deletes a task.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotFound`] if the id is unknown.
    pub async fn delete(&self, id: i64) -> Result<(), ServiceError> {
        if self.store.remove_task(id).await {
            Ok(())
        } else {
            Err(ServiceError::NotFound(id))
        }
    }
}

/// Trims a title and checks its bounds, returning the trimmed slice.
fn validate_title(title: &str) -> Result<&str, ServiceError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::TitleEmpty);
    }
    if trimmed.chars().count() > MAX_TITLE_LENGTH {
        return Err(ServiceError::TitleTooLong);
    }
    Ok(trimmed)
}
