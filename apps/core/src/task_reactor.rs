use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::model::{TaskStatus, TaskUpdate};
use crate::task_store::{StoreError, TaskStore};
use crate::watch_events::FileChangeEvent;

pub const INTERACTION_KIND: &str = "file_change";
pub const INTERACTION_SOURCE: &str = "file_watcher";

#[derive(Debug, thiserror::Error)]
pub enum ReactorError {
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("store error: {0}")]
    Store(StoreError),
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<StoreError> for ReactorError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::TaskNotFound(id) => Self::TaskNotFound(id),
            other => Self::Store(other),
        }
    }
}

#[derive(Serialize)]
struct InteractionPayload<'a> {
    file_change: &'a FileChangeEvent,
    auto_generated: bool,
}

/// Writes the side-effects of a dispatched change into the task store.
pub struct TaskReactor {
    store: Arc<dyn TaskStore>,
    auto_update_status: bool,
}

impl TaskReactor {
    pub fn new(store: Arc<dyn TaskStore>, auto_update_status: bool) -> Self {
        Self {
            store,
            auto_update_status,
        }
    }

    /// Handles each affected task in order. Returns how many succeeded.
    pub fn apply(&self, event: &FileChangeEvent) -> usize {
        let mut applied = 0;
        for task_id in &event.task_ids {
            match self.react(task_id, event) {
                Ok(_) => applied += 1,
                Err(error) => warn!(task_id = %task_id, %error, "file change not applied"),
            }
        }
        applied
    }

    /// Returns true when the task was moved to in-progress.
    pub fn react(&self, task_id: &str, event: &FileChangeEvent) -> Result<bool, ReactorError> {
        let task = self.store.get_task(task_id)?;

        let payload = serde_json::to_string(&InteractionPayload {
            file_change: event,
            auto_generated: true,
        })?;
        if let Err(error) = self.store.record_ai_interaction(
            task_id,
            INTERACTION_KIND,
            &payload,
            INTERACTION_SOURCE,
        ) {
            warn!(task_id, %error, "failed to record file change interaction");
        }

        let transition = self.auto_update_status
            && task.status == TaskStatus::Pending
            && event.operation.is_content_change();
        if transition {
            self.store
                .update_task(task_id, &TaskUpdate::status(TaskStatus::InProgress))?;
            info!(task_id, path = %event.path.display(), "task moved to in-progress by file change");
        }

        if let Err(error) = self.store.touch_last_ai_interaction(task_id, Utc::now()) {
            warn!(task_id, %error, "failed to touch last interaction time");
        }

        Ok(transition)
    }
}
