// Task store
//
// One table per provider instance. Tasks are created Processing and
// finished exactly once by the handler that owns the current
// assignment. Entries are kept for the life of the process.

use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::envelope::{TaskResultMessage, TaskResultPayload, TaskStatus};
use crate::discovery::utc_timestamp;

#[derive(Debug, Clone)]
pub struct Task {
    pub task_id: String,
    pub operation: String,
    pub parameters: Map<String, Value>,
    pub status: TaskStatus,
    /// Present once the task is Done or Failed
    pub result: Option<TaskResultMessage>,
    pub original_client_id: String,
    /// messageId of the AssignTask that created this entry
    pub message_id: String,
    token: u64,
}

#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    tasks: Arc<DashMap<String, Task>>,
    next_token: Arc<AtomicU64>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite `task_id` as Processing. Returns the token the
    /// finishing handler must present to `complete`.
    pub fn create(
        &self,
        task_id: &str,
        operation: &str,
        parameters: Map<String, Value>,
        original_client_id: &str,
        message_id: &str,
    ) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = self.tasks.insert(
            task_id.to_string(),
            Task {
                task_id: task_id.to_string(),
                operation: operation.to_string(),
                parameters,
                status: TaskStatus::Processing,
                result: None,
                original_client_id: original_client_id.to_string(),
                message_id: message_id.to_string(),
                token,
            },
        );
        if previous.is_some() {
            tracing::warn!(task_id = %task_id, "Task id reassigned, previous entry replaced");
        }
        token
    }

    /// Finish a task with its result data. Ignored (returns false) when
    /// the task is gone, already finished, or was reassigned since
    /// `token` was issued.
    pub fn complete(&self, task_id: &str, token: u64, status: TaskStatus, result_data: Value) -> bool {
        let Some(mut task) = self.tasks.get_mut(task_id) else {
            return false;
        };
        if task.token != token || task.status != TaskStatus::Processing {
            return false;
        }

        let result = TaskResultMessage {
            message_id: format!("{}-result", task.message_id),
            timestamp: utc_timestamp(),
            payload: TaskResultPayload {
                task_id: task.task_id.clone(),
                status,
                result_data,
                original_client_id: task.original_client_id.clone(),
            },
        };
        task.status = status;
        task.result = Some(result);
        true
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.get(task_id).map(|t| t.clone())
    }

    /// Stored status, or Unknown
    pub fn status(&self, task_id: &str) -> TaskStatus {
        self.tasks
            .get(task_id)
            .map(|t| t.status)
            .unwrap_or(TaskStatus::Unknown)
    }

    /// Stored result, only once the task has finished
    pub fn result(&self, task_id: &str) -> Option<TaskResultMessage> {
        self.tasks.get(task_id).and_then(|t| t.result.clone())
    }

    /// Number of Processing tasks for `operation`
    pub fn outstanding(&self, operation: &str) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.operation == operation && t.status == TaskStatus::Processing)
            .count()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
