//! The core work-item type and its lifecycle (SPEC_FULL §3.1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::DEFAULT_MAX_RETRIES;

/// `pending -> claimed -> (completed | failed | deferred)`, with `deferred` returning to
/// `pending` once its visibility timer elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Claimed,
    Completed,
    Failed,
    Deferred,
}

/// Non-negative integer priority. Higher pops first; ties break on `created_at`.
pub type Priority = u8;

pub const PRIORITY_LOW: Priority = 0;
pub const PRIORITY_MEDIUM: Priority = 1;
pub const PRIORITY_HIGH: Priority = 2;

/// A unit of work routed by `label` to whichever agent subscribes to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub label: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub payload: Value,

    pub parent_job_id: Option<Uuid>,
    pub from_agent: Option<String>,
    pub assigned_to: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub visible_at: Option<DateTime<Utc>>,

    pub retry_count: u32,
    pub max_retries: u32,

    pub error: Option<String>,
    pub result: Option<Value>,
}

impl Task {
    pub fn new(label: impl Into<String>, payload: Value, priority: Priority) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            priority,
            status: TaskStatus::Pending,
            payload,
            parent_job_id: None,
            from_agent: None,
            assigned_to: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            visible_at: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            error: None,
            result: None,
        }
    }

    pub fn with_parent(mut self, parent_job_id: Uuid) -> Self {
        self.parent_job_id = Some(parent_job_id);
        self
    }

    pub fn with_from_agent(mut self, agent: impl Into<String>) -> Self {
        self.from_agent = Some(agent.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// `topic_id` wins over `user_id` when both are present in the payload. Load-bearing:
    /// do not collapse this into a generic `entity` field, it would lose the precedence.
    pub fn extract_entity(&self) -> Option<(String, String)> {
        let obj = self.payload.as_object()?;
        if let Some(topic_id) = obj.get("topic_id").and_then(Value::as_str) {
            return Some(("topic".to_string(), topic_id.to_string()));
        }
        if let Some(user_id) = obj.get("user_id").and_then(Value::as_str) {
            return Some(("user".to_string(), user_id.to_string()));
        }
        None
    }
}

/// Successful outcome of a task: arbitrary result data plus zero or more follow-on tasks.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskResult {
    pub data: Option<Value>,
    #[serde(default)]
    pub new_tasks: Vec<Task>,
}

impl TaskResult {
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            new_tasks: Vec::new(),
        }
    }

    pub fn with_new_tasks(mut self, tasks: Vec<Task>) -> Self {
        self.new_tasks = tasks;
        self
    }
}

/// A task that wants to yield back to the queue without consuming retry budget.
#[derive(Debug, Clone)]
pub struct RetryLater {
    pub delay_seconds: i64,
    pub reason: String,
}

impl RetryLater {
    pub fn new(delay_seconds: i64, reason: impl Into<String>) -> Self {
        Self {
            delay_seconds,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_entity_prefers_topic_over_user() {
        let task = Task::new(
            "analyst:analyze",
            json!({"topic_id": "t1", "user_id": "u1"}),
            PRIORITY_MEDIUM,
        );
        assert_eq!(
            task.extract_entity(),
            Some(("topic".to_string(), "t1".to_string()))
        );
    }

    #[test]
    fn extract_entity_falls_back_to_user() {
        let task = Task::new("analyst:analyze", json!({"user_id": "u1"}), PRIORITY_MEDIUM);
        assert_eq!(
            task.extract_entity(),
            Some(("user".to_string(), "u1".to_string()))
        );
    }

    #[test]
    fn extract_entity_absent_is_none() {
        let task = Task::new("crawler:x", json!({}), PRIORITY_LOW);
        assert_eq!(task.extract_entity(), None);
    }

    #[test]
    fn new_task_starts_pending_with_default_retries() {
        let task = Task::new("analyst:analyze", json!({}), PRIORITY_HIGH);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.max_retries, DEFAULT_MAX_RETRIES);
    }
}
