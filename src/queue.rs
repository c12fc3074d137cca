//! Durable priority task queue (SPEC_FULL §4.1).
//!
//! Grounded on the teacher's `TaskQueue` (ordered structure for `pop` + id-indexed map for
//! lookups) and `AtomicTaskStateManager` (validate-before-mutate, consistent lock ordering).
//! Generalized with claim/retry/lease semantics the teacher's queue never needed.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::constants::{LEASE_TIMEOUT_SECS, MAX_QUEUE_SIZE};
use crate::error::{Result, SpiralError};
use crate::task::{Task, TaskStatus};

#[derive(Default)]
struct Inner {
    /// Id-indexed storage, the source of truth for every task's current state.
    tasks: HashMap<Uuid, Task>,
    /// Ordering hint for `pop`: ids of tasks currently `Pending`, scanned by priority then age.
    pending_order: Vec<Uuid>,
}

/// Priority queue over [`Task`]. One process-wide instance is shared (via `Arc`) across every
/// agent in the runtime, exactly as the single queue in SPEC_FULL §2 is shared across agents.
pub struct TaskQueue {
    inner: Arc<Mutex<Inner>>,
    max_queue_size: usize,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new(MAX_QUEUE_SIZE)
    }
}

impl TaskQueue {
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            max_queue_size,
        }
    }

    /// Idempotent on `task.id`: re-pushing an already-known id is a no-op.
    pub async fn push(&self, task: Task) -> Result<()> {
        let mut guard = self.inner.lock().await;
        if guard.tasks.contains_key(&task.id) {
            return Ok(());
        }
        if guard.tasks.len() >= self.max_queue_size {
            return Err(SpiralError::QueueFull);
        }
        let id = task.id;
        let status = task.status;
        guard.tasks.insert(id, task);
        if status == TaskStatus::Pending {
            guard.pending_order.push(id);
        }
        Ok(())
    }

    /// Claims the highest-priority `Pending` task whose label is in `labels`. Ties broken by
    /// oldest `created_at`. Never blocks.
    pub async fn pop(&self, labels: &[String], agent_name: &str) -> Result<Option<Task>> {
        let mut guard = self.inner.lock().await;
        let mut best: Option<(usize, Uuid)> = None;
        for (idx, id) in guard.pending_order.iter().enumerate() {
            let Some(task) = guard.tasks.get(id) else {
                continue;
            };
            if task.status != TaskStatus::Pending || !labels.iter().any(|l| l == &task.label) {
                continue;
            }
            match best {
                None => best = Some((idx, *id)),
                Some((_, best_id)) => {
                    let best_task = guard.tasks.get(&best_id).expect("indexed task exists");
                    let better = task.priority > best_task.priority
                        || (task.priority == best_task.priority
                            && task.created_at < best_task.created_at);
                    if better {
                        best = Some((idx, *id));
                    }
                }
            }
        }

        let Some((order_idx, id)) = best else {
            return Ok(None);
        };
        guard.pending_order.remove(order_idx);
        let task = guard.tasks.get_mut(&id).expect("indexed task exists");
        task.status = TaskStatus::Claimed;
        task.assigned_to = Some(agent_name.to_string());
        task.started_at = Some(Utc::now());
        Ok(Some(task.clone()))
    }

    pub async fn mark_done(&self, task_id: Uuid, result: serde_json::Value) -> Result<Task> {
        let mut guard = self.inner.lock().await;
        let task = guard
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| SpiralError::TaskNotFound(task_id.to_string()))?;
        if task.status != TaskStatus::Claimed {
            return Err(SpiralError::InvalidTransition(format!(
                "cannot mark_done task {task_id} from status {:?}",
                task.status
            )));
        }
        task.status = TaskStatus::Completed;
        task.result = Some(result);
        task.completed_at = Some(Utc::now());
        Ok(task.clone())
    }

    /// Increments `retry_count` and either returns the task to `pending` or terminalizes it as
    /// `failed`, per SPEC_FULL §9 decision 1: the queue owns retry accounting, not the caller.
    pub async fn mark_failed(&self, task_id: Uuid, error: impl Into<String>) -> Result<Task> {
        let mut guard = self.inner.lock().await;
        let task = guard
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| SpiralError::TaskNotFound(task_id.to_string()))?;
        if task.status != TaskStatus::Claimed {
            return Err(SpiralError::InvalidTransition(format!(
                "cannot mark_failed task {task_id} from status {:?}",
                task.status
            )));
        }
        task.retry_count += 1;
        task.error = Some(error.into());
        if task.retry_count >= task.max_retries {
            task.status = TaskStatus::Failed;
            task.completed_at = Some(Utc::now());
            let result = task.clone();
            return Ok(result);
        }
        task.status = TaskStatus::Pending;
        task.assigned_to = None;
        task.started_at = None;
        let result = task.clone();
        guard.pending_order.push(task_id);
        Ok(result)
    }

    /// Defers the task without consuming retry budget (SPEC_FULL §7 `RetryLater`).
    pub async fn requeue_delayed(&self, task_id: Uuid, delay_seconds: i64) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let task = guard
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| SpiralError::TaskNotFound(task_id.to_string()))?;
        task.status = TaskStatus::Deferred;
        task.assigned_to = None;
        task.visible_at = Some(Utc::now() + ChronoDuration::seconds(delay_seconds.max(0)));
        Ok(())
    }

    /// Promotes due `deferred` tasks back to `pending`, and reclaims `claimed` tasks whose
    /// lease has expired (SPEC_FULL §4.1/§9 decision 2 — not present in the source, added to
    /// make the queue crash-safe).
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut guard = self.inner.lock().await;
        let lease_cutoff = now - ChronoDuration::seconds(LEASE_TIMEOUT_SECS);
        let mut reclaimed = Vec::new();

        for (id, task) in guard.tasks.iter_mut() {
            match task.status {
                TaskStatus::Deferred => {
                    if task.visible_at.map(|at| at <= now).unwrap_or(true) {
                        task.status = TaskStatus::Pending;
                        task.visible_at = None;
                        reclaimed.push(*id);
                    }
                }
                TaskStatus::Claimed => {
                    if task.started_at.map(|at| at <= lease_cutoff).unwrap_or(false) {
                        task.retry_count += 1;
                        task.assigned_to = None;
                        task.started_at = None;
                        if task.retry_count >= task.max_retries {
                            task.status = TaskStatus::Failed;
                            task.error = Some("lease expired".to_string());
                            task.completed_at = Some(now);
                        } else {
                            task.status = TaskStatus::Pending;
                            reclaimed.push(*id);
                        }
                    }
                }
                _ => {}
            }
        }

        for id in &reclaimed {
            if !guard.pending_order.contains(id) {
                guard.pending_order.push(*id);
            }
        }
        Ok(reclaimed.len())
    }

    pub async fn get(&self, task_id: Uuid) -> Result<Task> {
        let guard = self.inner.lock().await;
        guard
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| SpiralError::TaskNotFound(task_id.to_string()))
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::PRIORITY_MEDIUM;
    use serde_json::json;

    fn task(label: &str) -> Task {
        Task::new(label, json!({}), PRIORITY_MEDIUM)
    }

    #[tokio::test]
    async fn push_then_pop_claims_task() {
        let queue = TaskQueue::default();
        let t = task("crawler:x");
        let id = t.id;
        queue.push(t).await.unwrap();
        let popped = queue.pop(&["crawler:x".to_string()], "worker-1").await.unwrap().unwrap();
        assert_eq!(popped.id, id);
        assert_eq!(popped.status, TaskStatus::Claimed);
        assert_eq!(popped.assigned_to, Some("worker-1".to_string()));
    }

    #[tokio::test]
    async fn pop_empty_label_set_returns_none() {
        let queue = TaskQueue::default();
        queue.push(task("crawler:x")).await.unwrap();
        let popped = queue.pop(&[], "worker-1").await.unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn pop_respects_priority_then_age() {
        let queue = TaskQueue::default();
        let low = Task::new("crawler:x", json!({}), crate::task::PRIORITY_LOW);
        let high = Task::new("crawler:x", json!({}), crate::task::PRIORITY_HIGH);
        let high_id = high.id;
        queue.push(low).await.unwrap();
        queue.push(high).await.unwrap();
        let popped = queue.pop(&["crawler:x".to_string()], "w").await.unwrap().unwrap();
        assert_eq!(popped.id, high_id);
    }

    #[tokio::test]
    async fn idempotent_push_is_noop_on_duplicate_id() {
        let queue = TaskQueue::default();
        let t = task("crawler:x");
        queue.push(t.clone()).await.unwrap();
        queue.push(t.clone()).await.unwrap();
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn mark_done_round_trips() {
        let queue = TaskQueue::default();
        let t = task("crawler:x");
        let id = t.id;
        queue.push(t).await.unwrap();
        queue.pop(&["crawler:x".to_string()], "w").await.unwrap();
        let done = queue.mark_done(id, json!({"ok": true})).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        let fetched = queue.get(id).await.unwrap();
        assert_eq!(fetched.status, TaskStatus::Completed);
        assert_eq!(fetched.result, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn mark_failed_terminalizes_after_max_retries() {
        let queue = TaskQueue::default();
        let t = task("crawler:x").with_max_retries(2);
        let id = t.id;
        queue.push(t).await.unwrap();

        for _ in 0..2 {
            queue.pop(&["crawler:x".to_string()], "w").await.unwrap();
            queue.mark_failed(id, "boom").await.unwrap();
        }
        let final_state = queue.get(id).await.unwrap();
        assert_eq!(final_state.status, TaskStatus::Failed);
        assert_eq!(final_state.retry_count, 2);
    }

    #[tokio::test]
    async fn mark_failed_below_ceiling_returns_to_pending() {
        let queue = TaskQueue::default();
        let t = task("crawler:x").with_max_retries(3);
        let id = t.id;
        queue.push(t).await.unwrap();
        queue.pop(&["crawler:x".to_string()], "w").await.unwrap();
        let after = queue.mark_failed(id, "transient").await.unwrap();
        assert_eq!(after.status, TaskStatus::Pending);
        assert_eq!(after.retry_count, 1);
    }

    #[tokio::test]
    async fn requeue_delayed_then_sweep_restores_pending() {
        let queue = TaskQueue::default();
        let t = task("crawler:x");
        let id = t.id;
        queue.push(t).await.unwrap();
        queue.pop(&["crawler:x".to_string()], "w").await.unwrap();
        queue.requeue_delayed(id, 0).await.unwrap();
        let swept = queue.sweep_expired().await.unwrap();
        assert_eq!(swept, 1);
        assert_eq!(queue.get(id).await.unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn queue_full_rejects_push() {
        let queue = TaskQueue::new(1);
        queue.push(task("crawler:x")).await.unwrap();
        let err = queue.push(task("crawler:x")).await.unwrap_err();
        assert!(matches!(err, SpiralError::QueueFull));
    }

    /// Invariant 1 (SPEC_FULL §8): no two concurrent `pop` callers may ever claim the same
    /// task id. Ten agents race on a single-task queue; exactly one observes `Some`.
    #[tokio::test]
    async fn concurrent_pop_claims_a_task_at_most_once() {
        let queue = Arc::new(TaskQueue::default());
        let id = {
            let t = task("crawler:x");
            let id = t.id;
            queue.push(t).await.unwrap();
            id
        };

        let claims = futures::future::join_all((0..10).map(|i| {
            let queue = queue.clone();
            async move { queue.pop(&["crawler:x".to_string()], &format!("worker-{i}")).await.unwrap() }
        }))
        .await;

        let winners: Vec<_> = claims.into_iter().flatten().filter(|t| t.id == id).collect();
        assert_eq!(winners.len(), 1);
    }
}
