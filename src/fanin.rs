//! Fan-in coordinator (SPEC_FULL §4.3), grounded precisely on `_handle_fan_in` in
//! `original_source/apps/shared/shared/agent/base.py`: stage `on_complete` + a pending
//! counter before pushing children, decrement on every terminal child, and fire the
//! continuation exactly once on the zero crossing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::kv::KvStore;
use crate::progress::{Phase, ProgressStore};
use crate::queue::TaskQueue;
use crate::task::Task;

/// A continuation staged before an entity's children are pushed, consumed exactly once when
/// the last child reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnComplete {
    pub label: String,
    pub payload: Value,
    pub next_phase: Phase,
}

fn pending_key(entity_type: &str, entity_id: &str) -> String {
    format!("fanin:pending:{entity_type}:{entity_id}")
}

fn on_complete_key(entity_type: &str, entity_id: &str) -> String {
    format!("fanin:on_complete:{entity_type}:{entity_id}")
}

pub struct FanInCoordinator {
    kv: Arc<dyn KvStore>,
    progress: Arc<ProgressStore>,
    queue: Arc<TaskQueue>,
}

impl FanInCoordinator {
    pub fn new(kv: Arc<dyn KvStore>, progress: Arc<ProgressStore>, queue: Arc<TaskQueue>) -> Self {
        Self { kv, progress, queue }
    }

    /// Stages the continuation and pending counter, sets `phase=crawling`, then pushes every
    /// child. Must run before any child can possibly complete, so the counter is never
    /// decremented before it's set.
    pub async fn stage_and_dispatch(
        &self,
        entity_type: &str,
        entity_id: &str,
        on_complete: OnComplete,
        children: Vec<Task>,
    ) -> Result<()> {
        self.kv
            .set_ex(
                &on_complete_key(entity_type, entity_id),
                &serde_json::to_string(&on_complete)?,
                None,
            )
            .await?;
        self.kv
            .set_counter(&pending_key(entity_type, entity_id), children.len() as i64)
            .await?;
        self.progress
            .set_phase(entity_type, entity_id, Phase::Crawling, Some(children.len() as i64))
            .await?;

        let ids: Vec<String> = children.iter().map(|t| t.id.to_string()).collect();
        self.progress.set_task_ids(entity_type, entity_id, &ids).await?;

        for child in children {
            self.queue.push(child).await?;
        }
        Ok(())
    }

    /// Whether a continuation is currently staged for this entity. The agent runtime snapshots
    /// this before executing a claimed task to decide whether that task's own terminal
    /// transition should count against the stage (SPEC_FULL §9 decision 4) — checking the
    /// `on_complete` key itself, rather than whether an entity progress record merely exists,
    /// so the continuation task that *consumes* a stage is never mistaken for one of the
    /// children that fed it (the progress record outlives the stage across phases; this key
    /// does not).
    pub async fn has_staged(&self, entity_type: &str, entity_id: &str) -> Result<bool> {
        Ok(self
            .kv
            .get(&on_complete_key(entity_type, entity_id))
            .await?
            .is_some())
    }

    /// Invoked by the agent runtime whenever a fan-in-enabled agent's task reaches a terminal
    /// state. Runs exactly once per terminating task — never on intermediate retries, which is
    /// the correctness anchor for SPEC_FULL invariant 4.
    pub async fn on_child_terminal(
        &self,
        entity_type: &str,
        entity_id: &str,
        parent_job_id: Option<Uuid>,
    ) -> Result<Option<Task>> {
        let remaining = self.kv.decr(&pending_key(entity_type, entity_id)).await?;
        self.progress.increment_done(entity_type, entity_id).await?;

        if remaining > 0 {
            return Ok(None);
        }

        let key = on_complete_key(entity_type, entity_id);
        let staged = self.kv.get(&key).await?;
        self.kv.del(&[key.as_str()]).await?;
        self.progress.cleanup_task_ids(entity_type, entity_id).await?;

        let Some(raw) = staged else {
            return Ok(None);
        };
        let on_complete: OnComplete = serde_json::from_str(&raw)?;
        self.progress
            .set_phase(entity_type, entity_id, on_complete.next_phase, None)
            .await?;

        let mut continuation = Task::new(on_complete.label, on_complete.payload, crate::task::PRIORITY_MEDIUM);
        if let Some(parent) = parent_job_id {
            continuation = continuation.with_parent(parent);
        }
        Ok(Some(continuation))
    }
}
