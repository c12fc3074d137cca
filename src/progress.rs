//! Entity and per-task progress records (SPEC_FULL §3.2, §3.4, §4.6).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{ENTITY_PROGRESS_TTL_SECS, TASK_PROGRESS_TTL_SECS};
use crate::error::Result;
use crate::kv::KvStore;

/// `analyzing -> crawling -> summarizing -> done`, with `error` reachable from any phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Analyzing,
    Crawling,
    Summarizing,
    Done,
    Error,
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Phase::Analyzing => "analyzing",
            Phase::Crawling => "crawling",
            Phase::Summarizing => "summarizing",
            Phase::Done => "done",
            Phase::Error => "error",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "analyzing" => Some(Phase::Analyzing),
            "crawling" => Some(Phase::Crawling),
            "summarizing" => Some(Phase::Summarizing),
            "done" => Some(Phase::Done),
            "error" => Some(Phase::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityProgress {
    pub phase: Phase,
    pub total: i64,
    pub done: i64,
    pub step: Option<String>,
    pub error_msg: Option<String>,
    pub updated_at: chrono::DateTime<Utc>,
}

fn entity_key(entity_type: &str, entity_id: &str) -> String {
    format!("progress:entity:{entity_type}:{entity_id}")
}

fn task_ids_key(entity_type: &str, entity_id: &str) -> String {
    format!("progress:task_ids:{entity_type}:{entity_id}")
}

fn task_key(task_id: &str) -> String {
    format!("progress:task:{task_id}")
}

/// Reads and writes progress state through the shared [`KvStore`] (SPEC_FULL §4.6 "Readers").
pub struct ProgressStore {
    kv: Arc<dyn KvStore>,
}

impl ProgressStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn set_phase(
        &self,
        entity_type: &str,
        entity_id: &str,
        phase: Phase,
        total: Option<i64>,
    ) -> Result<()> {
        let key = entity_key(entity_type, entity_id);
        self.kv.hset(&key, "phase", phase.as_str()).await?;
        if let Some(total) = total {
            self.kv.hset(&key, "total", &total.to_string()).await?;
            self.kv.hset(&key, "done", "0").await?;
        }
        self.kv
            .hset(&key, "updated_at", &Utc::now().to_rfc3339())
            .await?;
        self.kv
            .expire(&key, Duration::from_secs(ENTITY_PROGRESS_TTL_SECS as u64))
            .await?;
        Ok(())
    }

    /// Writes the human-readable current-action string UIs show while an entity is in
    /// progress (SPEC_FULL §3.2 `step`, §4.6). Called once per ReAct tool dispatch, the way
    /// `original_source/apps/agent-analyst/agent_analyst/executor.py`'s `_write_step_progress`
    /// is invoked from its `on_step` callback.
    pub async fn set_step(&self, entity_type: &str, entity_id: &str, message: &str) -> Result<()> {
        let key = entity_key(entity_type, entity_id);
        self.kv.hset(&key, "step", message).await?;
        self.kv
            .hset(&key, "updated_at", &Utc::now().to_rfc3339())
            .await?;
        Ok(())
    }

    pub async fn set_error(&self, entity_type: &str, entity_id: &str, message: &str) -> Result<()> {
        let key = entity_key(entity_type, entity_id);
        self.kv.hset(&key, "phase", Phase::Error.as_str()).await?;
        self.kv.hset(&key, "error_msg", message).await?;
        self.kv
            .hset(&key, "updated_at", &Utc::now().to_rfc3339())
            .await?;
        Ok(())
    }

    pub async fn increment_done(&self, entity_type: &str, entity_id: &str) -> Result<i64> {
        let key = entity_key(entity_type, entity_id);
        let done = self.kv.hincr_by(&key, "done", 1).await?;
        self.kv
            .hset(&key, "updated_at", &Utc::now().to_rfc3339())
            .await?;
        Ok(done)
    }

    pub async fn get_entity(&self, entity_type: &str, entity_id: &str) -> Result<Option<EntityProgress>> {
        let fields = self.kv.hget_all(&entity_key(entity_type, entity_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        let phase = fields
            .get("phase")
            .and_then(|p| Phase::parse(p))
            .unwrap_or(Phase::Analyzing);
        Ok(Some(EntityProgress {
            phase,
            total: fields.get("total").and_then(|v| v.parse().ok()).unwrap_or(0),
            done: fields.get("done").and_then(|v| v.parse().ok()).unwrap_or(0),
            step: fields.get("step").cloned(),
            error_msg: fields.get("error_msg").cloned(),
            updated_at: fields
                .get("updated_at")
                .and_then(|v| chrono::DateTime::parse_from_rfc3339(v).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
        }))
    }

    /// Records which child task ids are currently being fanned in for an entity, replacing
    /// whatever set was recorded before.
    pub async fn set_task_ids(&self, entity_type: &str, entity_id: &str, task_ids: &[String]) -> Result<()> {
        let key = task_ids_key(entity_type, entity_id);
        self.kv.del(&[key.as_str()]).await?;
        if !task_ids.is_empty() {
            self.kv.sadd(&key, task_ids).await?;
            self.kv
                .expire(&key, Duration::from_secs(ENTITY_PROGRESS_TTL_SECS as u64))
                .await?;
        }
        Ok(())
    }

    pub async fn task_ids(&self, entity_type: &str, entity_id: &str) -> Result<HashSet<String>> {
        self.kv.smembers(&task_ids_key(entity_type, entity_id)).await
    }

    pub async fn record_task_progress(&self, task_id: &str, message: Value) -> Result<()> {
        let key = task_key(task_id);
        self.kv
            .set_ex(
                &key,
                &serde_json::to_string(&message)?,
                Some(Duration::from_secs(TASK_PROGRESS_TTL_SECS as u64)),
            )
            .await
    }

    pub async fn task_progress(&self, task_id: &str) -> Result<Option<Value>> {
        match self.kv.get(&task_key(task_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Deletes per-task progress for every id in the entity's `task_ids` set, then the set
    /// itself. Called once fan-in fires (SPEC_FULL §4.3).
    pub async fn cleanup_task_ids(&self, entity_type: &str, entity_id: &str) -> Result<()> {
        let ids = self.task_ids(entity_type, entity_id).await?;
        for id in &ids {
            self.kv.del(&[task_key(id).as_str()]).await?;
        }
        self.kv
            .del(&[task_ids_key(entity_type, entity_id).as_str()])
            .await
    }
}
