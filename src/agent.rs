//! Generic worker loop: claim → execute/react → dispatch → fan-in → heartbeat → shutdown
//! (SPEC_FULL §4.2).
//!
//! Grounded on `src/agents/orchestrator/mod.rs`'s `AgentOrchestrator::process_tasks`/
//! `execute_task` for the Rust `tokio::select!`/`tokio::spawn` idiom (poll-or-sleep loop, one
//! background task per concern), and on `run()`/`_heartbeat_loop`/`_handle_fan_in` in
//! `original_source/apps/shared/shared/agent/base.py` for the exact claim → execute → dispatch →
//! fan-in → shutdown semantics — one worker loop and one heartbeat task per agent, not the
//! teacher's three-loop single-process orchestrator, since this spec's agents are independent
//! processes (SPEC_FULL §5).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tracing::{error, info, warn};

use crate::constants::pop_empty_sleep;
use crate::error::{Result, SpiralError};
use crate::fanin::FanInCoordinator;
use crate::heartbeat::{AgentLiveness, Heartbeat, HeartbeatStore};
use crate::progress::ProgressStore;
use crate::queue::TaskQueue;
use crate::react::{Outcome, ReactExecutor, StepHook};
use crate::task::{Task, TaskStatus};
use crate::tool::ToolSet;

pub type ExecuteFuture = Pin<Box<dyn Future<Output = Result<Outcome>> + Send>>;
/// A first-class stand-in for the source's duck-typed `agent.execute = custom_fn`
/// (SPEC_FULL §9 "Duck-typed `agent.execute`").
pub type ExecuteFn = Arc<dyn Fn(Task) -> ExecuteFuture + Send + Sync>;

struct CurrentTask {
    id: String,
    label: String,
}

/// One worker: claims tasks for `labels`, executes them (custom `execute_fn` or ReAct), and
/// emits child tasks. One OS process runs one `Agent`; horizontal concurrency comes from
/// replicating processes with overlapping label sets (SPEC_FULL §5).
pub struct Agent {
    name: String,
    labels: Vec<String>,
    system_prompt: String,
    ai_enabled: bool,
    fan_in_enabled: bool,
    execute_fn: Option<ExecuteFn>,
    tools: ToolSet,
    react: Option<ReactExecutor>,

    queue: Arc<TaskQueue>,
    progress: Arc<ProgressStore>,
    heartbeat: Arc<HeartbeatStore>,
    fanin: Arc<FanInCoordinator>,

    shutdown: Arc<Notify>,
    shutting_down: AtomicBool,
    current: Mutex<Option<CurrentTask>>,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    started_at: chrono::DateTime<Utc>,
}

impl Agent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        labels: Vec<String>,
        queue: Arc<TaskQueue>,
        progress: Arc<ProgressStore>,
        heartbeat: Arc<HeartbeatStore>,
        fanin: Arc<FanInCoordinator>,
    ) -> Self {
        Self {
            name: name.into(),
            labels,
            system_prompt: String::new(),
            ai_enabled: false,
            fan_in_enabled: false,
            execute_fn: None,
            tools: ToolSet::default(),
            react: None,
            queue,
            progress,
            heartbeat,
            fanin,
            shutdown: Arc::new(Notify::new()),
            shutting_down: AtomicBool::new(false),
            current: Mutex::new(None),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_ai(mut self, react: ReactExecutor, tools: ToolSet) -> Self {
        self.ai_enabled = true;
        self.react = Some(react);
        self.tools = tools;
        self
    }

    pub fn with_fan_in(mut self, enabled: bool) -> Self {
        self.fan_in_enabled = enabled;
        self
    }

    pub fn with_execute_fn(mut self, f: ExecuteFn) -> Self {
        self.execute_fn = Some(f);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cooperative shutdown flag (SIGTERM/SIGINT maps here); stops the loop from popping new
    /// tasks. An in-flight task is allowed to finish.
    pub fn request_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    /// Runs until [`Agent::request_shutdown`] is called. Call from its own `tokio::spawn`; the
    /// caller is expected to wire an OS signal handler into `request_shutdown` (SPEC_FULL §5
    /// "Cancellation & timeouts").
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!(agent = %self.name, labels = ?self.labels, "agent starting");

        let heartbeat_agent = self.clone();
        let heartbeat_task = tokio::spawn(async move { heartbeat_agent.heartbeat_loop().await });

        while !self.shutting_down.load(Ordering::SeqCst) {
            let processed = self.tick().await?;
            if !processed {
                tokio::select! {
                    _ = tokio::time::sleep(pop_empty_sleep()) => {}
                    _ = self.shutdown.notified() => {}
                }
            }
        }

        heartbeat_task.abort();
        self.heartbeat.delete(&self.name).await?;
        info!(agent = %self.name, "agent stopped");
        Ok(())
    }

    /// One claim → execute → dispatch → fan-in cycle. Returns `false` if there was nothing to
    /// claim. Exposed separately from [`Agent::run`] so tests can drive it deterministically.
    pub async fn tick(&self) -> Result<bool> {
        let Some(task) = self.queue.pop(&self.labels, &self.name).await? else {
            return Ok(false);
        };

        self.set_current(Some(&task)).await;
        self.handle_task(task).await?;
        self.set_current(None).await;
        Ok(true)
    }

    async fn handle_task(&self, task: Task) -> Result<()> {
        let task_id = task.id;
        let entity = task.extract_entity();
        let parent_job_id = task.parent_job_id;

        // Snapshot whether this entity already had a fan-in staged *before* this task ran.
        // A task that itself calls `stage_and_dispatch` for its own entity must not also count
        // as one of the children it just staged — otherwise its own completion would decrement
        // the counter it had just set, firing the continuation before any real child ran. The
        // continuation task produced by that same fan-in round must likewise not be mistaken
        // for one of the children that fed it. `has_staged` checks the `on_complete` key itself
        // (set only while a stage is in flight, deleted the moment it fires) rather than entity
        // progress existence (which persists across phases), so only tasks claimed while a
        // stage is genuinely active participate in the decrement.
        let mut staged_before = false;
        if let Some((entity_type, entity_id)) = &entity {
            staged_before = self.fanin.has_staged(entity_type, entity_id).await?;
        }

        match self.execute(task).await {
            Ok(Outcome::Result(result)) => {
                self.queue
                    .mark_done(task_id, result.data.clone().unwrap_or(serde_json::Value::Null))
                    .await?;
                self.tasks_completed.fetch_add(1, Ordering::Relaxed);

                if !result.new_tasks.is_empty() {
                    let mut child_ids = Vec::with_capacity(result.new_tasks.len());
                    for child in result.new_tasks {
                        child_ids.push(child.id.to_string());
                        self.queue.push(child).await?;
                    }
                    if let Some((entity_type, entity_id)) = &entity {
                        self.progress
                            .set_task_ids(entity_type, entity_id, &child_ids)
                            .await?;
                    }
                }
            }
            Ok(Outcome::RetryLater(retry)) => {
                warn!(
                    agent = %self.name,
                    task = %task_id,
                    delay = retry.delay_seconds,
                    reason = %retry.reason,
                    "task deferred"
                );
                self.queue.requeue_delayed(task_id, retry.delay_seconds).await?;
            }
            Err(e) => {
                error!(agent = %self.name, task = %task_id, error = %e, "task failed");
                let failed = self.queue.mark_failed(task_id, e.to_string()).await?;
                self.tasks_failed.fetch_add(1, Ordering::Relaxed);
                if failed.status == TaskStatus::Failed {
                    if let Some((entity_type, entity_id)) = &entity {
                        self.progress
                            .set_error(entity_type, entity_id, &failed.error.clone().unwrap_or_default())
                            .await?;
                    }
                }
            }
        }

        if self.fan_in_enabled && staged_before {
            let final_task = self.queue.get(task_id).await?;
            if matches!(final_task.status, TaskStatus::Completed | TaskStatus::Failed) {
                if let Some((entity_type, entity_id)) = &entity {
                    match self
                        .fanin
                        .on_child_terminal(entity_type, entity_id, parent_job_id)
                        .await
                    {
                        Ok(Some(continuation)) => {
                            self.queue.push(continuation).await?;
                        }
                        Ok(None) => {}
                        Err(e) => warn!(agent = %self.name, task = %task_id, error = %e, "fan-in failed"),
                    }
                }
            }
        }

        Ok(())
    }

    /// Custom `execute_fn` wins; otherwise ReAct if `ai_enabled`; otherwise a configuration error
    /// (SPEC_FULL §7 "Configuration error").
    async fn execute(&self, task: Task) -> Result<Outcome> {
        if let Some(f) = &self.execute_fn {
            return f(task).await;
        }
        if self.ai_enabled {
            let react = self
                .react
                .as_ref()
                .expect("react executor set whenever ai_enabled is true");
            let on_step = task.extract_entity().map(|(entity_type, entity_id)| {
                self.step_hook(entity_type, entity_id)
            });
            let result = react
                .run(&self.system_prompt, &task, &self.tools, on_step.as_ref())
                .await?;
            return Ok(Outcome::Result(result));
        }
        Err(SpiralError::Config(format!(
            "agent '{}' has ai_enabled=false and no execute_fn configured",
            self.name
        )))
    }

    /// Builds the `step`-writing callback handed to [`ReactExecutor::run`], the same
    /// `on_step(tool_name, tool_args)` shape as
    /// `original_source/apps/agent-analyst/agent_analyst/executor.py:130-133`, which formats a
    /// human-readable message per tool and writes it via `_write_step_progress`.
    fn step_hook(&self, entity_type: String, entity_id: String) -> StepHook {
        let progress = self.progress.clone();
        Arc::new(move |tool_name: &str, _args: &serde_json::Value| {
            let progress = progress.clone();
            let entity_type = entity_type.clone();
            let entity_id = entity_id.clone();
            let message = format!("Running {tool_name}...");
            Box::pin(async move {
                if let Err(e) = progress.set_step(&entity_type, &entity_id, &message).await {
                    warn!(entity = %entity_id, error = %e, "failed to write step progress");
                }
            })
        })
    }

    async fn set_current(&self, task: Option<&Task>) {
        let mut current = self.current.lock().await;
        *current = task.map(|t| CurrentTask {
            id: t.id.to_string(),
            label: t.label.clone(),
        });
    }

    async fn heartbeat_loop(&self) {
        loop {
            if let Err(e) = self.write_heartbeat().await {
                warn!(agent = %self.name, error = %e, "failed to write heartbeat");
            }
            tokio::time::sleep(crate::constants::heartbeat_interval()).await;
        }
    }

    async fn write_heartbeat(&self) -> Result<()> {
        let current = self.current.lock().await;
        let heartbeat = Heartbeat {
            name: self.name.clone(),
            labels: self.labels.clone(),
            status: if current.is_some() {
                AgentLiveness::Busy
            } else {
                AgentLiveness::Idle
            },
            current_task_id: current.as_ref().map(|c| c.id.clone()),
            current_task_label: current.as_ref().map(|c| c.label.clone()),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            started_at: self.started_at,
            last_heartbeat: Utc::now(),
        };
        drop(current);
        self.heartbeat.write(&heartbeat).await
    }
}
