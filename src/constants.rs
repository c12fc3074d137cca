//! System-wide tunables, collected in one place.

use std::time::Duration;

/// How long an agent sleeps after finding no task for its labels.
pub const POP_EMPTY_SLEEP_SECS: u64 = 5;

/// How long a `claimed` task can sit unfinished before the queue reclaims it.
pub const LEASE_TIMEOUT_SECS: i64 = 600;

/// How often the lease/deferred sweeper runs.
pub const SWEEP_INTERVAL_SECS: u64 = 1;

/// Heartbeat record TTL.
pub const HEARTBEAT_TTL_SECS: i64 = 30;

/// How often an agent refreshes its heartbeat.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// Default retry ceiling for a task that doesn't specify its own.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default ReAct step budget.
pub const DEFAULT_REACT_MAX_STEPS: usize = 10;

/// Entity progress record TTL.
pub const ENTITY_PROGRESS_TTL_SECS: i64 = 86_400;

/// Per-task progress record TTL.
pub const TASK_PROGRESS_TTL_SECS: i64 = 3_600;

/// Soft cap on in-memory queue depth; `push` beyond this returns `QueueFull`.
pub const MAX_QUEUE_SIZE: usize = 10_000;

pub const fn pop_empty_sleep() -> Duration {
    Duration::from_secs(POP_EMPTY_SLEEP_SECS)
}

pub const fn heartbeat_interval() -> Duration {
    Duration::from_secs(HEARTBEAT_INTERVAL_SECS)
}

pub const fn sweep_interval() -> Duration {
    Duration::from_secs(SWEEP_INTERVAL_SECS)
}
