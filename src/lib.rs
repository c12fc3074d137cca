//! # spiral-core
//!
//! Reusable core for a multi-agent task-processing engine: a durable priority task queue,
//! a generic agent worker runtime with label-routed polling, a fan-in coordinator for
//! many-children-one-continuation pipelines, a bounded ReAct tool-calling executor, and the
//! progress/heartbeat stores pipeline consumers read.
//!
//! Agents are configuration, not code: `registry.rs` maps a static agent name to its labels,
//! system prompt, and whether it runs the ReAct loop or a custom `execute_fn`. The runtime
//! itself is indifferent to what a label means — routing is purely string-keyed.

/// HTTP surface: health, agent heartbeats, pipeline progress.
pub mod api;
/// Generic agent worker loop: claim, execute, dispatch, fan-in, heartbeat.
pub mod agent;
/// Environment-driven startup configuration and agent-registry loading.
pub mod config;
/// Tunable constants shared across the runtime.
pub mod constants;
/// Error types and the crate-wide `Result` alias.
pub mod error;
/// Fan-in coordinator: many children, one continuation, fired exactly once.
pub mod fanin;
/// Per-agent liveness records.
pub mod heartbeat;
/// Key-value storage seam every other module is built against.
pub mod kv;
/// LLM chat-completions client, the seam the ReAct executor drives.
pub mod llm;
/// Entity and per-task progress records.
pub mod progress;
/// Durable priority task queue.
pub mod queue;
/// Bounded reason-act loop for `ai_enabled` agents.
pub mod react;
/// Static agent name → {labels, prompt, fan_in, ai_enabled} mapping.
pub mod registry;
/// The core work-item type and its lifecycle.
pub mod task;
/// Typed tool surface exposed to the LLM.
pub mod tool;

pub use error::{Result, SpiralError};
