use thiserror::Error;

/// Convenience type alias for Results with SpiralError.
pub type Result<T> = std::result::Result<T, SpiralError>;

/// Errors that propagate out of queue, KV, agent, tool, and LLM operations.
///
/// `RetryLater` is deliberately not a variant here — it is a cooperative signal an
/// `execute_fn`/ReAct loop returns, not a failure, and is carried by [`crate::react::Outcome`]
/// instead so it can never accidentally be treated as one.
#[derive(Error, Debug)]
pub enum SpiralError {
    #[error("storage error: {0}")]
    Kv(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("invalid task transition: {0}")]
    InvalidTransition(String),

    #[error("agent error: {message}")]
    Agent { message: String },

    #[error("task execution error: {task_id} - {message}")]
    TaskExecution { task_id: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("react step budget exceeded: {steps} steps")]
    StepBudgetExceeded { steps: usize },

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool argument schema validation failed for {tool}: {message}")]
    SchemaValidation { tool: String, message: String },

    #[error("llm client error: {0}")]
    Llm(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("queue is full")]
    QueueFull,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
