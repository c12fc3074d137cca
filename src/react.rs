//! Bounded reason-act loop (SPEC_FULL §4.5), grounded precisely on `react`/
//! `_parse_final_response` in `original_source/apps/shared/shared/agent/base.py`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::constants::DEFAULT_REACT_MAX_STEPS;
use crate::error::{Result, SpiralError};
use crate::llm::{ChatMessage, ChatRequest, LlmClient};
use crate::task::{RetryLater, Task, TaskResult};
use crate::tool::ToolSet;

/// Invoked once per ReAct tool dispatch with `(tool_name, tool_args)`, the same shape as
/// `on_step` in `original_source/apps/agent-analyst/agent_analyst/executor.py:130-133` —
/// callers use it to write a human-readable `step` message to the entity progress record
/// (SPEC_FULL §3.2, §4.6).
pub type StepHook = Arc<dyn Fn(&str, &Value) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// What an `execute_fn`/ReAct run hands back to the agent runtime (SPEC_FULL §4.2/§4.6).
/// `RetryLater` is carried here rather than as an error variant so the runtime can tell a
/// cooperative "try again later" apart from a genuine failure at the type level.
#[derive(Debug, Clone)]
pub enum Outcome {
    Result(TaskResult),
    RetryLater(RetryLater),
}

/// Drives one ReAct conversation for a single task (SPEC_FULL §4.5).
pub struct ReactExecutor {
    llm: Arc<dyn LlmClient>,
    model: String,
    max_steps: usize,
}

impl ReactExecutor {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
            max_steps: DEFAULT_REACT_MAX_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Alternates LLM calls and tool dispatch until the assistant responds with no further tool
    /// calls, or `max_steps` is exceeded (mapped by the caller to `mark_failed`). `on_step`,
    /// when set, fires once per tool call before it dispatches — callers use it to surface a
    /// live `step` message (SPEC_FULL §3.2/§4.6).
    pub async fn run(
        &self,
        system_prompt: &str,
        task: &Task,
        tools: &ToolSet,
        on_step: Option<&StepHook>,
    ) -> Result<TaskResult> {
        let mut messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(format!(
                "Task ID: {}\nLabel: {}\nPayload: {}",
                task.id,
                task.label,
                task.payload
            )),
        ];
        let schemas = tools.schemas();

        for _step in 0..self.max_steps {
            let request = ChatRequest::new(self.model.clone(), messages.clone())
                .with_tools(schemas.clone());
            let response = self.llm.chat(request).await?;

            if response.tool_calls.is_empty() {
                return Ok(parse_final(response.content.unwrap_or_default()));
            }

            messages.push(ChatMessage {
                role: crate::llm::Role::Assistant,
                content: response.content.clone(),
                tool_calls: response.tool_calls.clone(),
                tool_call_id: None,
            });

            for call in &response.tool_calls {
                if let Some(hook) = on_step {
                    let args = serde_json::from_str(&call.function.arguments)
                        .unwrap_or(Value::Null);
                    hook(&call.function.name, &args).await;
                }
                let observation = self.dispatch_tool(tools, call).await;
                messages.push(ChatMessage::tool_result(call.id.clone(), observation));
            }
        }

        Err(SpiralError::StepBudgetExceeded {
            steps: self.max_steps,
        })
    }

    /// Schema validation and handler errors both become the tool observation rather than
    /// aborting the loop (SPEC_FULL §4.4 error contract, §6.6 wire format).
    async fn dispatch_tool(&self, tools: &ToolSet, call: &crate::llm::ToolCall) -> String {
        let Some(tool) = tools.get(&call.function.name) else {
            return format!("Error: unknown tool `{}`", call.function.name);
        };

        let args: Value = match serde_json::from_str(&call.function.arguments) {
            Ok(v) => v,
            Err(e) => return format!("Error: invalid tool arguments JSON: {e}"),
        };

        if let Err(e) = tool.validate_args(&args) {
            return format!("Error: {e}");
        }

        match tool.call(args).await {
            Ok(value) => serde_json::to_string(&value).unwrap_or_else(|_| "null".to_string()),
            Err(e) => format!("Error: {e}"),
        }
    }
}

/// Parses the LLM's final text as a [`TaskResult`] (SPEC_FULL §4.5 `parse_final`).
///
/// - An object with a `new_tasks` array becomes `Result(data, new_tasks)`.
/// - Any other JSON value becomes `Result(data=value)`.
/// - Non-JSON text becomes `Result(data=text)`.
pub fn parse_final(text: String) -> TaskResult {
    let Ok(value) = serde_json::from_str::<Value>(&text) else {
        return TaskResult::data(Value::String(text));
    };

    if let Value::Object(ref obj) = value {
        if let Some(new_tasks) = obj.get("new_tasks").and_then(Value::as_array) {
            let tasks: Vec<Task> = new_tasks
                .iter()
                .filter_map(|spec| serde_json::from_value(spec.clone()).ok())
                .collect();
            return TaskResult {
                data: obj.get("data").cloned(),
                new_tasks: tasks,
            };
        }
    }
    TaskResult::data(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponseMessage, MockLlmClient, ToolCall, ToolCallFunction};
    use crate::task::PRIORITY_MEDIUM;
    use crate::tool::{Tool, ToolFuture, ToolSet};
    use serde_json::json;
    use std::sync::Arc;

    fn get_answer_tool() -> Tool {
        Tool::new(
            "get_answer",
            "doubles x",
            json!({
                "type": "object",
                "properties": {"x": {"type": "integer"}},
                "required": ["x"],
            }),
            Arc::new(|args: Value| {
                Box::pin(async move {
                    let x = args["x"].as_i64().unwrap_or(0);
                    Ok(json!({"y": x * 2}))
                }) as ToolFuture
            }),
        )
    }

    #[tokio::test]
    async fn react_loop_calls_tool_then_returns_final_result() {
        let llm = Arc::new(MockLlmClient::new(vec![
            ChatResponseMessage {
                content: None,
                tool_calls: vec![ToolCall {
                    id: "call_1".to_string(),
                    function: ToolCallFunction {
                        name: "get_answer".to_string(),
                        arguments: "{\"x\":21}".to_string(),
                    },
                }],
            },
            ChatResponseMessage {
                content: Some("{\"data\":{\"y\":42}}".to_string()),
                tool_calls: Vec::new(),
            },
        ]));
        let executor = ReactExecutor::new(llm, "test-model");
        let tools = ToolSet::new(vec![get_answer_tool()]);
        let task = Task::new("analyst:analyze", json!({"x": 21}), PRIORITY_MEDIUM);

        let result = executor.run("system prompt", &task, &tools, None).await.unwrap();
        assert_eq!(result.data, Some(json!({"y": 42})));
    }

    #[tokio::test]
    async fn max_steps_zero_fails_immediately() {
        let llm = MockLlmClient::text_only("{}");
        let executor = ReactExecutor::new(llm, "test-model").with_max_steps(0);
        let tools = ToolSet::new(vec![]);
        let task = Task::new("analyst:analyze", json!({}), PRIORITY_MEDIUM);

        let err = executor.run("system", &task, &tools, None).await.unwrap_err();
        assert!(matches!(err, SpiralError::StepBudgetExceeded { steps: 0 }));
    }

    #[tokio::test]
    async fn unknown_tool_call_feeds_back_as_observation_not_abort() {
        let llm = Arc::new(MockLlmClient::new(vec![
            ChatResponseMessage {
                content: None,
                tool_calls: vec![ToolCall {
                    id: "call_1".to_string(),
                    function: ToolCallFunction {
                        name: "nonexistent".to_string(),
                        arguments: "{}".to_string(),
                    },
                }],
            },
            ChatResponseMessage {
                content: Some("{\"data\":\"done\"}".to_string()),
                tool_calls: Vec::new(),
            },
        ]));
        let executor = ReactExecutor::new(llm, "test-model");
        let tools = ToolSet::new(vec![]);
        let task = Task::new("analyst:analyze", json!({}), PRIORITY_MEDIUM);

        let result = executor.run("system", &task, &tools, None).await.unwrap();
        assert_eq!(result.data, Some(json!("done")));
    }

    #[tokio::test]
    async fn on_step_fires_once_per_tool_call_with_its_name_and_args() {
        let llm = Arc::new(MockLlmClient::new(vec![
            ChatResponseMessage {
                content: None,
                tool_calls: vec![ToolCall {
                    id: "call_1".to_string(),
                    function: ToolCallFunction {
                        name: "get_answer".to_string(),
                        arguments: "{\"x\":21}".to_string(),
                    },
                }],
            },
            ChatResponseMessage {
                content: Some("{\"data\":{\"y\":42}}".to_string()),
                tool_calls: Vec::new(),
            },
        ]));
        let executor = ReactExecutor::new(llm, "test-model");
        let tools = ToolSet::new(vec![get_answer_tool()]);
        let task = Task::new("analyst:analyze", json!({"x": 21}), PRIORITY_MEDIUM);

        let seen: Arc<std::sync::Mutex<Vec<(String, Value)>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let on_step: StepHook = Arc::new(move |name: &str, args: &Value| {
            let seen = seen_clone.clone();
            let name = name.to_string();
            let args = args.clone();
            Box::pin(async move {
                seen.lock().unwrap().push((name, args));
            })
        });

        executor
            .run("system prompt", &task, &tools, Some(&on_step))
            .await
            .unwrap();

        let recorded = seen.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "get_answer");
        assert_eq!(recorded[0].1, json!({"x": 21}));
    }

    #[test]
    fn parse_final_extracts_new_tasks() {
        let text = serde_json::json!({
            "data": {"status": "crawling"},
            "new_tasks": [{
                "id": "00000000-0000-0000-0000-000000000001",
                "label": "crawler:x",
                "priority": 1,
                "status": "pending",
                "payload": {},
                "created_at": "2025-01-01T00:00:00Z",
                "retry_count": 0,
                "max_retries": 3
            }]
        })
        .to_string();
        let result = parse_final(text);
        assert_eq!(result.new_tasks.len(), 1);
        assert_eq!(result.data, Some(json!({"status": "crawling"})));
    }

    #[test]
    fn parse_final_falls_back_to_raw_text() {
        let result = parse_final("not json at all".to_string());
        assert_eq!(result.data, Some(json!("not json at all")));
    }

    #[test]
    fn parse_final_plain_json_value_becomes_data() {
        let result = parse_final("{\"y\": 42}".to_string());
        assert_eq!(result.data, Some(json!({"y": 42})));
    }
}
