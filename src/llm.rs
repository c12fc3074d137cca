//! LLM chat-completions client (SPEC_FULL §4.7/§6.6/C13), the seam the ReAct executor drives.
//!
//! Grounded on `examples/CloudLLM-ai-cloudllm/src/cloudllm/clients/common.rs`'s
//! `send_with_native_tools` for the wire format (OpenAI-compatible `/chat/completions`,
//! `Authorization: Bearer`, `choices[0].message.tool_calls`) — the teacher's own `claude_code`
//! module is a CLI client and doesn't speak this contract.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SpiralError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function: ToolCallFunction,
}

/// One entry in the conversation sent to `chat`. `tool_call_id` is set only on `Role::Tool`
/// messages, pairing an observation back to the call that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatResponseMessage {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// `chat(model, messages, tools?, response_format?, temperature?, max_tokens?, stream?)` per
/// SPEC_FULL §4.7. `stream` is accepted for interface parity with the source contract; this
/// crate's ReAct loop only ever calls it non-streaming, so implementors may treat it as a no-op.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponseMessage>;
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Option<Vec<Value>>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = if tools.is_empty() { None } else { Some(tools) };
        self
    }
}

/// OpenAI-compatible HTTP client. Works against any vendor exposing `/chat/completions`
/// (the source's `GROK_BASE_URL` contract, also satisfied by OpenAI/Anthropic-proxy/Gemini).
pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpLlmClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

fn message_to_wire(msg: &ChatMessage) -> Value {
    match msg.role {
        Role::System => serde_json::json!({"role": "system", "content": msg.content}),
        Role::User => serde_json::json!({"role": "user", "content": msg.content}),
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id,
            "content": msg.content,
        }),
        Role::Assistant => {
            if msg.tool_calls.is_empty() {
                serde_json::json!({"role": "assistant", "content": msg.content})
            } else {
                let tool_calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        serde_json::json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.function.name,
                                "arguments": tc.function.arguments,
                            }
                        })
                    })
                    .collect();
                serde_json::json!({
                    "role": "assistant",
                    "content": Value::Null,
                    "tool_calls": tool_calls,
                })
            }
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponseMessage> {
        let wire_messages: Vec<Value> = request.messages.iter().map(message_to_wire).collect();
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": wire_messages,
        });
        if let Some(tools) = &request.tools {
            body["tools"] = serde_json::json!(tools);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SpiralError::Agent {
                message: format!("llm chat request failed: HTTP {status} — {text}"),
            });
        }

        let parsed: Value = serde_json::from_str(&text)?;
        let message = parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .ok_or_else(|| SpiralError::Agent {
                message: "llm response missing choices[0].message".to_string(),
            })?;

        let content = message
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_string);

        let tool_calls = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|tc| {
                        let id = tc.get("id")?.as_str()?.to_string();
                        let func = tc.get("function")?;
                        let name = func.get("name")?.as_str()?.to_string();
                        let arguments = func.get("arguments")?.as_str()?.to_string();
                        Some(ToolCall {
                            id,
                            function: ToolCallFunction { name, arguments },
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ChatResponseMessage {
            content,
            tool_calls,
        })
    }
}

/// Scripted client for ReAct tests (SPEC_FULL §4.5/S5): returns its queued responses in order,
/// one per `chat` call, regardless of what was asked.
pub struct MockLlmClient {
    responses: Mutex<Vec<ChatResponseMessage>>,
}

impl MockLlmClient {
    pub fn new(responses: Vec<ChatResponseMessage>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().rev().collect()),
        }
    }

    pub fn text_only(text: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(vec![ChatResponseMessage {
            content: Some(text.into()),
            tool_calls: Vec::new(),
        }]))
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponseMessage> {
        self.responses
            .lock()
            .expect("mock llm mutex poisoned")
            .pop()
            .ok_or_else(|| SpiralError::Agent {
                message: "MockLlmClient exhausted its scripted responses".to_string(),
            })
    }
}
