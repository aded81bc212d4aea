//! LLM chat client — provider contract, OpenAI implementation, retry driver.
//!
//! The engine talks to a model through `LlmChatClient` only; the Architect
//! and Investigator never see HTTP. Absence of a configured client means the
//! deterministic fallbacks run instead.

use aegis_core::{AegisError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One message in a chat exchange.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Raw assistant tool-call echo, replayed verbatim on the next turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<serde_json::Value>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    /// Assistant turn that requested tool calls.
    pub fn assistant_tool_calls(raw: serde_json::Value) -> Self {
        ChatMessage {
            role: "assistant",
            content: None,
            tool_call_id: None,
            tool_calls: Some(raw),
        }
    }

    /// Result of executing one tool call.
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ChatMessage {
            role: "tool",
            content: Some(content.into()),
            tool_call_id: Some(call_id.into()),
            tool_calls: None,
        }
    }

    fn plain(role: &'static str, content: impl Into<String>) -> Self {
        ChatMessage {
            role,
            content: Some(content.into()),
            tool_call_id: None,
            tool_calls: None,
        }
    }
}

/// A function the model may call.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// A call the model asked us to execute.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDef>,
    /// Constrain the reply to a JSON object.
    pub json_response: bool,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    /// Raw `tool_calls` payload for conversation replay.
    pub raw_tool_calls: Option<serde_json::Value>,
}

#[async_trait]
pub trait LlmChatClient: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;
}

// ============================================================================
// Retry driver
// ============================================================================

/// Run `op` up to `attempts` times with exponential backoff on transient
/// failures. A rate-limit response with a server wait hint is honored over
/// the computed delay.
pub async fn with_retries<T, F, Fut>(attempts: u32, base_delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = base_delay;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && is_transient(&e) => {
                let wait = match &e {
                    AegisError::RateLimited {
                        retry_after: Some(seconds),
                    } => Duration::from_secs(*seconds),
                    _ => delay,
                };
                warn!(attempt, error = %e, wait_secs = wait.as_secs(), "transient failure, retrying");
                tokio::time::sleep(wait).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_transient(e: &AegisError) -> bool {
    matches!(
        e,
        AegisError::Timeout(_) | AegisError::RateLimited { .. } | AegisError::LlmUnavailable(_)
    )
}

// ============================================================================
// OpenAI implementation
// ============================================================================

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_model(api_key, DEFAULT_MODEL)
    }

    pub fn with_model(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        OpenAiClient {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<serde_json::Value>,
}

#[async_trait]
impl LlmChatClient for OpenAiClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages,
        });
        if !request.tools.is_empty() {
            body["tools"] = serde_json::Value::Array(
                request
                    .tools
                    .iter()
                    .map(|t| json!({"type": "function", "function": t}))
                    .collect(),
            );
        }
        if request.json_response {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .http
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AegisError::Timeout("llm request".to_string())
                } else {
                    AegisError::LlmUnavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(AegisError::RateLimited { retry_after });
        }
        if status.is_server_error() {
            return Err(AegisError::LlmUnavailable(format!("upstream {status}")));
        }
        if !status.is_success() {
            return Err(AegisError::LlmUnavailable(format!(
                "unexpected status {status}"
            )));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| AegisError::Parse(format!("llm response body: {e}")))?;
        let message = wire
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| AegisError::Parse("llm response had no choices".to_string()))?;

        let tool_calls = parse_tool_calls(message.tool_calls.as_ref())?;
        Ok(ChatResponse {
            content: message.content,
            raw_tool_calls: message.tool_calls,
            tool_calls,
        })
    }
}

fn parse_tool_calls(raw: Option<&serde_json::Value>) -> Result<Vec<ToolCall>> {
    let raw = match raw {
        Some(serde_json::Value::Array(items)) => items,
        _ => return Ok(Vec::new()),
    };

    let mut calls = Vec::with_capacity(raw.len());
    for item in raw {
        let id = item
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AegisError::Parse("tool call missing id".to_string()))?;
        let function = item
            .get("function")
            .ok_or_else(|| AegisError::Parse("tool call missing function".to_string()))?;
        let name = function
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AegisError::Parse("tool call missing name".to_string()))?;
        let arguments = function
            .get("arguments")
            .and_then(|v| v.as_str())
            .map(|s| serde_json::from_str(s).unwrap_or(serde_json::Value::Null))
            .unwrap_or(serde_json::Value::Null);
        calls.push(ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        });
    }
    Ok(calls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retry_driver_backs_off_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retries(3, Duration::from_secs(2), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AegisError::Timeout("probe".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_driver_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries(3, Duration::from_secs(2), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AegisError::LlmUnavailable("down".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries(3, Duration::from_secs(2), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AegisError::MissingReason) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tool_calls_parse_from_wire_shape() {
        let raw = json!([{
            "id": "call_1",
            "type": "function",
            "function": {"name": "list_warehouse_schemas", "arguments": "{}"}
        }]);
        let calls = parse_tool_calls(Some(&raw)).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "list_warehouse_schemas");
        assert_eq!(calls[0].arguments, json!({}));
    }
}
