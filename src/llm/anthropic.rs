//! Anthropic adapter
//!
//! The Messages API carries tool traffic inside the `content` array:
//! assistant tool calls arrive as `tool_use` blocks and results go back as
//! `tool_result` blocks on the user role. This adapter flattens both
//! directions into the gateway shape.

use crate::error::{EngineError, Result};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, LlmResponse, ToolCallRequest};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            model,
        }
    }

    fn build_messages(request: &CompletionRequest) -> Vec<Value> {
        request
            .messages
            .iter()
            .map(|message| match message {
                ChatMessage::User { content } => json!({
                    "role": "user",
                    "content": content,
                }),
                ChatMessage::Assistant {
                    content,
                    tool_calls,
                } => {
                    let mut blocks = Vec::new();
                    if let Some(text) = content {
                        if !text.is_empty() {
                            blocks.push(json!({"type": "text", "text": text}));
                        }
                    }
                    for call in tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }
                    json!({"role": "assistant", "content": blocks})
                }
                ChatMessage::ToolResult {
                    tool_call_id,
                    content,
                } => json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": tool_call_id,
                        "content": content,
                    }],
                }),
            })
            .collect()
    }

    fn parse_response(raw: Value) -> Result<LlmResponse> {
        let blocks = raw
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| EngineError::backend("anthropic response missing content"))?;

        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();
        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        text_parts.push(text.to_string());
                    }
                }
                Some("tool_use") => tool_calls.push(ToolCallRequest {
                    id: block
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    name: block
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    arguments: block.get("input").cloned().unwrap_or(Value::Null),
                }),
                _ => {}
            }
        }

        let content = if text_parts.is_empty() {
            None
        } else {
            Some(text_parts.join("\n"))
        };
        Ok(LlmResponse {
            content,
            tool_calls,
            raw,
        })
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<LlmResponse> {
        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "system": request.system_prompt,
            "messages": Self::build_messages(request),
        });
        if let Some(forced) = &request.forced_tool {
            body["tool_choice"] = json!({"type": "tool", "name": forced});
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "name": tool.name,
                            "description": tool.description,
                            "input_schema": tool.parameters,
                        })
                    })
                    .collect(),
            );
        }

        debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "requesting anthropic completion"
        );
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let raw: Value = response.json().await?;
        if !status.is_success() {
            return Err(EngineError::backend(format!(
                "anthropic returned {status}: {raw}"
            )));
        }
        Self::parse_response(raw)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_rides_on_user_role() {
        let mut request = CompletionRequest::new("sys");
        request
            .messages
            .push(ChatMessage::tool_result("toolu_1", "Task 1 created"));
        let messages = AnthropicProvider::build_messages(&request);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"][0]["type"], "tool_result");
        assert_eq!(messages[0]["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn test_assistant_tool_calls_become_tool_use_blocks() {
        let mut request = CompletionRequest::new("sys");
        request.messages.push(ChatMessage::Assistant {
            content: Some("creating a task".into()),
            tool_calls: vec![ToolCallRequest {
                id: "toolu_1".into(),
                name: "insert_task".into(),
                arguments: json!({"after_task_order": 0}),
            }],
        });
        let messages = AnthropicProvider::build_messages(&request);
        let blocks = messages[0]["content"].as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1]["type"], "tool_use");
        assert_eq!(blocks[1]["name"], "insert_task");
    }

    #[test]
    fn test_parse_response_extracts_tool_calls() {
        let raw = json!({
            "content": [
                {"type": "text", "text": "On it."},
                {"type": "tool_use", "id": "toolu_9", "name": "finish", "input": {}},
            ],
        });
        let response = AnthropicProvider::parse_response(raw).unwrap();
        assert_eq!(response.content.as_deref(), Some("On it."));
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "finish");
    }

    #[test]
    fn test_parse_response_without_content_fails() {
        let err = AnthropicProvider::parse_response(json!({"error": "x"})).unwrap_err();
        assert!(err.to_string().contains("missing content"));
    }
}
