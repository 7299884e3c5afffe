//! LLM gateway
//!
//! A uniform completion interface over the provider SDKs. Agents only ever
//! see [`CompletionRequest`] / [`LlmResponse`]; adapter modules translate to
//! each provider's native call shape, including its tool-call convention.

use crate::config::{CoreConfig, LlmSdk};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub mod anthropic;
pub mod mock;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use mock::{MockProvider, MockRule};
pub use openai::OpenAiProvider;

/// A function schema offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON-schema object describing the parameters
    pub parameters: Value,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Parsed arguments object
    pub arguments: Value,
}

/// Gateway-shaped conversation history entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ToolCallRequest>,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }
}

/// One completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSchema>,
    /// Force the model to call this tool (one-shot distillation)
    pub forced_tool: Option<String>,
    pub max_tokens: u32,
    pub json_mode: bool,
}

impl CompletionRequest {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages: Vec::new(),
            tools: Vec::new(),
            forced_tool: None,
            max_tokens: 1024,
            json_mode: false,
        }
    }
}

/// The gateway-shaped completion result.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    /// The provider's raw response, for logging and debugging
    pub raw: Value,
}

impl LlmResponse {
    /// Convert back into a history entry so the next iteration carries the
    /// assistant turn.
    pub fn to_history_message(&self) -> ChatMessage {
        ChatMessage::Assistant {
            content: self.content.clone(),
            tool_calls: self.tool_calls.clone(),
        }
    }
}

/// Trait for LLM provider adapters.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for the given request.
    async fn complete(&self, request: &CompletionRequest) -> Result<LlmResponse>;

    /// Provider name, for logs.
    fn name(&self) -> &str;
}

/// Run a completion under the configured response timeout.
pub async fn complete_with_timeout(
    provider: &dyn LlmProvider,
    request: &CompletionRequest,
    timeout: Duration,
) -> Result<LlmResponse> {
    match tokio::time::timeout(timeout, provider.complete(request)).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::timeout(format!(
            "{} completion exceeded {timeout:?}",
            provider.name()
        ))),
    }
}

/// Build the configured provider.
pub fn build_provider(config: &CoreConfig) -> Arc<dyn LlmProvider> {
    match config.llm_sdk {
        LlmSdk::Openai => Arc::new(OpenAiProvider::new(
            config.llm_api_key.clone(),
            config.llm_base_url.clone(),
            config.llm_model.clone(),
        )),
        LlmSdk::Anthropic => Arc::new(AnthropicProvider::new(
            config.llm_api_key.clone(),
            config.llm_base_url.clone(),
            config.llm_model.clone(),
        )),
        LlmSdk::Mock => Arc::new(MockProvider::default()),
    }
}

/// One-token startup probe; fails fast when the gateway is misconfigured.
pub async fn sanity_check(provider: &dyn LlmProvider) -> Result<()> {
    let mut request = CompletionRequest::new("Reply with a single word.");
    request.messages.push(ChatMessage::user("Test"));
    request.max_tokens = 1;
    provider.complete(&request).await?;
    info!(provider = provider.name(), "LLM sanity check passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_to_history_message() {
        let response = LlmResponse {
            content: Some("thinking".into()),
            tool_calls: vec![ToolCallRequest {
                id: "c1".into(),
                name: "finish".into(),
                arguments: serde_json::json!({}),
            }],
            raw: Value::Null,
        };
        match response.to_history_message() {
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                assert_eq!(content.as_deref(), Some("thinking"));
                assert_eq!(tool_calls.len(), 1);
            }
            other => panic!("expected assistant message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_maps_to_timeout_error() {
        struct SlowProvider;

        #[async_trait]
        impl LlmProvider for SlowProvider {
            async fn complete(&self, _request: &CompletionRequest) -> Result<LlmResponse> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                unreachable!("timed out before completing");
            }

            fn name(&self) -> &str {
                "slow"
            }
        }

        let request = CompletionRequest::new("x");
        let err = complete_with_timeout(&SlowProvider, &request, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::Timeout);
    }
}
