//! OpenAI adapter
//!
//! Translates gateway requests onto the chat-completions API, including the
//! tool-call convention (arguments travel as JSON-encoded strings).

use crate::error::{EngineError, Result};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, LlmResponse, ToolCallRequest};
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionNamedToolChoice,
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionToolArgs,
    ChatCompletionToolChoiceOption, ChatCompletionToolType, CreateChatCompletionRequestArgs,
    FunctionCall, FunctionName, FunctionObjectArgs, ResponseFormat,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// OpenAI-compatible provider (also serves self-hosted gateways via
/// `llm_base_url`).
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: String) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base) = base_url {
            config = config.with_api_base(base);
        }
        Self {
            client: Client::with_config(config),
            model,
        }
    }

    fn build_messages(
        &self,
        request: &CompletionRequest,
    ) -> Result<Vec<ChatCompletionRequestMessage>> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(request.system_prompt.clone())
                .build()
                .map_err(|e| EngineError::bad_request(format!("system message: {e}")))?
                .into(),
        );

        for message in &request.messages {
            match message {
                ChatMessage::User { content } => messages.push(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(content.clone())
                        .build()
                        .map_err(|e| EngineError::bad_request(format!("user message: {e}")))?
                        .into(),
                ),
                ChatMessage::Assistant {
                    content,
                    tool_calls,
                } => {
                    let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
                    if let Some(content) = content {
                        builder.content(content.clone());
                    }
                    if !tool_calls.is_empty() {
                        let calls: Vec<ChatCompletionMessageToolCall> = tool_calls
                            .iter()
                            .map(|call| ChatCompletionMessageToolCall {
                                id: call.id.clone(),
                                r#type: ChatCompletionToolType::Function,
                                function: FunctionCall {
                                    name: call.name.clone(),
                                    arguments: call.arguments.to_string(),
                                },
                            })
                            .collect();
                        builder.tool_calls(calls);
                    }
                    messages.push(
                        builder
                            .build()
                            .map_err(|e| {
                                EngineError::bad_request(format!("assistant message: {e}"))
                            })?
                            .into(),
                    );
                }
                ChatMessage::ToolResult {
                    tool_call_id,
                    content,
                } => messages.push(
                    ChatCompletionRequestToolMessageArgs::default()
                        .tool_call_id(tool_call_id.clone())
                        .content(content.clone())
                        .build()
                        .map_err(|e| EngineError::bad_request(format!("tool message: {e}")))?
                        .into(),
                ),
            }
        }
        Ok(messages)
    }

    fn build_tools(&self, request: &CompletionRequest) -> Result<Vec<ChatCompletionTool>> {
        request
            .tools
            .iter()
            .map(|tool| {
                let function = FunctionObjectArgs::default()
                    .name(tool.name.clone())
                    .description(tool.description.clone())
                    .parameters(tool.parameters.clone())
                    .build()
                    .map_err(|e| EngineError::bad_request(format!("tool schema: {e}")))?;
                ChatCompletionToolArgs::default()
                    .r#type(ChatCompletionToolType::Function)
                    .function(function)
                    .build()
                    .map_err(|e| EngineError::bad_request(format!("tool schema: {e}")))
            })
            .collect()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<LlmResponse> {
        let messages = self.build_messages(request)?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone())
            .messages(messages)
            .max_tokens(request.max_tokens);
        if !request.tools.is_empty() {
            args.tools(self.build_tools(request)?);
        }
        if let Some(forced) = &request.forced_tool {
            args.tool_choice(ChatCompletionToolChoiceOption::Named(
                ChatCompletionNamedToolChoice {
                    r#type: ChatCompletionToolType::Function,
                    function: FunctionName {
                        name: forced.clone(),
                    },
                },
            ));
        }
        if request.json_mode {
            args.response_format(ResponseFormat::JsonObject);
        }
        let chat_request = args
            .build()
            .map_err(|e| EngineError::bad_request(format!("chat request: {e}")))?;

        debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "requesting openai completion"
        );
        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(|e| EngineError::backend(format!("openai: {e}")))?;

        let raw = serde_json::to_value(&response).unwrap_or(Value::Null);
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::backend("openai returned no choices"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                // Arguments arrive as a JSON-encoded string
                let arguments = serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::String(call.function.arguments));
                ToolCallRequest {
                    id: call.id,
                    name: call.function.name,
                    arguments,
                }
            })
            .collect();

        Ok(LlmResponse {
            content: choice.message.content,
            tool_calls,
            raw,
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}
