//! Deterministic mock provider
//!
//! Two matching layers, checked in order:
//!
//! 1. A scripted queue of responses, popped one per call: the workhorse for
//!    agent-loop tests.
//! 2. Pattern rules matched against the combined prompt text with a
//!    multi-pattern automaton; the first configured rule whose pattern occurs
//!    anywhere wins.
//!
//! Falls back to a canned text response.

use crate::error::Result;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, LlmResponse, ToolCallRequest};
use aho_corasick::AhoCorasick;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

/// One pattern rule.
#[derive(Debug, Clone)]
pub struct MockRule {
    pub pattern: String,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl MockRule {
    /// Rule returning plain text.
    pub fn text(pattern: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    /// Rule returning tool calls.
    pub fn tools(pattern: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            pattern: pattern.into(),
            content: None,
            tool_calls,
        }
    }
}

#[derive(Default)]
pub struct MockProvider {
    script: Mutex<VecDeque<LlmResponse>>,
    rules: Vec<MockRule>,
    matcher: Option<AhoCorasick>,
}

impl MockProvider {
    /// Scripted responses, popped in order; rules apply once the script is
    /// drained.
    pub fn with_script(responses: Vec<LlmResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            rules: Vec::new(),
            matcher: None,
        }
    }

    pub fn with_rules(rules: Vec<MockRule>) -> Self {
        let matcher = AhoCorasick::new(rules.iter().map(|r| r.pattern.as_str())).ok();
        Self {
            script: Mutex::new(VecDeque::new()),
            rules,
            matcher,
        }
    }

    /// Convenience: a response carrying only tool calls.
    pub fn tool_call_response(calls: Vec<(&str, &str, Value)>) -> LlmResponse {
        LlmResponse {
            content: None,
            tool_calls: calls
                .into_iter()
                .map(|(id, name, arguments)| ToolCallRequest {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments,
                })
                .collect(),
            raw: json!({"mock": true}),
        }
    }

    /// Convenience: a plain text response (ends tool loops).
    pub fn text_response(content: &str) -> LlmResponse {
        LlmResponse {
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            raw: json!({"mock": true}),
        }
    }

    fn combined_text(request: &CompletionRequest) -> String {
        let mut text = request.system_prompt.clone();
        for message in &request.messages {
            match message {
                ChatMessage::User { content } => text.push_str(content),
                ChatMessage::Assistant { content, .. } => {
                    if let Some(content) = content {
                        text.push_str(content);
                    }
                }
                ChatMessage::ToolResult { content, .. } => text.push_str(content),
            }
        }
        text
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<LlmResponse> {
        if let Some(scripted) = self.script.lock().ok().and_then(|mut s| s.pop_front()) {
            debug!("mock provider served scripted response");
            return Ok(scripted);
        }

        if let Some(matcher) = &self.matcher {
            let haystack = Self::combined_text(request);
            // First configured rule that occurs anywhere wins
            let hit = matcher
                .find_iter(&haystack)
                .map(|m| m.pattern().as_usize())
                .min();
            if let Some(index) = hit {
                let rule = &self.rules[index];
                debug!(pattern = %rule.pattern, "mock provider matched rule");
                return Ok(LlmResponse {
                    content: rule.content.clone(),
                    tool_calls: rule.tool_calls.clone(),
                    raw: json!({"mock": true, "pattern": rule.pattern}),
                });
            }
        }

        Ok(Self::text_response(
            "This is a mock response for testing purposes.",
        ))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_user(text: &str) -> CompletionRequest {
        let mut request = CompletionRequest::new("system");
        request.messages.push(ChatMessage::user(text));
        request
    }

    #[tokio::test]
    async fn test_script_pops_in_order() {
        let provider = MockProvider::with_script(vec![
            MockProvider::text_response("first"),
            MockProvider::text_response("second"),
        ]);
        let request = request_with_user("x");
        assert_eq!(
            provider.complete(&request).await.unwrap().content.as_deref(),
            Some("first")
        );
        assert_eq!(
            provider.complete(&request).await.unwrap().content.as_deref(),
            Some("second")
        );
    }

    #[tokio::test]
    async fn test_rule_matching_prefers_first_configured() {
        let provider = MockProvider::with_rules(vec![
            MockRule::text("Simple Hello", "Hello World"),
            MockRule::tools(
                "CALL_TOOL_FINISH",
                vec![ToolCallRequest {
                    id: "c1".into(),
                    name: "finish".into(),
                    arguments: json!({}),
                }],
            ),
        ]);

        let response = provider
            .complete(&request_with_user("say Simple Hello please"))
            .await
            .unwrap();
        assert_eq!(response.content.as_deref(), Some("Hello World"));

        let response = provider
            .complete(&request_with_user("now CALL_TOOL_FINISH"))
            .await
            .unwrap();
        assert_eq!(response.tool_calls[0].name, "finish");
    }

    #[tokio::test]
    async fn test_fallback_response() {
        let provider = MockProvider::default();
        let response = provider.complete(&request_with_user("anything")).await.unwrap();
        assert!(response.content.unwrap().contains("mock response"));
    }
}
