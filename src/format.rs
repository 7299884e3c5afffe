//! Message parts and wire-format conversion
//!
//! Messages are stored in a neutral `parts[]` form. Conversion to and from
//! the supported wire formats (OpenAI, Anthropic, Gemini) is a pure
//! transformation applied at read/write time, selected by the caller; the
//! pipeline itself only ever sees the neutral form.

use crate::error::{EngineError, Result};
use crate::types::{MessageId, MessageRole, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;

/// One part of a session message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        tool_name: String,
        arguments: Value,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
    },
    Image {
        filename: String,
    },
    File {
        filename: String,
    },
}

/// A message in the shape the agents consume: id, role, parts and the task it
/// is linked to (if any).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBlob {
    pub message_id: MessageId,
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
    pub task_id: Option<TaskId>,
}

/// Prompt-facing role labels. The models read "agent", not "assistant".
fn prompt_role(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::System => "system",
        MessageRole::Assistant => "agent",
        MessageRole::Tool => "agent_action_result",
    }
}

fn render_part_line(role: MessageRole, part: &MessagePart) -> String {
    let label = prompt_role(role);
    match part {
        MessagePart::Text { text } => format!("<{label}> {text}"),
        MessagePart::ToolCall {
            tool_name,
            arguments,
            ..
        } => format!("<{label}> USE TOOL {tool_name}, WITH PARAMS {arguments}"),
        MessagePart::ToolResult { content, .. } => format!("<agent_action_result> {content}"),
        MessagePart::Image { filename } => format!("<{label}> [image file: {filename}]"),
        MessagePart::File { filename } => format!("<{label}> [file: {filename}]"),
    }
}

impl MessageBlob {
    /// Render the message for prompt packing, optionally truncated.
    pub fn render(&self, truncate_chars: Option<usize>) -> String {
        let rendered: Vec<String> = self
            .parts
            .iter()
            .map(|p| render_part_line(self.role, p))
            .collect();
        let joined = rendered.join("\n");
        match truncate_chars {
            Some(cap) if joined.len() > cap => {
                let mut cut = cap;
                while cut > 0 && !joined.is_char_boundary(cut) {
                    cut -= 1;
                }
                format!("{}[...truncated]", &joined[..cut])
            }
            _ => joined,
        }
    }

    /// Concatenated text-part content, if any.
    pub fn text_content(&self) -> Option<String> {
        let texts: Vec<&str> = self
            .parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } if !text.trim().is_empty() => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        }
    }
}

/// Supported wire formats for message retrieval and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// The neutral parts form
    Lore,
    Openai,
    Anthropic,
    Gemini,
}

impl FromStr for WireFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lore" => Ok(Self::Lore),
            "openai" => Ok(Self::Openai),
            "anthropic" => Ok(Self::Anthropic),
            "gemini" => Ok(Self::Gemini),
            other => Err(EngineError::bad_request(format!(
                "unsupported message format: {other}"
            ))),
        }
    }
}

/// Convert one neutral message into wire-format messages. A single neutral
/// message may expand into several wire messages (OpenAI tool results are
/// standalone `role: tool` entries).
pub fn to_wire(format: WireFormat, role: MessageRole, parts: &[MessagePart]) -> Vec<Value> {
    match format {
        WireFormat::Lore => vec![json!({
            "role": role.as_str(),
            "parts": parts,
        })],
        WireFormat::Openai => to_openai(role, parts),
        WireFormat::Anthropic => to_anthropic(role, parts),
        WireFormat::Gemini => to_gemini(role, parts),
    }
}

fn to_openai(role: MessageRole, parts: &[MessagePart]) -> Vec<Value> {
    let mut out = Vec::new();
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();

    for part in parts {
        match part {
            MessagePart::Text { text } => texts.push(text.clone()),
            MessagePart::ToolCall {
                id,
                tool_name,
                arguments,
            } => tool_calls.push(json!({
                "id": id,
                "type": "function",
                "function": {
                    "name": tool_name,
                    "arguments": arguments.to_string(),
                },
            })),
            MessagePart::ToolResult {
                tool_call_id,
                content,
            } => out.push(json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "content": content,
            })),
            MessagePart::Image { filename } | MessagePart::File { filename } => {
                texts.push(format!("[file: {filename}]"))
            }
        }
    }

    if !texts.is_empty() || !tool_calls.is_empty() {
        let mut message = json!({
            "role": role.as_str(),
            "content": texts.join("\n"),
        });
        if !tool_calls.is_empty() {
            message["tool_calls"] = Value::Array(tool_calls);
        }
        out.insert(0, message);
    }
    out
}

fn to_anthropic(role: MessageRole, parts: &[MessagePart]) -> Vec<Value> {
    // Anthropic carries tool results on the user role
    let wire_role = match role {
        MessageRole::Assistant => "assistant",
        _ => "user",
    };
    let content: Vec<Value> = parts
        .iter()
        .map(|part| match part {
            MessagePart::Text { text } => json!({"type": "text", "text": text}),
            MessagePart::ToolCall {
                id,
                tool_name,
                arguments,
            } => json!({
                "type": "tool_use",
                "id": id,
                "name": tool_name,
                "input": arguments,
            }),
            MessagePart::ToolResult {
                tool_call_id,
                content,
            } => json!({
                "type": "tool_result",
                "tool_use_id": tool_call_id,
                "content": content,
            }),
            MessagePart::Image { filename } | MessagePart::File { filename } => {
                json!({"type": "text", "text": format!("[file: {filename}]")})
            }
        })
        .collect();
    vec![json!({"role": wire_role, "content": content})]
}

fn to_gemini(role: MessageRole, parts: &[MessagePart]) -> Vec<Value> {
    let wire_role = match role {
        MessageRole::Assistant => "model",
        _ => "user",
    };
    let content: Vec<Value> = parts
        .iter()
        .map(|part| match part {
            MessagePart::Text { text } => json!({"text": text}),
            MessagePart::ToolCall {
                tool_name,
                arguments,
                ..
            } => json!({
                "functionCall": {"name": tool_name, "args": arguments},
            }),
            MessagePart::ToolResult {
                tool_call_id,
                content,
            } => json!({
                "functionResponse": {
                    "name": tool_call_id,
                    "response": {"content": content},
                },
            }),
            MessagePart::Image { filename } | MessagePart::File { filename } => {
                json!({"text": format!("[file: {filename}]")})
            }
        })
        .collect();
    vec![json!({"role": wire_role, "parts": content})]
}

/// Parse one wire-format message into the neutral form.
pub fn from_wire(format: WireFormat, message: &Value) -> Result<(MessageRole, Vec<MessagePart>)> {
    match format {
        WireFormat::Lore => {
            let role = parse_role(message.get("role"))?;
            let parts: Vec<MessagePart> = serde_json::from_value(
                message
                    .get("parts")
                    .cloned()
                    .ok_or_else(|| EngineError::bad_request("message missing parts"))?,
            )?;
            Ok((role, parts))
        }
        WireFormat::Openai => from_openai(message),
        WireFormat::Anthropic => from_anthropic(message),
        WireFormat::Gemini => from_gemini(message),
    }
}

fn parse_role(value: Option<&Value>) -> Result<MessageRole> {
    let raw = value
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::bad_request("message missing role"))?;
    raw.parse()
        .map_err(|e: String| EngineError::bad_request(e))
}

fn from_openai(message: &Value) -> Result<(MessageRole, Vec<MessagePart>)> {
    let raw_role = message
        .get("role")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::bad_request("openai message missing role"))?;

    if raw_role == "tool" {
        let tool_call_id = message
            .get("tool_call_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Ok((
            MessageRole::Tool,
            vec![MessagePart::ToolResult {
                tool_call_id,
                content,
            }],
        ));
    }

    let role: MessageRole = raw_role
        .parse()
        .map_err(|e: String| EngineError::bad_request(e))?;
    let mut parts = Vec::new();
    if let Some(text) = message.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            parts.push(MessagePart::Text {
                text: text.to_string(),
            });
        }
    }
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let function = call
                .get("function")
                .ok_or_else(|| EngineError::bad_request("tool call missing function"))?;
            let raw_arguments = function
                .get("arguments")
                .cloned()
                .unwrap_or(Value::Null);
            // OpenAI sends arguments as a JSON-encoded string
            let arguments = match raw_arguments {
                Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
                other => other,
            };
            parts.push(MessagePart::ToolCall {
                id: call
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                tool_name: function
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                arguments,
            });
        }
    }
    Ok((role, parts))
}

fn from_anthropic(message: &Value) -> Result<(MessageRole, Vec<MessagePart>)> {
    let raw_role = message
        .get("role")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::bad_request("anthropic message missing role"))?;
    let mut role: MessageRole = raw_role
        .parse()
        .map_err(|e: String| EngineError::bad_request(e))?;

    let mut parts = Vec::new();
    match message.get("content") {
        Some(Value::String(text)) => parts.push(MessagePart::Text { text: text.clone() }),
        Some(Value::Array(blocks)) => {
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => parts.push(MessagePart::Text {
                        text: block
                            .get("text")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    }),
                    Some("tool_use") => parts.push(MessagePart::ToolCall {
                        id: block
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        tool_name: block
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        arguments: block.get("input").cloned().unwrap_or(Value::Null),
                    }),
                    Some("tool_result") => {
                        // A user-role message holding tool results is a tool turn
                        role = MessageRole::Tool;
                        parts.push(MessagePart::ToolResult {
                            tool_call_id: block
                                .get("tool_use_id")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            content: block
                                .get("content")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                        });
                    }
                    _ => {}
                }
            }
        }
        _ => return Err(EngineError::bad_request("anthropic message missing content")),
    }
    Ok((role, parts))
}

fn from_gemini(message: &Value) -> Result<(MessageRole, Vec<MessagePart>)> {
    let raw_role = message
        .get("role")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::bad_request("gemini message missing role"))?;
    let role = match raw_role {
        "model" => MessageRole::Assistant,
        "user" => MessageRole::User,
        other => {
            return Err(EngineError::bad_request(format!(
                "unknown gemini role: {other}"
            )))
        }
    };

    let blocks = message
        .get("parts")
        .and_then(Value::as_array)
        .ok_or_else(|| EngineError::bad_request("gemini message missing parts"))?;
    let mut parts = Vec::new();
    for block in blocks {
        if let Some(text) = block.get("text").and_then(Value::as_str) {
            parts.push(MessagePart::Text {
                text: text.to_string(),
            });
        } else if let Some(call) = block.get("functionCall") {
            parts.push(MessagePart::ToolCall {
                id: String::new(),
                tool_name: call
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                arguments: call.get("args").cloned().unwrap_or(Value::Null),
            });
        } else if let Some(response) = block.get("functionResponse") {
            parts.push(MessagePart::ToolResult {
                tool_call_id: response
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                content: response
                    .get("response")
                    .and_then(|r| r.get("content"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }
    }
    Ok((role, parts))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_parts() -> Vec<MessagePart> {
        vec![
            MessagePart::Text {
                text: "Book an Italian restaurant in SF for Friday".to_string(),
            },
            MessagePart::ToolCall {
                id: "call_1".to_string(),
                tool_name: "search".to_string(),
                arguments: json!({"query": "italian sf"}),
            },
        ]
    }

    #[test]
    fn test_part_serde_tags() {
        let json = serde_json::to_value(&MessagePart::ToolCall {
            id: "c1".into(),
            tool_name: "t".into(),
            arguments: json!({}),
        })
        .unwrap();
        assert_eq!(json["type"], "tool-call");

        let back: MessagePart = serde_json::from_value(json).unwrap();
        assert!(matches!(back, MessagePart::ToolCall { .. }));
    }

    #[test]
    fn test_render_role_labels() {
        let blob = MessageBlob {
            message_id: MessageId::new(),
            role: MessageRole::Assistant,
            parts: vec![MessagePart::Text {
                text: "done".into(),
            }],
            task_id: None,
        };
        assert_eq!(blob.render(None), "<agent> done");
    }

    #[test]
    fn test_render_truncation() {
        let blob = MessageBlob {
            message_id: MessageId::new(),
            role: MessageRole::User,
            parts: vec![MessagePart::Text {
                text: "x".repeat(100),
            }],
            task_id: None,
        };
        let rendered = blob.render(Some(20));
        assert!(rendered.ends_with("[...truncated]"));
        assert!(rendered.len() < 40);
    }

    #[test]
    fn test_openai_round_trip_preserves_tool_calls() {
        let wire = to_wire(WireFormat::Openai, MessageRole::Assistant, &sample_parts());
        assert_eq!(wire.len(), 1);

        let (role, parts) = from_wire(WireFormat::Openai, &wire[0]).unwrap();
        assert_eq!(role, MessageRole::Assistant);
        assert_eq!(parts.len(), 2);
        match &parts[1] {
            MessagePart::ToolCall {
                tool_name,
                arguments,
                ..
            } => {
                assert_eq!(tool_name, "search");
                assert_eq!(arguments["query"], "italian sf");
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn test_openai_tool_result_is_standalone_message() {
        let parts = vec![MessagePart::ToolResult {
            tool_call_id: "call_1".into(),
            content: "3 results".into(),
        }];
        let wire = to_wire(WireFormat::Openai, MessageRole::Tool, &parts);
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["role"], "tool");
        assert_eq!(wire[0]["tool_call_id"], "call_1");
    }

    #[test]
    fn test_anthropic_round_trip() {
        let wire = to_wire(WireFormat::Anthropic, MessageRole::Assistant, &sample_parts());
        assert_eq!(wire[0]["content"][1]["type"], "tool_use");

        let (role, parts) = from_wire(WireFormat::Anthropic, &wire[0]).unwrap();
        assert_eq!(role, MessageRole::Assistant);
        assert_eq!(parts, sample_parts());
    }

    #[test]
    fn test_gemini_text_round_trip() {
        let parts = vec![MessagePart::Text {
            text: "hello".into(),
        }];
        let wire = to_wire(WireFormat::Gemini, MessageRole::Assistant, &parts);
        assert_eq!(wire[0]["role"], "model");

        let (role, back) = from_wire(WireFormat::Gemini, &wire[0]).unwrap();
        assert_eq!(role, MessageRole::Assistant);
        assert_eq!(back, parts);
    }

    #[test]
    fn test_unknown_format_rejected() {
        let err = "protobuf".parse::<WireFormat>().unwrap_err();
        assert!(err.to_string().contains("unsupported"));
    }
}
