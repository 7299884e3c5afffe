//! Contract tests for message wire-format conversion
//!
//! Store-then-get in any supported format must return content semantically
//! equivalent to the input: text parts byte-equal, tool calls preserving
//! name and arguments.

use lore::format::{from_wire, to_wire, MessagePart, WireFormat};
use lore::types::MessageRole;
use serde_json::json;

fn conversation_parts() -> Vec<MessagePart> {
    vec![
        MessagePart::Text {
            text: "Searching for Italian restaurants in SF".to_string(),
        },
        MessagePart::ToolCall {
            id: "call_42".to_string(),
            tool_name: "web_search".to_string(),
            arguments: json!({"query": "italian restaurant sf", "limit": 5}),
        },
    ]
}

fn tool_names_and_args(parts: &[MessagePart]) -> Vec<(String, serde_json::Value)> {
    parts
        .iter()
        .filter_map(|p| match p {
            MessagePart::ToolCall {
                tool_name,
                arguments,
                ..
            } => Some((tool_name.clone(), arguments.clone())),
            _ => None,
        })
        .collect()
}

fn text_parts(parts: &[MessagePart]) -> Vec<String> {
    parts
        .iter()
        .filter_map(|p| match p {
            MessagePart::Text { text } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn round_trip_preserves_semantics_in_every_format() {
    let parts = conversation_parts();
    for format in [
        WireFormat::Lore,
        WireFormat::Openai,
        WireFormat::Anthropic,
        WireFormat::Gemini,
    ] {
        let wire = to_wire(format, MessageRole::Assistant, &parts);
        assert_eq!(wire.len(), 1, "{format:?} should stay one message");

        let (role, back) = from_wire(format, &wire[0]).unwrap();
        assert_eq!(role, MessageRole::Assistant, "{format:?} role");
        assert_eq!(
            text_parts(&back),
            text_parts(&parts),
            "{format:?} text parts must be byte-equal"
        );

        let original_calls = tool_names_and_args(&parts);
        let round_tripped = tool_names_and_args(&back);
        assert_eq!(
            original_calls.len(),
            round_tripped.len(),
            "{format:?} tool call count"
        );
        for ((name_a, args_a), (name_b, args_b)) in
            original_calls.iter().zip(round_tripped.iter())
        {
            assert_eq!(name_a, name_b, "{format:?} tool name");
            assert_eq!(args_a, args_b, "{format:?} tool arguments");
        }
    }
}

#[test]
fn lore_format_round_trips_exactly() {
    let parts = conversation_parts();
    let wire = to_wire(WireFormat::Lore, MessageRole::Assistant, &parts);
    let (_, back) = from_wire(WireFormat::Lore, &wire[0]).unwrap();
    assert_eq!(back, parts);
}

#[test]
fn tool_result_round_trips_through_openai_and_anthropic() {
    let parts = vec![MessagePart::ToolResult {
        tool_call_id: "call_42".to_string(),
        content: "5 results found".to_string(),
    }];

    for format in [WireFormat::Openai, WireFormat::Anthropic] {
        let wire = to_wire(format, MessageRole::Tool, &parts);
        let (role, back) = from_wire(format, &wire[0]).unwrap();
        assert_eq!(role, MessageRole::Tool, "{format:?}");
        match &back[0] {
            MessagePart::ToolResult {
                tool_call_id,
                content,
            } => {
                assert_eq!(tool_call_id, "call_42");
                assert_eq!(content, "5 results found");
            }
            other => panic!("{format:?}: expected tool result, got {other:?}"),
        }
    }
}

#[test]
fn media_parts_degrade_to_placeholders_on_foreign_formats() {
    let parts = vec![MessagePart::File {
        filename: "report.pdf".to_string(),
    }];
    let wire = to_wire(WireFormat::Openai, MessageRole::User, &parts);
    assert!(wire[0]["content"]
        .as_str()
        .unwrap()
        .contains("report.pdf"));

    // The native format keeps the part intact
    let wire = to_wire(WireFormat::Lore, MessageRole::User, &parts);
    let (_, back) = from_wire(WireFormat::Lore, &wire[0]).unwrap();
    assert_eq!(back, parts);
}
