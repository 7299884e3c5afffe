//! Skill distillation
//!
//! A one-shot completion (no loop) that forces the model to emit exactly one
//! structured analysis tool call, success or failure shaped depending on how
//! the task terminated. The extracted arguments are rendered into the
//! markdown block the learner agent receives verbatim.

use crate::agent::prompts;
use crate::error::{EngineError, Result};
use crate::format::MessageBlob;
use crate::llm::{
    complete_with_timeout, ChatMessage, CompletionRequest, LlmProvider, LlmResponse, ToolSchema,
};
use crate::storage::task::TaskRow;
use crate::types::WorkStatus;
use serde_json::{json, Value};
use std::time::Duration;

pub const SUCCESS_ANALYSIS_TOOL: &str = "report_success_analysis";
pub const FAILURE_ANALYSIS_TOOL: &str = "report_failure_analysis";

fn worth_learning_properties() -> Value {
    json!({
        "is_worth_learning": {
            "type": "boolean",
            "description": "Whether this task produced meaningful, reusable knowledge worth recording as a skill. Set false for trivial tasks (simple lookups, small talk, one-shot calculations, generic Q&A with no real procedure or decision).",
        },
        "skip_reason": {
            "type": "string",
            "description": "If is_worth_learning is false, briefly explain why (e.g. 'simple factual lookup', 'no procedure involved'). Omit if is_worth_learning is true.",
        },
    })
}

/// Schema for the success analysis tool.
pub fn success_analysis_schema() -> ToolSchema {
    let mut properties = json!({
        "task_goal": {"type": "string"},
        "approach": {"type": "string"},
        "key_decisions": {"type": "array", "items": {"type": "string"}},
        "generalizable_pattern": {"type": "string"},
        "user_preferences_observed": {"type": "string"},
    });
    merge_object(&mut properties, worth_learning_properties());
    ToolSchema::new(
        SUCCESS_ANALYSIS_TOOL,
        "Report the structured analysis of a successful task.",
        json!({
            "type": "object",
            "properties": properties,
            "required": [
                "task_goal",
                "approach",
                "key_decisions",
                "generalizable_pattern",
                "is_worth_learning",
            ],
        }),
    )
}

/// Schema for the failure analysis tool.
pub fn failure_analysis_schema() -> ToolSchema {
    let mut properties = json!({
        "task_goal": {"type": "string"},
        "failure_point": {"type": "string"},
        "flawed_reasoning": {"type": "string"},
        "what_should_have_been_done": {"type": "string"},
        "prevention_principle": {"type": "string"},
        "user_preferences_observed": {"type": "string"},
    });
    merge_object(&mut properties, worth_learning_properties());
    ToolSchema::new(
        FAILURE_ANALYSIS_TOOL,
        "Report the structured failure analysis of a failed task.",
        json!({
            "type": "object",
            "properties": properties,
            "required": [
                "task_goal",
                "failure_point",
                "flawed_reasoning",
                "what_should_have_been_done",
                "prevention_principle",
                "is_worth_learning",
            ],
        }),
    )
}

fn merge_object(target: &mut Value, source: Value) {
    if let (Some(target), Value::Object(source)) = (target.as_object_mut(), source) {
        for (key, value) in source {
            target.insert(key, value);
        }
    }
}

/// The distiller's verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct DistillationOutcome {
    pub is_worth_learning: bool,
    pub distilled_text: Option<String>,
    pub skip_reason: Option<String>,
}

/// Extract the forced tool call from the response and render the markdown
/// analysis block. Missing required fields fail; a missing
/// `is_worth_learning` defaults to true (fail-open).
pub fn extract_distillation_result(response: &LlmResponse) -> Result<DistillationOutcome> {
    let call = response
        .tool_calls
        .first()
        .ok_or_else(|| EngineError::bad_request("no tool calls in distillation response"))?;
    let args = call
        .arguments
        .as_object()
        .ok_or_else(|| EngineError::bad_request("distillation arguments are not an object"))?;

    let is_worth_learning = args
        .get("is_worth_learning")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let skip_reason = args
        .get("skip_reason")
        .and_then(Value::as_str)
        .map(String::from);

    let field = |name: &str| -> Result<String> {
        args.get(name)
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| EngineError::bad_request(format!("missing required field: {name}")))
    };

    let lines = match call.name.as_str() {
        SUCCESS_ANALYSIS_TOOL => {
            let decisions = args
                .get("key_decisions")
                .and_then(Value::as_array)
                .ok_or_else(|| EngineError::bad_request("missing required field: key_decisions"))?;
            let mut lines = vec![
                "## Task Analysis (Success)".to_string(),
                format!("**Goal:** {}", field("task_goal")?),
                format!("**Approach:** {}", field("approach")?),
                "**Key Decisions:**".to_string(),
            ];
            for decision in decisions {
                if let Some(text) = decision.as_str() {
                    lines.push(format!("  - {text}"));
                }
            }
            lines.push(format!(
                "**Generalizable Pattern:** {}",
                field("generalizable_pattern")?
            ));
            lines
        }
        FAILURE_ANALYSIS_TOOL => vec![
            "## Task Analysis (Failure)".to_string(),
            format!("**Goal:** {}", field("task_goal")?),
            format!("**Failure Point:** {}", field("failure_point")?),
            format!("**Flawed Reasoning:** {}", field("flawed_reasoning")?),
            format!(
                "**What Should Have Been Done:** {}",
                field("what_should_have_been_done")?
            ),
            format!(
                "**Prevention Principle:** {}",
                field("prevention_principle")?
            ),
        ],
        other => {
            return Err(EngineError::bad_request(format!(
                "unexpected distillation tool call: {other}"
            )))
        }
    };

    let mut lines = lines;
    if let Some(preferences) = args.get("user_preferences_observed").and_then(Value::as_str) {
        if !preferences.trim().is_empty() {
            lines.push(format!("**User Preferences Observed:** {preferences}"));
        }
    }

    Ok(DistillationOutcome {
        is_worth_learning,
        distilled_text: Some(lines.join("\n")),
        skip_reason,
    })
}

/// Run the one-shot distillation for a terminated task.
pub async fn distill_task(
    provider: &dyn LlmProvider,
    llm_timeout: Duration,
    finished_task: &TaskRow,
    task_messages: &[MessageBlob],
    all_tasks: &[TaskRow],
) -> Result<DistillationOutcome> {
    let (schema, system_prompt) = match finished_task.status() {
        WorkStatus::Success => (
            success_analysis_schema(),
            prompts::SUCCESS_DISTILLATION_PROMPT,
        ),
        WorkStatus::Failed => (
            failure_analysis_schema(),
            prompts::FAILURE_DISTILLATION_PROMPT,
        ),
        other => {
            return Err(EngineError::bad_request(format!(
                "task {} is {other}, not terminal",
                finished_task.task_order
            )))
        }
    };

    let mut request = CompletionRequest::new(system_prompt);
    request.messages.push(ChatMessage::user(
        prompts::pack_distillation_input(finished_task, task_messages, all_tasks),
    ));
    request.forced_tool = Some(schema.name.clone());
    request.tools = vec![schema];
    request.max_tokens = 2048;

    let response = complete_with_timeout(provider, &request, llm_timeout).await?;
    extract_distillation_result(&response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCallRequest;

    fn response_with(name: &str, arguments: Value) -> LlmResponse {
        LlmResponse {
            content: None,
            tool_calls: vec![ToolCallRequest {
                id: "c1".into(),
                name: name.into(),
                arguments,
            }],
            raw: Value::Null,
        }
    }

    #[test]
    fn test_success_extraction_renders_markdown_block() {
        let response = response_with(
            SUCCESS_ANALYSIS_TOOL,
            json!({
                "task_goal": "book a table",
                "approach": "searched then called",
                "key_decisions": ["used opentable", "picked 7pm"],
                "generalizable_pattern": "search, shortlist, confirm",
                "is_worth_learning": true,
            }),
        );
        let outcome = extract_distillation_result(&response).unwrap();
        assert!(outcome.is_worth_learning);
        let text = outcome.distilled_text.unwrap();
        assert!(text.starts_with("## Task Analysis (Success)"));
        assert!(text.contains("**Goal:** book a table"));
        assert!(text.contains("  - used opentable"));
        assert!(text.contains("**Generalizable Pattern:** search, shortlist, confirm"));
    }

    #[test]
    fn test_failure_extraction() {
        let response = response_with(
            FAILURE_ANALYSIS_TOOL,
            json!({
                "task_goal": "deploy service",
                "failure_point": "migration ran against prod",
                "flawed_reasoning": "assumed staging env",
                "what_should_have_been_done": "check DATABASE_URL first",
                "prevention_principle": "verify target env before migrations",
                "is_worth_learning": true,
            }),
        );
        let text = extract_distillation_result(&response)
            .unwrap()
            .distilled_text
            .unwrap();
        assert!(text.starts_with("## Task Analysis (Failure)"));
        assert!(text.contains("**Prevention Principle:** verify target env before migrations"));
    }

    #[test]
    fn test_missing_required_field_rejects() {
        let response = response_with(
            SUCCESS_ANALYSIS_TOOL,
            json!({"task_goal": "x", "is_worth_learning": true}),
        );
        let err = extract_distillation_result(&response).unwrap_err();
        assert!(err.to_string().contains("missing required field"));
    }

    #[test]
    fn test_worth_learning_defaults_open() {
        let response = response_with(
            FAILURE_ANALYSIS_TOOL,
            json!({
                "task_goal": "x",
                "failure_point": "y",
                "flawed_reasoning": "z",
                "what_should_have_been_done": "w",
                "prevention_principle": "v",
            }),
        );
        assert!(extract_distillation_result(&response).unwrap().is_worth_learning);
    }

    #[test]
    fn test_not_worth_learning_carries_skip_reason() {
        let response = response_with(
            SUCCESS_ANALYSIS_TOOL,
            json!({
                "task_goal": "what is 2+2",
                "approach": "answered",
                "key_decisions": [],
                "generalizable_pattern": "none",
                "is_worth_learning": false,
                "skip_reason": "one-shot calculation",
            }),
        );
        let outcome = extract_distillation_result(&response).unwrap();
        assert!(!outcome.is_worth_learning);
        assert_eq!(outcome.skip_reason.as_deref(), Some("one-shot calculation"));
    }

    #[test]
    fn test_no_tool_calls_rejects() {
        let response = LlmResponse {
            content: Some("just text".into()),
            tool_calls: Vec::new(),
            raw: Value::Null,
        };
        assert!(extract_distillation_result(&response).is_err());
    }

    #[test]
    fn test_unexpected_tool_rejects() {
        let response = response_with("report_something_else", json!({}));
        let err = extract_distillation_result(&response).unwrap_err();
        assert!(err.to_string().contains("unexpected"));
    }
}
