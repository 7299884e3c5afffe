//! Integration tests for the skill distillation path
//!
//! Drives the one-shot distiller end to end against the deterministic mock
//! provider: forced tool call in, rendered markdown analysis block out.

use lore::agent::distill::{
    distill_task, failure_analysis_schema, success_analysis_schema, FAILURE_ANALYSIS_TOOL,
    SUCCESS_ANALYSIS_TOOL,
};
use lore::llm::{LlmResponse, MockProvider, ToolCallRequest};
use lore::storage::task::{TaskData, TaskRow};
use serde_json::{json, Value};
use sqlx::types::Json;
use std::time::Duration;
use uuid::Uuid;

fn finished_task(status: &str) -> TaskRow {
    TaskRow {
        id: Uuid::new_v4(),
        session_id: Uuid::new_v4(),
        task_order: 1,
        task_status: status.to_string(),
        task_data: Json(TaskData {
            description: "Book an Italian restaurant in SF for Friday".to_string(),
            progresses: vec![
                "Searched opentable for italian restaurants in SF".to_string(),
                "Booked Il Casaro for Friday 7pm".to_string(),
            ],
            user_preferences: vec!["prefers patio seating".to_string()],
        }),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    }
}

fn scripted_analysis(name: &str, arguments: Value) -> LlmResponse {
    LlmResponse {
        content: None,
        tool_calls: vec![ToolCallRequest {
            id: "toolu_1".to_string(),
            name: name.to_string(),
            arguments,
        }],
        raw: json!({"mock": true}),
    }
}

#[tokio::test]
async fn success_task_distills_to_markdown_block() {
    let provider = MockProvider::with_script(vec![scripted_analysis(
        SUCCESS_ANALYSIS_TOOL,
        json!({
            "task_goal": "book an italian restaurant in SF",
            "approach": "searched opentable, shortlisted, confirmed the booking",
            "key_decisions": ["filtered by neighborhood", "picked 7pm Friday"],
            "generalizable_pattern": "search, shortlist by constraints, confirm with the user",
            "is_worth_learning": true,
        }),
    )]);

    let task = finished_task("success");
    let outcome = distill_task(&provider, Duration::from_secs(5), &task, &[], &[task.clone()])
        .await
        .unwrap();

    assert!(outcome.is_worth_learning);
    let text = outcome.distilled_text.unwrap();
    assert!(text.starts_with("## Task Analysis (Success)"));
    assert!(text.contains("**Goal:** book an italian restaurant in SF"));
    assert!(text.contains("  - filtered by neighborhood"));
}

#[tokio::test]
async fn failed_task_uses_failure_schema() {
    let provider = MockProvider::with_script(vec![scripted_analysis(
        FAILURE_ANALYSIS_TOOL,
        json!({
            "task_goal": "book a restaurant",
            "failure_point": "submitted the form without a date",
            "flawed_reasoning": "assumed the site would default to today",
            "what_should_have_been_done": "validate all required form fields first",
            "prevention_principle": "never submit a form with unset required fields",
            "is_worth_learning": true,
        }),
    )]);

    let task = finished_task("failed");
    let outcome = distill_task(&provider, Duration::from_secs(5), &task, &[], &[task.clone()])
        .await
        .unwrap();
    let text = outcome.distilled_text.unwrap();
    assert!(text.starts_with("## Task Analysis (Failure)"));
    assert!(text.contains("**Prevention Principle:**"));
}

#[tokio::test]
async fn trivial_task_is_skipped() {
    let provider = MockProvider::with_script(vec![scripted_analysis(
        SUCCESS_ANALYSIS_TOOL,
        json!({
            "task_goal": "what is 2+2",
            "approach": "answered directly",
            "key_decisions": [],
            "generalizable_pattern": "none",
            "is_worth_learning": false,
            "skip_reason": "one-shot calculation",
        }),
    )]);

    let task = finished_task("success");
    let outcome = distill_task(&provider, Duration::from_secs(5), &task, &[], &[task.clone()])
        .await
        .unwrap();
    assert!(!outcome.is_worth_learning);
    assert_eq!(outcome.skip_reason.as_deref(), Some("one-shot calculation"));
}

#[tokio::test]
async fn non_terminal_task_is_rejected() {
    let provider = MockProvider::default();
    let task = finished_task("running");
    let err = distill_task(&provider, Duration::from_secs(5), &task, &[], &[task.clone()])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not terminal"));
}

#[test]
fn analysis_schemas_require_the_worth_learning_gate() {
    for schema in [success_analysis_schema(), failure_analysis_schema()] {
        let required = schema.parameters["required"].as_array().unwrap();
        assert!(
            required.iter().any(|v| v == "is_worth_learning"),
            "{} must require is_worth_learning",
            schema.name
        );
        assert!(schema.parameters["properties"]["skip_reason"].is_object());
    }
}
