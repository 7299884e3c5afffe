//! Session-ingest controller
//!
//! Drains a session's pending message buffer under a per-session lock, runs
//! the task-management agent over the batch, and publishes one skill-learn
//! event per task that terminated during the run. Also home to the
//! stuck-message reaper and the first-turn display-title generation.

use crate::app::App;
use crate::broker::{self, SessionPendingEvent, SkillLearnEvent};
use crate::error::Result;
use crate::format::MessageBlob;
use crate::lock;
use crate::llm::{complete_with_timeout, ChatMessage, CompletionRequest};
use crate::metrics;
use crate::agent::prompts::TITLE_GENERATION_SYSTEM_PROMPT;
use crate::agent::task::run_task_agent;
use crate::storage::{learning_space, message, session};
use crate::types::{metric_tags, SessionId, WorkStatus};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const TITLE_INPUT_MAX_CHARS: usize = 512;
const TITLE_INPUT_MIN_CHARS: usize = 12;
const TITLE_GENERATION_MAX_TOKENS: u32 = 24;
const TITLE_OUTPUT_MAX_CHARS: usize = 80;

const NON_INFORMATIVE_TITLE_INPUTS: &[&str] = &[
    "hi", "hello", "hey", "ok", "okay", "thanks", "thank you", "test", "testing",
];

/// Collapse whitespace and cap the candidate title input.
pub fn normalize_title_input(text: &str) -> Option<String> {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return None;
    }
    if normalized.len() > TITLE_INPUT_MAX_CHARS {
        let mut cut = TITLE_INPUT_MAX_CHARS;
        while cut > 0 && !normalized.is_char_boundary(cut) {
            cut -= 1;
        }
        return Some(normalized[..cut].trim_end().to_string());
    }
    Some(normalized)
}

/// Whether the extracted first-user text is worth a title call.
pub fn check_title_input_quality(text: Option<&str>) -> (bool, &'static str) {
    let Some(text) = text else {
        return (false, "empty");
    };
    let Some(normalized) = normalize_title_input(text) else {
        return (false, "empty");
    };
    if normalized.len() < TITLE_INPUT_MIN_CHARS {
        return (false, "too_short");
    }
    if NON_INFORMATIVE_TITLE_INPUTS.contains(&normalized.to_lowercase().as_str()) {
        return (false, "non_informative");
    }
    (true, "ok")
}

/// First non-empty user text in the batch.
pub fn extract_first_user_text(messages: &[MessageBlob]) -> Option<String> {
    messages
        .iter()
        .filter(|m| m.role == crate::types::MessageRole::User)
        .find_map(|m| m.text_content())
        .and_then(|text| normalize_title_input(&text))
}

fn clean_title_candidate(text: &str, max_chars: usize) -> Option<String> {
    let collapsed = text
        .replace(['\n', '\r'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let trim_set: &[char] = &['`', '\'', '"', '\u{201c}', '\u{201d}', '\u{2018}', '\u{2019}', ' '];
    let mut cleaned = collapsed.trim_matches(trim_set).trim().to_string();
    if cleaned.is_empty() {
        return None;
    }
    if cleaned.len() > max_chars {
        let mut cut = max_chars;
        while cut > 0 && !cleaned.is_char_boundary(cut) {
            cut -= 1;
        }
        cleaned = cleaned[..cut].trim_end().to_string();
        cleaned = cleaned.trim_matches(trim_set).trim().to_string();
    }
    if cleaned.is_empty() || !cleaned.chars().any(char::is_alphanumeric) {
        return None;
    }
    Some(cleaned)
}

/// Sanitize the model's title; fall back to the first eight words of the
/// input text.
pub fn sanitize_generated_title(candidate: Option<&str>, fallback: Option<&str>) -> Option<String> {
    if let Some(cleaned) = candidate.and_then(|c| clean_title_candidate(c, TITLE_OUTPUT_MAX_CHARS)) {
        return Some(cleaned);
    }
    let fallback = fallback.and_then(|f| clean_title_candidate(f, TITLE_OUTPUT_MAX_CHARS))?;
    Some(
        fallback
            .split_whitespace()
            .take(8)
            .collect::<Vec<_>>()
            .join(" "),
    )
}

/// Best-effort display-title generation from the session's first turn.
/// Failures are logged, never propagated: a session without a title ingests
/// normally.
async fn maybe_generate_title(app: &App, session_id: SessionId, batch: &[MessageBlob]) {
    let result: Result<()> = async {
        let should_generate = {
            let mut conn = app.pool.acquire().await?;
            session::should_generate_display_title(&mut conn, session_id).await?
        };
        if !should_generate {
            debug!(%session_id, "session already has a display title");
            return Ok(());
        }

        let first_text = extract_first_user_text(batch);
        let (quality_ok, reason) = check_title_input_quality(first_text.as_deref());
        if !quality_ok {
            debug!(%session_id, reason, "skipping title generation");
            return Ok(());
        }
        let first_text = first_text.unwrap_or_default();

        let mut request = CompletionRequest::new(TITLE_GENERATION_SYSTEM_PROMPT);
        request.messages.push(ChatMessage::user(first_text.clone()));
        request.max_tokens = TITLE_GENERATION_MAX_TOKENS;
        let response = complete_with_timeout(
            app.llm.as_ref(),
            &request,
            Duration::from_secs(app.config.llm_response_timeout_secs),
        )
        .await?;

        let title = sanitize_generated_title(response.content.as_deref(), Some(&first_text));
        match title {
            Some(title) => {
                let mut conn = app.pool.acquire().await?;
                session::set_display_title(&mut conn, session_id, &title).await?;
                debug!(%session_id, title = %title, "generated session display title");
            }
            None => debug!(%session_id, "title generation produced unusable content"),
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        warn!(%session_id, error = %e, "title generation failed");
    }
}

/// Handle one `session-pending` event.
pub async fn process_session_pending(app: &App, event: &SessionPendingEvent) -> Result<()> {
    let qualifier = lock::session_ingest_qualifier(event.session_id);
    let token = app
        .locks
        .acquire_token(
            event.project_id,
            &qualifier,
            Duration::from_secs(app.config.session_lock_ttl_secs),
        )
        .await?;
    let Some(token) = token else {
        // Another worker holds the session; park the event briefly
        debug!(session_id = %event.session_id, "session ingest lock held, delaying");
        let binding = broker::topology()
            .into_iter()
            .find(|b| b.exchange == broker::exchanges::SESSION_PENDING)
            .expect("session-pending binding is declared");
        app.broker
            .publish_delayed(
                &binding,
                event,
                Duration::from_secs(app.config.session_lock_wait_secs),
            )
            .await?;
        return Ok(());
    };

    let result = ingest_locked(app, event).await;

    if let Err(e) = app
        .locks
        .release_if_token(event.project_id, &qualifier, &token)
        .await
    {
        warn!(session_id = %event.session_id, error = %e, "failed to release ingest lock");
    }
    result
}

async fn ingest_locked(app: &App, event: &SessionPendingEvent) -> Result<()> {
    let project_config = {
        let mut conn = app.pool.acquire().await?;
        session::get_project_config(&mut conn, event.project_id).await?
    };
    let buffer_limit = (project_config.session_message_buffer_max_turns
        + project_config.session_message_buffer_max_overflow) as i64;

    // Claim the oldest pending batch
    let pending = {
        let mut conn = app.pool.acquire().await?;
        let pending = message::get_message_ids(
            &mut conn,
            event.session_id,
            WorkStatus::Pending,
            buffer_limit,
            true,
        )
        .await?;
        if pending.is_empty() {
            return Ok(());
        }

        let disabled = metrics::get_today_value(
            &app.pool,
            event.project_id,
            metric_tags::TASK_CREATION_DISABLED,
        )
        .await?
            > 0;
        if disabled {
            warn!(project_id = %event.project_id, "task creation disabled, failing pending messages");
            message::update_message_status_to(&mut conn, &pending, WorkStatus::Failed).await?;
            return Ok(());
        }

        message::update_message_status_to(&mut conn, &pending, WorkStatus::Running).await?;
        pending
    };
    info!(
        session_id = %event.session_id,
        count = pending.len(),
        "unpending session messages to process"
    );

    let run_result: Result<Vec<crate::types::TaskId>> = async {
        let (batch, previous, session_row, ls_binding) = {
            let mut conn = app.pool.acquire().await?;
            let rows = message::fetch_messages_data_by_ids(&mut conn, &pending).await?;
            let batch: Vec<MessageBlob> = rows.iter().map(|r| r.to_blob()).collect();

            let previous = match rows.first() {
                Some(first) => message::fetch_previous_messages_by_datetime(
                    &mut conn,
                    event.session_id,
                    first.created_at,
                    project_config.session_message_use_previous_messages_turns as i64,
                )
                .await?
                .iter()
                .map(|r| r.to_blob())
                .collect(),
                None => Vec::new(),
            };

            let session_row = session::get_session(&mut conn, event.session_id).await?;
            let ls_binding =
                learning_space::get_learning_space_for_session(&mut conn, event.session_id)
                    .await?;
            (batch, previous, session_row, ls_binding)
        };

        if session_row.disable_task_tracking {
            debug!(session_id = %event.session_id, "task tracking disabled for session");
            return Ok(Vec::new());
        }

        maybe_generate_title(app, event.session_id, &batch).await;

        let run = run_task_agent(
            &app.pool,
            app.llm.as_ref(),
            event.project_id,
            event.session_id,
            &batch,
            &previous,
            false,
            project_config.task_agent_max_iterations as usize,
            project_config.task_agent_previous_progress_num as usize,
            Duration::from_secs(app.config.llm_response_timeout_secs),
        )
        .await?;

        // Skill learning only applies to sessions bound to a learning space
        match ls_binding {
            Some(_) => Ok(run.terminated_task_ids),
            None => Ok(Vec::new()),
        }
    }
    .await;

    let after_status = if run_result.is_ok() {
        WorkStatus::Success
    } else {
        WorkStatus::Failed
    };
    {
        let mut conn = app.pool.acquire().await?;
        message::update_message_status_to(&mut conn, &pending, after_status).await?;
    }

    let terminated = run_result?;
    // Each publish is guarded on its own; a lost event is backstopped by
    // session-level idempotency
    for task_id in terminated {
        let learn_event = SkillLearnEvent {
            project_id: event.project_id,
            session_id: event.session_id,
            task_id,
        };
        if let Err(e) = app
            .broker
            .publish(
                broker::exchanges::LEARNING_SKILL,
                broker::routing_keys::LEARNING_SKILL_PROCESS,
                &learn_event,
            )
            .await
        {
            error!(%task_id, error = %e, "failed to publish skill-learn event");
        }
    }
    Ok(())
}

/// Background reaper: messages stuck in `running` beyond the processing
/// timeout return to `pending` for redelivery.
pub fn spawn_reaper(app: std::sync::Arc<App>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(app.config.reaper_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let result = async {
                let mut conn = app.pool.acquire().await?;
                message::reap_stuck_running(
                    &mut conn,
                    Duration::from_secs(app.config.session_message_processing_timeout_secs),
                )
                .await
            }
            .await;
            match result {
                Ok(0) => {}
                Ok(reaped) => info!(reaped, "reaped stuck running messages back to pending"),
                Err(e) => warn!(error = %e, "message reaper pass failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::MessagePart;
    use crate::types::{MessageId, MessageRole};

    #[test]
    fn test_normalize_title_input() {
        assert_eq!(
            normalize_title_input("  Book   a\ttable \n tonight "),
            Some("Book a table tonight".to_string())
        );
        assert_eq!(normalize_title_input("   "), None);

        let long = "word ".repeat(200);
        let normalized = normalize_title_input(&long).unwrap();
        assert!(normalized.len() <= TITLE_INPUT_MAX_CHARS);
    }

    #[test]
    fn test_title_input_quality() {
        assert_eq!(check_title_input_quality(None), (false, "empty"));
        assert_eq!(check_title_input_quality(Some("   ")), (false, "empty"));
        assert_eq!(check_title_input_quality(Some("hi")), (false, "too_short"));
        assert_eq!(
            check_title_input_quality(Some("thanks a lot ok")),
            (true, "ok")
        );
        assert_eq!(
            check_title_input_quality(Some("Book an Italian restaurant in SF")),
            (true, "ok")
        );
    }

    #[test]
    fn test_sanitize_generated_title_strips_quotes() {
        assert_eq!(
            sanitize_generated_title(Some("\"Restaurant Booking in SF\"\n"), None),
            Some("Restaurant Booking in SF".to_string())
        );
    }

    #[test]
    fn test_sanitize_generated_title_falls_back_to_first_words() {
        let fallback = "please book an italian restaurant in sf for friday at seven pm";
        assert_eq!(
            sanitize_generated_title(Some("???"), Some(fallback)),
            Some("please book an italian restaurant in sf for".to_string())
        );
        assert_eq!(sanitize_generated_title(None, None), None);
    }

    #[test]
    fn test_extract_first_user_text_skips_non_user_turns() {
        let messages = vec![
            MessageBlob {
                message_id: MessageId::new(),
                role: MessageRole::Assistant,
                parts: vec![MessagePart::Text {
                    text: "welcome".into(),
                }],
                task_id: None,
            },
            MessageBlob {
                message_id: MessageId::new(),
                role: MessageRole::User,
                parts: vec![MessagePart::Text {
                    text: "  fix the login bug  ".into(),
                }],
                task_id: None,
            },
        ];
        assert_eq!(
            extract_first_user_text(&messages),
            Some("fix the login bug".to_string())
        );
    }
}
