//! Skill-learn controller
//!
//! Consumes `learning-skill` events: distills the terminated task into a
//! structured analysis, then runs the skill-learner agent against the
//! session's learning space, all under a per-task lock so two events for the
//! same task serialize.

use crate::agent::distill::distill_task;
use crate::agent::skill_learner::run_skill_learner;
use crate::app::App;
use crate::broker::SkillLearnEvent;
use crate::error::{EngineError, Result};
use crate::format::MessageBlob;
use crate::lock;
use crate::storage::{learning_space, message, task};
use crate::types::LearningSessionStatus;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Handle one `learning-skill` event.
pub async fn process_skill_learning(app: &App, event: &SkillLearnEvent) -> Result<()> {
    let qualifier = lock::skill_learn_qualifier(event.task_id);
    let ttl = Duration::from_secs(app.config.skill_learn_lock_ttl_secs);
    let retry_delay = Duration::from_secs(app.config.skill_learn_retry_delay_secs);

    // Bounded lock acquisition; two events for one task serialize here
    let mut acquired = false;
    for attempt in 0..app.config.skill_learn_lock_max_attempts {
        if app
            .locks
            .test_and_set(event.project_id, &qualifier, ttl)
            .await?
        {
            acquired = true;
            break;
        }
        debug!(task_id = %event.task_id, attempt, "skill-learn lock held, waiting");
        tokio::time::sleep(retry_delay).await;
    }
    if !acquired {
        return Err(EngineError::timeout(format!(
            "could not acquire skill-learn lock for task {}",
            event.task_id
        )));
    }

    let result = learn_locked(app, event).await;

    if let Err(e) = app.locks.release(event.project_id, &qualifier).await {
        warn!(task_id = %event.task_id, error = %e, "failed to release skill-learn lock");
    }
    result
}

async fn learn_locked(app: &App, event: &SkillLearnEvent) -> Result<()> {
    // Step 1: fetch the terminated task, its messages, and the session's
    // task list
    let (finished_task, task_messages, all_tasks) = {
        let mut conn = app.pool.acquire().await?;
        let finished_task = match task::fetch_task(&mut conn, event.task_id).await {
            Ok(row) => row,
            Err(_) => {
                // Stale event for a deleted task; nothing to learn
                info!(task_id = %event.task_id, "task gone, skipping skill learning");
                return Ok(());
            }
        };
        if !finished_task.status().is_terminal() {
            info!(
                task_id = %event.task_id,
                status = %finished_task.task_status,
                "task not terminal, skipping stale skill-learn event"
            );
            return Ok(());
        }

        let message_ids = task::fetch_task_message_ids(&mut conn, event.task_id).await?;
        let task_messages: Vec<MessageBlob> = if message_ids.is_empty() {
            info!(task_id = %event.task_id, "task has no raw messages, distilling from metadata only");
            Vec::new()
        } else {
            message::fetch_messages_data_by_ids(&mut conn, &message_ids)
                .await?
                .iter()
                .map(|r| r.to_blob())
                .collect()
        };

        let all_tasks = task::fetch_current_tasks(&mut conn, event.session_id).await?;
        if all_tasks.is_empty() {
            return Err(EngineError::bad_request("session has no tasks"));
        }
        (finished_task, task_messages, all_tasks)
    };

    // Step 2: distillation
    let outcome = distill_task(
        app.llm.as_ref(),
        Duration::from_secs(app.config.llm_response_timeout_secs),
        &finished_task,
        &task_messages,
        &all_tasks,
    )
    .await?;
    if !outcome.is_worth_learning {
        info!(
            task_id = %event.task_id,
            reason = outcome.skip_reason.as_deref().unwrap_or("unspecified"),
            "task not worth learning, skipping"
        );
        return Ok(());
    }
    let distilled = outcome
        .distilled_text
        .ok_or_else(|| EngineError::bad_request("distillation produced no text"))?;

    // Step 3: learning space + skill inventory
    let (space, skills_info) = {
        let mut conn = app.pool.acquire().await?;
        let binding = learning_space::get_learning_space_for_session(&mut conn, event.session_id)
            .await?
            .ok_or_else(|| {
                EngineError::not_found(format!(
                    "session {} is not bound to a learning space",
                    event.session_id
                ))
            })?;
        let space = learning_space::get_learning_space(&mut conn, binding.space_id()).await?;
        let skill_ids =
            learning_space::get_learning_space_skill_ids(&mut conn, binding.space_id()).await?;
        let skills_info = learning_space::get_skills_info(&mut conn, &skill_ids).await?;

        if let Err(e) = learning_space::update_session_status(
            &mut conn,
            event.session_id,
            LearningSessionStatus::Running,
        )
        .await
        {
            warn!(session_id = %event.session_id, error = %e, "failed to mark ledger running");
        }
        (space, skills_info)
    };

    // Step 4: learner agent
    let learner_result = run_skill_learner(
        &app.pool,
        &app.blob,
        app.llm.as_ref(),
        event.project_id,
        space.space_id(),
        space.user(),
        skills_info,
        &distilled,
        app.config.skill_learn_max_iterations as usize,
        Duration::from_secs(app.config.llm_response_timeout_secs),
    )
    .await;

    let ledger_status = if learner_result.is_ok() {
        LearningSessionStatus::Completed
    } else {
        LearningSessionStatus::Failed
    };
    {
        let mut conn = app.pool.acquire().await?;
        if let Err(e) =
            learning_space::update_session_status(&mut conn, event.session_id, ledger_status).await
        {
            warn!(session_id = %event.session_id, error = %e, "failed to update ledger status");
        }
    }

    learner_result.map(|_| ())
}
