//! Task-management agent
//!
//! Instantiates the generic loop with the fixed task tool surface. The
//! context carries positional indexes (the model addresses tasks by order and
//! messages by their position in the current batch) plus the list of task ids
//! that terminated during the run; the controller drains that list after the
//! loop and publishes one skill-learn event per id.
//!
//! Handlers answer argument mistakes with tool-result strings so the model
//! can correct itself; only infrastructure faults abort the run.

use crate::agent::{
    finish_schema, AgentLoop, AgentScope, LoopOutcome, ToolHandler, ToolPool,
    REPORT_THINKING_TOOL,
};
use crate::error::{EngineError, ErrorCode, Result};
use crate::format::MessageBlob;
use crate::llm::{LlmProvider, ToolSchema};
use crate::metrics::capture_increment;
use crate::storage::task::{self, TaskData, TaskRow};
use crate::types::{metric_tags, MessageId, ProjectId, SessionId, TaskId, WorkStatus};
use crate::agent::prompts;
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Loop-scoped context, rebuilt with a fresh transaction every iteration.
pub struct TaskCtx {
    tx: Transaction<'static, Postgres>,
    pool: PgPool,
    project_id: ProjectId,
    session_id: SessionId,
    tasks: Vec<TaskRow>,
    message_ids: Vec<MessageId>,
    learning_task_ids: Vec<TaskId>,
    disable_status_change: bool,
}

impl TaskCtx {
    fn task_by_order(&self, order: i64) -> Option<&TaskRow> {
        if order < 1 {
            return None;
        }
        self.tasks.iter().find(|t| t.task_order as i64 == order)
    }

    /// Re-read the task index after a mutation so later calls in the same
    /// iteration see fresh orders and statuses.
    async fn reload_tasks(&mut self) -> Result<()> {
        self.tasks = task::fetch_current_tasks(&mut self.tx, self.session_id).await?;
        Ok(())
    }
}

/// Persistent state owned by the scope across iterations.
#[derive(Default)]
struct TaskAgentState {
    learning_task_ids: Vec<TaskId>,
}

/// Scope: one transaction per iteration over the shared pool.
pub struct TaskScope {
    pool: PgPool,
    project_id: ProjectId,
    session_id: SessionId,
    message_ids: Vec<MessageId>,
    disable_status_change: bool,
    state: TaskAgentState,
}

#[async_trait]
impl AgentScope for TaskScope {
    type Ctx = TaskCtx;

    async fn begin(&mut self) -> Result<TaskCtx> {
        let mut tx = self.pool.begin().await?;
        let tasks = task::fetch_current_tasks(&mut tx, self.session_id).await?;
        Ok(TaskCtx {
            tx,
            pool: self.pool.clone(),
            project_id: self.project_id,
            session_id: self.session_id,
            tasks,
            message_ids: self.message_ids.clone(),
            learning_task_ids: Vec::new(),
            disable_status_change: self.disable_status_change,
        })
    }

    async fn commit(&mut self, ctx: TaskCtx) -> Result<()> {
        let TaskCtx {
            tx,
            learning_task_ids,
            ..
        } = ctx;
        tx.commit().await?;
        // Only committed terminations are eligible for skill learning
        self.state.learning_task_ids.extend(learning_task_ids);
        Ok(())
    }
}

/// Downgrade domain rejections to tool-result strings the model can act on;
/// infrastructure faults stay hard errors.
fn soften(err: EngineError) -> Result<String> {
    match err.code() {
        ErrorCode::NotFound
        | ErrorCode::BadRequest
        | ErrorCode::Conflict
        | ErrorCode::Forbidden => Ok(err.to_string()),
        _ => Err(err),
    }
}

fn arg_i64(arguments: &Value, key: &str) -> Option<i64> {
    arguments.get(key).and_then(Value::as_i64)
}

fn arg_str<'a>(arguments: &'a Value, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(Value::as_str)
}

struct ReportThinkingTool;

#[async_trait]
impl ToolHandler<TaskCtx> for ReportThinkingTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            REPORT_THINKING_TOOL,
            "Report your reasoning about the conversation before acting: planning detection, task changes, message links, progress and preference updates.",
            json!({
                "type": "object",
                "properties": {
                    "thinking": {
                        "type": "string",
                        "description": "Your reasoning, following the Thinking Report checklist.",
                    },
                },
                "required": ["thinking"],
            }),
        )
    }

    async fn handle(&self, _ctx: &mut TaskCtx, _arguments: Value) -> Result<String> {
        Ok("Thinking recorded.".to_string())
    }
}

struct InsertTaskTool;

#[async_trait]
impl ToolHandler<TaskCtx> for InsertTaskTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "insert_task",
            "Create a new task by inserting it after the specified task order. Each task represents ONE user request — do NOT create separate tasks for agent execution sub-steps.",
            json!({
                "type": "object",
                "properties": {
                    "after_task_order": {
                        "type": "integer",
                        "description": "The task order after which to insert the new task. Use 0 to insert at the beginning.",
                    },
                    "task_description": {
                        "type": "string",
                        "description": "The user's query or request verbatim, or closely paraphrased. Do NOT split into agent sub-steps or invent descriptions from agent planning.",
                    },
                },
                "required": ["after_task_order", "task_description"],
            }),
        )
    }

    async fn handle(&self, ctx: &mut TaskCtx, arguments: Value) -> Result<String> {
        let Some(after_order) = arg_i64(&arguments, "after_task_order") else {
            return Ok("You must provide an after_task_order argument. Creating failed.".into());
        };
        let Some(description) = arg_str(&arguments, "task_description") else {
            return Ok("You must provide a task_description argument. Creating failed.".into());
        };
        let data = TaskData {
            description: description.to_string(),
            ..TaskData::default()
        };
        let created = match task::insert_task(&mut ctx.tx, ctx.session_id, after_order as i32, &data)
            .await
        {
            Ok(row) => row,
            Err(e) => return soften(e),
        };

        let pool = ctx.pool.clone();
        let project_id = ctx.project_id;
        tokio::spawn(async move {
            if let Err(e) =
                capture_increment(&pool, project_id, metric_tags::NEW_TASK_CREATED, 1).await
            {
                warn!(error = %e, "failed to capture task-created metric");
            }
        });

        ctx.reload_tasks().await?;
        Ok(format!("Task {} created", created.task_order))
    }
}

struct UpdateTaskTool;

#[async_trait]
impl ToolHandler<TaskCtx> for UpdateTaskTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "update_task",
            "Update an existing task's description and/or status.\nUse this when task progress changes or task details need modification.\nMostly use it to update the task status, if you're confident about a task is running, completed or failed.\nOnly when the conversation explicitly mention certain task's purpose should be modified, then use this tool to update the task description.",
            json!({
                "type": "object",
                "properties": {
                    "task_order": {
                        "type": "integer",
                        "description": "The order number of the task to update.",
                    },
                    "task_status": {
                        "type": "string",
                        "enum": ["pending", "running", "success", "failed"],
                        "description": "New status for the task. (optional).",
                    },
                    "task_description": {
                        "type": "string",
                        "description": "Reflect the user's updated query or intent. Use the user's words, not agent-invented descriptions. (optional).",
                    },
                },
                "required": ["task_order"],
            }),
        )
    }

    async fn handle(&self, ctx: &mut TaskCtx, arguments: Value) -> Result<String> {
        let Some(order) = arg_i64(&arguments, "task_order") else {
            return Ok(
                "You must provide a task order argument, so that we can update the task. Updating failed."
                    .into(),
            );
        };
        let Some(target) = ctx.task_by_order(order) else {
            return Ok(format!("Task order {order} is out of range, updating failed."));
        };
        let task_id = target.task_id();

        let mut status = match arg_str(&arguments, "task_status") {
            Some(raw) => match raw.parse::<WorkStatus>() {
                Ok(status) => Some(status),
                Err(_) => return Ok(format!("Unknown task_status '{raw}', updating failed.")),
            },
            None => None,
        };
        let description = arg_str(&arguments, "task_description");

        let mut status_skipped = false;
        if ctx.disable_status_change && status.map(|s| s.is_terminal()).unwrap_or(false) {
            status = None;
            status_skipped = true;
        }

        let updated = match task::update_task(&mut ctx.tx, task_id, status, description).await {
            Ok(row) => row,
            Err(e) => return soften(e),
        };
        if !status_skipped && status.map(|s| s.is_terminal()).unwrap_or(false) {
            ctx.learning_task_ids.push(task_id);
        }
        ctx.reload_tasks().await?;
        Ok(format!("Task {} updated", updated.task_order))
    }
}

struct AppendMessagesToTaskTool;

#[async_trait]
impl ToolHandler<TaskCtx> for AppendMessagesToTaskTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "append_messages_to_task",
            "Link a range of message ids to a task. This tool ONLY links messages and auto-sets the task status to 'running'.\n- Use separate tools for recording progress (append_task_progress) and user preferences (set_task_user_preference).\n- If you decide to link messages to a task marked as 'success' or 'failed', update its status to 'running' first.",
            json!({
                "type": "object",
                "properties": {
                    "task_order": {
                        "type": "integer",
                        "description": "The order number of the task to link messages to.",
                    },
                    "message_id_range": {
                        "type": "array",
                        "items": {"type": "integer"},
                        "minItems": 2,
                        "maxItems": 2,
                        "description": "Inclusive range [start, end] of message IDs to link. E.g. [2, 8] links messages 2,3,4,5,6,7,8.",
                    },
                },
                "required": ["task_order", "message_id_range"],
            }),
        )
    }

    async fn handle(&self, ctx: &mut TaskCtx, arguments: Value) -> Result<String> {
        let Some(order) = arg_i64(&arguments, "task_order") else {
            return Ok(
                "You must provide a task order argument, so that we can attach messages to the task. Appending failed."
                    .into(),
            );
        };
        let range = arguments.get("message_id_range").and_then(Value::as_array);
        let Some(range) = range.filter(|r| r.len() == 2) else {
            return Ok(
                "message_id_range must be a 2-element array [start, end]. Appending failed.".into(),
            );
        };
        let (Some(start), Some(end)) = (range[0].as_i64(), range[1].as_i64()) else {
            return Ok(
                "message_id_range must contain two integers [start, end]. Appending failed.".into(),
            );
        };
        if start > end || start < 0 {
            return Ok(format!(
                "Invalid range [{start}, {end}]. start must be <= end. Appending failed."
            ));
        }

        let Some(target) = ctx.task_by_order(order) else {
            return Ok(format!("Task order {order} is out of range, appending failed."));
        };
        let task_id = target.task_id();
        let status = target.status();
        if status.is_terminal() {
            return Ok(format!(
                "Appending failed. Task {order} is already {status}. Update its status to 'running' first then append messages."
            ));
        }

        let message_ids: Vec<MessageId> = (start..=end)
            .filter_map(|i| ctx.message_ids.get(i as usize).copied())
            .collect();
        if message_ids.is_empty() {
            return Ok(format!(
                "No message ids to append, skip: range [{start}, {end}]"
            ));
        }

        if let Err(e) = task::append_messages_to_task(&mut ctx.tx, &message_ids, task_id).await {
            return soften(e);
        }
        if status != WorkStatus::Running {
            if let Err(e) =
                task::update_task(&mut ctx.tx, task_id, Some(WorkStatus::Running), None).await
            {
                return soften(e);
            }
        }
        ctx.reload_tasks().await?;
        Ok(format!("Messages [{start}..{end}] linked to task {order}"))
    }
}

struct AppendTaskProgressTool;

#[async_trait]
impl ToolHandler<TaskCtx> for AppendTaskProgressTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "append_task_progress",
            "Record a progress step for a task. Use this to log what the agent actually did at each step.\n- Write concise, honest summaries of agent actions.\n- Be specific with actual values and file paths.\n- Cannot append progress to 'success' or 'failed' tasks — update status to 'running' first.",
            json!({
                "type": "object",
                "properties": {
                    "task_order": {
                        "type": "integer",
                        "description": "The order number of the task to append progress to.",
                    },
                    "progress": {
                        "type": "string",
                        "description": "Concise, honest summary of what the agent did in this step. E.g. 'Created login component in src/Login.tsx'.",
                    },
                },
                "required": ["task_order", "progress"],
            }),
        )
    }

    async fn handle(&self, ctx: &mut TaskCtx, arguments: Value) -> Result<String> {
        let Some(order) = arg_i64(&arguments, "task_order") else {
            return Ok("You must provide a task_order argument. Appending progress failed.".into());
        };
        let progress = arg_str(&arguments, "progress").unwrap_or_default();
        if progress.trim().is_empty() {
            return Ok(
                "You must provide a non-empty progress string. Appending progress failed.".into(),
            );
        }
        let Some(target) = ctx.task_by_order(order) else {
            return Ok(format!(
                "Task order {order} is out of range, appending progress failed."
            ));
        };
        let status = target.status();
        if status.is_terminal() {
            return Ok(format!(
                "Appending progress failed. Task {order} is already {status}. Update its status to 'running' first then append progress."
            ));
        }
        let task_id = target.task_id();
        if let Err(e) = task::append_progress_to_task(&mut ctx.tx, task_id, progress).await {
            return soften(e);
        }
        ctx.reload_tasks().await?;
        Ok(format!("Progress appended to task {order}"))
    }
}

struct SetTaskUserPreferenceTool;

#[async_trait]
impl ToolHandler<TaskCtx> for SetTaskUserPreferenceTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "set_task_user_preference",
            "Set or replace the user preference for a task. This REPLACES the entire preference — provide the complete, updated preference string.\n- If the user's new preference conflicts with the existing one, write a merged/resolved version that reflects the user's latest intent.\n- Include relevant user info (email, tech stack choices, constraints, etc.).\n- Can be set on any task status (no restriction).",
            json!({
                "type": "object",
                "properties": {
                    "task_order": {
                        "type": "integer",
                        "description": "The order number of the task to set the preference for.",
                    },
                    "user_preference": {
                        "type": "string",
                        "description": "The complete, rewritten preference string that replaces all prior preferences for this task.",
                    },
                },
                "required": ["task_order", "user_preference"],
            }),
        )
    }

    async fn handle(&self, ctx: &mut TaskCtx, arguments: Value) -> Result<String> {
        let Some(order) = arg_i64(&arguments, "task_order") else {
            return Ok(
                "You must provide a task_order argument. Setting user preference failed.".into(),
            );
        };
        let preference = arg_str(&arguments, "user_preference").unwrap_or_default();
        if preference.trim().is_empty() {
            return Ok(
                "You must provide a non-empty user_preference string. Setting user preference failed."
                    .into(),
            );
        }
        let Some(target) = ctx.task_by_order(order) else {
            return Ok(format!(
                "Task order {order} is out of range, setting user preference failed."
            ));
        };
        let task_id = target.task_id();
        if let Err(e) =
            task::set_user_preference_for_task(&mut ctx.tx, task_id, preference).await
        {
            return soften(e);
        }
        ctx.reload_tasks().await?;
        Ok(format!("User preference set for task {order}"))
    }
}

struct AppendMessagesToPlanningTool;

#[async_trait]
impl ToolHandler<TaskCtx> for AppendMessagesToPlanningTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "append_messages_to_planning_section",
            "Save current message ids to the planning section.\nUse this when messages are about the agent/user is planning general plan, and those messages aren't related to any specific task execution.",
            json!({
                "type": "object",
                "properties": {
                    "message_ids": {
                        "type": "array",
                        "items": {"type": "integer"},
                        "description": "List of message IDs to append to the planning section.",
                    },
                },
                "required": ["message_ids"],
            }),
        )
    }

    async fn handle(&self, ctx: &mut TaskCtx, arguments: Value) -> Result<String> {
        let indexes: Vec<i64> = arguments
            .get("message_ids")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default();
        let message_ids: Vec<MessageId> = indexes
            .iter()
            .filter_map(|i| {
                if *i < 0 {
                    None
                } else {
                    ctx.message_ids.get(*i as usize).copied()
                }
            })
            .collect();
        if message_ids.is_empty() {
            warn!(?indexes, "no message ids to append to planning section");
            return Ok("No message ids to append, skip.".into());
        }
        if let Err(e) =
            task::append_messages_to_planning_section(&mut ctx.tx, ctx.session_id, &message_ids)
                .await
        {
            return soften(e);
        }
        Ok(format!(
            "{} message(s) appended to the planning section",
            message_ids.len()
        ))
    }
}

/// The task agent's fixed tool surface.
pub fn task_tool_pool() -> ToolPool<TaskCtx> {
    let mut pool = ToolPool::new();
    pool.register(Arc::new(InsertTaskTool));
    pool.register(Arc::new(UpdateTaskTool));
    pool.register(Arc::new(AppendMessagesToPlanningTool));
    pool.register(Arc::new(AppendMessagesToTaskTool));
    pool.register(Arc::new(AppendTaskProgressTool));
    pool.register(Arc::new(SetTaskUserPreferenceTool));
    pool.register(Arc::new(ReportThinkingTool));
    pool.register_schema_only(finish_schema());
    pool
}

/// Result of one task-agent run.
#[derive(Debug)]
pub struct TaskAgentRun {
    pub outcome: LoopOutcome,
    /// Tasks that reached a terminal status during the run, in commit order
    pub terminated_task_ids: Vec<TaskId>,
}

/// Run the task-management agent over one batch of session messages.
#[allow(clippy::too_many_arguments)]
pub async fn run_task_agent(
    pool: &PgPool,
    provider: &dyn LlmProvider,
    project_id: ProjectId,
    session_id: SessionId,
    current_messages: &[MessageBlob],
    previous_messages: &[MessageBlob],
    disable_status_change: bool,
    max_iterations: usize,
    previous_progress_num: usize,
    llm_timeout: Duration,
) -> Result<TaskAgentRun> {
    let (tasks, planning_task_id) = {
        let mut conn = pool.acquire().await?;
        let tasks = task::fetch_current_tasks(&mut conn, session_id).await?;
        let planning = task::get_planning_task(&mut conn, session_id).await?;
        (tasks, planning.map(|t| t.task_id()))
    };

    let task_section = prompts::pack_task_section(&tasks);
    let progress_section = prompts::pack_previous_progress_section(&tasks, previous_progress_num);
    let previous_section =
        prompts::pack_previous_messages_section(planning_task_id, &tasks, previous_messages);
    let current_section = prompts::pack_current_messages_with_ids(current_messages);
    let input = prompts::pack_task_input(
        &progress_section,
        &previous_section,
        &current_section,
        &task_section,
    );

    let tools = task_tool_pool();
    let mut scope = TaskScope {
        pool: pool.clone(),
        project_id,
        session_id,
        message_ids: current_messages.iter().map(|m| m.message_id).collect(),
        disable_status_change,
        state: TaskAgentState::default(),
    };

    let agent = AgentLoop {
        provider,
        system_prompt: prompts::TASK_AGENT_SYSTEM_PROMPT,
        tools: &tools,
        max_iterations,
        max_tokens: 2048,
        llm_timeout,
    };
    let outcome = agent.run(&mut scope, input).await?;

    Ok(TaskAgentRun {
        outcome,
        terminated_task_ids: scope.state.learning_task_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_pool_surface() {
        let pool = task_tool_pool();
        let names: Vec<String> = pool.schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "insert_task",
                "update_task",
                "append_messages_to_planning_section",
                "append_messages_to_task",
                "append_task_progress",
                "set_task_user_preference",
                "report_thinking",
                "finish",
            ]
        );
    }

    #[test]
    fn test_soften_keeps_infrastructure_errors_hard() {
        assert!(soften(EngineError::forbidden("terminal task")).is_ok());
        assert!(soften(EngineError::bad_request("range")).is_ok());
        assert!(soften(EngineError::not_found("task")).is_ok());
        assert!(soften(EngineError::retryable("db down")).is_err());
        assert!(soften(EngineError::backend("llm down")).is_err());
    }
}
