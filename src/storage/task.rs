//! Task graph store
//!
//! Tasks form an ordered list per session: `task_order` is 1-based and
//! gap-free, maintained by shifting on insert. Order 0 is reserved for the
//! hidden planning task that collects planning-turn messages without linking
//! them to a concrete task; it never appears in task listings.

use crate::error::{EngineError, Result};
use crate::types::{MessageId, SessionId, TaskId, WorkStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::PgConnection;
use uuid::Uuid;

/// The JSONB payload of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskData {
    pub description: String,
    #[serde(default)]
    pub progresses: Vec<String>,
    #[serde(default)]
    pub user_preferences: Vec<String>,
}

/// One task row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub task_order: i32,
    pub task_status: String,
    pub task_data: Json<TaskData>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRow {
    pub fn task_id(&self) -> TaskId {
        TaskId::from(self.id)
    }

    pub fn status(&self) -> WorkStatus {
        self.task_status.parse().unwrap_or(WorkStatus::Pending)
    }

    pub fn data(&self) -> &TaskData {
        &self.task_data.0
    }

    /// One listing line as the task agent sees it.
    pub fn listing_line(&self) -> String {
        let mut line = format!(
            "Task {}: {} (Status: {})",
            self.task_order,
            self.data().description,
            self.task_status
        );
        if !self.data().user_preferences.is_empty() {
            let prefs = self.data().user_preferences.join(" | ");
            line.push_str(&format!(" | User Prefs: \"{prefs}\""));
        }
        line
    }
}

const PLANNING_ORDER: i32 = 0;

/// All ordered tasks of a session, planning excluded.
pub async fn fetch_current_tasks(
    conn: &mut PgConnection,
    session_id: SessionId,
) -> Result<Vec<TaskRow>> {
    let rows: Vec<TaskRow> = sqlx::query_as(
        "SELECT * FROM tasks WHERE session_id = $1 AND task_order >= 1 ORDER BY task_order",
    )
    .bind(session_id.as_uuid())
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Fetch one task; `NotFound` when absent.
pub async fn fetch_task(conn: &mut PgConnection, task_id: TaskId) -> Result<TaskRow> {
    let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = $1")
        .bind(task_id.as_uuid())
        .fetch_optional(conn)
        .await?;
    row.ok_or_else(|| EngineError::not_found(format!("task {task_id} not found")))
}

/// Message ids linked to a task, oldest first.
pub async fn fetch_task_message_ids(
    conn: &mut PgConnection,
    task_id: TaskId,
) -> Result<Vec<MessageId>> {
    let ids: Vec<Uuid> =
        sqlx::query_scalar("SELECT id FROM messages WHERE task_id = $1 ORDER BY created_at, id")
            .bind(task_id.as_uuid())
            .fetch_all(conn)
            .await?;
    Ok(ids.into_iter().map(MessageId::from).collect())
}

/// Insert a task after order `after_order` (0 inserts at the front), shifting
/// later orders up so the sequence stays gap-free and 1-based.
pub async fn insert_task(
    conn: &mut PgConnection,
    session_id: SessionId,
    after_order: i32,
    data: &TaskData,
) -> Result<TaskRow> {
    if after_order < 0 {
        return Err(EngineError::bad_request(format!(
            "after_order must be >= 0, got {after_order}"
        )));
    }
    let current_max: Option<i32> = sqlx::query_scalar(
        "SELECT MAX(task_order) FROM tasks WHERE session_id = $1 AND task_order >= 1",
    )
    .bind(session_id.as_uuid())
    .fetch_one(&mut *conn)
    .await?;
    let current_max = current_max.unwrap_or(0);
    if after_order > current_max {
        return Err(EngineError::bad_request(format!(
            "after_order {after_order} is out of range (session has {current_max} tasks)"
        )));
    }

    sqlx::query(
        r#"
        UPDATE tasks SET task_order = task_order + 1, updated_at = now()
        WHERE session_id = $1 AND task_order > $2
        "#,
    )
    .bind(session_id.as_uuid())
    .bind(after_order)
    .execute(&mut *conn)
    .await?;

    let row: TaskRow = sqlx::query_as(
        r#"
        INSERT INTO tasks (id, session_id, task_order, task_status, task_data)
        VALUES ($1, $2, $3, 'pending', $4)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(session_id.as_uuid())
    .bind(after_order + 1)
    .bind(Json(data))
    .fetch_one(conn)
    .await?;
    Ok(row)
}

/// Update a task's status and/or description. Returns the updated row.
pub async fn update_task(
    conn: &mut PgConnection,
    task_id: TaskId,
    status: Option<WorkStatus>,
    description: Option<&str>,
) -> Result<TaskRow> {
    // Ensure it exists before patching
    fetch_task(&mut *conn, task_id).await?;

    if let Some(status) = status {
        sqlx::query("UPDATE tasks SET task_status = $1, updated_at = now() WHERE id = $2")
            .bind(status.as_str())
            .bind(task_id.as_uuid())
            .execute(&mut *conn)
            .await?;
    }
    if let Some(description) = description {
        sqlx::query(
            r#"
            UPDATE tasks
            SET task_data = jsonb_set(task_data, '{description}', to_jsonb($1::text)),
                updated_at = now()
            WHERE id = $2
            "#,
        )
        .bind(description)
        .bind(task_id.as_uuid())
        .execute(&mut *conn)
        .await?;
    }
    fetch_task(conn, task_id).await
}

/// Link messages to a task. Rejects when the task is terminal; callers
/// re-open with `update_task(status = running)` first.
pub async fn append_messages_to_task(
    conn: &mut PgConnection,
    message_ids: &[MessageId],
    task_id: TaskId,
) -> Result<()> {
    let task = fetch_task(&mut *conn, task_id).await?;
    if task.status().is_terminal() {
        return Err(EngineError::forbidden(format!(
            "task {} is {}; re-open to running before linking messages",
            task.task_order, task.task_status
        )));
    }
    let ids: Vec<Uuid> = message_ids.iter().map(|m| *m.as_uuid()).collect();
    sqlx::query("UPDATE messages SET task_id = $1 WHERE id = ANY($2)")
        .bind(task_id.as_uuid())
        .bind(&ids)
        .execute(conn)
        .await?;
    Ok(())
}

/// Append one progress entry. Rejects on terminal tasks.
pub async fn append_progress_to_task(
    conn: &mut PgConnection,
    task_id: TaskId,
    progress: &str,
) -> Result<()> {
    let task = fetch_task(&mut *conn, task_id).await?;
    if task.status().is_terminal() {
        return Err(EngineError::forbidden(format!(
            "task {} is {}; re-open to running before appending progress",
            task.task_order, task.task_status
        )));
    }
    sqlx::query(
        r#"
        UPDATE tasks
        SET task_data = jsonb_set(
                task_data,
                '{progresses}',
                COALESCE(task_data->'progresses', '[]'::jsonb) || to_jsonb($1::text)
            ),
            updated_at = now()
        WHERE id = $2
        "#,
    )
    .bind(progress)
    .bind(task_id.as_uuid())
    .execute(conn)
    .await?;
    Ok(())
}

/// Replace the task's user preference. Allowed on any status.
pub async fn set_user_preference_for_task(
    conn: &mut PgConnection,
    task_id: TaskId,
    preference: &str,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE tasks
        SET task_data = jsonb_set(
                task_data,
                '{user_preferences}',
                jsonb_build_array($1::text)
            ),
            updated_at = now()
        WHERE id = $2
        "#,
    )
    .bind(preference)
    .bind(task_id.as_uuid())
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(EngineError::not_found(format!("task {task_id} not found")));
    }
    Ok(())
}

/// The hidden planning task, if the session has one.
pub async fn get_planning_task(
    conn: &mut PgConnection,
    session_id: SessionId,
) -> Result<Option<TaskRow>> {
    let row: Option<TaskRow> =
        sqlx::query_as("SELECT * FROM tasks WHERE session_id = $1 AND task_order = $2")
            .bind(session_id.as_uuid())
            .bind(PLANNING_ORDER)
            .fetch_optional(conn)
            .await?;
    Ok(row)
}

/// The hidden planning task for a session, created on first use.
pub async fn get_or_create_planning_task(
    conn: &mut PgConnection,
    session_id: SessionId,
) -> Result<TaskRow> {
    let existing: Option<TaskRow> =
        sqlx::query_as("SELECT * FROM tasks WHERE session_id = $1 AND task_order = $2")
            .bind(session_id.as_uuid())
            .bind(PLANNING_ORDER)
            .fetch_optional(&mut *conn)
            .await?;
    if let Some(row) = existing {
        return Ok(row);
    }
    let data = TaskData {
        description: "planning".to_string(),
        ..TaskData::default()
    };
    let row: TaskRow = sqlx::query_as(
        r#"
        INSERT INTO tasks (id, session_id, task_order, task_status, task_data)
        VALUES ($1, $2, $3, 'pending', $4)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(session_id.as_uuid())
    .bind(PLANNING_ORDER)
    .bind(Json(&data))
    .fetch_one(conn)
    .await?;
    Ok(row)
}

/// Link planning-turn messages to the session's planning task.
pub async fn append_messages_to_planning_section(
    conn: &mut PgConnection,
    session_id: SessionId,
    message_ids: &[MessageId],
) -> Result<()> {
    let planning = get_or_create_planning_task(&mut *conn, session_id).await?;
    let ids: Vec<Uuid> = message_ids.iter().map(|m| *m.as_uuid()).collect();
    sqlx::query("UPDATE messages SET task_id = $1 WHERE id = ANY($2)")
        .bind(planning.id)
        .bind(&ids)
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(order: i32, status: &str, data: TaskData) -> TaskRow {
        TaskRow {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            task_order: order,
            task_status: status.to_string(),
            task_data: Json(data),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_listing_line_without_preferences() {
        let task = row(
            1,
            "running",
            TaskData {
                description: "Fix the login bug".into(),
                ..TaskData::default()
            },
        );
        assert_eq!(
            task.listing_line(),
            "Task 1: Fix the login bug (Status: running)"
        );
    }

    #[test]
    fn test_listing_line_with_preferences() {
        let task = row(
            2,
            "success",
            TaskData {
                description: "Add dark mode".into(),
                user_preferences: vec!["use Tailwind".into()],
                ..TaskData::default()
            },
        );
        assert!(task
            .listing_line()
            .ends_with("| User Prefs: \"use Tailwind\""));
    }

    #[test]
    fn test_task_data_defaults_on_partial_json() {
        let data: TaskData = serde_json::from_str(r#"{"description": "x"}"#).unwrap();
        assert!(data.progresses.is_empty());
        assert!(data.user_preferences.is_empty());
    }

    #[test]
    fn test_unknown_status_falls_back_to_pending() {
        let task = row(1, "bogus", TaskData::default());
        assert_eq!(task.status(), WorkStatus::Pending);
    }
}
