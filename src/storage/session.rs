//! Session rows and project config lookup

use crate::config::ProjectConfig;
use crate::error::{EngineError, Result};
use crate::types::{ProjectId, SessionId, UserId};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgConnection;
use uuid::Uuid;

/// One session row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Option<Uuid>,
    pub display_title: Option<String>,
    pub configs: Json<Value>,
    pub disable_task_tracking: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRow {
    pub fn session_id(&self) -> SessionId {
        SessionId::from(self.id)
    }
}

/// Create a session. A caller-supplied id that already exists is a
/// `Conflict` (upstream integrations treat 409 as idempotent success).
pub async fn create_session(
    conn: &mut PgConnection,
    project_id: ProjectId,
    user_id: Option<UserId>,
    session_id: Option<SessionId>,
    configs: Option<&Value>,
) -> Result<SessionRow> {
    let id = session_id.unwrap_or_default();
    let row: SessionRow = sqlx::query_as(
        r#"
        INSERT INTO sessions (id, project_id, user_id, configs)
        VALUES ($1, $2, $3, COALESCE($4, '{}'::jsonb))
        RETURNING *
        "#,
    )
    .bind(id.as_uuid())
    .bind(project_id.as_uuid())
    .bind(user_id.map(|u| *u.as_uuid()))
    .bind(configs.map(|c| Json(c.clone())))
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            EngineError::conflict(format!("session {id} already exists"))
        }
        other => other.into(),
    })?;
    Ok(row)
}

pub async fn get_session(conn: &mut PgConnection, session_id: SessionId) -> Result<SessionRow> {
    let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM sessions WHERE id = $1")
        .bind(session_id.as_uuid())
        .fetch_optional(conn)
        .await?;
    row.ok_or_else(|| EngineError::not_found(format!("session {session_id} not found")))
}

/// A display title is generated only once, from the first ingested turn.
pub async fn should_generate_display_title(
    conn: &mut PgConnection,
    session_id: SessionId,
) -> Result<bool> {
    let title: Option<Option<String>> =
        sqlx::query_scalar("SELECT display_title FROM sessions WHERE id = $1")
            .bind(session_id.as_uuid())
            .fetch_optional(conn)
            .await?;
    match title {
        Some(existing) => Ok(existing.is_none()),
        None => Err(EngineError::not_found(format!(
            "session {session_id} not found"
        ))),
    }
}

pub async fn set_display_title(
    conn: &mut PgConnection,
    session_id: SessionId,
    title: &str,
) -> Result<()> {
    sqlx::query("UPDATE sessions SET display_title = $1, updated_at = now() WHERE id = $2")
        .bind(title)
        .bind(session_id.as_uuid())
        .execute(conn)
        .await?;
    Ok(())
}

/// Per-project ingest tuning, read from the project's `configs` map with
/// defaults for any missing key.
pub async fn get_project_config(
    conn: &mut PgConnection,
    project_id: ProjectId,
) -> Result<ProjectConfig> {
    let configs: Option<Json<Value>> =
        sqlx::query_scalar("SELECT configs FROM projects WHERE id = $1")
            .bind(project_id.as_uuid())
            .fetch_optional(conn)
            .await?;
    let configs = configs
        .ok_or_else(|| EngineError::not_found(format!("project {project_id} not found")))?;
    let config: ProjectConfig = serde_json::from_value(configs.0).unwrap_or_default();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_config_tolerates_foreign_keys() {
        let configs = serde_json::json!({
            "session_message_buffer_max_turns": 8,
            "unrelated": {"nested": true},
        });
        let config: ProjectConfig = serde_json::from_value(configs).unwrap_or_default();
        assert_eq!(config.session_message_buffer_max_turns, 8);
        assert_eq!(config.task_agent_max_iterations, 3);
    }
}
