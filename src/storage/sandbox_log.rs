//! Sandbox log rows
//!
//! The durable side of the sandbox broker: one row per sandbox mapping the
//! engine UUID to the backend's native id, with the exec/download history and
//! the keep-alive accounting column. Rows are retained after kill; only
//! `backend_sandbox_id` is nulled.

use crate::error::{EngineError, Result};
use crate::types::{ProjectId, SandboxId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgConnection;
use uuid::Uuid;

/// One executed command in the sandbox history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEntry {
    pub command: String,
    pub exit_code: i64,
}

/// One sandbox log row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SandboxLogRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub backend_sandbox_id: Option<String>,
    pub backend_type: String,
    pub history_commands: Json<Value>,
    pub generated_files: Json<Value>,
    pub will_total_alive_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SandboxLogRow {
    pub fn sandbox_id(&self) -> SandboxId {
        SandboxId::from(self.id)
    }
}

/// Record the engine-UUID ↔ backend-id mapping for a new sandbox.
pub async fn create(
    conn: &mut PgConnection,
    project_id: ProjectId,
    backend_sandbox_id: &str,
    backend_type: &str,
    initial_keepalive_seconds: i64,
) -> Result<SandboxLogRow> {
    let row: SandboxLogRow = sqlx::query_as(
        r#"
        INSERT INTO sandbox_logs
            (id, project_id, backend_sandbox_id, backend_type, will_total_alive_seconds)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(project_id.as_uuid())
    .bind(backend_sandbox_id)
    .bind(backend_type)
    .bind(initial_keepalive_seconds)
    .fetch_one(conn)
    .await?;
    Ok(row)
}

pub async fn fetch(conn: &mut PgConnection, sandbox_id: SandboxId) -> Result<SandboxLogRow> {
    let row: Option<SandboxLogRow> = sqlx::query_as("SELECT * FROM sandbox_logs WHERE id = $1")
        .bind(sandbox_id.as_uuid())
        .fetch_optional(conn)
        .await?;
    row.ok_or_else(|| EngineError::not_found(format!("sandbox {sandbox_id} not found")))
}

/// The backend's native id; `NotFound` for unknown or killed sandboxes.
pub async fn backend_id(conn: &mut PgConnection, sandbox_id: SandboxId) -> Result<String> {
    let backend: Option<Option<String>> =
        sqlx::query_scalar("SELECT backend_sandbox_id FROM sandbox_logs WHERE id = $1")
            .bind(sandbox_id.as_uuid())
            .fetch_optional(conn)
            .await?;
    match backend {
        Some(Some(id)) => Ok(id),
        _ => Err(EngineError::not_found(format!(
            "sandbox {sandbox_id} not found or was killed"
        ))),
    }
}

/// Null the backend id; the row is retained for history.
pub async fn mark_killed(conn: &mut PgConnection, sandbox_id: SandboxId) -> Result<()> {
    sqlx::query("UPDATE sandbox_logs SET backend_sandbox_id = NULL, updated_at = now() WHERE id = $1")
        .bind(sandbox_id.as_uuid())
        .execute(conn)
        .await?;
    Ok(())
}

/// Append one command to the exec history, server-side.
pub async fn append_command(
    conn: &mut PgConnection,
    sandbox_id: SandboxId,
    entry: &CommandEntry,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE sandbox_logs
        SET history_commands = COALESCE(history_commands, '[]'::jsonb) || $1::jsonb,
            updated_at = now()
        WHERE id = $2
        "#,
    )
    .bind(Json(serde_json::json!([entry])))
    .bind(sandbox_id.as_uuid())
    .execute(conn)
    .await?;
    Ok(())
}

/// Append one generated-file reference after a successful download.
pub async fn append_generated_file(
    conn: &mut PgConnection,
    sandbox_id: SandboxId,
    sandbox_path: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE sandbox_logs
        SET generated_files = COALESCE(generated_files, '[]'::jsonb) || $1::jsonb,
            updated_at = now()
        WHERE id = $2
        "#,
    )
    .bind(Json(serde_json::json!([{"sandbox_path": sandbox_path}])))
    .bind(sandbox_id.as_uuid())
    .execute(conn)
    .await?;
    Ok(())
}

/// Recompute `will_total_alive_seconds = keepalive + (now - created_at)`
/// server-side. Returns `(old, new)` so the caller can emit the metric delta.
pub async fn recompute_alive_seconds(
    conn: &mut PgConnection,
    sandbox_id: SandboxId,
    keepalive_seconds: i64,
) -> Result<(i64, i64)> {
    let old: Option<i64> =
        sqlx::query_scalar("SELECT will_total_alive_seconds FROM sandbox_logs WHERE id = $1")
            .bind(sandbox_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await?;
    let old = old.ok_or_else(|| EngineError::not_found(format!("sandbox {sandbox_id} not found")))?;

    let new: i64 = sqlx::query_scalar(
        r#"
        UPDATE sandbox_logs
        SET will_total_alive_seconds =
                $1 + EXTRACT(EPOCH FROM (now() - created_at))::bigint,
            updated_at = now()
        WHERE id = $2
        RETURNING will_total_alive_seconds
        "#,
    )
    .bind(keepalive_seconds)
    .bind(sandbox_id.as_uuid())
    .fetch_one(conn)
    .await?;
    Ok((old, new))
}

/// All sandboxes of a project, newest first.
pub async fn list_for_project(
    conn: &mut PgConnection,
    project_id: ProjectId,
) -> Result<Vec<SandboxLogRow>> {
    let rows: Vec<SandboxLogRow> =
        sqlx::query_as("SELECT * FROM sandbox_logs WHERE project_id = $1 ORDER BY created_at DESC")
            .bind(project_id.as_uuid())
            .fetch_all(conn)
            .await?;
    Ok(rows)
}
