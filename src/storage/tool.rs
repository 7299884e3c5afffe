//! Registered tool schemas
//!
//! Projects register function schemas (name, description, JSON-schema
//! parameters) with an optional config map and an optional dense embedding
//! used for semantic search.

use crate::error::{EngineError, Result};
use crate::types::{ProjectId, ToolRecordId, UserId};
use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgConnection;
use uuid::Uuid;

/// One registered tool row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ToolRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Option<Uuid>,
    pub name: String,
    pub description: String,
    pub parameters: Json<Value>,
    pub config: Option<Json<Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ToolRow {
    pub fn record_id(&self) -> ToolRecordId {
        ToolRecordId::from(self.id)
    }
}

/// Register a tool. Unique per `(project, user?, name)`.
#[allow(clippy::too_many_arguments)]
pub async fn register_tool(
    conn: &mut PgConnection,
    project_id: ProjectId,
    user_id: Option<UserId>,
    name: &str,
    description: &str,
    parameters: &Value,
    config: Option<&Value>,
    embedding: Option<Vec<f32>>,
) -> Result<ToolRow> {
    let row: ToolRow = sqlx::query_as(
        r#"
        INSERT INTO tools (id, project_id, user_id, name, description, parameters, config, embedding)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, project_id, user_id, name, description, parameters, config, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(project_id.as_uuid())
    .bind(user_id.map(|u| *u.as_uuid()))
    .bind(name)
    .bind(description)
    .bind(Json(parameters.clone()))
    .bind(config.map(|c| Json(c.clone())))
    .bind(embedding.map(Vector::from))
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            EngineError::conflict(format!("tool '{name}' already exists"))
        }
        other => other.into(),
    })?;
    Ok(row)
}

/// List a project's tools; user-scoped tools are included only for the given
/// user.
pub async fn list_tools(
    conn: &mut PgConnection,
    project_id: ProjectId,
    user_id: Option<UserId>,
) -> Result<Vec<ToolRow>> {
    let rows: Vec<ToolRow> = sqlx::query_as(
        r#"
        SELECT id, project_id, user_id, name, description, parameters, config,
               created_at, updated_at
        FROM tools
        WHERE project_id = $1 AND (user_id IS NULL OR user_id = $2)
        ORDER BY name
        "#,
    )
    .bind(project_id.as_uuid())
    .bind(user_id.map(|u| *u.as_uuid()))
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Nearest tools to a query embedding, by L2 distance.
pub async fn search_tools_by_embedding(
    conn: &mut PgConnection,
    project_id: ProjectId,
    query: Vec<f32>,
    limit: i64,
) -> Result<Vec<ToolRow>> {
    let rows: Vec<ToolRow> = sqlx::query_as(
        r#"
        SELECT id, project_id, user_id, name, description, parameters, config,
               created_at, updated_at
        FROM tools
        WHERE project_id = $1 AND embedding IS NOT NULL
        ORDER BY embedding <-> $2
        LIMIT $3
        "#,
    )
    .bind(project_id.as_uuid())
    .bind(Vector::from(query))
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub async fn delete_tool(conn: &mut PgConnection, tool_id: ToolRecordId) -> Result<()> {
    let result = sqlx::query("DELETE FROM tools WHERE id = $1")
        .bind(tool_id.as_uuid())
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(EngineError::not_found(format!("tool {tool_id} not found")));
    }
    Ok(())
}
