//! Message store
//!
//! Messages are append-only; the only mutable columns are the processing
//! `status`, the `task_id` link and the user-supplied `meta`. Status moves
//! pending -> running -> {success, failed}; an explicit retry re-opens
//! failed -> running. Parts are never mutated after insert.

use crate::error::{EngineError, Result};
use crate::format::{MessageBlob, MessagePart};
use crate::types::{MessageId, MessageRole, SessionId, TaskId, WorkStatus};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgConnection;
use std::time::Duration;
use uuid::Uuid;

/// One message row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub task_id: Option<Uuid>,
    pub role: String,
    pub parts: Json<Vec<MessagePart>>,
    pub meta: Option<Json<Value>>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl MessageRow {
    pub fn message_id(&self) -> MessageId {
        MessageId::from(self.id)
    }

    pub fn role(&self) -> MessageRole {
        self.role.parse().unwrap_or(MessageRole::User)
    }

    /// The agent-facing shape of this row.
    pub fn to_blob(&self) -> MessageBlob {
        MessageBlob {
            message_id: self.message_id(),
            role: self.role(),
            parts: self.parts.0.clone(),
            task_id: self.task_id.map(TaskId::from),
        }
    }
}

/// Append one message in `pending` state.
pub async fn store_message(
    conn: &mut PgConnection,
    session_id: SessionId,
    role: MessageRole,
    parts: &[MessagePart],
    meta: Option<&Value>,
) -> Result<MessageRow> {
    let row: MessageRow = sqlx::query_as(
        r#"
        INSERT INTO messages (id, session_id, role, parts, meta, status)
        VALUES ($1, $2, $3, $4, $5, 'pending')
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(session_id.as_uuid())
    .bind(role.as_str())
    .bind(Json(parts))
    .bind(meta.map(|m| Json(m.clone())))
    .fetch_one(conn)
    .await?;
    Ok(row)
}

/// Ids of a session's messages in the given status, creation-ordered.
pub async fn get_message_ids(
    conn: &mut PgConnection,
    session_id: SessionId,
    status: WorkStatus,
    limit: i64,
    asc: bool,
) -> Result<Vec<MessageId>> {
    let order = if asc { "ASC" } else { "DESC" };
    let query = format!(
        r#"
        SELECT id FROM messages
        WHERE session_id = $1 AND status = $2
        ORDER BY created_at {order}, id {order}
        LIMIT $3
        "#
    );
    let ids: Vec<Uuid> = sqlx::query_scalar(&query)
        .bind(session_id.as_uuid())
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(conn)
        .await?;
    Ok(ids.into_iter().map(MessageId::from).collect())
}

/// Fetch messages by id, creation-ordered ascending.
pub async fn fetch_messages_data_by_ids(
    conn: &mut PgConnection,
    message_ids: &[MessageId],
) -> Result<Vec<MessageRow>> {
    let ids: Vec<Uuid> = message_ids.iter().map(|m| *m.as_uuid()).collect();
    let rows: Vec<MessageRow> =
        sqlx::query_as("SELECT * FROM messages WHERE id = ANY($1) ORDER BY created_at, id")
            .bind(&ids)
            .fetch_all(conn)
            .await?;
    Ok(rows)
}

/// Move a set of messages to a new processing status.
pub async fn update_message_status_to(
    conn: &mut PgConnection,
    message_ids: &[MessageId],
    status: WorkStatus,
) -> Result<()> {
    let ids: Vec<Uuid> = message_ids.iter().map(|m| *m.as_uuid()).collect();
    sqlx::query("UPDATE messages SET status = $1 WHERE id = ANY($2)")
        .bind(status.as_str())
        .bind(&ids)
        .execute(conn)
        .await?;
    Ok(())
}

/// The context window: up to `limit` messages created strictly before
/// `before`, returned oldest-first.
pub async fn fetch_previous_messages_by_datetime(
    conn: &mut PgConnection,
    session_id: SessionId,
    before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<MessageRow>> {
    let mut rows: Vec<MessageRow> = sqlx::query_as(
        r#"
        SELECT * FROM messages
        WHERE session_id = $1 AND created_at < $2
        ORDER BY created_at DESC, id DESC
        LIMIT $3
        "#,
    )
    .bind(session_id.as_uuid())
    .bind(before)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    rows.reverse();
    Ok(rows)
}

/// PATCH semantics on `meta`: present keys update, explicit `null` deletes,
/// absent keys are preserved.
pub async fn patch_message_meta(
    conn: &mut PgConnection,
    message_id: MessageId,
    patch: &serde_json::Map<String, Value>,
) -> Result<MessageRow> {
    let row: Option<MessageRow> = sqlx::query_as("SELECT * FROM messages WHERE id = $1")
        .bind(message_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?;
    let row = row.ok_or_else(|| EngineError::not_found(format!("message {message_id} not found")))?;

    let mut meta = match row.meta {
        Some(Json(Value::Object(map))) => map,
        _ => serde_json::Map::new(),
    };
    for (key, value) in patch {
        if value.is_null() {
            meta.remove(key);
        } else {
            meta.insert(key.clone(), value.clone());
        }
    }

    let updated: MessageRow =
        sqlx::query_as("UPDATE messages SET meta = $1 WHERE id = $2 RETURNING *")
            .bind(Json(Value::Object(meta)))
            .bind(message_id.as_uuid())
            .fetch_one(conn)
            .await?;
    Ok(updated)
}

/// Recovery path: messages stuck in `running` longer than the processing
/// timeout go back to `pending` for redelivery.
pub async fn reap_stuck_running(conn: &mut PgConnection, older_than: Duration) -> Result<u64> {
    let cutoff = Utc::now() - chrono::Duration::seconds(older_than.as_secs() as i64);
    let result = sqlx::query(
        "UPDATE messages SET status = 'pending' WHERE status = 'running' AND created_at < $1",
    )
    .bind(cutoff)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// Apply the PATCH-meta merge rule to an in-memory map. Extracted so the
/// semantics are testable without a database.
pub fn merge_meta_patch(
    mut meta: serde_json::Map<String, Value>,
    patch: &serde_json::Map<String, Value>,
) -> serde_json::Map<String, Value> {
    for (key, value) in patch {
        if value.is_null() {
            meta.remove(key);
        } else {
            meta.insert(key.clone(), value.clone());
        }
    }
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_meta_patch_semantics() {
        let mut meta = serde_json::Map::new();
        meta.insert("keep".to_string(), json!("old"));
        meta.insert("update".to_string(), json!(1));
        meta.insert("drop".to_string(), json!(true));

        let mut patch = serde_json::Map::new();
        patch.insert("update".to_string(), json!(2));
        patch.insert("drop".to_string(), Value::Null);
        patch.insert("new".to_string(), json!("added"));

        let merged = merge_meta_patch(meta, &patch);
        assert_eq!(merged.get("keep"), Some(&json!("old")));
        assert_eq!(merged.get("update"), Some(&json!(2)));
        assert_eq!(merged.get("new"), Some(&json!("added")));
        assert!(!merged.contains_key("drop"));
    }

    #[test]
    fn test_row_to_blob() {
        let row = MessageRow {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            task_id: None,
            role: "assistant".to_string(),
            parts: Json(vec![MessagePart::Text {
                text: "hi".to_string(),
            }]),
            meta: None,
            status: "pending".to_string(),
            created_at: Utc::now(),
        };
        let blob = row.to_blob();
        assert_eq!(blob.role, MessageRole::Assistant);
        assert_eq!(blob.parts.len(), 1);
        assert!(blob.task_id.is_none());
    }
}
