//! Artifact store (content-addressed file store)
//!
//! Artifacts are addressed by `(disk, path, filename)`. Text content lives
//! inline in `asset_meta.content` with the external blob as the durable copy;
//! binary artifacts carry only the blob reference. Upserts are keyed on the
//! address triple and preserve `id`/`created_at` across updates.

use crate::blob::AssetMeta;
use crate::error::{EngineError, Result};
use crate::types::{DiskId, ProjectId, UserId};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgConnection;
use uuid::Uuid;

/// One artifact row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArtifactRow {
    pub id: Uuid,
    pub disk_id: Uuid,
    pub path: String,
    pub filename: String,
    pub asset_meta: Json<AssetMeta>,
    pub meta: Option<Json<Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ArtifactRow {
    /// Display path: `/` collapses away for top-level files.
    pub fn file_path(&self) -> String {
        join_file_path(&self.path, &self.filename)
    }

    /// Inline text content, when present.
    pub fn content(&self) -> Option<&str> {
        self.asset_meta.0.content.as_deref()
    }
}

/// Join `(path, filename)` into a display file path.
pub fn join_file_path(path: &str, filename: &str) -> String {
    if path == "/" {
        filename.to_string()
    } else {
        format!("{path}{filename}").trim_start_matches('/').to_string()
    }
}

/// Convert a glob pattern to a SQL LIKE pattern.
///
/// `**` must be replaced before `*` to avoid double replacement.
pub fn glob_to_like(pattern: &str) -> String {
    pattern
        .replace("**", "%")
        .replace('*', "%")
        .replace('?', "_")
}

/// Create an artifact container owned by a project (and optionally a user).
pub async fn create_disk(
    conn: &mut PgConnection,
    project_id: ProjectId,
    user_id: Option<UserId>,
) -> Result<DiskId> {
    let id = DiskId::new();
    sqlx::query("INSERT INTO disks (id, project_id, user_id) VALUES ($1, $2, $3)")
        .bind(id.as_uuid())
        .bind(project_id.as_uuid())
        .bind(user_id.map(|u| *u.as_uuid()))
        .execute(conn)
        .await?;
    Ok(id)
}

/// Fetch one artifact; `NotFound` when absent.
pub async fn get(
    conn: &mut PgConnection,
    disk_id: DiskId,
    path: &str,
    filename: &str,
) -> Result<ArtifactRow> {
    let row: Option<ArtifactRow> = sqlx::query_as(
        "SELECT * FROM artifacts WHERE disk_id = $1 AND path = $2 AND filename = $3",
    )
    .bind(disk_id.as_uuid())
    .bind(path)
    .bind(filename)
    .fetch_optional(conn)
    .await?;
    row.ok_or_else(|| {
        EngineError::not_found(format!(
            "artifact not found: disk={disk_id}, path={path}, filename={filename}"
        ))
    })
}

pub async fn exists(
    conn: &mut PgConnection,
    disk_id: DiskId,
    path: &str,
    filename: &str,
) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM artifacts WHERE disk_id = $1 AND path = $2 AND filename = $3",
    )
    .bind(disk_id.as_uuid())
    .bind(path)
    .bind(filename)
    .fetch_one(conn)
    .await?;
    Ok(count > 0)
}

/// Enumerate a disk's artifacts; empty/absent path means all.
pub async fn list(
    conn: &mut PgConnection,
    disk_id: DiskId,
    path: Option<&str>,
) -> Result<Vec<ArtifactRow>> {
    let rows: Vec<ArtifactRow> = match path.filter(|p| !p.is_empty()) {
        Some(p) => {
            sqlx::query_as(
                "SELECT * FROM artifacts WHERE disk_id = $1 AND path = $2 ORDER BY path, filename",
            )
            .bind(disk_id.as_uuid())
            .bind(p)
            .fetch_all(conn)
            .await?
        }
        None => {
            sqlx::query_as("SELECT * FROM artifacts WHERE disk_id = $1 ORDER BY path, filename")
                .bind(disk_id.as_uuid())
                .fetch_all(conn)
                .await?
        }
    };
    Ok(rows)
}

/// Glob over `path ‖ filename`.
pub async fn glob(
    conn: &mut PgConnection,
    disk_id: DiskId,
    pattern: &str,
) -> Result<Vec<ArtifactRow>> {
    let like = glob_to_like(pattern);
    let rows: Vec<ArtifactRow> = sqlx::query_as(
        r#"
        SELECT * FROM artifacts
        WHERE disk_id = $1 AND (path || filename) LIKE $2
        ORDER BY path, filename
        "#,
    )
    .bind(disk_id.as_uuid())
    .bind(like)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Server-side regex search over inline text content.
///
/// Only text-searchable MIME types (`text/*`, `application/json`,
/// `application/x-*`) with inline content participate.
pub async fn grep(
    conn: &mut PgConnection,
    disk_id: DiskId,
    pattern: &str,
    case_sensitive: bool,
) -> Result<Vec<ArtifactRow>> {
    let operator = if case_sensitive { "~" } else { "~*" };
    let query = format!(
        r#"
        SELECT * FROM artifacts
        WHERE disk_id = $1
          AND asset_meta->>'content' IS NOT NULL
          AND (
            asset_meta->>'mime' LIKE 'text/%'
            OR asset_meta->>'mime' = 'application/json'
            OR asset_meta->>'mime' LIKE 'application/x-%'
          )
          AND asset_meta->>'content' {operator} $2
        ORDER BY path, filename
        "#
    );
    let rows: Vec<ArtifactRow> = sqlx::query_as(&query)
        .bind(disk_id.as_uuid())
        .bind(pattern)
        .fetch_all(conn)
        .await?;
    Ok(rows)
}

/// Insert-or-update keyed on `(disk, path, filename)`.
///
/// Updates preserve `id` and `created_at`; `meta` is overwritten, not merged.
pub async fn upsert(
    conn: &mut PgConnection,
    disk_id: DiskId,
    path: &str,
    filename: &str,
    asset_meta: &AssetMeta,
    meta: Option<&Value>,
) -> Result<ArtifactRow> {
    let row: ArtifactRow = sqlx::query_as(
        r#"
        INSERT INTO artifacts (id, disk_id, path, filename, asset_meta, meta)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (disk_id, path, filename) DO UPDATE SET
            asset_meta = EXCLUDED.asset_meta,
            meta = EXCLUDED.meta,
            updated_at = now()
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(disk_id.as_uuid())
    .bind(path)
    .bind(filename)
    .bind(Json(asset_meta))
    .bind(meta.map(|m| Json(m.clone())))
    .fetch_one(conn)
    .await?;
    Ok(row)
}

/// Rename/move an artifact within its disk. The destination must be absent.
pub async fn rename(
    conn: &mut PgConnection,
    disk_id: DiskId,
    src_path: &str,
    src_filename: &str,
    dst_path: &str,
    dst_filename: &str,
) -> Result<()> {
    if exists(conn, disk_id, dst_path, dst_filename).await? {
        return Err(EngineError::conflict(format!(
            "destination already exists: {dst_path}{dst_filename}"
        )));
    }
    let result = sqlx::query(
        r#"
        UPDATE artifacts SET path = $4, filename = $5, updated_at = now()
        WHERE disk_id = $1 AND path = $2 AND filename = $3
        "#,
    )
    .bind(disk_id.as_uuid())
    .bind(src_path)
    .bind(src_filename)
    .bind(dst_path)
    .bind(dst_filename)
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(EngineError::not_found(format!(
            "artifact not found: disk={disk_id}, path={src_path}, filename={src_filename}"
        )));
    }
    Ok(())
}

/// Delete one artifact; `NotFound` when absent so callers that care can tell.
pub async fn delete(
    conn: &mut PgConnection,
    disk_id: DiskId,
    path: &str,
    filename: &str,
) -> Result<()> {
    let result =
        sqlx::query("DELETE FROM artifacts WHERE disk_id = $1 AND path = $2 AND filename = $3")
            .bind(disk_id.as_uuid())
            .bind(path)
            .bind(filename)
            .execute(conn)
            .await?;
    if result.rows_affected() == 0 {
        return Err(EngineError::not_found(format!(
            "artifact not found: disk={disk_id}, path={path}, filename={filename}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_to_like() {
        assert_eq!(glob_to_like("**/*.md"), "%/%.md");
        assert_eq!(glob_to_like("scripts/*.py"), "scripts/%.py");
        assert_eq!(glob_to_like("file?.txt"), "file_.txt");
        assert_eq!(glob_to_like("plain.md"), "plain.md");
    }

    #[test]
    fn test_join_file_path() {
        assert_eq!(join_file_path("/", "SKILL.md"), "SKILL.md");
        assert_eq!(join_file_path("scripts/", "main.py"), "scripts/main.py");
        assert_eq!(join_file_path("/docs/", "a.md"), "docs/a.md");
    }
}
