//! Daily-bucketed metric counters
//!
//! One row per `(project, tag, UTC day)`. Multiple workers may race to create
//! today's bucket, so creation is serialized behind a transaction-scoped
//! Postgres advisory lock keyed on a stable hash of the triple; the hot path
//! (incrementing an existing bucket) is a single server-side `UPDATE` and
//! never contends on the advisory lock across days.

use crate::error::Result;
use crate::types::ProjectId;
use chrono::{NaiveDate, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

/// Stable signed 64-bit advisory-lock key for a bucket triple.
fn bucket_lock_key(project_id: ProjectId, tag: &str, day: NaiveDate) -> i64 {
    let digest = Sha256::digest(format!("{project_id}:{tag}:{day}").as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// Atomically add `delta` to today's bucket, creating it if needed.
///
/// `delta` may be negative (sandbox keep-alive reclaims on kill).
pub async fn capture_increment(
    pool: &PgPool,
    project_id: ProjectId,
    tag: &str,
    delta: i64,
) -> Result<()> {
    let today = Utc::now().date_naive();
    let lock_key = bucket_lock_key(project_id, tag, today);

    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(lock_key)
        .execute(&mut *tx)
        .await?;

    let existing: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM metrics
        WHERE project_id = $1 AND tag = $2
          AND (created_at AT TIME ZONE 'UTC')::date = $3
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(project_id.as_uuid())
    .bind(tag)
    .bind(today)
    .fetch_optional(&mut *tx)
    .await?;

    let metric_id = match existing {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO metrics (id, project_id, tag, increment) VALUES ($1, $2, $3, 0)",
            )
            .bind(id)
            .bind(project_id.as_uuid())
            .bind(tag)
            .execute(&mut *tx)
            .await?;
            debug!(%project_id, tag, %today, "created metric bucket");
            id
        }
    };

    sqlx::query("UPDATE metrics SET increment = increment + $1 WHERE id = $2")
        .bind(delta)
        .bind(metric_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Read today's bucket value; 0 when no bucket exists yet.
pub async fn get_today_value(pool: &PgPool, project_id: ProjectId, tag: &str) -> Result<i64> {
    let today = Utc::now().date_naive();
    let value: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(increment), 0)::bigint FROM metrics
        WHERE project_id = $1 AND tag = $2
          AND (created_at AT TIME ZONE 'UTC')::date = $3
        "#,
    )
    .bind(project_id.as_uuid())
    .bind(tag)
    .bind(today)
    .fetch_one(pool)
    .await?;
    Ok(value.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_is_stable() {
        let project = ProjectId::new();
        let day = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        let a = bucket_lock_key(project, "new-task-created", day);
        let b = bucket_lock_key(project, "new-task-created", day);
        assert_eq!(a, b);
    }

    #[test]
    fn test_lock_key_varies_by_triple() {
        let project = ProjectId::new();
        let day = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        let next_day = NaiveDate::from_ymd_opt(2026, 8, 2).unwrap();

        let base = bucket_lock_key(project, "a", day);
        assert_ne!(base, bucket_lock_key(project, "b", day));
        assert_ne!(base, bucket_lock_key(project, "a", next_day));
        assert_ne!(base, bucket_lock_key(ProjectId::new(), "a", day));
    }
}
