//! Learning spaces
//!
//! A learning space is a per-project (or per-user) collection of skills plus
//! a ledger of learned sessions. Skills are referenced through a junction and
//! outlive membership changes.

use crate::error::{EngineError, Result};
use crate::storage::artifact::join_file_path;
use crate::types::{DiskId, LearningSessionStatus, LearningSpaceId, SessionId, SkillId, UserId};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

/// One learning space row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LearningSpaceRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Option<Uuid>,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LearningSpaceRow {
    pub fn space_id(&self) -> LearningSpaceId {
        LearningSpaceId::from(self.id)
    }

    pub fn user(&self) -> Option<UserId> {
        self.user_id.map(UserId::from)
    }
}

/// Session ledger junction row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LearningSpaceSessionRow {
    pub id: Uuid,
    pub learning_space_id: Uuid,
    pub session_id: Uuid,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LearningSpaceSessionRow {
    pub fn space_id(&self) -> LearningSpaceId {
        LearningSpaceId::from(self.learning_space_id)
    }
}

/// The skill summary the learner agent works from: name, description and the
/// skill's current file listing.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillInfo {
    pub id: SkillId,
    pub disk_id: DiskId,
    pub name: String,
    pub description: String,
    pub file_paths: Vec<String>,
}

/// The learning-space binding for a session, if any.
pub async fn get_learning_space_for_session(
    conn: &mut PgConnection,
    session_id: SessionId,
) -> Result<Option<LearningSpaceSessionRow>> {
    let row: Option<LearningSpaceSessionRow> =
        sqlx::query_as("SELECT * FROM learning_space_sessions WHERE session_id = $1")
            .bind(session_id.as_uuid())
            .fetch_optional(conn)
            .await?;
    Ok(row)
}

pub async fn get_learning_space(
    conn: &mut PgConnection,
    space_id: LearningSpaceId,
) -> Result<LearningSpaceRow> {
    let row: Option<LearningSpaceRow> =
        sqlx::query_as("SELECT * FROM learning_spaces WHERE id = $1")
            .bind(space_id.as_uuid())
            .fetch_optional(conn)
            .await?;
    row.ok_or_else(|| EngineError::not_found(format!("learning space {space_id} not found")))
}

/// Ids of all skills in a space.
pub async fn get_learning_space_skill_ids(
    conn: &mut PgConnection,
    space_id: LearningSpaceId,
) -> Result<Vec<SkillId>> {
    let ids: Vec<Uuid> =
        sqlx::query_scalar("SELECT skill_id FROM learning_space_skills WHERE learning_space_id = $1")
            .bind(space_id.as_uuid())
            .fetch_all(conn)
            .await?;
    Ok(ids.into_iter().map(SkillId::from).collect())
}

/// Batch-fetch skill summaries: one query for the skills, one for all their
/// disks' file listings.
pub async fn get_skills_info(
    conn: &mut PgConnection,
    skill_ids: &[SkillId],
) -> Result<Vec<SkillInfo>> {
    if skill_ids.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = skill_ids.iter().map(|s| *s.as_uuid()).collect();
    let skills: Vec<(Uuid, Uuid, String, String)> = sqlx::query_as(
        "SELECT id, disk_id, name, description FROM agent_skills WHERE id = ANY($1)",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let disk_ids: Vec<Uuid> = skills.iter().map(|(_, disk_id, _, _)| *disk_id).collect();
    let files: Vec<(Uuid, String, String)> = sqlx::query_as(
        "SELECT disk_id, path, filename FROM artifacts WHERE disk_id = ANY($1) ORDER BY path, filename",
    )
    .bind(&disk_ids)
    .fetch_all(conn)
    .await?;

    let mut files_by_disk: std::collections::HashMap<Uuid, Vec<String>> =
        std::collections::HashMap::new();
    for (disk_id, path, filename) in files {
        files_by_disk
            .entry(disk_id)
            .or_default()
            .push(join_file_path(&path, &filename));
    }

    Ok(skills
        .into_iter()
        .map(|(id, disk_id, name, description)| SkillInfo {
            id: SkillId::from(id),
            disk_id: DiskId::from(disk_id),
            name,
            description,
            file_paths: files_by_disk.remove(&disk_id).unwrap_or_default(),
        })
        .collect())
}

/// Add a skill to a space. Idempotent: an existing junction row is kept.
pub async fn add_skill_to_learning_space(
    conn: &mut PgConnection,
    space_id: LearningSpaceId,
    skill_id: SkillId,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO learning_space_skills (id, learning_space_id, skill_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (learning_space_id, skill_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(space_id.as_uuid())
    .bind(skill_id.as_uuid())
    .execute(conn)
    .await?;
    Ok(())
}

/// Advance the session ledger entry.
pub async fn update_session_status(
    conn: &mut PgConnection,
    session_id: SessionId,
    status: LearningSessionStatus,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE learning_space_sessions SET status = $1, updated_at = now() WHERE session_id = $2",
    )
    .bind(status.as_str())
    .bind(session_id.as_uuid())
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(EngineError::not_found(format!(
            "no learning space ledger entry for session {session_id}"
        )));
    }
    Ok(())
}
