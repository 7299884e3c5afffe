//! Agent skills
//!
//! A skill is a named bundle backed by one disk. The disk's top-level
//! `SKILL.md` carries YAML front matter whose `name` must sanitize to the
//! skill's name; the name is immutable after creation.

use crate::blob::BlobStore;
use crate::error::{EngineError, Result};
use crate::storage::artifact;
use crate::types::{DiskId, ProjectId, SkillId, UserId};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{json, Value};
use sqlx::types::Json;
use sqlx::PgConnection;
use std::sync::OnceLock;
use uuid::Uuid;

pub const SKILL_MD: &str = "SKILL.md";

/// One skill row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SkillRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Option<Uuid>,
    pub name: String,
    pub description: String,
    pub disk_id: Uuid,
    pub meta: Option<Json<Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SkillRow {
    pub fn skill_id(&self) -> SkillId {
        SkillId::from(self.id)
    }

    pub fn disk(&self) -> DiskId {
        DiskId::from(self.disk_id)
    }
}

/// Parse SKILL.md content: YAML between `---` delimiters when present,
/// otherwise the whole content is treated as YAML. Returns `(name,
/// description)`.
pub fn parse_skill_md(content: &str) -> Result<(String, String)> {
    if content.trim().is_empty() {
        return Err(EngineError::bad_request("SKILL.md content is empty"));
    }

    let lines: Vec<&str> = content.lines().collect();
    let mut delimiters = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.trim() == "---")
        .map(|(i, _)| i);
    let first = delimiters.next();
    let second = delimiters.next();

    let yaml_content = match (first, second) {
        (Some(a), Some(b)) => lines[a + 1..b].join("\n"),
        _ => content.to_string(),
    };

    let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml_content)
        .map_err(|e| EngineError::bad_request(format!("invalid YAML in SKILL.md: {e}")))?;
    let mapping = parsed
        .as_mapping()
        .ok_or_else(|| EngineError::bad_request("SKILL.md YAML front matter must be a mapping"))?;

    let get_string = |key: &str| -> Option<String> {
        mapping.get(key).and_then(|v| match v {
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    };

    let name = get_string("name")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EngineError::bad_request("SKILL.md is missing required field: name"))?;
    let description = get_string("description")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            EngineError::bad_request("SKILL.md is missing required field: description")
        })?;
    Ok((name, description))
}

/// Replace `/\:*?"<>|` and whitespace with hyphens.
pub fn sanitize_name(name: &str) -> String {
    static SANITIZE: OnceLock<Regex> = OnceLock::new();
    let re = SANITIZE.get_or_init(|| {
        Regex::new(r#"[/\\:*?"<>|\s]"#).expect("sanitize pattern is valid")
    });
    re.replace_all(name, "-").to_string()
}

pub async fn get_agent_skill(
    conn: &mut PgConnection,
    project_id: ProjectId,
    skill_id: SkillId,
) -> Result<SkillRow> {
    let row: Option<SkillRow> =
        sqlx::query_as("SELECT * FROM agent_skills WHERE id = $1 AND project_id = $2")
            .bind(skill_id.as_uuid())
            .bind(project_id.as_uuid())
            .fetch_optional(conn)
            .await?;
    row.ok_or_else(|| EngineError::not_found(format!("skill {skill_id} not found")))
}

/// Sync the skill's description after a SKILL.md edit.
pub async fn update_skill_description(
    conn: &mut PgConnection,
    skill_id: SkillId,
    description: &str,
) -> Result<()> {
    sqlx::query("UPDATE agent_skills SET description = $1, updated_at = now() WHERE id = $2")
        .bind(description)
        .bind(skill_id.as_uuid())
        .execute(conn)
        .await?;
    Ok(())
}

/// Create a skill from SKILL.md content: parse the front matter, sanitize the
/// name, allocate a disk, write `SKILL.md` as the disk's root artifact, then
/// create the skill row.
pub async fn create_skill(
    conn: &mut PgConnection,
    blob: &BlobStore,
    project_id: ProjectId,
    user_id: Option<UserId>,
    content: &str,
) -> Result<SkillRow> {
    let (raw_name, description) = parse_skill_md(content)?;
    let name = sanitize_name(&raw_name);

    let disk_id = artifact::create_disk(&mut *conn, project_id, user_id).await?;

    let asset_meta = blob.upload_text_asset(project_id, SKILL_MD, content).await?;
    let info_meta = json!({
        "__artifact_info__": {
            "path": "/",
            "filename": SKILL_MD,
            "mime": asset_meta.mime,
            "size": asset_meta.size_b,
        }
    });
    artifact::upsert(&mut *conn, disk_id, "/", SKILL_MD, &asset_meta, Some(&info_meta)).await?;

    let row: SkillRow = sqlx::query_as(
        r#"
        INSERT INTO agent_skills (id, project_id, user_id, name, description, disk_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(project_id.as_uuid())
    .bind(user_id.map(|u| *u.as_uuid()))
    .bind(&name)
    .bind(&description)
    .bind(disk_id.as_uuid())
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            EngineError::conflict(format!("skill '{name}' already exists"))
        }
        other => other.into(),
    })?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SKILL_CONTENT: &str = r#"---
name: reservation booking
description: Book restaurant reservations end to end
---

## Workflow
1. Search for candidates
"#;

    #[test]
    fn test_parse_front_matter() {
        let (name, description) = parse_skill_md(SKILL_CONTENT).unwrap();
        assert_eq!(name, "reservation booking");
        assert_eq!(description, "Book restaurant reservations end to end");
    }

    #[test]
    fn test_parse_without_delimiters_treats_all_as_yaml() {
        let content = "name: api-patterns\ndescription: API error handling\n";
        let (name, description) = parse_skill_md(content).unwrap();
        assert_eq!(name, "api-patterns");
        assert_eq!(description, "API error handling");
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        assert!(parse_skill_md("").is_err());
        assert!(parse_skill_md("---\nname: only-name\n---\n").is_err());
        assert!(parse_skill_md("---\ndescription: no name\n---\n").is_err());
        assert!(parse_skill_md("---\n- not\n- a\n- mapping\n---\n").is_err());
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("reservation booking"), "reservation-booking");
        assert_eq!(sanitize_name("a/b\\c:d*e?f\"g<h>i|j"), "a-b-c-d-e-f-g-h-i-j");
        assert_eq!(sanitize_name("already-clean"), "already-clean");
    }

    #[test]
    fn test_sanitized_name_round_trips_through_front_matter() {
        let (name, _) = parse_skill_md(SKILL_CONTENT).unwrap();
        assert_eq!(sanitize_name(&name), "reservation-booking");
    }
}
