//! Skill-learner agent
//!
//! Consumes the distilled task analysis and edits the learning space's skills
//! through a skill-scoped tool surface. Every mutation requires a prior
//! `report_thinking` call; the flag survives transaction-scope rebuilds in
//! the scope's persistent state, as does the skill inventory the agent sees.

use crate::agent::prompts;
use crate::agent::{
    finish_schema, AgentLoop, AgentScope, LoopOutcome, ToolHandler, ToolPool,
    REPORT_THINKING_TOOL,
};
use crate::blob::BlobStore;
use crate::error::{EngineError, ErrorCode, Result};
use crate::llm::{LlmProvider, ToolSchema};
use crate::storage::artifact::{self, join_file_path};
use crate::storage::learning_space::{self, SkillInfo};
use crate::storage::skill::{self, SKILL_MD};
use crate::types::{LearningSpaceId, ProjectId, UserId};
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const THINKING_REQUIRED: &str = "You must call report_thinking before making edits.";

/// Validate a skill file path: relative, no parent traversal.
pub fn validate_file_path(file_path: &str) -> Option<String> {
    if file_path.contains("..") {
        return Some("Path traversal (..) is not allowed.".to_string());
    }
    if file_path.starts_with('/') {
        return Some("Absolute paths are not allowed.".to_string());
    }
    None
}

/// Split `"scripts/main.py"` into `("scripts/", "main.py")`; top-level files
/// live under `"/"`.
pub fn split_file_path(file_path: &str) -> (String, String) {
    match file_path.rsplit_once('/') {
        Some((dir, filename)) => (format!("{dir}/"), filename.to_string()),
        None => ("/".to_string(), file_path.to_string()),
    }
}

/// Loop-scoped context. `skills` and the thinking flag are copied in from
/// scope state and folded back on commit.
pub struct SkillLearnerCtx {
    tx: Transaction<'static, Postgres>,
    blob: BlobStore,
    project_id: ProjectId,
    learning_space_id: LearningSpaceId,
    user_id: Option<UserId>,
    skills: HashMap<String, SkillInfo>,
    has_reported_thinking: bool,
}

/// Scope: transaction per iteration plus persistent agent state.
pub struct SkillLearnerScope {
    pool: PgPool,
    blob: BlobStore,
    project_id: ProjectId,
    learning_space_id: LearningSpaceId,
    user_id: Option<UserId>,
    skills: HashMap<String, SkillInfo>,
    has_reported_thinking: bool,
}

#[async_trait]
impl AgentScope for SkillLearnerScope {
    type Ctx = SkillLearnerCtx;

    async fn begin(&mut self) -> Result<SkillLearnerCtx> {
        let tx = self.pool.begin().await?;
        Ok(SkillLearnerCtx {
            tx,
            blob: self.blob.clone(),
            project_id: self.project_id,
            learning_space_id: self.learning_space_id,
            user_id: self.user_id,
            skills: self.skills.clone(),
            has_reported_thinking: self.has_reported_thinking,
        })
    }

    async fn commit(&mut self, ctx: SkillLearnerCtx) -> Result<()> {
        let SkillLearnerCtx {
            tx,
            skills,
            has_reported_thinking,
            ..
        } = ctx;
        tx.commit().await?;
        self.skills = skills;
        self.has_reported_thinking = has_reported_thinking;
        Ok(())
    }
}

fn soften(err: EngineError) -> Result<String> {
    match err.code() {
        ErrorCode::NotFound
        | ErrorCode::BadRequest
        | ErrorCode::Conflict
        | ErrorCode::Forbidden => Ok(err.to_string()),
        _ => Err(err),
    }
}

fn arg_str<'a>(arguments: &'a Value, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

struct ReportThinkingTool;

#[async_trait]
impl ToolHandler<SkillLearnerCtx> for ReportThinkingTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            REPORT_THINKING_TOOL,
            "Report your reasoning before modifying skills: the key learning, related skills, and whether to update or create. Required before any edit.",
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

    async fn handle(&self, ctx: &mut SkillLearnerCtx, _arguments: Value) -> Result<String> {
        ctx.has_reported_thinking = true;
        Ok("Thinking recorded.".to_string())
    }
}

struct GetSkillTool;

#[async_trait]
impl ToolHandler<SkillLearnerCtx> for GetSkillTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "get_skill",
            "Get skill info including its description and file list.",
            json!({
                "type": "object",
                "properties": {
                    "skill_name": {
                        "type": "string",
                        "description": "The name of the skill to inspect.",
                    },
                },
                "required": ["skill_name"],
            }),
        )
    }

    async fn handle(&self, ctx: &mut SkillLearnerCtx, arguments: Value) -> Result<String> {
        let Some(skill_name) = arg_str(&arguments, "skill_name") else {
            return Ok("You must provide a skill_name argument.".into());
        };
        let Some(info) = ctx.skills.get(skill_name) else {
            let available = ctx.skills.keys().cloned().collect::<Vec<_>>().join(", ");
            return Ok(format!(
                "Skill '{skill_name}' not found. Available skills: {available}"
            ));
        };
        let files = info
            .file_paths
            .iter()
            .map(|fp| format!("  - {fp}"))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(format!(
            "Skill: {}\nDescription: {}\nFiles:\n{files}",
            info.name, info.description
        ))
    }
}

struct GetSkillFileTool;

#[async_trait]
impl ToolHandler<SkillLearnerCtx> for GetSkillFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "get_skill_file",
            "Read the content of a file in a skill.",
            json!({
                "type": "object",
                "properties": {
                    "skill_name": {
                        "type": "string",
                        "description": "The name of the skill.",
                    },
                    "file_path": {
                        "type": "string",
                        "description": "The file path within the skill (e.g., 'SKILL.md', 'scripts/main.py').",
                    },
                },
                "required": ["skill_name", "file_path"],
            }),
        )
    }

    async fn handle(&self, ctx: &mut SkillLearnerCtx, arguments: Value) -> Result<String> {
        let (Some(skill_name), Some(file_path)) = (
            arg_str(&arguments, "skill_name"),
            arg_str(&arguments, "file_path"),
        ) else {
            return Ok("You must provide both skill_name and file_path arguments.".into());
        };
        if let Some(reason) = validate_file_path(file_path) {
            return Ok(reason);
        }
        let Some(info) = ctx.skills.get(skill_name) else {
            return Ok(format!("Skill '{skill_name}' not found."));
        };
        let disk_id = info.disk_id;
        let (path, filename) = split_file_path(file_path);
        match artifact::get(&mut ctx.tx, disk_id, &path, &filename).await {
            Ok(row) => Ok(row.content().unwrap_or_default().to_string()),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(format!(
                "File '{file_path}' not found in skill '{skill_name}'."
            )),
            Err(e) => Err(e),
        }
    }
}

struct StrReplaceSkillFileTool;

#[async_trait]
impl ToolHandler<SkillLearnerCtx> for StrReplaceSkillFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "str_replace_skill_file",
            "Edit a file in a skill by replacing a string. The old_string must appear exactly once in the file.",
            json!({
                "type": "object",
                "properties": {
                    "skill_name": {
                        "type": "string",
                        "description": "The name of the skill.",
                    },
                    "file_path": {
                        "type": "string",
                        "description": "The file path within the skill.",
                    },
                    "old_string": {
                        "type": "string",
                        "description": "The exact string to find and replace.",
                    },
                    "new_string": {
                        "type": "string",
                        "description": "The replacement string.",
                    },
                },
                "required": ["skill_name", "file_path", "old_string", "new_string"],
            }),
        )
    }

    async fn handle(&self, ctx: &mut SkillLearnerCtx, arguments: Value) -> Result<String> {
        if !ctx.has_reported_thinking {
            return Ok(THINKING_REQUIRED.into());
        }
        let skill_name = arg_str(&arguments, "skill_name");
        let file_path = arg_str(&arguments, "file_path");
        let old_string = arguments.get("old_string").and_then(Value::as_str);
        let new_string = arguments.get("new_string").and_then(Value::as_str);
        let (Some(skill_name), Some(file_path), Some(old_string), Some(new_string)) =
            (skill_name, file_path, old_string, new_string)
        else {
            return Ok(
                "You must provide skill_name, file_path, old_string, and new_string arguments."
                    .into(),
            );
        };
        if let Some(reason) = validate_file_path(file_path) {
            return Ok(reason);
        }
        let Some(info) = ctx.skills.get(skill_name) else {
            return Ok(format!("Skill '{skill_name}' not found."));
        };
        let disk_id = info.disk_id;
        let skill_id = info.id;
        let current_name = info.name.clone();

        let (path, filename) = split_file_path(file_path);
        let existing = match artifact::get(&mut ctx.tx, disk_id, &path, &filename).await {
            Ok(row) => row,
            Err(e) if e.code() == ErrorCode::NotFound => {
                return Ok(format!(
                    "File '{file_path}' not found in skill '{skill_name}'."
                ))
            }
            Err(e) => return Err(e),
        };

        let content = existing.content().unwrap_or_default().to_string();
        let count = content.matches(old_string).count();
        if count == 0 {
            return Ok(format!(
                "old_string not found in '{file_path}'. Make sure it matches exactly."
            ));
        }
        if count > 1 {
            return Ok(format!(
                "old_string found {count} times in '{file_path}'. Provide more context to make it unique."
            ));
        }
        let new_content = content.replacen(old_string, new_string, 1);

        // SKILL.md edits must keep valid front matter and may never change
        // the skill's name
        let mut parsed_description = None;
        if filename == SKILL_MD {
            let (parsed_name, description) = match skill::parse_skill_md(&new_content) {
                Ok(parsed) => parsed,
                Err(e) => return Ok(format!("Edit rejected: {e}")),
            };
            if skill::sanitize_name(&parsed_name) != current_name {
                return Ok(format!(
                    "Edit rejected: changing skill name is forbidden (was '{current_name}', got '{parsed_name}')"
                ));
            }
            parsed_description = Some(description);
        }

        let asset_meta = ctx
            .blob
            .upload_text_asset(ctx.project_id, &filename, &new_content)
            .await?;
        let mut merged_meta = match existing.meta {
            Some(meta) => meta.0.as_object().cloned().unwrap_or_default(),
            None => serde_json::Map::new(),
        };
        merged_meta.insert(
            "__artifact_info__".to_string(),
            json!({
                "path": path,
                "filename": filename,
                "mime": asset_meta.mime,
                "size": asset_meta.size_b,
            }),
        );
        if let Err(e) = artifact::upsert(
            &mut ctx.tx,
            disk_id,
            &path,
            &filename,
            &asset_meta,
            Some(&Value::Object(merged_meta)),
        )
        .await
        {
            return soften(e);
        }

        // Sync the description only after the artifact write succeeded
        if let Some(description) = parsed_description {
            skill::update_skill_description(&mut ctx.tx, skill_id, &description).await?;
            if let Some(info) = ctx.skills.get_mut(skill_name) {
                info.description = description;
            }
        }

        Ok(format!(
            "File '{file_path}' in skill '{skill_name}' updated successfully."
        ))
    }
}

struct CreateSkillFileTool;

#[async_trait]
impl ToolHandler<SkillLearnerCtx> for CreateSkillFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "create_skill_file",
            "Create a new file in an existing skill. Cannot create SKILL.md (use str_replace_skill_file to edit it).",
            json!({
                "type": "object",
                "properties": {
                    "skill_name": {
                        "type": "string",
                        "description": "The name of the skill.",
                    },
                    "file_path": {
                        "type": "string",
                        "description": "The file path to create (e.g., 'scripts/main.py').",
                    },
                    "content": {
                        "type": "string",
                        "description": "The content of the new file.",
                    },
                },
                "required": ["skill_name", "file_path", "content"],
            }),
        )
    }

    async fn handle(&self, ctx: &mut SkillLearnerCtx, arguments: Value) -> Result<String> {
        if !ctx.has_reported_thinking {
            return Ok(THINKING_REQUIRED.into());
        }
        let skill_name = arg_str(&arguments, "skill_name");
        let file_path = arg_str(&arguments, "file_path");
        let content = arguments.get("content").and_then(Value::as_str);
        let (Some(skill_name), Some(file_path), Some(content)) = (skill_name, file_path, content)
        else {
            return Ok("You must provide skill_name, file_path, and content arguments.".into());
        };
        if let Some(reason) = validate_file_path(file_path) {
            return Ok(reason);
        }
        let (path, filename) = split_file_path(file_path);
        if filename == SKILL_MD {
            return Ok(
                "Cannot create SKILL.md — it already exists. Use str_replace_skill_file to edit it."
                    .into(),
            );
        }
        let Some(info) = ctx.skills.get(skill_name) else {
            return Ok(format!("Skill '{skill_name}' not found."));
        };
        let disk_id = info.disk_id;

        if artifact::exists(&mut ctx.tx, disk_id, &path, &filename).await? {
            return Ok(format!(
                "File '{file_path}' already exists in skill '{skill_name}'. Use str_replace_skill_file to edit it."
            ));
        }

        let asset_meta = ctx
            .blob
            .upload_text_asset(ctx.project_id, &filename, content)
            .await?;
        let info_meta = json!({
            "__artifact_info__": {
                "path": path,
                "filename": filename,
                "mime": asset_meta.mime,
                "size": asset_meta.size_b,
            }
        });
        if let Err(e) =
            artifact::upsert(&mut ctx.tx, disk_id, &path, &filename, &asset_meta, Some(&info_meta))
                .await
        {
            return soften(e);
        }

        if let Some(info) = ctx.skills.get_mut(skill_name) {
            let display = join_file_path(&path, &filename);
            if !info.file_paths.contains(&display) {
                info.file_paths.push(display);
            }
        }
        Ok(format!("File '{file_path}' created in skill '{skill_name}'."))
    }
}

struct CreateSkillTool;

#[async_trait]
impl ToolHandler<SkillLearnerCtx> for CreateSkillTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "create_skill",
            "Create a brand new skill in the learning space. Provide the full SKILL.md content with valid YAML front matter (name and description fields).",
            json!({
                "type": "object",
                "properties": {
                    "skill_md_content": {
                        "type": "string",
                        "description": "The full content of SKILL.md with YAML front matter containing 'name' and 'description' fields.",
                    },
                },
                "required": ["skill_md_content"],
            }),
        )
    }

    async fn handle(&self, ctx: &mut SkillLearnerCtx, arguments: Value) -> Result<String> {
        if !ctx.has_reported_thinking {
            return Ok(THINKING_REQUIRED.into());
        }
        let Some(content) = arg_str(&arguments, "skill_md_content") else {
            return Ok("You must provide skill_md_content argument.".into());
        };

        let blob = ctx.blob.clone();
        let created = match skill::create_skill(
            &mut ctx.tx,
            &blob,
            ctx.project_id,
            ctx.user_id,
            content,
        )
        .await
        {
            Ok(row) => row,
            Err(e) => {
                return match soften(e) {
                    Ok(reason) => Ok(format!("Failed to create skill: {reason}")),
                    Err(e) => Err(e),
                }
            }
        };

        learning_space::add_skill_to_learning_space(
            &mut ctx.tx,
            ctx.learning_space_id,
            created.skill_id(),
        )
        .await?;

        let artifacts = artifact::list(&mut ctx.tx, created.disk(), None).await?;
        let file_paths = artifacts.iter().map(|a| a.file_path()).collect();

        let name = created.name.clone();
        ctx.skills.insert(
            name.clone(),
            SkillInfo {
                id: created.skill_id(),
                disk_id: created.disk(),
                name: name.clone(),
                description: created.description.clone(),
                file_paths,
            },
        );

        Ok(format!(
            "Skill '{name}' created and added to learning space. You can now use get_skill_file to read or str_replace_skill_file to edit its files."
        ))
    }
}

struct MvSkillFileTool;

#[async_trait]
impl ToolHandler<SkillLearnerCtx> for MvSkillFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "mv_skill_file",
            "Move or rename a file within a skill. Cannot move SKILL.md.",
            json!({
                "type": "object",
                "properties": {
                    "skill_name": {
                        "type": "string",
                        "description": "The name of the skill.",
                    },
                    "source_path": {
                        "type": "string",
                        "description": "Current file path (e.g., 'old-name.md' or 'docs/old.md').",
                    },
                    "destination_path": {
                        "type": "string",
                        "description": "New file path (e.g., 'new-name.md' or 'notes/new.md').",
                    },
                },
                "required": ["skill_name", "source_path", "destination_path"],
            }),
        )
    }

    async fn handle(&self, ctx: &mut SkillLearnerCtx, arguments: Value) -> Result<String> {
        if !ctx.has_reported_thinking {
            return Ok(THINKING_REQUIRED.into());
        }
        let (Some(skill_name), Some(source_path), Some(destination_path)) = (
            arg_str(&arguments, "skill_name"),
            arg_str(&arguments, "source_path"),
            arg_str(&arguments, "destination_path"),
        ) else {
            return Ok(
                "You must provide skill_name, source_path, and destination_path arguments.".into(),
            );
        };
        if source_path == destination_path {
            return Ok("source_path and destination_path are the same.".into());
        }
        for candidate in [source_path, destination_path] {
            if let Some(reason) = validate_file_path(candidate) {
                return Ok(reason);
            }
        }

        let (src_dir, src_file) = split_file_path(source_path);
        if src_file == SKILL_MD {
            return Ok("Cannot move SKILL.md — it is required at its current location.".into());
        }
        let (dst_dir, dst_file) = split_file_path(destination_path);
        if dst_file == SKILL_MD {
            return Ok("Cannot overwrite SKILL.md — use str_replace_skill_file to edit it.".into());
        }

        let Some(info) = ctx.skills.get(skill_name) else {
            return Ok(format!("Skill '{skill_name}' not found."));
        };
        let disk_id = info.disk_id;

        match artifact::rename(&mut ctx.tx, disk_id, &src_dir, &src_file, &dst_dir, &dst_file).await
        {
            Ok(()) => {}
            Err(e) if e.code() == ErrorCode::NotFound => {
                return Ok(format!(
                    "Source file '{source_path}' not found in skill '{skill_name}'."
                ))
            }
            Err(e) if e.code() == ErrorCode::Conflict => {
                return Ok(format!(
                    "Destination '{destination_path}' already exists in skill '{skill_name}'."
                ))
            }
            Err(e) => return Err(e),
        }

        if let Some(info) = ctx.skills.get_mut(skill_name) {
            info.file_paths.retain(|fp| fp != source_path);
            if !info.file_paths.contains(&destination_path.to_string()) {
                info.file_paths.push(destination_path.to_string());
            }
        }
        Ok(format!(
            "File moved: '{source_path}' -> '{destination_path}' in skill '{skill_name}'."
        ))
    }
}

struct DeleteSkillFileTool;

#[async_trait]
impl ToolHandler<SkillLearnerCtx> for DeleteSkillFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "delete_skill_file",
            "Delete a file from a skill. Cannot delete SKILL.md.",
            json!({
                "type": "object",
                "properties": {
                    "skill_name": {
                        "type": "string",
                        "description": "The name of the skill.",
                    },
                    "file_path": {
                        "type": "string",
                        "description": "The file path to delete.",
                    },
                },
                "required": ["skill_name", "file_path"],
            }),
        )
    }

    async fn handle(&self, ctx: &mut SkillLearnerCtx, arguments: Value) -> Result<String> {
        if !ctx.has_reported_thinking {
            return Ok(THINKING_REQUIRED.into());
        }
        let (Some(skill_name), Some(file_path)) = (
            arg_str(&arguments, "skill_name"),
            arg_str(&arguments, "file_path"),
        ) else {
            return Ok("You must provide skill_name and file_path arguments.".into());
        };
        if let Some(reason) = validate_file_path(file_path) {
            return Ok(reason);
        }
        let (path, filename) = split_file_path(file_path);
        if filename == SKILL_MD {
            return Ok("Cannot delete SKILL.md — it is required for the skill to exist.".into());
        }
        let Some(info) = ctx.skills.get(skill_name) else {
            return Ok(format!("Skill '{skill_name}' not found."));
        };
        let disk_id = info.disk_id;

        match artifact::delete(&mut ctx.tx, disk_id, &path, &filename).await {
            Ok(()) => {}
            Err(e) => {
                return match soften(e) {
                    Ok(reason) => Ok(format!("Failed to delete file: {reason}")),
                    Err(e) => Err(e),
                }
            }
        }

        if let Some(info) = ctx.skills.get_mut(skill_name) {
            info.file_paths.retain(|fp| fp != file_path);
        }
        Ok(format!("File '{file_path}' deleted from skill '{skill_name}'."))
    }
}

/// The learner's fixed tool surface.
pub fn skill_learner_tool_pool() -> ToolPool<SkillLearnerCtx> {
    let mut pool = ToolPool::new();
    pool.register(Arc::new(GetSkillTool));
    pool.register(Arc::new(GetSkillFileTool));
    pool.register(Arc::new(StrReplaceSkillFileTool));
    pool.register(Arc::new(CreateSkillFileTool));
    pool.register(Arc::new(CreateSkillTool));
    pool.register(Arc::new(MvSkillFileTool));
    pool.register(Arc::new(DeleteSkillFileTool));
    pool.register(Arc::new(ReportThinkingTool));
    pool.register_schema_only(finish_schema());
    pool
}

/// Run the skill-learner agent over a distilled analysis block.
#[allow(clippy::too_many_arguments)]
pub async fn run_skill_learner(
    pool: &PgPool,
    blob: &BlobStore,
    provider: &dyn LlmProvider,
    project_id: ProjectId,
    learning_space_id: LearningSpaceId,
    user_id: Option<UserId>,
    skills_info: Vec<SkillInfo>,
    distilled_context: &str,
    max_iterations: usize,
    llm_timeout: Duration,
) -> Result<LoopOutcome> {
    let available_skills = if skills_info.is_empty() {
        "(No skills in this learning space yet)".to_string()
    } else {
        skills_info
            .iter()
            .map(|s| format!("- **{}**: {}", s.name, s.description))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let input = prompts::pack_skill_learner_input(distilled_context, &available_skills);

    let skills: HashMap<String, SkillInfo> = skills_info
        .into_iter()
        .map(|info| (info.name.clone(), info))
        .collect();

    let tools = skill_learner_tool_pool();
    let mut scope = SkillLearnerScope {
        pool: pool.clone(),
        blob: blob.clone(),
        project_id,
        learning_space_id,
        user_id,
        skills,
        has_reported_thinking: false,
    };

    let agent = AgentLoop {
        provider,
        system_prompt: prompts::SKILL_LEARNER_SYSTEM_PROMPT,
        tools: &tools,
        max_iterations,
        max_tokens: 4096,
        llm_timeout,
    };
    agent.run(&mut scope, input).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_file_path() {
        assert_eq!(
            validate_file_path("../etc/passwd"),
            Some("Path traversal (..) is not allowed.".to_string())
        );
        assert_eq!(
            validate_file_path("/etc/passwd"),
            Some("Absolute paths are not allowed.".to_string())
        );
        assert!(validate_file_path("scripts/main.py").is_none());
        assert!(validate_file_path("SKILL.md").is_none());
    }

    #[test]
    fn test_split_file_path() {
        assert_eq!(
            split_file_path("scripts/main.py"),
            ("scripts/".to_string(), "main.py".to_string())
        );
        assert_eq!(
            split_file_path("SKILL.md"),
            ("/".to_string(), "SKILL.md".to_string())
        );
        assert_eq!(
            split_file_path("docs/notes/a.md"),
            ("docs/notes/".to_string(), "a.md".to_string())
        );
    }

    #[test]
    fn test_tool_pool_surface() {
        let pool = skill_learner_tool_pool();
        let names: Vec<String> = pool.schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "get_skill",
                "get_skill_file",
                "str_replace_skill_file",
                "create_skill_file",
                "create_skill",
                "mv_skill_file",
                "delete_skill_file",
                "report_thinking",
                "finish",
            ]
        );
    }
}
