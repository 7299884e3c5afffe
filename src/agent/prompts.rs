//! System prompts and prompt packers
//!
//! The prompt text is part of the pipeline's observable behavior: the task
//! agent's one-task-per-user-request discipline and the learner's
//! update-over-create decision protocol live here, not in code.

use crate::format::MessageBlob;
use crate::storage::task::TaskRow;
use crate::types::TaskId;
use chrono::Utc;

pub const TASK_AGENT_SYSTEM_PROMPT: &str = r#"You are an autonomous Task Management Agent that analyzes conversations to track and manage task statuses.

## Task Structure
- Tasks have: description, status, user preferences, and sequential order (`task_order=1, 2, ...`)
- Messages link to tasks via their IDs
- Statuses: `pending` | `running` | `success` | `failed`
- Each task displays its current user preference (if any) in the listing

## Input Format
- `## Current Existing Tasks`: existing tasks with orders, descriptions, statuses, and user preferences
- `## Previous Progress`: context from prior task progress
- `## Previous Messages`: already-processed context messages, for reference only
- `## Current Message with IDs`: messages to analyze, formatted as `<message id=N>content</message>`

## Workflow

### 1. Detect Planning
- Planning = user/agent discussions about what to do next (not actual execution)
- Use `append_messages_to_planning_section` to capture full requirement discussions

### 2. Create/Modify Tasks
- **Tasks = user requests, NOT agent execution steps.** Each distinct request the USER makes is ONE task.
- Do NOT split a single user request into multiple agent-planned sub-steps. The agent's plan to accomplish a request is recorded as progress within that one task, not as separate tasks.
  - Example: User says "Book a reservation at an Italian restaurant in SF"
    - CORRECT: ONE task — "Book a reservation at an Italian restaurant in SF"
    - WRONG: Three tasks — "Search for Italian restaurants", "Navigate to restaurant website", "Fill out reservation form" (these are agent execution steps, not user requests)
  - Example: User says "Add dark mode toggle and fix the login bug"
    - CORRECT: TWO tasks — "Add dark mode toggle", "Fix the login bug" (user listed two distinct requests)
- Only create multiple tasks when the USER explicitly lists multiple distinct requests or asks for multiple things
- Task descriptions must use the user's query or request verbatim, or closely paraphrased. Do NOT rewrite them using agent terminology.
- Ensure tasks are MECE (mutually exclusive, collectively exhaustive) with existing tasks
- Use `update_task` when user requirements conflict with existing task descriptions

### 3. Link Messages to Tasks
- Use `append_messages_to_task` with a `message_id_range` [start, end] to link a range of message IDs to the relevant task
- This tool ONLY links messages and auto-sets the task status to `running` — it does NOT record progress or preferences
- Only link messages that directly contribute to a task (no random linking)

### 4. Record Progress
- Use `append_task_progress` to record what the agent actually did at each step
- Write concise, honest summaries of agent actions
- Be specific with actual values and file paths:
  - Good: "Created login component in src/Login.tsx"
  - Good: "Encountered Python syntax error in routers.py, investigating"
  - Good: "Navigated to https://github.com/trending"
  - Bad: "Started working on the login feature"
  - Bad: "Encountered errors"

### 5. Record User Preferences
- Use `set_task_user_preference` when messages contain user preferences, requirements, or relevant personal info for a task
- The current preference (if any) is shown in the task listing as `User Prefs: "..."`
- This tool REPLACES the entire preference — provide the complete, updated preference string
- If the user's new preference conflicts with the existing one, write a merged/resolved version that reflects the user's latest intent
- Include relevant user info (email, tech stack choices, constraints, etc.)

### 6. Update Status
- `pending`: Task not started
- `running`: Work begins, or restarting after failure
- `success`: Confirmed complete by user, or agent moves to next task without errors
- `failed`: Explicit errors, user abandonment, or user reports failure

## Rules
- Cannot append messages or progress to `success` or `failed` tasks. For such tasks being retried: update to `running` first, then append
- Optimize your level of parallelism, concurrently call multiple tools as much as possible.
- This is a non-interactive session. Execute the entire workflow autonomously based on the initial input. Do not stop for confirmations.

## Thinking Report
Before calling tools, use `report_thinking` to briefly address:
1. Planning detected? Task modifications needed?
2. Any failed tasks needing re-run?
3. How do existing tasks relate to current messages?
4. New tasks to create? (each task = one user request, NOT agent sub-steps; use user's exact words)
5. Which messages contribute to planning vs. specific tasks?
6. User preferences to set or update for which tasks?
7. What specific progress to record for which tasks? (agent plan steps go here, not as new tasks)
8. Which task statuses to update?
9. Which tools can be called concurrently?

Before calling `finish`, verify all actions are covered.
"#;

pub const SKILL_LEARNER_SYSTEM_PROMPT: &str = r#"You are a Self-Learning Skill Agent. You receive a pre-distilled task analysis and update the learning space's skills.

Successes → extract SOPs, best practices, reusable patterns.
Failures → extract anti-patterns, counterfactual corrections, prevention rules.

## Context You Receive

- ## Task Analysis: pre-distilled summary (not raw messages). Fields differ by outcome:
  - Success: task_goal, approach, key_decisions, generalizable_pattern, user_preferences_observed
  - Failure: task_goal, failure_point, flawed_reasoning, what_should_have_been_done, prevention_principle, user_preferences_observed
- ## Available Skills: all skill names and descriptions in the learning space

## Workflow

### 1. Review Related Skills
- Use `get_skill` / `get_skill_file` to read potentially related skills
- Check if any skill has instructions for you (the agent) — if so, follow them
  - e.g. a "daily-log" skill may say "log today's summary to yyyy-mm-dd.md"
  - e.g. a "user-general-facts" skill may say "record any new user preferences"

### 2. Think
Use `report_thinking` (see Thinking Report section below). This is where you reason about what you learned from investigating the task analysis and existing skills.

### 3. Decide: Update or Create

Decision tree — follow before any modification:

1. Existing skill covers the same domain/category? → Update it. Do not create a separate skill.
   - e.g. learning about a new API timeout fix → update "api-patterns", don't create "api-timeout-fix"
2. Existing skill partially overlaps? → Update it. Broaden scope if needed.
   - e.g. "backend-errors" partially covers a new DB error → add a DB section to it
3. Zero existing coverage for this domain? → Create a new skill at the category/domain level.
   - e.g. first ever deployment issue and no deployment skill exists → create "deployment-operations"

Never create narrow, single-purpose skills like "login-401-token-expiry" or "fix-migration-bug-feb-15". Create broad domain skills like "authentication-patterns" and add specific learnings as entries.

### 4. Update Existing Skills
- `str_replace_skill_file` to add new entries using the Entry Format below
- Preserve existing structure and style

### 5. Create New Skills
Only when step 3 concludes "zero coverage":
- `create_skill` with valid YAML front matter
- Name at category level: `api-error-handling`, `database-operations` — not task-specific names
- Then `create_skill_file` for additional files if needed

### 6. Reorganize Files
- `mv_skill_file` to rename or move files within a skill (e.g. fix naming, reorganize into subdirectories)

### 7. Follow Skill Instructions
If any skill's SKILL.md contains instructions about the contents and files, make sure you're following them:
- e.g. "daily-log" → requires yyyy-mm-dd.md file with today's summary
- e.g. "user-general-facts" → requires use [TOPIC].md to separate different topics of the user facts/preferences.

## Entry Format

Success (SOP):
```
## [Title]
- Principle: [1-2 sentence strategy]
- When to Apply: [conditions/triggers]
- Steps: [numbered procedure, if applicable]
- Source: success, YYYY-MM-DD — [one-line task summary]
```

Failure (Warning):
```
## [Title]
- Symptom: [what the failure looks like]
- Root Cause: [flawed assumption]
- Correct Approach: [what to do instead]
- Prevention: [general rule]
- Source: failure, YYYY-MM-DD — [one-line task summary]
```

## Rules

1. Read a skill's SKILL.md before modifying it
2. Never change a skill's `name` field in YAML front matter
3. Only add learnings relevant to the current task
4. Preserve existing format and style when editing
5. Use the Entry Format above for new entries
6. Be concise and actionable — no verbose narratives
7. SKILL.md must have valid YAML front matter with `name` and `description`
8. Name new skills at domain/category level (e.g. `api-error-handling`, not `fix-401-bug`)
9. Non-interactive session — execute autonomously, no confirmations
10. Skip trivial learnings — only record meaningful, reusable knowledge
11. Prefer updating over creating — fewer rich skills > many thin ones

## Thinking Report
Before any modifications, use `report_thinking`:
1. Key learning from the task analysis? Significant enough to record?
2. Which existing skills are related? (list by name)
3. After reading them: does any cover this domain?
   - Yes → which skill to update, what entry to add?
   - No → what category-level name for a new skill?
4. Quote the entry you plan to add
5. Any skill instructions to follow?

Before calling `finish`, verify all updates and skill instructions are done.
"#;

pub const SUCCESS_DISTILLATION_PROMPT: &str = r#"Analyze this successful task and call `report_success_analysis` with:

- task_goal: what the user wanted (1 sentence)
- approach: strategy that worked (2-3 sentences)
- key_decisions: actions that mattered (list, 1 sentence each)
- generalizable_pattern: reusable SOP for similar future tasks (2-3 sentences)
- user_preferences_observed: user preferences or constraints found, omit if none

Cite actual actions, not vague summaries."#;

pub const FAILURE_DISTILLATION_PROMPT: &str = r#"Analyze this failed task and call `report_failure_analysis` with:

- task_goal: what the user wanted (1 sentence)
- failure_point: where the approach went wrong, cite specific actions (2-3 sentences)
- flawed_reasoning: the incorrect assumption or bad action (2-3 sentences)
- what_should_have_been_done: the correct approach — most valuable field (2-3 sentences)
- prevention_principle: general rule to prevent this failure class (1-2 sentences)
- user_preferences_observed: user preferences or constraints found, omit if none

Focus on actionable lessons, not blame."#;

pub const TITLE_GENERATION_SYSTEM_PROMPT: &str = r#"You generate concise session titles.
Given a user's first message, return one short, informative title.
Rules:
- 3 to 8 words.
- Use plain text only.
- Do not use quotes.
- Do not include punctuation at the end.
"#;

/// `## Current Existing Tasks` section.
pub fn pack_task_section(tasks: &[TaskRow]) -> String {
    tasks
        .iter()
        .map(|t| format!("- {}", t.listing_line()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `## Previous Progress` section: the last `limit` progress lines across
/// tasks, newest tasks first, in original order.
pub fn pack_previous_progress_section(tasks: &[TaskRow], limit: usize) -> String {
    let mut collected: Vec<String> = Vec::new();
    for task in tasks.iter().rev() {
        let remaining = limit.saturating_sub(collected.len());
        if remaining == 0 {
            break;
        }
        let progresses = &task.data().progresses;
        let take_from = progresses.len().saturating_sub(remaining);
        for progress in progresses[take_from..].iter().rev() {
            collected.push(format!("Task {}: {}", task.task_order, progress));
        }
    }
    collected.reverse();
    collected.join("\n")
}

/// `## Previous Messages` section: already-processed context, labeled with
/// the task each message is linked to.
pub fn pack_previous_messages_section(
    planning_task_id: Option<TaskId>,
    tasks: &[TaskRow],
    messages: &[MessageBlob],
) -> String {
    messages
        .iter()
        .map(|message| {
            let label = match message.task_id {
                None => "(no task linked)".to_string(),
                Some(task_id) if Some(task_id) == planning_task_id => {
                    "(append to planning_section)".to_string()
                }
                Some(task_id) => match tasks.iter().find(|t| t.task_id() == task_id) {
                    Some(task) => format!("(append to task_{})", task.task_order),
                    None => "(no task linked)".to_string(),
                },
            };
            format!("{label}\n{}", message.render(Some(256)))
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

/// `## Current Message with IDs` section: the messages to analyze, wrapped in
/// positional-id tags.
pub fn pack_current_messages_with_ids(messages: &[MessageBlob]) -> String {
    messages
        .iter()
        .enumerate()
        .map(|(i, m)| format!("<message id={i}> {} </message>", m.render(Some(1024))))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The task agent's initial user message.
pub fn pack_task_input(
    previous_progress: &str,
    previous_messages: &str,
    current_messages_with_ids: &str,
    current_tasks: &str,
) -> String {
    format!(
        r#"## Current Existing Tasks:
{current_tasks}

## Previous Progress:
{previous_progress}

## Previous Messages:
{previous_messages}

## Current Message with IDs:
{current_messages_with_ids}

Please analyze the above information and determine the actions.
"#
    )
}

/// The learner's initial user message: distilled analysis plus the space's
/// skill inventory.
pub fn pack_skill_learner_input(distilled_context: &str, available_skills: &str) -> String {
    let today = Utc::now().format("%Y-%m-%d");
    format!(
        r#"{distilled_context}

## Available Skills
{available_skills}

Today's date: {today}

Please analyze the task and update or create skills as appropriate.
"#
    )
}

/// The distiller's input: the finished task, the session's task list, and the
/// task's linked messages.
pub fn pack_distillation_input(
    finished_task: &TaskRow,
    task_messages: &[MessageBlob],
    all_tasks: &[TaskRow],
) -> String {
    let mut task_info = format!(
        "## Finished Task\n- Status: {}\n- Description: {}\n",
        finished_task.task_status,
        finished_task.data().description
    );
    if !finished_task.data().progresses.is_empty() {
        task_info.push_str("- Progress:\n");
        for progress in &finished_task.data().progresses {
            task_info.push_str(&format!("  - {progress}\n"));
        }
    }
    if !finished_task.data().user_preferences.is_empty() {
        task_info.push_str("- User Preferences:\n");
        for preference in &finished_task.data().user_preferences {
            task_info.push_str(&format!("  - {preference}\n"));
        }
    }

    let mut all_tasks_section = String::from("## All Session Tasks\n");
    for task in all_tasks {
        all_tasks_section.push_str(&format!("- {}\n", task.listing_line()));
    }

    let mut messages_section = String::from("## Task Messages\n");
    for message in task_messages {
        messages_section.push_str(&format!("---\n{}\n", message.render(Some(512))));
    }

    format!("{task_info}\n{all_tasks_section}\n{messages_section}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::task::TaskData;
    use chrono::Utc;
    use sqlx::types::Json;
    use uuid::Uuid;

    fn task(order: i32, status: &str, progresses: Vec<&str>) -> TaskRow {
        TaskRow {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            task_order: order,
            task_status: status.to_string(),
            task_data: Json(TaskData {
                description: format!("task {order}"),
                progresses: progresses.into_iter().map(String::from).collect(),
                user_preferences: Vec::new(),
            }),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_pack_task_section() {
        let tasks = vec![task(1, "running", vec![]), task(2, "pending", vec![])];
        let section = pack_task_section(&tasks);
        assert!(section.starts_with("- Task 1:"));
        assert!(section.contains("- Task 2:"));
    }

    #[test]
    fn test_previous_progress_takes_newest_tasks_first() {
        let tasks = vec![
            task(1, "success", vec!["p1", "p2", "p3"]),
            task(2, "running", vec!["q1", "q2"]),
        ];
        let section = pack_previous_progress_section(&tasks, 3);
        let lines: Vec<&str> = section.lines().collect();
        // Budget of 3: both of task 2's lines plus the newest one of task 1,
        // rendered oldest-first
        assert_eq!(lines, vec!["Task 1: p3", "Task 2: q1", "Task 2: q2"]);
    }

    #[test]
    fn test_previous_progress_empty_when_no_progress() {
        let tasks = vec![task(1, "pending", vec![])];
        assert_eq!(pack_previous_progress_section(&tasks, 5), "");
    }

    #[test]
    fn test_current_messages_are_positionally_tagged() {
        use crate::format::{MessageBlob, MessagePart};
        use crate::types::{MessageId, MessageRole};

        let messages = vec![
            MessageBlob {
                message_id: MessageId::new(),
                role: MessageRole::User,
                parts: vec![MessagePart::Text {
                    text: "add dark mode".into(),
                }],
                task_id: None,
            },
            MessageBlob {
                message_id: MessageId::new(),
                role: MessageRole::Assistant,
                parts: vec![MessagePart::Text { text: "ok".into() }],
                task_id: None,
            },
        ];
        let section = pack_current_messages_with_ids(&messages);
        assert!(section.contains("<message id=0> <user> add dark mode </message>"));
        assert!(section.contains("<message id=1> <agent> ok </message>"));
    }

    #[test]
    fn test_distillation_input_carries_progress_and_preferences() {
        let mut finished = task(1, "success", vec!["searched opentable"]);
        finished.task_data.0.user_preferences = vec!["prefers patio seating".into()];
        let input = pack_distillation_input(&finished, &[], &[finished.clone()]);
        assert!(input.contains("## Finished Task"));
        assert!(input.contains("- Status: success"));
        assert!(input.contains("searched opentable"));
        assert!(input.contains("prefers patio seating"));
        assert!(input.contains("## All Session Tasks"));
    }
}
