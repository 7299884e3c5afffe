//! Common type definitions used throughout the engine
//!
//! This module provides newtype wrappers around UUID for type-safe identifiers
//! plus the shared status enums for messages, tasks and learning sessions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Get the underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

define_id!(
    /// Unique identifier for a Project (tenant root)
    ProjectId
);
define_id!(
    /// Unique identifier for a Session
    SessionId
);
define_id!(
    /// Unique identifier for a Message
    MessageId
);
define_id!(
    /// Unique identifier for a Task
    TaskId
);
define_id!(
    /// Unique identifier for a Disk (artifact container)
    DiskId
);
define_id!(
    /// Unique identifier for an Artifact
    ArtifactId
);
define_id!(
    /// Unique identifier for an AgentSkill
    SkillId
);
define_id!(
    /// Unique identifier for a LearningSpace
    LearningSpaceId
);
define_id!(
    /// Unique identifier for a registered Tool schema
    ToolRecordId
);
define_id!(
    /// Engine-assigned sandbox identifier (backend IDs never leak past the broker)
    SandboxId
);
define_id!(
    /// Unique identifier for a project-scoped User
    UserId
);

/// Processing status shared by messages and tasks.
///
/// Transitions are monotone `pending -> running -> {success, failed}`; an
/// explicit retry re-opens `failed -> running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl WorkStatus {
    /// Terminal statuses reject message-linking and progress appends until
    /// re-opened to `running`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// Status of a learning-space session ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningSessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl LearningSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LearningSessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a session message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "tool" => Ok(Self::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Well-known metric tags captured by the engine.
pub mod metric_tags {
    /// Incremented once per task created by the task-management agent.
    pub const NEW_TASK_CREATED: &str = "new-task-created";
    /// Non-zero today means the project's task creation is switched off and
    /// pending messages are failed instead of processed.
    pub const TASK_CREATION_DISABLED: &str = "task-creation-disabled";
    /// Accumulated sandbox keep-alive seconds (signed deltas).
    pub const SANDBOX_ALIVE_SECONDS: &str = "sandbox-alive-seconds";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
        assert_ne!(TaskId::new(), TaskId::new());
        assert_ne!(SandboxId::new(), SandboxId::new());
    }

    #[test]
    fn test_id_serialization_is_transparent() {
        let id = SessionId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));

        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn test_id_from_str_round_trip() {
        let id = DiskId::new();
        let parsed: DiskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_work_status_terminal() {
        assert!(!WorkStatus::Pending.is_terminal());
        assert!(!WorkStatus::Running.is_terminal());
        assert!(WorkStatus::Success.is_terminal());
        assert!(WorkStatus::Failed.is_terminal());
    }

    #[test]
    fn test_work_status_round_trip() {
        for status in [
            WorkStatus::Pending,
            WorkStatus::Running,
            WorkStatus::Success,
            WorkStatus::Failed,
        ] {
            let parsed: WorkStatus = status.as_str().parse().unwrap();
            assert_eq!(status, parsed);
        }
        assert!("done".parse::<WorkStatus>().is_err());
    }

    #[test]
    fn test_message_role_serialization() {
        let json = serde_json::to_string(&MessageRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }
}
