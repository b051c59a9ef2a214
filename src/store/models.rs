use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: String,
    pub summary: Option<String>,
    pub summary_updated_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Task,
    Feature,
    Bug,
    Epic,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Feature => "feature",
            Self::Bug => "bug",
            Self::Epic => "epic",
        }
    }
}

impl FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(Self::Task),
            "feature" => Ok(Self::Feature),
            "bug" => Ok(Self::Bug),
            "epic" => Ok(Self::Epic),
            _ => Err(format!("Invalid item type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Open,
    InProgress,
    Done,
    Blocked,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Blocked => "blocked",
        }
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "blocked" => Ok(Self::Blocked),
            _ => Err(format!("Invalid item status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub item_type: ItemType,
    pub status: ItemStatus,
    pub priority: Priority,
    pub acceptance_criteria: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A conversation thread attached to a work item. Exactly one default branch
/// exists per work item; forks carry a weak reference to their source branch
/// and the message they forked at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub work_item_id: String,
    pub name: Option<String>,
    pub is_default: bool,
    pub forked_from_id: Option<String>,
    pub fork_point_message_id: Option<String>,
    pub summary: Option<String>,
    pub summary_updated_at: Option<String>,
    /// Message count at which the stored summary was generated. Doubles as
    /// the optimistic-lock token for summary commits; 0 means never summarized.
    pub summary_message_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::System => "system",
        }
    }

    /// Uppercase label used when rendering transcripts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Assistant => "ASSISTANT",
            Self::Tool => "TOOL",
            Self::System => "SYSTEM",
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            "system" => Ok(Self::System),
            _ => Err(format!("Invalid message role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub branch_id: String,
    pub role: MessageRole,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
    pub user_id: Option<String>,
    /// Display name of the owning user, joined in where the read path needs it.
    pub author_name: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Plan,
    Spec,
    Checklist,
    Decision,
    Code,
    Note,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Spec => "spec",
            Self::Checklist => "checklist",
            Self::Decision => "decision",
            Self::Code => "code",
            Self::Note => "note",
        }
    }
}

impl FromStr for ArtifactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan" => Ok(Self::Plan),
            "spec" => Ok(Self::Spec),
            "checklist" => Ok(Self::Checklist),
            "decision" => Ok(Self::Decision),
            "code" => Ok(Self::Code),
            "note" => Ok(Self::Note),
            _ => Err(format!("Invalid artifact type: {}", s)),
        }
    }
}

/// A versioned structured document attached to a work item, optionally scoped
/// to one branch. The latest artifact of a type is the non-deleted row with
/// the highest (version, updated_at).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub work_item_id: String,
    pub branch_id: Option<String>,
    pub artifact_type: ArtifactType,
    pub title: String,
    pub content: serde_json::Value,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Branch resolved together with its work item and project in one read.
#[derive(Debug, Clone)]
pub struct BranchContextRow {
    pub branch: Branch,
    pub work_item: WorkItem,
    pub project: Project,
}

/// Per-branch summary bookkeeping used by the needs-summary pre-check and the
/// batch sweep: the lock token and the current live message count.
#[derive(Debug, Clone)]
pub struct BranchSummaryState {
    pub branch_id: String,
    pub summary_message_count: i64,
    pub message_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_round_trips() {
        for t in [
            ArtifactType::Plan,
            ArtifactType::Spec,
            ArtifactType::Checklist,
            ArtifactType::Decision,
            ArtifactType::Code,
            ArtifactType::Note,
        ] {
            assert_eq!(t.as_str().parse::<ArtifactType>().unwrap(), t);
        }
        for r in [
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Tool,
            MessageRole::System,
        ] {
            assert_eq!(r.as_str().parse::<MessageRole>().unwrap(), r);
        }
        assert_eq!("epic".parse::<ItemType>().unwrap(), ItemType::Epic);
        assert_eq!("blocked".parse::<ItemStatus>().unwrap(), ItemStatus::Blocked);
        assert_eq!("critical".parse::<Priority>().unwrap(), Priority::Critical);
    }

    #[test]
    fn test_invalid_enum_values_rejected() {
        assert!("sketch".parse::<ArtifactType>().is_err());
        assert!("agent".parse::<MessageRole>().is_err());
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_role_labels() {
        assert_eq!(MessageRole::User.label(), "USER");
        assert_eq!(MessageRole::Assistant.label(), "ASSISTANT");
    }
}
