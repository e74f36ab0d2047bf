use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a task (UUIDv7 — time-sortable for easier log correlation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 hex chars — used in sandbox branch names.
    pub fn short(&self) -> &str {
        let n = self.0.len().min(8);
        &self.0[..n]
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Chat-platform conversation identifier (opaque — Feishu open_chat_id,
/// Slack channel id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChatId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChatId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Task lifecycle state. Transitions are strictly forward:
/// pending → running → completed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Whether moving to `next` is a legal forward transition.
    pub fn can_transition(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Pending, TaskStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// Chat-platform context a task was created from, plus the card message the
/// runner keeps updating with progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Executor-produced outcome summary, persisted with the task and fed into
/// the memory extractor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSummary {
    #[serde(default)]
    pub modified_files: Vec<String>,
    #[serde(default)]
    pub thinking: String,
}

/// A unit of work: one natural-language request turned into code changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub prompt: String,
    #[serde(default)]
    pub output: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub created_by: String,
    #[serde(default)]
    pub metadata: TaskMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<TaskSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
}

impl Task {
    pub fn new(prompt: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            status: TaskStatus::Pending,
            prompt: prompt.into(),
            output: String::new(),
            created_at: chrono::Utc::now(),
            created_by: created_by.into(),
            metadata: TaskMetadata::default(),
            summary: None,
            error: None,
            pr_url: None,
        }
    }

    /// Move to `next`, rejecting backward transitions.
    pub fn transition(&mut self, next: TaskStatus) -> crate::Result<()> {
        if !self.status.can_transition(next) {
            return Err(crate::OpsforgeError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Author side of a logged chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRole::User => write!(f, "user"),
            ChatRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// File or image attached to an inbound chat message, already downloaded to
/// a local path by the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub mime_type: String,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// External resource kinds we detect in message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Jira,
    Figma,
    GitHub,
    GitLab,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkKind::Jira => write!(f, "jira"),
            LinkKind::Figma => write!(f, "figma"),
            LinkKind::GitHub => write!(f, "github"),
            LinkKind::GitLab => write!(f, "gitlab"),
        }
    }
}

/// A recognized reference link extracted from message text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefLink {
    pub kind: LinkKind,
    pub url: String,
}

/// Normalized inbound chat message — every platform adapter produces this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImMessage {
    pub chat_id: ChatId,
    pub message_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub links: Vec<RefLink>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_forward_transitions() {
        assert!(TaskStatus::Pending.can_transition(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition(TaskStatus::Failed));
        assert!(TaskStatus::Pending.can_transition(TaskStatus::Failed));
    }

    #[test]
    fn task_status_rejects_regression() {
        assert!(!TaskStatus::Completed.can_transition(TaskStatus::Running));
        assert!(!TaskStatus::Failed.can_transition(TaskStatus::Pending));
        assert!(!TaskStatus::Running.can_transition(TaskStatus::Pending));
        assert!(!TaskStatus::Completed.can_transition(TaskStatus::Failed));
    }

    #[test]
    fn task_transition_enforced() {
        let mut task = Task::new("do things", "alice");
        task.transition(TaskStatus::Running).unwrap();
        task.transition(TaskStatus::Completed).unwrap();
        assert!(task.transition(TaskStatus::Running).is_err());
    }

    #[test]
    fn task_id_short_is_prefix() {
        let id = TaskId::new();
        assert_eq!(id.short().len(), 8);
        assert!(id.as_str().starts_with(id.short()));
    }

    #[test]
    fn attachment_image_detection() {
        let img = Attachment {
            name: "a.png".into(),
            path: "/tmp/a.png".into(),
            mime_type: "image/png".into(),
        };
        let doc = Attachment {
            name: "a.pdf".into(),
            path: "/tmp/a.pdf".into(),
            mime_type: "application/pdf".into(),
        };
        assert!(img.is_image());
        assert!(!doc.is_image());
    }
}
