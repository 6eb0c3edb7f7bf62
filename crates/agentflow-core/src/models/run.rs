use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Origin of a run request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunTrigger {
    Manual,
    Schedule,
    Webhook,
    /// Nested call from another agent's workflow
    Workflow,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Schedule => "schedule",
            Self::Webhook => "webhook",
            Self::Workflow => "workflow",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "schedule" => Some(Self::Schedule),
            "webhook" => Some(Self::Webhook),
            "workflow" => Some(Self::Workflow),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Canceled,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Canceled => "canceled",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "canceled" => Some(Self::Canceled),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// File-like payload attached to a message (e.g. an A2A artifact).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    /// Transient progress text (tool activity, remote status). Cleared when
    /// the message completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            status_text: None,
            attachments: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Empty assistant message filled in by streamed chunks.
    pub fn assistant_placeholder() -> Self {
        Self::new(MessageRole::Assistant, "")
    }

    pub fn append_text(&mut self, text: &str) {
        self.content.push_str(text);
    }

    pub fn attach(&mut self, attachment: Attachment) {
        self.attachments.push(attachment);
    }
}

/// One completed tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub params: serde_json::Value,
    pub result: serde_json::Value,
}

/// The persisted state of one agent execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: String,
    pub agent_id: String,
    pub workspace_id: String,
    pub trigger: RunTrigger,
    pub status: RunStatus,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub messages: Vec<Message>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(
        id: Option<String>,
        agent_id: &str,
        workspace_id: &str,
        trigger: RunTrigger,
        prompt: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            agent_id: agent_id.to_string(),
            workspace_id: workspace_id.to_string(),
            trigger,
            status: RunStatus::Running,
            prompt: prompt.to_string(),
            error: None,
            messages: Vec::new(),
            tool_calls: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`. A terminal status is never left; returns whether the
    /// transition happened.
    pub fn transition(&mut self, next: RunStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = next;
        self.touch();
        true
    }

    /// Record a failure. Ignored once the run is terminal.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if !self.transition(RunStatus::Error) {
            return false;
        }
        self.error = Some(error.into());
        true
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn last_message_mut(&mut self) -> Option<&mut Message> {
        self.messages.last_mut()
    }

    /// Last assistant message content, if any.
    pub fn last_output(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
            .map(|m| m.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_status_is_immutable() {
        let mut run = RunRecord::new(None, "agent", "default", RunTrigger::Manual, "hi");
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.transition(RunStatus::Canceled));
        assert!(!run.transition(RunStatus::Success));
        assert!(!run.fail("late failure"));
        assert_eq!(run.status, RunStatus::Canceled);
        assert!(run.error.is_none());
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            RunStatus::Running,
            RunStatus::Success,
            RunStatus::Canceled,
            RunStatus::Error,
        ] {
            assert_eq!(RunStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(RunTrigger::from_str("cron"), None);
    }

    #[test]
    fn test_serializes_camel_case() {
        let mut run = RunRecord::new(
            Some("run-1".to_string()),
            "agent",
            "default",
            RunTrigger::Webhook,
            "hi",
        );
        run.push_message(Message::system(""));
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["agentId"], "agent");
        assert_eq!(json["trigger"], "webhook");
        assert_eq!(json["status"], "running");
        assert_eq!(json["messages"][0]["role"], "system");
        assert!(json.get("error").is_none());
    }
}
