//! Core types for the Flux tracker.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Task priority ordinal: 0 is most urgent, 2 is least.
pub type Priority = u8;

/// Priority constants for convenience.
pub const PRIORITY_URGENT: Priority = 0;
pub const PRIORITY_NORMAL: Priority = 1;
pub const PRIORITY_LOW: Priority = 2;

/// Priority used for sorting when a task has none set.
pub const PRIORITY_DEFAULT: Priority = PRIORITY_LOW;

/// Parse a priority string ("P0", "p1", "2") to an ordinal.
/// Returns `None` for anything outside 0..=2.
pub fn parse_priority(s: &str) -> Option<Priority> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix('P')
        .or_else(|| trimmed.strip_prefix('p'))
        .unwrap_or(trimmed);
    match digits.parse::<Priority>() {
        Ok(p) if p <= PRIORITY_LOW => Some(p),
        _ => None,
    }
}

/// Render a priority as a "P<n>" label, treating unset as P2.
pub fn priority_label(p: Option<Priority>) -> String {
    format!("P{}", p.unwrap_or(PRIORITY_DEFAULT))
}

/// Workflow status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Planning,
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Planning => "planning",
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "planning" => Some(TaskStatus::Planning),
            "todo" => Some(TaskStatus::Todo),
            "in_progress" => Some(TaskStatus::InProgress),
            "done" => Some(TaskStatus::Done),
            _ => None,
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Todo
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who wrote a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentAuthor {
    User,
    Mcp,
}

/// A comment on a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub body: String,
    pub author: CommentAuthor,
    pub created_at: String,
}

/// A project: the top-level container for epics and tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
}

/// An epic groups tasks within a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epic {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub status: TaskStatus,
    pub created_at: String,
}

/// A task in a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// Ids of tasks that must be done before this one is ready.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Task {
    /// Priority used for ordering; unset sorts as P2.
    pub fn effective_priority(&self) -> Priority {
        self.priority.unwrap_or(PRIORITY_DEFAULT)
    }
}

/// A blocked task with the ids of the unfinished tasks blocking it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedTask {
    #[serde(flatten)]
    pub task: Task,
    pub blocked_by: Vec<String>,
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub epic_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Partial update for a task. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub notes: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub epic_id: Option<String>,
    pub depends_on: Option<Vec<String>>,
    pub archived: Option<bool>,
}

/// Domain events a webhook can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WebhookEventType {
    #[serde(rename = "project.created")]
    ProjectCreated,
    #[serde(rename = "project.updated")]
    ProjectUpdated,
    #[serde(rename = "project.deleted")]
    ProjectDeleted,
    #[serde(rename = "epic.created")]
    EpicCreated,
    #[serde(rename = "epic.updated")]
    EpicUpdated,
    #[serde(rename = "epic.deleted")]
    EpicDeleted,
    #[serde(rename = "task.created")]
    TaskCreated,
    #[serde(rename = "task.updated")]
    TaskUpdated,
    #[serde(rename = "task.deleted")]
    TaskDeleted,
    #[serde(rename = "task.status_changed")]
    TaskStatusChanged,
    #[serde(rename = "task.archived")]
    TaskArchived,
}

impl WebhookEventType {
    pub const ALL: [WebhookEventType; 11] = [
        WebhookEventType::ProjectCreated,
        WebhookEventType::ProjectUpdated,
        WebhookEventType::ProjectDeleted,
        WebhookEventType::EpicCreated,
        WebhookEventType::EpicUpdated,
        WebhookEventType::EpicDeleted,
        WebhookEventType::TaskCreated,
        WebhookEventType::TaskUpdated,
        WebhookEventType::TaskDeleted,
        WebhookEventType::TaskStatusChanged,
        WebhookEventType::TaskArchived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEventType::ProjectCreated => "project.created",
            WebhookEventType::ProjectUpdated => "project.updated",
            WebhookEventType::ProjectDeleted => "project.deleted",
            WebhookEventType::EpicCreated => "epic.created",
            WebhookEventType::EpicUpdated => "epic.updated",
            WebhookEventType::EpicDeleted => "epic.deleted",
            WebhookEventType::TaskCreated => "task.created",
            WebhookEventType::TaskUpdated => "task.updated",
            WebhookEventType::TaskDeleted => "task.deleted",
            WebhookEventType::TaskStatusChanged => "task.status_changed",
            WebhookEventType::TaskArchived => "task.archived",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.as_str() == s)
    }
}

impl fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: String,
    pub name: String,
    pub url: String,
    /// HMAC signing key. Deliveries are unsigned when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub events: Vec<WebhookEventType>,
    /// Restrict fan-out to events from one project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Webhook {
    /// Whether this webhook wants `event` raised in `project_id`.
    pub fn wants(&self, event: WebhookEventType, project_id: Option<&str>) -> bool {
        if !self.enabled || !self.events.contains(&event) {
            return false;
        }
        match (&self.project_id, project_id) {
            (None, _) => true,
            (Some(scope), Some(pid)) => scope == pid,
            (Some(_), None) => false,
        }
    }
}

/// Input for registering a webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWebhook {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
    pub events: Vec<WebhookEventType>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Partial update for a webhook.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookPatch {
    pub name: Option<String>,
    pub url: Option<String>,
    pub secret: Option<String>,
    pub events: Option<Vec<WebhookEventType>>,
    pub project_id: Option<String>,
    pub enabled: Option<bool>,
}

/// The JSON envelope POSTed to webhook endpoints.
///
/// Field order is part of the wire contract; receivers verify the signature
/// over the raw body bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookPayload {
    pub event: WebhookEventType,
    pub timestamp: String,
    /// Delivery id for this dispatch.
    pub webhook_id: String,
    pub data: Value,
}

impl WebhookPayload {
    /// Build an envelope with a fresh delivery id and the current time.
    pub fn new(event: WebhookEventType, data: Value) -> Self {
        Self {
            event,
            timestamp: now_rfc3339(),
            webhook_id: uuid::Uuid::now_v7().to_string(),
            data,
        }
    }
}

/// Status of a webhook delivery series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryStatus::Pending),
            "success" => Some(DeliveryStatus::Success),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }
}

/// Ledger entry for one dispatch of an event to one webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: String,
    pub webhook_id: String,
    pub event: WebhookEventType,
    pub payload: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub response_code: Option<u16>,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub delivered_at: Option<String>,
}

/// Fields written to a delivery record after an attempt or on a terminal
/// transition. Unset fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryUpdate {
    pub status: Option<DeliveryStatus>,
    pub attempts: Option<u32>,
    /// `Some(None)` clears the stored value.
    pub response_code: Option<Option<u16>>,
    pub response_body: Option<Option<String>>,
    pub error: Option<Option<String>>,
    pub delivered_at: Option<String>,
}

impl DeliveryUpdate {
    /// Attempt bookkeeping written after every attempt.
    pub fn attempt(attempts: u32, outcome: &DeliveryOutcome) -> Self {
        Self {
            attempts: Some(attempts),
            response_code: Some(outcome.status_code),
            response_body: Some(outcome.body.clone()),
            error: Some(outcome.error.clone()),
            ..Default::default()
        }
    }

    pub fn succeeded(delivered_at: String) -> Self {
        Self {
            status: Some(DeliveryStatus::Success),
            delivered_at: Some(delivered_at),
            ..Default::default()
        }
    }

    pub fn failed() -> Self {
        Self {
            status: Some(DeliveryStatus::Failed),
            ..Default::default()
        }
    }

    pub fn failed_with(error: impl Into<String>) -> Self {
        Self {
            status: Some(DeliveryStatus::Failed),
            error: Some(Some(error.into())),
            ..Default::default()
        }
    }
}

/// Result of a single delivery attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub success: bool,
    #[serde(rename = "statusCode", skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Current UTC time as RFC 3339 with millisecond precision.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
