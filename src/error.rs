//! Structured error types for API responses.

use serde::Serialize;
use std::fmt;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (4xx-like)
    MissingRequiredField,
    InvalidFieldValue,
    Unauthorized,

    // Not found errors
    ProjectNotFound,
    EpicNotFound,
    TaskNotFound,
    WebhookNotFound,
    DeliveryNotFound,

    // Internal errors
    DatabaseError,
    InternalError,
}

impl ErrorCode {
    /// HTTP status code this error maps to.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::MissingRequiredField | ErrorCode::InvalidFieldValue => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::ProjectNotFound
            | ErrorCode::EpicNotFound
            | ErrorCode::TaskNotFound
            | ErrorCode::WebhookNotFound
            | ErrorCode::DeliveryNotFound => 404,
            ErrorCode::DatabaseError | ErrorCode::InternalError => 500,
        }
    }
}

/// Structured error for API responses.
#[derive(Debug, Serialize)]
pub struct FluxError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl FluxError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
            details: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    // Convenience constructors

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("{} is required", field),
        )
        .with_field(field)
    }

    pub fn invalid_value(field: &str, reason: &str) -> Self {
        Self::new(ErrorCode::InvalidFieldValue, reason).with_field(field)
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorCode::Unauthorized, "Unauthorized")
    }

    pub fn project_not_found(project_id: &str) -> Self {
        Self::new(
            ErrorCode::ProjectNotFound,
            format!("Project not found: {}", project_id),
        )
    }

    pub fn epic_not_found(epic_id: &str) -> Self {
        Self::new(
            ErrorCode::EpicNotFound,
            format!("Epic not found: {}", epic_id),
        )
    }

    pub fn task_not_found(task_id: &str) -> Self {
        Self::new(
            ErrorCode::TaskNotFound,
            format!("Task not found: {}", task_id),
        )
    }

    pub fn webhook_not_found(webhook_id: &str) -> Self {
        Self::new(
            ErrorCode::WebhookNotFound,
            format!("Webhook not found: {}", webhook_id),
        )
    }

    pub fn delivery_not_found(delivery_id: &str) -> Self {
        Self::new(
            ErrorCode::DeliveryNotFound,
            format!("Delivery not found: {}", delivery_id),
        )
    }

    pub fn database(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::DatabaseError, err.to_string())
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, err.to_string())
    }
}

impl fmt::Display for FluxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for FluxError {}

// Allow using ? with anyhow errors by converting them
impl From<anyhow::Error> for FluxError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<FluxError>() {
            Ok(flux_err) => flux_err,
            Err(err) => match err.downcast::<rusqlite::Error>() {
                Ok(db_err) => FluxError::database(db_err),
                Err(err) => FluxError::internal(err),
            },
        }
    }
}

/// Result type for API operations.
pub type FluxResult<T> = std::result::Result<T, FluxError>;
