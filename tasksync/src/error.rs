//! Error taxonomy.
//!
//! Store-side failures ([`StoreError`]) are wrapped by the task-level
//! [`TaskError`]; reminder failures ([`ScheduleError`]) are deliberately a
//! separate type so a successful task mutation is never reported together
//! with a scheduling failure.

use sea_orm::DbErr;
use thiserror::Error;

use crate::model::TaskId;
use crate::notify::TriggerKind;

/// Failures raised by a [`DocumentStore`](crate::document::DocumentStore).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Document {0} not found")]
    NotFound(String),

    #[error("Database request failed: {0}")]
    Database(#[from] DbErr),

    #[error("Malformed document {id}: {reason}")]
    Malformed { id: String, reason: String },

    #[error("Document store unavailable: {0}")]
    Unavailable(String),
}

/// Failures surfaced by the task store adapter.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Task {0} not found")]
    NotFound(TaskId),

    #[error("Task store request failed: {0}")]
    Store(#[source] StoreError),
}

impl From<StoreError> for TaskError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => TaskError::NotFound(TaskId::from(id)),
            other => TaskError::Store(other),
        }
    }
}

/// Why a notification service refused a single trigger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TriggerRejection {
    #[error("trigger type {0} is not supported")]
    Unsupported(TriggerKind),

    #[error("trigger target is not in the future")]
    NotInFuture,

    #[error("invalid trigger: {0}")]
    Invalid(String),

    #[error("notification service unavailable: {0}")]
    Transport(String),
}

impl TriggerRejection {
    /// Rejections caused by the trigger itself; the scheduler may try the next
    /// strategy. Transport failures end the escalation.
    pub fn is_trigger_related(&self) -> bool {
        !matches!(self, TriggerRejection::Transport(_))
    }
}

/// Outcome of a failed reminder request. Never fatal to the owning task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Cannot schedule a reminder {seconds_late}s in the past")]
    PastDue { seconds_late: i64 },

    #[error("No trigger strategy was accepted ({})", format_attempts(.attempts))]
    Scheduling {
        attempts: Vec<(TriggerKind, TriggerRejection)>,
    },
}

fn format_attempts(attempts: &[(TriggerKind, TriggerRejection)]) -> String {
    if attempts.is_empty() {
        return "no strategies configured".to_string();
    }
    attempts
        .iter()
        .map(|(kind, reason)| format!("{kind}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failures from cancel/list calls on a notification service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("Notification {0} is not scheduled")]
    UnknownId(String),

    #[error("Notification service unavailable: {0}")]
    Transport(String),
}

/// Errors returned by the sync controller's mutation API.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("No user is signed in")]
    NotSignedIn,

    #[error("Sync controller has shut down")]
    Closed,

    #[error(transparent)]
    Task(#[from] TaskError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}
