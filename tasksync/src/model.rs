//! The Task entity and the values used to create and edit it.
//!
//! A [`Task`] is always decoded from a store snapshot: its id and timestamps
//! come from the store. Clients write through a [`TaskDraft`] (the full form)
//! or a [`TaskPatch`] (only the fields being changed).

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{CREATED_AT, Document, Fields, UPDATED_AT};
use crate::error::{StoreError, TaskError};

pub const FIELD_TITLE: &str = "title";
pub const FIELD_DESCRIPTION: &str = "description";
pub const FIELD_COMPLETED: &str = "completed";
pub const FIELD_DUE_DATE: &str = "dueDate";
pub const FIELD_USER_ID: &str = "userId";

/// Store-assigned task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Authenticated owner identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_id: UserId,
}

impl Task {
    /// Decode a snapshot document.
    ///
    /// Title, owner and both server timestamps are required. A malformed due
    /// date is dropped with a warning rather than hiding the whole task.
    pub fn from_document(doc: &Document) -> Result<Self, StoreError> {
        let malformed = |reason: String| StoreError::Malformed {
            id: doc.id.clone(),
            reason,
        };
        let text = |field: &str| -> Result<String, StoreError> {
            match doc.fields.get(field) {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(other) => Err(malformed(format!("{field} is not a string: {other}"))),
                None => Err(malformed(format!("missing {field}"))),
            }
        };
        let timestamp = |field: &str| -> Result<DateTime<Utc>, StoreError> {
            let raw = text(field)?;
            DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| malformed(format!("{field} {raw:?}: {e}")))
        };

        let title = text(FIELD_TITLE)?;
        if title.trim().is_empty() {
            return Err(malformed("empty title".to_string()));
        }

        let due_date = match doc.fields.get(FIELD_DUE_DATE) {
            Some(Value::String(raw)) => parse_due_date(raw).unwrap_or_else(|e| {
                log::warn!("Ignoring due date of task {}: {}", doc.id, e);
                None
            }),
            _ => None,
        };

        Ok(Task {
            id: TaskId::from(doc.id.as_str()),
            title,
            description: doc
                .fields
                .get(FIELD_DESCRIPTION)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            completed: doc
                .fields
                .get(FIELD_COMPLETED)
                .and_then(Value::as_bool)
                .unwrap_or(false),
            due_date,
            created_at: timestamp(CREATED_AT)?,
            updated_at: timestamp(UPDATED_AT)?,
            user_id: UserId::from(text(FIELD_USER_ID)?),
        })
    }

    /// Whether the task's due date lies strictly after `now`.
    pub fn is_due_after(&self, now: DateTime<Utc>) -> bool {
        self.due_date.is_some_and(|due| due > now)
    }
}

/// The values of the task form: everything a client may set on creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub due_date: Option<DateTime<Utc>>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_due_date(mut self, due: DateTime<Utc>) -> Self {
        self.due_date = Some(due);
        self
    }

    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }

    /// Build a draft from raw form input. Title and description are trimmed;
    /// an empty due date means none.
    pub fn from_form(
        title: &str,
        description: &str,
        due_date: &str,
        completed: bool,
    ) -> Result<Self, TaskError> {
        let draft = Self {
            title: title.trim().to_string(),
            description: description.trim().to_string(),
            completed,
            due_date: parse_due_date(due_date)?,
        };
        draft.validate()?;
        Ok(draft)
    }

    /// Pre-fill the form from an existing task, as when editing.
    pub fn from_task(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            description: task.description.clone(),
            completed: task.completed,
            due_date: task.due_date,
        }
    }

    pub fn validate(&self) -> Result<(), TaskError> {
        validate_title(&self.title)
    }

    /// Document fields for a new task owned by `owner`. Timestamps are left to
    /// the store.
    pub fn to_fields(&self, owner: &UserId) -> Fields {
        let mut fields = Fields::new();
        fields.insert(FIELD_TITLE.into(), self.title.trim().into());
        fields.insert(FIELD_DESCRIPTION.into(), self.description.clone().into());
        fields.insert(FIELD_COMPLETED.into(), self.completed.into());
        fields.insert(FIELD_DUE_DATE.into(), format_due_date(self.due_date).into());
        fields.insert(FIELD_USER_ID.into(), owner.as_str().into());
        fields
    }

    /// The full form as an update, as submitted when editing.
    pub fn to_patch(&self) -> TaskPatch {
        TaskPatch {
            title: Some(self.title.clone()),
            description: Some(self.description.clone()),
            completed: Some(self.completed),
            due_date: Some(self.due_date),
        }
    }
}

/// A partial update. `None` fields are left untouched in the store.
///
/// `due_date: Some(None)` clears the due date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub completed: Option<bool>,
    pub due_date: Option<Option<DateTime<Utc>>>,
}

impl TaskPatch {
    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.completed.is_none()
            && self.due_date.is_none()
    }

    pub fn validate(&self) -> Result<(), TaskError> {
        match &self.title {
            Some(title) => validate_title(title),
            None => Ok(()),
        }
    }

    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        if let Some(title) = &self.title {
            fields.insert(FIELD_TITLE.into(), title.trim().into());
        }
        if let Some(description) = &self.description {
            fields.insert(FIELD_DESCRIPTION.into(), description.clone().into());
        }
        if let Some(completed) = self.completed {
            fields.insert(FIELD_COMPLETED.into(), completed.into());
        }
        if let Some(due) = self.due_date {
            fields.insert(FIELD_DUE_DATE.into(), format_due_date(due).into());
        }
        fields
    }
}

fn validate_title(title: &str) -> Result<(), TaskError> {
    if title.trim().is_empty() {
        return Err(TaskError::Validation("title must not be empty".to_string()));
    }
    Ok(())
}

/// Parse a stored or submitted due date. Blank means no due date.
pub fn parse_due_date(raw: &str) -> Result<Option<DateTime<Utc>>, TaskError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| Some(dt.with_timezone(&Utc)))
        .map_err(|e| TaskError::Validation(format!("invalid due date {raw:?}: {e}")))
}

/// ISO-8601 UTC with millisecond precision, or empty for no due date.
pub fn format_due_date(due: Option<DateTime<Utc>>) -> String {
    due.map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

/// Collapse entries sharing an id: the later entry's value wins, kept at the
/// position of the first occurrence.
pub fn dedup_by_id(tasks: Vec<Task>) -> Vec<Task> {
    let mut index: HashMap<TaskId, usize> = HashMap::with_capacity(tasks.len());
    let mut out: Vec<Task> = Vec::with_capacity(tasks.len());
    for task in tasks {
        match index.get(&task.id) {
            Some(&pos) => out[pos] = task,
            None => {
                index.insert(task.id.clone(), out.len());
                out.push(task);
            }
        }
    }
    out
}
