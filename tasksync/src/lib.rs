//! # tasksync
//!
//! Per-user task synchronization with due-date reminders.
//!
//! A [`SyncController`] follows the signed-in user reported by a
//! [`CredentialProvider`], keeps that user's task list mirrored from a
//! [`DocumentStore`] through a live subscription, and schedules a local
//! notification through a [`NotificationService`] when a task with a future
//! due date is created.
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tasksync::*;
//!
//! let documents = SqliteDocumentStore::connect("sqlite:./tasks.db?mode=rwc").await?;
//! let session = SessionCredentials::signed_in("alice");
//! let controller = TaskSyncBuilder::new(
//!     Arc::new(documents),
//!     Arc::new(TokioNotifier::new()),
//!     &session,
//! )
//! .build()?;
//!
//! let outcome = controller
//!     .save_task(&TaskDraft::from_form("Dentist", "", "2030-01-01T09:00:00Z", false)?, None)
//!     .await?;
//! println!("{}", outcome.confirmation.message());
//! ```
//!
//! ## Key types
//!
//! - [`SyncController`] / [`TaskSyncBuilder`]: session state machine and mutations
//! - [`TaskStore`]: task CRUD and the owner-scoped live subscription
//! - [`ReminderScheduler`]: due date to trigger, with strategy fallback
//! - [`MemoryDocumentStore`], [`SqliteDocumentStore`]: document store backends
//! - [`TokioNotifier`]: timer-backed notification service

pub mod auth;
pub mod clock;
pub mod config;
pub mod controller;
pub mod document;
pub mod error;
pub mod memory;
pub mod model;
pub mod notify;
pub mod scheduler;
pub mod sqlite;
pub mod store;

pub use auth::{CredentialProvider, SessionCredentials, SessionState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TaskSyncConfig;
pub use controller::{
    Confirmation, PendingDelete, ReminderOutcome, SaveOutcome, SyncController, SyncPhase,
    TaskListState, TaskSyncBuilder,
};
pub use document::{
    ChangeNotification, Direction, Document, DocumentStore, Fields, Query, Subscription,
    SubscriptionHandle, WriteKind,
};
pub use error::{
    ConfigError, NotificationError, ScheduleError, StoreError, SyncError, TaskError,
    TriggerRejection,
};
pub use memory::MemoryDocumentStore;
pub use model::{Task, TaskDraft, TaskId, TaskPatch, UserId};
pub use notify::{
    CalendarFields, FiredNotification, NotificationContent, NotificationId, NotificationService,
    PendingNotification, ReminderTrigger, TokioNotifier, TriggerKind,
};
pub use scheduler::ReminderScheduler;
pub use sqlite::SqliteDocumentStore;
pub use store::{TaskStore, TaskSubscription};

// Re-export sea-orm for callers wiring their own connection
pub use sea_orm;
