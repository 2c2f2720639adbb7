//! Sync controller.
//!
//! [`TaskSyncBuilder::build`] spawns an engine task that follows the
//! credential provider: when a user becomes available it opens that owner's
//! live task subscription, and every snapshot it yields replaces the
//! published [`TaskListState`] wholesale. Sign-out and owner changes tear the
//! current subscription down before anything else happens, so at most one
//! subscription exists per session.
//!
//! Mutations go through the cloneable [`SyncController`] handle and run on
//! the caller's task. Their effect on the list is only ever observed through
//! the next snapshot.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::{CredentialProvider, SessionState};
use crate::clock::{Clock, SystemClock};
use crate::config::TaskSyncConfig;
use crate::document::DocumentStore;
use crate::error::{ConfigError, ScheduleError, SyncError};
use crate::model::{Task, TaskDraft, TaskId, TaskPatch, UserId};
use crate::notify::{NotificationId, NotificationService};
use crate::scheduler::ReminderScheduler;
use crate::store::{TaskStore, TaskSubscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No live subscription.
    Unsubscribed,
    /// Subscription opened, first snapshot not yet received.
    Subscribing,
    Subscribed,
}

/// Published view of the signed-in user's tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskListState {
    pub phase: SyncPhase,
    pub owner: Option<UserId>,
    /// Newest first, exactly as the last snapshot delivered it.
    pub tasks: Vec<Task>,
    pub loading: bool,
    pub last_error: Option<String>,
}

impl TaskListState {
    fn unsubscribed(owner: Option<UserId>, last_error: Option<String>) -> Self {
        Self {
            phase: SyncPhase::Unsubscribed,
            owner,
            tasks: Vec::new(),
            loading: false,
            last_error,
        }
    }
}

impl Default for TaskListState {
    fn default() -> Self {
        Self::unsubscribed(None, None)
    }
}

/// User-facing acknowledgement of a completed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    TaskCreated,
    ReminderScheduled,
    TaskUpdated,
    TaskDeleted,
}

impl Confirmation {
    pub fn message(&self) -> &'static str {
        match self {
            Confirmation::TaskCreated => "Task created successfully",
            Confirmation::ReminderScheduled => "Notification scheduled for this task",
            Confirmation::TaskUpdated => "Task updated successfully",
            Confirmation::TaskDeleted => "Task deleted successfully",
        }
    }
}

/// Result of the reminder side effect of a save, reported separately from
/// the save itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderOutcome {
    NotRequested,
    Scheduled(NotificationId),
    Failed(ScheduleError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub task_id: TaskId,
    pub confirmation: Confirmation,
    pub reminder: ReminderOutcome,
}

pub struct TaskSyncBuilder {
    documents: Arc<dyn DocumentStore>,
    notifications: Arc<dyn NotificationService>,
    credentials: watch::Receiver<SessionState>,
    clock: Arc<dyn Clock>,
    config: TaskSyncConfig,
}

impl TaskSyncBuilder {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        notifications: Arc<dyn NotificationService>,
        credentials: &dyn CredentialProvider,
    ) -> Self {
        Self {
            documents,
            notifications,
            credentials: credentials.watch(),
            clock: Arc::new(SystemClock),
            config: TaskSyncConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: TaskSyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the configuration and start the engine. Must be called from
    /// within a tokio runtime.
    pub fn build(self) -> Result<SyncController, ConfigError> {
        self.config.validate()?;

        let store = TaskStore::with_collection(self.documents, self.config.collection.clone());
        let scheduler = ReminderScheduler::new(self.notifications)
            .with_clock(self.clock.clone())
            .with_strategies(self.config.trigger_strategies.iter().copied());
        let (state_tx, state_rx) = watch::channel(TaskListState::default());
        let shutdown = CancellationToken::new();

        let engine = SyncEngine {
            store: store.clone(),
            scheduler: scheduler.clone(),
            credentials: self.credentials.clone(),
            state_tx,
            shutdown: shutdown.clone(),
            active: None,
            seen_sign_outs: 0,
            cancel_reminders_on_sign_out: self.config.cancel_reminders_on_sign_out,
        };
        let join = tokio::spawn(engine.run());

        Ok(SyncController {
            store,
            scheduler,
            clock: self.clock,
            credentials: self.credentials,
            state_rx,
            shutdown,
            engine: Arc::new(Mutex::new(Some(join))),
            reminder_placeholder: self.config.reminder_placeholder,
        })
    }
}

struct SyncEngine {
    store: TaskStore,
    scheduler: ReminderScheduler,
    credentials: watch::Receiver<SessionState>,
    state_tx: watch::Sender<TaskListState>,
    shutdown: CancellationToken,
    active: Option<TaskSubscription>,
    seen_sign_outs: u64,
    cancel_reminders_on_sign_out: bool,
}

async fn next_snapshot(active: &mut Option<TaskSubscription>) -> Option<Vec<Task>> {
    match active {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

impl SyncEngine {
    async fn run(mut self) {
        let initial = self.credentials.borrow_and_update().clone();
        self.seen_sign_outs = initial.sign_outs;
        self.on_credentials(initial.user).await;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                changed = self.credentials.changed() => {
                    if changed.is_err() {
                        log::debug!("Credential provider went away, signing out");
                        self.on_credentials(None).await;
                        self.shutdown.cancelled().await;
                        break;
                    }
                    let session = self.credentials.borrow_and_update().clone();
                    self.on_session(session).await;
                }
                snapshot = next_snapshot(&mut self.active) => match snapshot {
                    Some(tasks) => self.apply_snapshot(tasks),
                    None => self.on_subscription_dropped(),
                },
            }
        }

        self.teardown();
        log::debug!("Sync engine stopped");
    }

    async fn on_session(&mut self, session: SessionState) {
        // A sign-out that was overwritten before we looked still ends the
        // previous session.
        let missed_sign_out = session.sign_outs != self.seen_sign_outs;
        self.seen_sign_outs = session.sign_outs;
        if missed_sign_out && session.user.is_some() {
            log::debug!("Session ended between credential updates");
            self.on_credentials(None).await;
        }
        self.on_credentials(session.user).await;
    }

    async fn on_credentials(&mut self, user: Option<UserId>) {
        let Some(user) = user else {
            let was_signed_in = self.state_tx.borrow().owner.is_some();
            self.teardown();
            if was_signed_in && self.cancel_reminders_on_sign_out {
                self.scheduler.cancel_all().await;
            }
            self.state_tx.send_replace(TaskListState::default());
            return;
        };

        let same_owner = self.state_tx.borrow().owner.as_ref() == Some(&user);
        if same_owner && self.active.is_some() {
            return;
        }

        self.teardown();
        self.state_tx.send_replace(TaskListState {
            phase: SyncPhase::Subscribing,
            owner: Some(user.clone()),
            tasks: Vec::new(),
            loading: true,
            last_error: None,
        });

        match self.store.subscribe_by_owner(&user).await {
            Ok(subscription) => self.active = Some(subscription),
            Err(e) => {
                log::error!("Failed to open task subscription for {user}: {e}");
                self.state_tx
                    .send_replace(TaskListState::unsubscribed(Some(user), Some(e.to_string())));
            }
        }
    }

    fn apply_snapshot(&mut self, tasks: Vec<Task>) {
        log::debug!("Applying snapshot of {} tasks", tasks.len());
        self.state_tx.send_modify(|state| {
            state.phase = SyncPhase::Subscribed;
            state.tasks = tasks;
            state.loading = false;
            state.last_error = None;
        });
    }

    fn on_subscription_dropped(&mut self) {
        self.active = None;
        let owner = self.state_tx.borrow().owner.clone();
        let message = match &owner {
            Some(owner) => format!("Task subscription for {owner} was closed by the store"),
            None => "Task subscription was closed by the store".to_string(),
        };
        log::warn!("{message}");
        self.state_tx
            .send_replace(TaskListState::unsubscribed(owner, Some(message)));
    }

    /// Detach the active subscription and clear the list.
    fn teardown(&mut self) {
        let Some(subscription) = self.active.take() else {
            return;
        };
        subscription.unsubscribe();
        let owner = self.state_tx.borrow().owner.clone();
        self.state_tx
            .send_replace(TaskListState::unsubscribed(owner, None));
    }
}

/// Handle to a running sync engine.
#[derive(Clone)]
pub struct SyncController {
    store: TaskStore,
    scheduler: ReminderScheduler,
    clock: Arc<dyn Clock>,
    credentials: watch::Receiver<SessionState>,
    state_rx: watch::Receiver<TaskListState>,
    shutdown: CancellationToken,
    engine: Arc<Mutex<Option<JoinHandle<()>>>>,
    reminder_placeholder: String,
}

impl SyncController {
    pub fn state(&self) -> TaskListState {
        self.state_rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<TaskListState> {
        self.state_rx.clone()
    }

    /// Wait until the published state satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&TaskListState) -> bool,
    ) -> Result<TaskListState, SyncError> {
        let mut rx = self.state_rx.clone();
        let state = rx.wait_for(predicate).await.map_err(|_| SyncError::Closed)?;
        Ok(state.clone())
    }

    pub fn scheduler(&self) -> &ReminderScheduler {
        &self.scheduler
    }

    pub fn current_user(&self) -> Option<UserId> {
        self.credentials.borrow().user.clone()
    }

    fn ensure_running(&self) -> Result<(), SyncError> {
        if self.shutdown.is_cancelled() {
            return Err(SyncError::Closed);
        }
        Ok(())
    }

    /// Create a task, or update `editing` with the full draft.
    ///
    /// A new task with a due date later than now gets a reminder. Scheduling
    /// failures never undo the create; they are returned in
    /// [`SaveOutcome::reminder`].
    pub async fn save_task(
        &self,
        draft: &TaskDraft,
        editing: Option<&TaskId>,
    ) -> Result<SaveOutcome, SyncError> {
        self.ensure_running()?;

        if let Some(id) = editing {
            self.store.update(id, &draft.to_patch()).await?;
            return Ok(SaveOutcome {
                task_id: id.clone(),
                confirmation: Confirmation::TaskUpdated,
                reminder: ReminderOutcome::NotRequested,
            });
        }

        let owner = self.current_user().ok_or(SyncError::NotSignedIn)?;
        let task_id = self.store.create(draft, &owner).await?;

        let reminder = match draft.due_date {
            Some(due) if due > self.clock.now() => {
                let description = draft.description.trim();
                let body = if description.is_empty() {
                    self.reminder_placeholder.as_str()
                } else {
                    description
                };
                match self.scheduler.schedule(draft.title.trim(), body, due).await {
                    Ok(id) => ReminderOutcome::Scheduled(id),
                    Err(e) => {
                        log::warn!("Task {task_id} created without a reminder: {e}");
                        ReminderOutcome::Failed(e)
                    }
                }
            }
            _ => ReminderOutcome::NotRequested,
        };

        let confirmation = match reminder {
            ReminderOutcome::Scheduled(_) => Confirmation::ReminderScheduled,
            _ => Confirmation::TaskCreated,
        };
        Ok(SaveOutcome {
            task_id,
            confirmation,
            reminder,
        })
    }

    /// Flip the completed flag. Reminders are left alone.
    pub async fn toggle_complete(&self, task: &Task) -> Result<Confirmation, SyncError> {
        self.ensure_running()?;
        self.store
            .update(&task.id, &TaskPatch::completed(!task.completed))
            .await?;
        Ok(Confirmation::TaskUpdated)
    }

    /// Start the delete flow. Nothing is removed until
    /// [`PendingDelete::confirm`] is called.
    pub fn request_delete(&self, task: &Task) -> PendingDelete {
        PendingDelete {
            store: self.store.clone(),
            shutdown: self.shutdown.clone(),
            task_id: task.id.clone(),
            title: task.title.clone(),
        }
    }

    /// Stop the engine and tear down the active subscription.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let join = self.engine.lock().await.take();
        if let Some(join) = join {
            if let Err(e) = join.await {
                log::error!("Sync engine task failed: {e}");
            }
        }
    }
}

/// A delete awaiting explicit confirmation.
#[must_use = "a pending delete does nothing unless confirmed"]
pub struct PendingDelete {
    store: TaskStore,
    shutdown: CancellationToken,
    task_id: TaskId,
    title: String,
}

impl PendingDelete {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub async fn confirm(self) -> Result<Confirmation, SyncError> {
        if self.shutdown.is_cancelled() {
            return Err(SyncError::Closed);
        }
        self.store.delete(&self.task_id).await?;
        Ok(Confirmation::TaskDeleted)
    }

    pub fn dismiss(self) {
        log::debug!("Delete of task {} dismissed", self.task_id);
    }
}
