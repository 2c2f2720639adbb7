//! Task store adapter.
//!
//! The only component that talks to the [`DocumentStore`]. It validates
//! client input, maps tasks to documents and back, and scopes the live
//! subscription to a single owner ordered newest first.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};

use crate::document::{CREATED_AT, Direction, DocumentStore, Query, Subscription, SubscriptionHandle};
use crate::error::TaskError;
use crate::model::{FIELD_USER_ID, Task, TaskDraft, TaskId, TaskPatch, UserId, dedup_by_id};

/// Default collection holding task documents.
pub const DEFAULT_COLLECTION: &str = "tasks";

#[derive(Clone)]
pub struct TaskStore {
    documents: Arc<dyn DocumentStore>,
    collection: String,
}

impl TaskStore {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self::with_collection(documents, DEFAULT_COLLECTION)
    }

    pub fn with_collection(documents: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            documents,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create a task owned by `owner`. Validation happens before any store call.
    pub async fn create(&self, draft: &TaskDraft, owner: &UserId) -> Result<TaskId, TaskError> {
        draft.validate()?;
        let id = self
            .documents
            .create(&self.collection, draft.to_fields(owner))
            .await
            .inspect_err(|e| log::error!("Failed to create task for {owner}: {e}"))?;
        log::debug!("Created task {id} for {owner}");
        Ok(TaskId::from(id))
    }

    /// Merge the provided fields into an existing task.
    pub async fn update(&self, id: &TaskId, patch: &TaskPatch) -> Result<(), TaskError> {
        patch.validate()?;
        self.documents
            .update(&self.collection, id.as_str(), patch.to_fields())
            .await
            .inspect_err(|e| log::error!("Failed to update task {id}: {e}"))?;
        log::debug!("Updated task {id}");
        Ok(())
    }

    /// Delete a task. Deleting an id that no longer exists succeeds.
    pub async fn delete(&self, id: &TaskId) -> Result<(), TaskError> {
        self.documents
            .delete(&self.collection, id.as_str())
            .await
            .inspect_err(|e| log::error!("Failed to delete task {id}: {e}"))?;
        log::debug!("Deleted task {id}");
        Ok(())
    }

    /// Open a live query over every task owned by `owner`, newest first.
    pub async fn subscribe_by_owner(&self, owner: &UserId) -> Result<TaskSubscription, TaskError> {
        let query = Query::collection(self.collection.clone())
            .where_eq(FIELD_USER_ID, owner.as_str())
            .order_by(CREATED_AT, Direction::Descending);
        let inner = self
            .documents
            .subscribe(query)
            .await
            .inspect_err(|e| log::error!("Failed to subscribe to tasks of {owner}: {e}"))?;
        log::debug!("Subscribed to tasks of {owner}");
        Ok(TaskSubscription {
            inner,
            owner: owner.clone(),
        })
    }
}

/// Live, owner-scoped task list. Each item is the complete current list.
#[derive(Debug)]
pub struct TaskSubscription {
    inner: Subscription,
    owner: UserId,
}

impl TaskSubscription {
    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.inner.handle()
    }

    pub fn unsubscribe(&self) -> bool {
        self.inner.unsubscribe()
    }

    pub async fn next_snapshot(&mut self) -> Option<Vec<Task>> {
        self.next().await
    }
}

impl Stream for TaskSubscription {
    type Item = Vec<Task>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_next(cx).map(|snapshot| {
            snapshot.map(|docs| {
                let tasks = docs
                    .iter()
                    .filter_map(|doc| match Task::from_document(doc) {
                        Ok(task) => Some(task),
                        Err(e) => {
                            log::warn!("Skipping task document in snapshot: {e}");
                            None
                        }
                    })
                    .collect();
                dedup_by_id(tasks)
            })
        })
    }
}
