#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use tasksync::{
    Document, DocumentStore, Fields, ManualClock, MemoryDocumentStore, NotificationContent,
    NotificationError, NotificationId, NotificationService, PendingNotification, Query,
    ReminderTrigger, SessionCredentials, StoreError, Subscription, SubscriptionHandle,
    SyncController, TaskSyncBuilder, TaskSyncConfig, TriggerRejection,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
}

/// Notification service that records every request.
#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<(NotificationContent, ReminderTrigger)>>,
    cancelled: Mutex<Vec<NotificationId>>,
    cancel_all_calls: AtomicUsize,
    reject_with: Option<TriggerRejection>,
}

impl RecordingNotifier {
    pub fn rejecting(reason: TriggerRejection) -> Self {
        Self {
            reject_with: Some(reason),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<(NotificationContent, ReminderTrigger)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<NotificationId> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn cancel_all_calls(&self) -> usize {
        self.cancel_all_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl NotificationService for RecordingNotifier {
    async fn schedule(
        &self,
        content: NotificationContent,
        trigger: ReminderTrigger,
    ) -> Result<NotificationId, TriggerRejection> {
        let mut calls = self.calls.lock().unwrap();
        calls.push((content, trigger));
        match &self.reject_with {
            Some(reason) => Err(reason.clone()),
            None => Ok(NotificationId::new(format!("reminder-{}", calls.len()))),
        }
    }

    async fn cancel(&self, id: &NotificationId) -> Result<(), NotificationError> {
        self.cancelled.lock().unwrap().push(id.clone());
        Ok(())
    }

    async fn cancel_all(&self) -> Result<(), NotificationError> {
        self.cancel_all_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<PendingNotification>, NotificationError> {
        Ok(Vec::new())
    }
}

/// Wraps a [`MemoryDocumentStore`], counting calls and keeping a handle to
/// every subscription it opens. [`drop_subscriptions`](Self::drop_subscriptions)
/// ends the open streams from the store side without cancelling them.
pub struct TrackingStore {
    pub inner: MemoryDocumentStore,
    creates: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
    handles: Mutex<Vec<SubscriptionHandle>>,
    overlapping: AtomicUsize,
    kill: Mutex<CancellationToken>,
}

impl TrackingStore {
    pub fn new(inner: MemoryDocumentStore) -> Self {
        Self {
            inner,
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            handles: Mutex::new(Vec::new()),
            overlapping: AtomicUsize::new(0),
            kill: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn handles(&self) -> Vec<SubscriptionHandle> {
        self.handles.lock().unwrap().clone()
    }

    pub fn subscribe_count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    /// Number of subscriptions opened while an earlier one was still active.
    pub fn overlapping(&self) -> usize {
        self.overlapping.load(Ordering::SeqCst)
    }

    pub fn drop_subscriptions(&self) {
        let mut kill = self.kill.lock().unwrap();
        kill.cancel();
        *kill = CancellationToken::new();
    }
}

#[async_trait::async_trait]
impl DocumentStore for TrackingStore {
    async fn create(&self, collection: &str, fields: Fields) -> Result<String, StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create(collection, fields).await
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update(collection, id, fields).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(collection, id).await
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError> {
        if self.handles().iter().any(SubscriptionHandle::is_active) {
            self.overlapping.fetch_add(1, Ordering::SeqCst);
        }

        let mut upstream = self.inner.subscribe(query).await?;
        let kill = self.kill.lock().unwrap().clone();
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let (tx, rx) = mpsc::channel::<Vec<Document>>(16);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = kill.cancelled() => break,
                    _ = cancelled.cancelled() => break,
                    snapshot = upstream.next() => match snapshot {
                        Some(docs) => {
                            if tx.send(docs).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        let subscription = Subscription::new(rx, token);
        self.handles.lock().unwrap().push(subscription.handle());
        Ok(subscription)
    }
}

/// A store whose every call fails.
pub struct UnavailableStore;

#[async_trait::async_trait]
impl DocumentStore for UnavailableStore {
    async fn create(&self, _collection: &str, _fields: Fields) -> Result<String, StoreError> {
        Err(StoreError::Unavailable("offline".into()))
    }

    async fn update(&self, _collection: &str, _id: &str, _fields: Fields) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("offline".into()))
    }

    async fn delete(&self, _collection: &str, _id: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("offline".into()))
    }

    async fn subscribe(&self, _query: Query) -> Result<Subscription, StoreError> {
        Err(StoreError::Unavailable("offline".into()))
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<TrackingStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub session: SessionCredentials,
    pub controller: SyncController,
}

impl Harness {
    pub fn new(session: SessionCredentials) -> Self {
        Self::build(session, RecordingNotifier::default(), TaskSyncConfig::default())
    }

    pub fn build(
        session: SessionCredentials,
        notifier: RecordingNotifier,
        config: TaskSyncConfig,
    ) -> Self {
        init_logger();
        let clock = Arc::new(ManualClock::new(start_time()));
        let store = Arc::new(TrackingStore::new(MemoryDocumentStore::with_clock(
            clock.clone(),
        )));
        let notifier = Arc::new(notifier);
        let controller = TaskSyncBuilder::new(store.clone(), notifier.clone(), &session)
            .with_clock(clock.clone())
            .with_config(config)
            .build()
            .expect("Failed to build controller");
        Self {
            clock,
            store,
            notifier,
            session,
            controller,
        }
    }
}
