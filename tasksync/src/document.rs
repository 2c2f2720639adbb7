//! Remote document store contract.
//!
//! Documents are schemaless JSON maps keyed by a store-assigned id. A store
//! exposes plain mutations plus [`DocumentStore::subscribe`], which opens a
//! live query: every time the matching result set changes, the subscriber
//! receives the *entire* current result set as one snapshot.
//!
//! Live queries are [`Subscription`] streams with an explicit
//! [`CancellationToken`]. Cancelling is synchronous: once
//! [`SubscriptionHandle::unsubscribe`] returns, the stream yields nothing
//! more, even if a snapshot was already queued.

use std::cmp::Ordering;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;

/// Field map of a single document.
pub type Fields = Map<String, Value>;

/// Server-assigned creation timestamp field.
pub const CREATED_AT: &str = "createdAt";
/// Server-assigned modification timestamp field.
pub const UPDATED_AT: &str = "updatedAt";

/// Snapshots a live query may queue before the store waits on the subscriber.
pub const DEFAULT_SNAPSHOT_BUFFER: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

/// The kind of write that produced a [`ChangeNotification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteKind {
    Insert,
    Update,
    Delete,
}

/// Lightweight event a store emits after every successful write.
///
/// Live queries listen for these and re-run their query; the notification
/// itself carries no field data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub collection: String,
    pub id: String,
    pub kind: WriteKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Equality predicate on a top-level field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

/// A collection query: equality filters, then an optional ordering.
/// Results with equal sort keys are ordered by document id.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<FieldFilter>,
    pub order_by: Option<OrderBy>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(FieldFilter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Whether a document's fields satisfy every filter.
    pub fn matches(&self, fields: &Fields) -> bool {
        self.filters
            .iter()
            .all(|f| fields.get(&f.field) == Some(&f.value))
    }

    /// Sort documents in place according to `order_by`, falling back to id.
    pub fn sort(&self, docs: &mut [Document]) {
        docs.sort_by(|a, b| {
            let by_field = match &self.order_by {
                Some(order) => {
                    let ord = compare_values(a.fields.get(&order.field), b.fields.get(&order.field));
                    match order.direction {
                        Direction::Ascending => ord,
                        Direction::Descending => ord.reverse(),
                    }
                }
                None => Ordering::Equal,
            };
            by_field.then_with(|| a.id.cmp(&b.id))
        });
    }
}

/// Total order over optional JSON values: missing < null < bool < number < string.
/// Arrays and objects compare by their serialized form.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(Value::Array(_)) | Some(Value::Object(_)) => 5,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x @ (Value::Array(_) | Value::Object(_))), Some(y @ (Value::Array(_) | Value::Object(_)))) => {
            x.to_string().cmp(&y.to_string())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Write a new document and return its store-assigned id. The store sets
    /// [`CREATED_AT`] and [`UPDATED_AT`]; client-supplied values are replaced.
    async fn create(&self, collection: &str, fields: Fields) -> Result<String, StoreError>;

    /// Merge `fields` into an existing document and refresh [`UPDATED_AT`].
    /// Fails with [`StoreError::NotFound`] if the document does not exist.
    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError>;

    /// Delete a document if it exists.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// Open a live query. The first snapshot is delivered immediately.
    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError>;
}

/// Cancels a [`Subscription`]. Cheap to clone; every clone cancels the same
/// subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    token: CancellationToken,
    torn_down: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    /// Detach the subscription. Returns `true` only for the call that actually
    /// tore it down; later calls are no-ops.
    pub fn unsubscribe(&self) -> bool {
        if self.torn_down.swap(true, AtomicOrdering::SeqCst) {
            return false;
        }
        self.token.cancel();
        log::debug!("Live query unsubscribed");
        true
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }
}

/// A stream of full snapshots for one live query.
///
/// The stream ends when the subscription is cancelled or when the store
/// stops feeding it (a dropped subscription).
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<Vec<Document>>,
    handle: SubscriptionHandle,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<Vec<Document>>, token: CancellationToken) -> Self {
        Self {
            rx,
            handle: SubscriptionHandle {
                token,
                torn_down: Arc::new(AtomicBool::new(false)),
            },
        }
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    pub fn unsubscribe(&self) -> bool {
        self.handle.unsubscribe()
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_active()
    }
}

impl Stream for Subscription {
    type Item = Vec<Document>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.handle.token.is_cancelled() {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.token.cancel();
    }
}

/// Re-runnable query backend used by [`open_live_query`].
#[async_trait::async_trait]
pub(crate) trait SnapshotSource: Send + Sync + 'static {
    async fn fetch(&self, query: &Query) -> Result<Vec<Document>, StoreError>;
}

/// Run `query` once, then re-run it after every change notification for the
/// query's collection, forwarding each result set that differs from the last
/// one delivered.
///
/// `changes` must be subscribed *before* calling so no write between the
/// initial fetch and the listener start is missed.
pub(crate) async fn open_live_query<S: SnapshotSource>(
    source: Arc<S>,
    query: Query,
    mut changes: broadcast::Receiver<ChangeNotification>,
    buffer: usize,
) -> Result<Subscription, StoreError> {
    let initial = source.fetch(&query).await?;

    let (tx, rx) = mpsc::channel(buffer.max(1));
    let token = CancellationToken::new();
    let cancelled = token.clone();

    // The receiver is still owned here, so this only fails if the buffer is
    // full, which it cannot be yet.
    let _ = tx.try_send(initial.clone());

    tokio::spawn(async move {
        let mut last = initial;
        loop {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => break,
                change = changes.recv() => match change {
                    Ok(notification) if notification.collection != query.collection => continue,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::debug!("Live query lagged by {skipped} changes, re-querying");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }

            match source.fetch(&query).await {
                Ok(docs) if docs == last => {}
                Ok(docs) => {
                    last = docs.clone();
                    if tx.send(docs).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("Live query on {} failed: {}", query.collection, e);
                    break;
                }
            }
        }
        log::debug!("Live query on {} closed", query.collection);
    });

    Ok(Subscription::new(rx, token))
}
