//! In-memory [`DocumentStore`].
//!
//! Holds every collection in a `RwLock`ed map and broadcasts a
//! [`ChangeNotification`] after each write, which drives the live queries.
//! Useful for tests and for running the engine without a database.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::SecondsFormat;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::clock::{Clock, ServerClock, SystemClock};
use crate::document::{
    CREATED_AT, ChangeNotification, DEFAULT_SNAPSHOT_BUFFER, Document, DocumentStore, Fields,
    Query, SnapshotSource, Subscription, UPDATED_AT, WriteKind, open_live_query,
};
use crate::error::StoreError;

type Collection = HashMap<String, Fields>;

#[derive(Clone)]
pub struct MemoryDocumentStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    collections: RwLock<HashMap<String, Collection>>,
    change_tx: broadcast::Sender<ChangeNotification>,
    stamps: ServerClock,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (change_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(MemoryInner {
                collections: RwLock::new(HashMap::new()),
                change_tx,
                stamps: ServerClock::new(clock),
            }),
        }
    }

    /// Subscribe to raw write notifications.
    pub fn change_rx(&self) -> broadcast::Receiver<ChangeNotification> {
        self.inner.change_tx.subscribe()
    }

    /// Number of documents currently stored in `collection`.
    pub fn document_count(&self, collection: &str) -> usize {
        self.inner
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .map_or(0, HashMap::len)
    }

    /// Read a single document directly, bypassing any subscription.
    pub fn get(&self, collection: &str, id: &str) -> Option<Document> {
        self.inner
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|fields| Document {
                id: id.to_string(),
                fields: fields.clone(),
            })
    }

    fn notify(&self, collection: &str, id: &str, kind: WriteKind) {
        // No receivers simply means nobody is subscribed.
        let _ = self.inner.change_tx.send(ChangeNotification {
            collection: collection.to_string(),
            id: id.to_string(),
            kind,
        });
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryInner {
    fn stamp(&self) -> String {
        self.stamps
            .next()
            .to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

#[async_trait::async_trait]
impl SnapshotSource for MemoryInner {
    async fn fetch(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let mut docs: Vec<Document> = {
            let collections = self
                .collections
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            collections
                .get(&query.collection)
                .map(|c| {
                    c.iter()
                        .filter(|(_, fields)| query.matches(fields))
                        .map(|(id, fields)| Document {
                            id: id.clone(),
                            fields: fields.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default()
        };
        query.sort(&mut docs);
        Ok(docs)
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create(&self, collection: &str, mut fields: Fields) -> Result<String, StoreError> {
        let id = Uuid::new_v4().simple().to_string();
        let now = self.inner.stamp();
        fields.insert(CREATED_AT.into(), now.clone().into());
        fields.insert(UPDATED_AT.into(), now.into());

        self.inner
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), fields);

        log::debug!("Created document {collection}/{id}");
        self.notify(collection, &id, WriteKind::Insert);
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, mut fields: Fields) -> Result<(), StoreError> {
        fields.remove(CREATED_AT);
        fields.insert(UPDATED_AT.into(), self.inner.stamp().into());
        {
            let mut collections = self
                .inner
                .collections
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let existing = collections
                .get_mut(collection)
                .and_then(|c| c.get_mut(id))
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            existing.extend(fields);
        }

        log::debug!("Updated document {collection}/{id}");
        self.notify(collection, id, WriteKind::Update);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let removed = self
            .inner
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(collection)
            .and_then(|c| c.remove(id))
            .is_some();

        if removed {
            log::debug!("Deleted document {collection}/{id}");
            self.notify(collection, id, WriteKind::Delete);
        }
        Ok(())
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError> {
        let changes = self.inner.change_tx.subscribe();
        open_live_query(self.inner.clone(), query, changes, DEFAULT_SNAPSHOT_BUFFER).await
    }
}
