//! SQLite-backed [`DocumentStore`] on top of SeaORM.
//!
//! All collections share one `_tasksync_documents` table; each row holds the
//! document's fields as a JSON object. Filters and ordering are evaluated in
//! SQL with `json_extract`. As with the in-memory store, every successful
//! write is broadcast as a [`ChangeNotification`] and live queries re-run on
//! each one.
//!
//! The table is created automatically by [`SqliteDocumentStore::connect`].

use std::sync::Arc;

use chrono::SecondsFormat;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr,
    ExecResult, FromQueryResult, Statement, TransactionTrait,
};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::clock::{Clock, ServerClock, SystemClock};
use crate::document::{
    CREATED_AT, ChangeNotification, DEFAULT_SNAPSHOT_BUFFER, Direction, Document, DocumentStore,
    Fields, Query, SnapshotSource, Subscription, UPDATED_AT, WriteKind, open_live_query,
};
use crate::error::StoreError;

#[derive(Clone)]
pub struct SqliteDocumentStore {
    inner: Arc<SqliteInner>,
}

struct SqliteInner {
    db: DatabaseConnection,
    change_tx: broadcast::Sender<ChangeNotification>,
    stamps: ServerClock,
}

/// Create the `_tasksync_documents` table if it does not already exist.
pub async fn create_documents_table(db: &impl ConnectionTrait) -> Result<ExecResult, DbErr> {
    db.execute_unprepared(
        "CREATE TABLE IF NOT EXISTS _tasksync_documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            fields TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (collection, id)
        )",
    )
    .await
}

#[derive(Debug, FromQueryResult)]
struct DocumentRow {
    id: String,
    fields: String,
}

impl DocumentRow {
    fn into_document(self) -> Result<Document, StoreError> {
        let fields: Fields =
            serde_json::from_str(&self.fields).map_err(|e| StoreError::Malformed {
                id: self.id.clone(),
                reason: e.to_string(),
            })?;
        Ok(Document {
            id: self.id,
            fields,
        })
    }
}

impl SqliteDocumentStore {
    /// Connect to `url` (e.g. `sqlite:./tasks.db?mode=rwc` or `sqlite::memory:`)
    /// using the system clock for server timestamps.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with_clock(url, Arc::new(SystemClock)).await
    }

    pub async fn connect_with_clock(url: &str, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let mut opts = ConnectOptions::new(url);
        if url.contains(":memory:") {
            // Every pooled connection to an in-memory database is a separate database.
            opts.max_connections(1).min_connections(1);
        }
        let db = Database::connect(opts).await?;
        Self::from_connection(db, clock).await
    }

    /// Wrap an existing connection, creating the documents table if needed.
    pub async fn from_connection(
        db: DatabaseConnection,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        create_documents_table(&db).await?;
        let (change_tx, _) = broadcast::channel(256);
        Ok(Self {
            inner: Arc::new(SqliteInner {
                db,
                change_tx,
                stamps: ServerClock::new(clock),
            }),
        })
    }

    /// Get a reference to the underlying SeaORM connection.
    pub fn connection(&self) -> &DatabaseConnection {
        &self.inner.db
    }

    /// Subscribe to raw write notifications.
    pub fn change_rx(&self) -> broadcast::Receiver<ChangeNotification> {
        self.inner.change_tx.subscribe()
    }

    /// Read a single document directly, bypassing any subscription.
    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let row = DocumentRow::find_by_statement(Statement::from_sql_and_values(
            DatabaseBackend::Sqlite,
            "SELECT id, fields FROM _tasksync_documents WHERE collection = $1 AND id = $2",
            [collection.into(), id.into()],
        ))
        .one(&self.inner.db)
        .await?;
        row.map(DocumentRow::into_document).transpose()
    }

    fn notify(&self, collection: &str, id: &str, kind: WriteKind) {
        let _ = self.inner.change_tx.send(ChangeNotification {
            collection: collection.to_string(),
            id: id.to_string(),
            kind,
        });
    }
}

/// Bind a JSON filter value the way `json_extract` returns it.
fn bind_json(value: &Value) -> sea_orm::Value {
    match value {
        Value::String(s) => s.clone().into(),
        Value::Bool(b) => i64::from(*b).into(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.into(),
            None => n.as_f64().unwrap_or_default().into(),
        },
        other => other.to_string().into(),
    }
}

fn json_path(field: &str) -> String {
    format!("$.\"{}\"", field.replace('"', "\\\""))
}

#[async_trait::async_trait]
impl SnapshotSource for SqliteInner {
    async fn fetch(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let mut sql = String::from("SELECT id, fields FROM _tasksync_documents WHERE collection = $1");
        let mut values: Vec<sea_orm::Value> = vec![query.collection.clone().into()];

        for filter in &query.filters {
            values.push(json_path(&filter.field).into());
            let path = values.len();
            if filter.value.is_null() {
                sql.push_str(&format!(" AND json_extract(fields, ${path}) IS NULL"));
            } else {
                values.push(bind_json(&filter.value));
                let value = values.len();
                sql.push_str(&format!(" AND json_extract(fields, ${path}) = ${value}"));
            }
        }

        if let Some(order) = &query.order_by {
            values.push(json_path(&order.field).into());
            let direction = match order.direction {
                Direction::Ascending => "ASC",
                Direction::Descending => "DESC",
            };
            sql.push_str(&format!(
                " ORDER BY json_extract(fields, ${}) {direction}, id ASC",
                values.len()
            ));
        } else {
            sql.push_str(" ORDER BY id ASC");
        }

        let rows = DocumentRow::find_by_statement(Statement::from_sql_and_values(
            DatabaseBackend::Sqlite,
            &sql,
            values,
        ))
        .all(&self.db)
        .await?;

        rows.into_iter().map(DocumentRow::into_document).collect()
    }
}

#[async_trait::async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn create(&self, collection: &str, mut fields: Fields) -> Result<String, StoreError> {
        let id = Uuid::new_v4().simple().to_string();
        let stamp = self.inner.stamps.next();
        let text = stamp.to_rfc3339_opts(SecondsFormat::Micros, true);
        fields.insert(CREATED_AT.into(), text.clone().into());
        fields.insert(UPDATED_AT.into(), text.into());

        self.inner
            .db
            .execute_raw(Statement::from_sql_and_values(
                DatabaseBackend::Sqlite,
                "INSERT INTO _tasksync_documents (collection, id, fields, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5)",
                [
                    collection.into(),
                    id.clone().into(),
                    Value::Object(fields).to_string().into(),
                    stamp.timestamp_micros().into(),
                    stamp.timestamp_micros().into(),
                ],
            ))
            .await?;

        log::debug!("Created document {collection}/{id}");
        self.notify(collection, &id, WriteKind::Insert);
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, mut fields: Fields) -> Result<(), StoreError> {
        let stamp = self.inner.stamps.next();
        fields.remove(CREATED_AT);
        fields.insert(
            UPDATED_AT.into(),
            stamp.to_rfc3339_opts(SecondsFormat::Micros, true).into(),
        );

        let txn = self.inner.db.begin().await?;
        let row = DocumentRow::find_by_statement(Statement::from_sql_and_values(
            DatabaseBackend::Sqlite,
            "SELECT id, fields FROM _tasksync_documents WHERE collection = $1 AND id = $2",
            [collection.into(), id.into()],
        ))
        .one(&txn)
        .await?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut merged = row.into_document()?.fields;
        merged.extend(fields);

        txn.execute_raw(Statement::from_sql_and_values(
            DatabaseBackend::Sqlite,
            "UPDATE _tasksync_documents SET fields = $1, updated_at = $2
             WHERE collection = $3 AND id = $4",
            [
                Value::Object(merged).to_string().into(),
                stamp.timestamp_micros().into(),
                collection.into(),
                id.into(),
            ],
        ))
        .await?;
        txn.commit().await?;

        log::debug!("Updated document {collection}/{id}");
        self.notify(collection, id, WriteKind::Update);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let result = self
            .inner
            .db
            .execute_raw(Statement::from_sql_and_values(
                DatabaseBackend::Sqlite,
                "DELETE FROM _tasksync_documents WHERE collection = $1 AND id = $2",
                [collection.into(), id.into()],
            ))
            .await?;

        if result.rows_affected() > 0 {
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
