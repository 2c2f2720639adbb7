mod common;

use std::sync::Arc;

use chrono::TimeDelta;
use common::{init_logger, start_time};
use futures::StreamExt;
use serde_json::json;
use tasksync::{
    Clock, Direction, DocumentStore, ManualClock, Query, SqliteDocumentStore, StoreError, Task,
    TaskDraft, TaskPatch, TaskStore, UserId,
};

async fn open_store() -> (Arc<ManualClock>, SqliteDocumentStore) {
    init_logger();
    let clock = Arc::new(ManualClock::new(start_time()));
    let store = SqliteDocumentStore::connect_with_clock("sqlite::memory:", clock.clone())
        .await
        .expect("Failed to open SQLite store");
    (clock, store)
}

fn fields(value: serde_json::Value) -> tasksync::Fields {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn test_sqlite_document_crud() {
    let (_, store) = open_store().await;

    let id = store
        .create("tasks", fields(json!({"title": "Buy milk", "completed": false})))
        .await
        .expect("Failed to create");
    let doc = store
        .get("tasks", &id)
        .await
        .expect("Failed to read")
        .expect("Document missing");
    assert_eq!(doc.fields["title"], json!("Buy milk"));
    assert_eq!(doc.fields["createdAt"], json!("2026-04-01T12:00:00.000000Z"));

    store
        .update("tasks", &id, fields(json!({"completed": true})))
        .await
        .expect("Failed to update");
    let doc = store.get("tasks", &id).await.unwrap().unwrap();
    assert_eq!(doc.fields["completed"], json!(true));
    assert_eq!(doc.fields["title"], json!("Buy milk"));
    assert_ne!(doc.fields["updatedAt"], doc.fields["createdAt"]);

    let err = store
        .update("tasks", "missing", fields(json!({"completed": true})))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));

    store.delete("tasks", &id).await.expect("Failed to delete");
    store.delete("tasks", &id).await.expect("Second delete must succeed");
    assert!(store.get("tasks", &id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_sqlite_filters_and_orders_in_sql() {
    let (clock, store) = open_store().await;
    for (owner, title) in [("alice", "t1"), ("bob", "b1"), ("alice", "t2"), ("alice", "t3")] {
        store
            .create("tasks", fields(json!({"userId": owner, "title": title})))
            .await
            .unwrap();
        clock.advance(TimeDelta::seconds(1));
    }
    store
        .create("notes", fields(json!({"userId": "alice", "title": "n1"})))
        .await
        .unwrap();

    let query = Query::collection("tasks")
        .where_eq("userId", "alice")
        .order_by("createdAt", Direction::Descending);
    let mut sub = store.subscribe(query).await.unwrap();
    let titles: Vec<_> = sub
        .next()
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.fields["title"].clone())
        .collect();
    assert_eq!(titles, [json!("t3"), json!("t2"), json!("t1")]);
}

#[tokio::test]
async fn test_sqlite_boolean_filter() {
    let (_, store) = open_store().await;
    store
        .create("tasks", fields(json!({"title": "done", "completed": true})))
        .await
        .unwrap();
    store
        .create("tasks", fields(json!({"title": "open", "completed": false})))
        .await
        .unwrap();

    let mut sub = store
        .subscribe(Query::collection("tasks").where_eq("completed", true))
        .await
        .unwrap();
    let snapshot = sub.next().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].fields["title"], json!("done"));
}

#[tokio::test]
async fn test_sqlite_task_round_trip_through_live_query() {
    let (clock, store) = open_store().await;
    let tasks = TaskStore::new(Arc::new(store.clone()));
    let alice = UserId::from("alice");

    let mut sub = tasks.subscribe_by_owner(&alice).await.unwrap();
    assert!(sub.next_snapshot().await.unwrap().is_empty());

    let draft = TaskDraft::new("Dentist")
        .with_description("bring card")
        .with_due_date(clock.now() + TimeDelta::days(2));
    let id = tasks.create(&draft, &alice).await.unwrap();

    let snapshot = sub.next_snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id, id);
    assert_eq!(TaskDraft::from_task(&snapshot[0]), draft);

    tasks.update(&id, &TaskPatch::completed(true)).await.unwrap();
    let snapshot = sub.next_snapshot().await.unwrap();
    assert!(snapshot[0].completed);
    assert_eq!(snapshot[0].title, "Dentist");

    tasks.delete(&id).await.unwrap();
    assert!(sub.next_snapshot().await.unwrap().is_empty());

    assert!(sub.unsubscribe());
    assert!(!sub.unsubscribe());
    assert!(sub.next_snapshot().await.is_none());
}

#[tokio::test]
async fn test_sqlite_persists_across_connections() {
    init_logger();
    let path = std::env::temp_dir().join(format!("tasksync-{}.db", uuid::Uuid::new_v4()));
    let url = format!("sqlite:{}?mode=rwc", path.display());

    let id = {
        let store = SqliteDocumentStore::connect(&url)
            .await
            .expect("Failed to open SQLite file");
        let tasks = TaskStore::new(Arc::new(store));
        tasks
            .create(&TaskDraft::new("Survives restart"), &UserId::from("alice"))
            .await
            .unwrap()
    };

    let store = SqliteDocumentStore::connect(&url)
        .await
        .expect("Failed to reopen SQLite file");
    let doc = store
        .get("tasks", id.as_str())
        .await
        .unwrap()
        .expect("Task lost after reconnect");
    let task = Task::from_document(&doc).unwrap();
    assert_eq!(task.title, "Survives restart");

    drop(store);
    let _ = std::fs::remove_file(path);
}
