#![forbid(unsafe_code)]

use tl_storage::{CreateTaskRequest, SqliteStore, StoreError, StoreLimits};
use rusqlite::{Connection, params};
use std::path::PathBuf;
use tl_core::model::{Complexity, TaskType};

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("tl_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn open_store(dir: &PathBuf) -> SqliteStore {
    SqliteStore::open(dir, StoreLimits::default()).expect("open store")
}

fn new_task(title: &str) -> CreateTaskRequest {
    CreateTaskRequest {
        parent_task_id: None,
        title: title.to_string(),
        description: String::new(),
        task_type: TaskType::Standard,
        specialist_type: "implementer".to_string(),
        complexity: Complexity::Moderate,
        estimated_effort: None,
        context_json: None,
        attributes: Vec::new(),
        triggered_by: "test".to_string(),
    }
}

#[test]
fn fresh_store_lands_on_the_current_schema() {
    let dir = temp_dir("fresh_store_lands_on_the_current_schema");
    let store = open_store(&dir);
    assert_eq!(store.schema_version().expect("version"), 2);
    assert!(!store.maintenance_mode().expect("flag"));
}

#[test]
fn reopening_is_idempotent_and_keeps_state() {
    let dir = temp_dir("reopening_is_idempotent_and_keeps_state");
    let task_id;
    {
        let mut store = open_store(&dir);
        task_id = store.create_task(new_task("Durable")).expect("create").task_id;
        store.set_maintenance_mode(true).expect("set flag");
        store.checkpoint().expect("checkpoint");
    }
    for _ in 0..3 {
        let store = open_store(&dir);
        assert_eq!(store.schema_version().expect("version"), 2);
        assert!(store.maintenance_mode().expect("flag persists"));
        store.get_task(&task_id, false, false).expect("task persists");
    }
}

#[test]
fn database_from_a_newer_binary_is_refused() {
    let dir = temp_dir("database_from_a_newer_binary_is_refused");
    {
        let _store = open_store(&dir);
    }
    {
        let conn = Connection::open(dir.join("state.db")).expect("open db");
        conn.execute(
            "UPDATE store_state SET schema_version = ?1 WHERE singleton = 1",
            params![99i64],
        )
        .expect("bump version");
    }

    let err = SqliteStore::open(&dir, StoreLimits::default()).expect_err("refuse newer schema");
    match err {
        StoreError::SchemaIncompatible { found, expected } => {
            assert_eq!(found, 99);
            assert_eq!(expected, 2);
        }
        other => panic!("expected SchemaIncompatible, got {other:?}"),
    }
}

#[test]
fn uncommitted_transaction_is_not_persisted_after_reopen() {
    let dir = temp_dir("uncommitted_transaction_is_not_persisted_after_reopen");
    {
        let _store = open_store(&dir);
    }

    {
        let mut conn = Connection::open(dir.join("state.db")).expect("open db");
        let tx = conn.transaction().expect("begin tx");
        tx.execute(
            "INSERT INTO tasks (task_id, title, description, task_type, specialist_type,
                                status, lifecycle_stage, complexity, hierarchy_path,
                                hierarchy_level, position_in_parent, created_at_ms, updated_at_ms)
             VALUES ('task-ghost', 'Ghost', '', 'standard', 'implementer',
                     'pending', 'created', 'moderate', '/task-ghost', 0, 0, 0, 0)",
            [],
        )
        .expect("insert task");
        // Drop without commit -> rollback (simulated crash before commit).
    }

    let store = open_store(&dir);
    let err = store
        .get_task("task-ghost", false, false)
        .expect_err("ghost row must not persist");
    match err {
        StoreError::UnknownTask => {}
        other => panic!("expected UnknownTask, got {other:?}"),
    }
}

#[test]
fn foreign_keys_cascade_from_hard_deleted_tasks() {
    let dir = temp_dir("foreign_keys_cascade_from_hard_deleted_tasks");
    let mut store = open_store(&dir);

    let task = store.create_task(new_task("Parent of rows")).expect("create");
    store
        .set_attributes(
            &task.task_id,
            &[tl_storage::AttributeSpec {
                name: "component".to_string(),
                value: "storage".to_string(),
                indexed: true,
            }],
        )
        .expect("attributes");

    store
        .delete_task(tl_storage::DeleteTaskRequest {
            task_id: task.task_id.clone(),
            soft: false,
            force: false,
            triggered_by: "test".to_string(),
        })
        .expect("hard delete");
    drop(store);

    let conn = Connection::open(dir.join("state.db")).expect("open db");
    conn.execute_batch("PRAGMA foreign_keys=ON;").expect("pragma");
    let events: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM events WHERE task_id = ?1",
            params![task.task_id],
            |row| row.get(0),
        )
        .expect("count events");
    let attributes: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM task_attributes WHERE task_id = ?1",
            params![task.task_id],
            |row| row.get(0),
        )
        .expect("count attributes");
    assert_eq!(events, 0, "events cascade with the task row");
    assert_eq!(attributes, 0, "attributes cascade with the task row");
}
