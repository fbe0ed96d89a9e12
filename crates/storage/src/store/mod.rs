#![forbid(unsafe_code)]

mod deps;
mod error;
mod events;
mod maintenance;
mod requests;
mod sched;
mod schema;
mod tasks;

pub use error::StoreError;
pub use requests::*;

use crate::lock::StateLock;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tl_core::lifecycle::{legal_transition, stage_of};
use tl_core::model::{Complexity, Task, TaskStatus, TaskType};

pub const DB_FILE: &str = "state.db";
pub const MAX_QUERY_LIMIT: usize = 1000;

const COUNTER_TASKS: &str = "tasks";
const COUNTER_ARTIFACTS: &str = "artifacts";

#[derive(Clone, Debug)]
pub struct StoreLimits {
    pub max_depth: usize,
    pub max_subtasks: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_subtasks: 50,
        }
    }
}

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    storage_dir: PathBuf,
    limits: StoreLimits,
    _lock: StateLock,
}

impl SqliteStore {
    pub fn open(storage_dir: impl AsRef<Path>, limits: StoreLimits) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let lock = StateLock::acquire(&storage_dir, now_ms())?;

        let mut conn = Connection::open(storage_dir.join(DB_FILE))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;

        schema::migrate(&mut conn)?;

        Ok(Self {
            conn,
            storage_dir,
            limits,
            _lock: lock,
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn limits(&self) -> &StoreLimits {
        &self.limits
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        let version = self.conn.query_row(
            "SELECT schema_version FROM store_state WHERE singleton = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    pub fn maintenance_mode(&self) -> Result<bool, StoreError> {
        let flag: i64 = self.conn.query_row(
            "SELECT maintenance_mode FROM store_state WHERE singleton = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(flag != 0)
    }

    pub fn set_maintenance_mode(&mut self, enabled: bool) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE store_state SET maintenance_mode = ?1, updated_at_ms = ?2 WHERE singleton = 1",
            params![if enabled { 1 } else { 0 }, now_ms()],
        )?;
        Ok(())
    }

    pub fn next_artifact_id(&mut self) -> Result<String, StoreError> {
        let tx = self.conn.transaction()?;
        let seq = next_counter_tx(&tx, COUNTER_ARTIFACTS)?;
        tx.commit()?;
        Ok(tl_core::ids::ArtifactId::from_counter(seq)
            .as_str()
            .to_string())
    }

    /// Flushes the WAL into the main database file. Used while draining
    /// during shutdown so a copy of `state.db` alone is complete.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}

pub(crate) fn next_counter_tx(tx: &Transaction<'_>, name: &str) -> Result<i64, StoreError> {
    let current: i64 = tx
        .query_row(
            "SELECT value FROM counters WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);
    let next = current + 1;
    tx.execute(
        r#"
        INSERT INTO counters(name, value) VALUES (?1, ?2)
        ON CONFLICT(name) DO UPDATE SET value=excluded.value
        "#,
        params![name, next],
    )?;
    Ok(next)
}

pub(crate) fn next_task_id_tx(tx: &Transaction<'_>) -> Result<String, StoreError> {
    let seq = next_counter_tx(tx, COUNTER_TASKS)?;
    Ok(tl_core::ids::TaskId::from_counter(seq).as_str().to_string())
}

pub(crate) const TASK_COLUMNS: &str = "task_id, parent_task_id, title, description, task_type, \
     specialist_type, status, lifecycle_stage, complexity, hierarchy_path, hierarchy_level, \
     position_in_parent, estimated_effort, result, summary, context_json, artifact_ids, \
     created_at_ms, updated_at_ms, started_at_ms, completed_at_ms, deleted_at_ms";

/// `TASK_COLUMNS` qualified with a table alias, for joined queries where
/// bare column names would be ambiguous.
pub(crate) fn task_columns(alias: &str) -> String {
    TASK_COLUMNS
        .split(", ")
        .map(|column| format!("{alias}.{column}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_error(index: usize, detail: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, detail)),
    )
}

pub(crate) fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let task_type_text: String = row.get(4)?;
    let task_type = TaskType::parse(&task_type_text)
        .ok_or_else(|| column_error(4, format!("unrecognized task_type {task_type_text:?}")))?;
    let status_text: String = row.get(6)?;
    let status = TaskStatus::parse(&status_text)
        .ok_or_else(|| column_error(6, format!("unrecognized status {status_text:?}")))?;
    let stage_text: String = row.get(7)?;
    let lifecycle_stage = tl_core::model::LifecycleStage::parse(&stage_text)
        .ok_or_else(|| column_error(7, format!("unrecognized lifecycle_stage {stage_text:?}")))?;
    let complexity_text: String = row.get(8)?;
    let complexity = Complexity::parse(&complexity_text)
        .ok_or_else(|| column_error(8, format!("unrecognized complexity {complexity_text:?}")))?;
    let artifact_ids_text: String = row.get(16)?;
    let artifact_ids: Vec<String> = serde_json::from_str(&artifact_ids_text)
        .map_err(|err| column_error(16, format!("artifact_ids is not a JSON array: {err}")))?;

    Ok(Task {
        task_id: row.get(0)?,
        parent_task_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        task_type,
        specialist_type: row.get(5)?,
        status,
        lifecycle_stage,
        complexity,
        hierarchy_path: row.get(9)?,
        hierarchy_level: row.get(10)?,
        position_in_parent: row.get(11)?,
        estimated_effort: row.get(12)?,
        result: row.get(13)?,
        summary: row.get(14)?,
        context_json: row.get(15)?,
        artifact_ids,
        created_at_ms: row.get(17)?,
        updated_at_ms: row.get(18)?,
        started_at_ms: row.get(19)?,
        completed_at_ms: row.get(20)?,
        deleted_at_ms: row.get(21)?,
    })
}

pub(crate) fn try_load_task(
    conn: &Connection,
    task_id: &str,
) -> Result<Option<Task>, StoreError> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?1");
    let task = conn
        .query_row(&sql, params![task_id], task_from_row)
        .optional()?;
    Ok(task)
}

pub(crate) fn load_task(conn: &Connection, task_id: &str) -> Result<Task, StoreError> {
    try_load_task(conn, task_id)?.ok_or(StoreError::UnknownTask)
}

/// Applies a status transition plus its bookkeeping stamps and the
/// matching event, all inside the caller's transaction.
pub(crate) fn set_status_tx(
    tx: &Transaction<'_>,
    task: &Task,
    to: TaskStatus,
    now_ms: i64,
    triggered_by: &str,
    data: Option<&serde_json::Value>,
) -> Result<(), StoreError> {
    set_status_with_event_tx(
        tx,
        task,
        to,
        tl_core::events::status_event(to),
        now_ms,
        triggered_by,
        data,
    )
}

/// Same transition bookkeeping, but the caller names the event. Used where
/// the recorded reason is more specific than the plain status event.
pub(crate) fn set_status_with_event_tx(
    tx: &Transaction<'_>,
    task: &Task,
    to: TaskStatus,
    event_type: &str,
    now_ms: i64,
    triggered_by: &str,
    data: Option<&serde_json::Value>,
) -> Result<(), StoreError> {
    if !legal_transition(task.status, to) {
        return Err(StoreError::IllegalTransition {
            from: task.status.as_str(),
            to: to.as_str(),
        });
    }
    let sets_completed = matches!(
        to,
        TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
    );
    let sets_started = matches!(to, TaskStatus::Active);
    tx.execute(
        r#"
        UPDATE tasks SET
            status = ?2,
            lifecycle_stage = ?3,
            updated_at_ms = ?4,
            started_at_ms = CASE WHEN ?5 THEN COALESCE(started_at_ms, ?4) ELSE started_at_ms END,
            completed_at_ms = CASE WHEN ?6 THEN COALESCE(completed_at_ms, ?4) ELSE completed_at_ms END
        WHERE task_id = ?1
        "#,
        params![
            task.task_id,
            to.as_str(),
            stage_of(to).as_str(),
            now_ms,
            sets_started,
            sets_completed,
        ],
    )?;
    events::insert_event_tx(tx, &task.task_id, event_type, triggered_by, now_ms, data)?;
    Ok(())
}

pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, message) => {
            failure.code == rusqlite::ErrorCode::ConstraintViolation
                || message
                    .as_deref()
                    .is_some_and(|m| m.contains("UNIQUE") || m.contains("PRIMARY KEY"))
        }
        _ => false,
    }
}

pub(crate) fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
