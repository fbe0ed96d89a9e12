#![forbid(unsafe_code)]

use super::{StoreError, now_ms};
use rusqlite::{Connection, OptionalExtension, Transaction, params};

pub(crate) const SCHEMA_VERSION: i64 = 2;

struct Migration {
    version: i64,
    apply: fn(&Transaction<'_>) -> Result<(), StoreError>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        apply: migrate_v1,
    },
    Migration {
        version: 2,
        apply: migrate_v2,
    },
];

/// Brings the database forward to `SCHEMA_VERSION`. Each migration runs in
/// its own transaction, so a failure leaves the database at the previous
/// version. A database written by a newer binary is refused untouched.
pub(crate) fn migrate(conn: &mut Connection) -> Result<(), StoreError> {
    let current = current_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(StoreError::SchemaIncompatible {
            found: current,
            expected: SCHEMA_VERSION,
        });
    }
    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        let tx = conn.transaction()?;
        (migration.apply)(&tx)?;
        set_version_tx(&tx, migration.version)?;
        tx.commit()?;
    }
    Ok(())
}

fn current_version(conn: &Connection) -> Result<i64, StoreError> {
    let has_state: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'store_state'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if has_state.is_none() {
        return Ok(0);
    }
    let version: Option<i64> = conn
        .query_row(
            "SELECT schema_version FROM store_state WHERE singleton = 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version.unwrap_or(0))
}

fn set_version_tx(tx: &Transaction<'_>, version: i64) -> Result<(), StoreError> {
    let now = now_ms();
    tx.execute(
        r#"
        INSERT INTO store_state(singleton, schema_version, maintenance_mode, created_at_ms, updated_at_ms)
        VALUES (1, ?1, 0, ?2, ?2)
        ON CONFLICT(singleton) DO UPDATE SET
            schema_version = excluded.schema_version,
            updated_at_ms = excluded.updated_at_ms
        "#,
        params![version, now],
    )?;
    Ok(())
}

fn migrate_v1(tx: &Transaction<'_>) -> Result<(), StoreError> {
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS store_state (
            singleton INTEGER PRIMARY KEY CHECK (singleton = 1),
            schema_version INTEGER NOT NULL,
            maintenance_mode INTEGER NOT NULL DEFAULT 0,
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS counters (
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tasks (
            task_id TEXT PRIMARY KEY,
            parent_task_id TEXT REFERENCES tasks(task_id),
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            task_type TEXT NOT NULL,
            specialist_type TEXT NOT NULL,
            status TEXT NOT NULL,
            lifecycle_stage TEXT NOT NULL,
            complexity TEXT NOT NULL,
            hierarchy_path TEXT NOT NULL UNIQUE,
            hierarchy_level INTEGER NOT NULL,
            position_in_parent INTEGER NOT NULL,
            estimated_effort TEXT,
            result TEXT,
            summary TEXT,
            context_json TEXT,
            artifact_ids TEXT NOT NULL DEFAULT '[]',
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL,
            started_at_ms INTEGER,
            completed_at_ms INTEGER,
            deleted_at_ms INTEGER
        );

        CREATE TABLE IF NOT EXISTS dependencies (
            dependent_task_id TEXT NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
            prerequisite_task_id TEXT NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
            dependency_type TEXT NOT NULL,
            mandatory INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at_ms INTEGER NOT NULL,
            PRIMARY KEY (dependent_task_id, prerequisite_task_id)
        );

        CREATE TABLE IF NOT EXISTS events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
            event_type TEXT NOT NULL,
            triggered_by TEXT NOT NULL DEFAULT 'system',
            timestamp_ms INTEGER NOT NULL,
            data_json TEXT
        );

        CREATE TABLE IF NOT EXISTS artifacts (
            artifact_id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
            artifact_type TEXT NOT NULL,
            file_path TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            digest TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS task_attributes (
            task_id TEXT NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (task_id, name)
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
        CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent_task_id);
        CREATE INDEX IF NOT EXISTS idx_tasks_path ON tasks(hierarchy_path);
        CREATE INDEX IF NOT EXISTS idx_events_task_ts ON events(task_id, timestamp_ms);
        CREATE INDEX IF NOT EXISTS idx_deps_prerequisite ON dependencies(prerequisite_task_id);
        CREATE INDEX IF NOT EXISTS idx_artifacts_task ON artifacts(task_id);
        "#,
    )?;
    Ok(())
}

fn migrate_v2(tx: &Transaction<'_>) -> Result<(), StoreError> {
    add_column_if_missing(tx, "task_attributes", "indexed", "INTEGER NOT NULL DEFAULT 0")?;
    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_attributes_name_value
             ON task_attributes(name, value) WHERE indexed = 1;",
    )?;
    Ok(())
}

fn add_column_if_missing(
    tx: &Transaction<'_>,
    table: &str,
    column: &str,
    decl: &str,
) -> Result<(), StoreError> {
    let sql = format!("ALTER TABLE {table} ADD COLUMN {column} {decl}");
    match tx.execute(&sql, []) {
        Ok(_) => Ok(()),
        Err(err) if is_duplicate_column(&err) => Ok(()),
        Err(err) => Err(StoreError::Sql(err)),
    }
}

fn is_duplicate_column(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(message)) => {
            message.contains("duplicate column name")
        }
        _ => false,
    }
}
