#![forbid(unsafe_code)]

use super::*;
use serde_json::Value as JsonValue;
use tl_core::model::TaskEvent;

const MAX_EVENT_LIMIT: usize = 500;

pub(crate) fn insert_event_tx(
    tx: &Transaction<'_>,
    task_id: &str,
    event_type: &str,
    triggered_by: &str,
    timestamp_ms: i64,
    data: Option<&JsonValue>,
) -> Result<i64, StoreError> {
    let data_json = data.map(|v| v.to_string());
    tx.execute(
        r#"
        INSERT INTO events(task_id, event_type, triggered_by, timestamp_ms, data_json)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![task_id, event_type, triggered_by, timestamp_ms, data_json],
    )?;
    Ok(tx.last_insert_rowid())
}

fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskEvent> {
    Ok(TaskEvent {
        seq: row.get(0)?,
        task_id: row.get(1)?,
        event_type: row.get(2)?,
        triggered_by: row.get(3)?,
        timestamp_ms: row.get(4)?,
        data_json: row.get(5)?,
    })
}

impl SqliteStore {
    /// Events for one task, newest first. `category` filters on the
    /// `category:` prefix of the event type.
    pub fn list_events(
        &self,
        task_id: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TaskEvent>, StoreError> {
        let limit = limit.clamp(1, MAX_EVENT_LIMIT) as i64;
        let mut events = Vec::new();
        match category {
            Some(cat) => {
                let mut stmt = self.conn.prepare(
                    "SELECT seq, task_id, event_type, triggered_by, timestamp_ms, data_json
                     FROM events
                     WHERE task_id = ?1 AND substr(event_type, 1, length(?2) + 1) = ?2 || ':'
                     ORDER BY seq DESC LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![task_id, cat, limit], event_from_row)?;
                for row in rows {
                    events.push(row?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT seq, task_id, event_type, triggered_by, timestamp_ms, data_json
                     FROM events WHERE task_id = ?1 ORDER BY seq DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![task_id, limit], event_from_row)?;
                for row in rows {
                    events.push(row?);
                }
            }
        }
        Ok(events)
    }

    /// Appends an audit event that changes no task fields, such as a
    /// specialist fallback note.
    pub fn record_event(
        &mut self,
        task_id: &str,
        event_type: &str,
        triggered_by: &str,
        data: Option<&JsonValue>,
    ) -> Result<i64, StoreError> {
        let now = now_ms();
        let tx = self.conn.transaction()?;
        load_task(&tx, task_id)?;
        let seq = insert_event_tx(&tx, task_id, event_type, triggered_by, now, data)?;
        tx.commit()?;
        Ok(seq)
    }

    /// Total number of recorded events for a task.
    pub fn count_events(&self, task_id: &str) -> Result<i64, StoreError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM events WHERE task_id = ?1",
            params![task_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
