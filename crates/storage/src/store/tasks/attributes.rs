#![forbid(unsafe_code)]

use super::super::*;
use tl_core::model::TaskAttribute;

const MAX_ATTRIBUTE_NAME_LEN: usize = 64;
const MAX_ATTRIBUTE_VALUE_LEN: usize = 4096;

fn validate_attribute(name: &str, value: &str) -> Result<(), StoreError> {
    if name.trim().is_empty() {
        return Err(StoreError::InvalidInput("attribute name must not be empty"));
    }
    if name.chars().count() > MAX_ATTRIBUTE_NAME_LEN {
        return Err(StoreError::InvalidInput("attribute name is too long"));
    }
    if value.chars().count() > MAX_ATTRIBUTE_VALUE_LEN {
        return Err(StoreError::InvalidInput("attribute value is too long"));
    }
    Ok(())
}

pub(in crate::store) fn upsert_attribute_tx(
    tx: &Transaction<'_>,
    task_id: &str,
    name: &str,
    value: &str,
    indexed: bool,
) -> Result<(), StoreError> {
    validate_attribute(name, value)?;
    tx.execute(
        "INSERT INTO task_attributes(task_id, name, value, indexed)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(task_id, name) DO UPDATE SET
            value = excluded.value,
            indexed = excluded.indexed",
        params![task_id, name, value, indexed as i64],
    )?;
    Ok(())
}

impl SqliteStore {
    pub fn set_attributes(
        &mut self,
        task_id: &str,
        attributes: &[AttributeSpec],
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        load_task(&tx, task_id)?;
        for attribute in attributes {
            upsert_attribute_tx(&tx, task_id, &attribute.name, &attribute.value, attribute.indexed)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_attributes(&self, task_id: &str) -> Result<Vec<TaskAttribute>, StoreError> {
        load_task(&self.conn, task_id)?;
        let mut stmt = self.conn.prepare(
            "SELECT task_id, name, value, indexed FROM task_attributes
             WHERE task_id = ?1 ORDER BY name ASC",
        )?;
        let rows = stmt.query_map(params![task_id], |row| {
            Ok(TaskAttribute {
                task_id: row.get(0)?,
                name: row.get(1)?,
                value: row.get(2)?,
                indexed: row.get::<_, i64>(3)? != 0,
            })
        })?;
        let mut attributes = Vec::new();
        for row in rows {
            attributes.push(row?);
        }
        Ok(attributes)
    }

    /// Lookup over indexed attributes only; non-indexed attributes are
    /// payload, not query surface.
    pub fn search_by_attribute(&self, name: &str, value: &str) -> Result<Vec<Task>, StoreError> {
        let columns = task_columns("t");
        let sql = format!(
            "SELECT {columns} FROM tasks t
             JOIN task_attributes a ON a.task_id = t.task_id
             WHERE a.name = ?1 AND a.value = ?2 AND a.indexed = 1
               AND t.deleted_at_ms IS NULL
             ORDER BY t.created_at_ms ASC, t.task_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![name, value], task_from_row)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }
}
