#![forbid(unsafe_code)]

use super::super::*;

const EMBEDDED_EVENTS_LIMIT: usize = 50;

impl SqliteStore {
    pub fn get_task(
        &self,
        task_id: &str,
        include_children: bool,
        include_events: bool,
    ) -> Result<TaskView, StoreError> {
        let task = load_task(&self.conn, task_id)?;
        let children = if include_children {
            Some(self.children_of(task_id)?)
        } else {
            None
        };
        let events = if include_events {
            Some(self.list_events(task_id, None, EMBEDDED_EVENTS_LIMIT)?)
        } else {
            None
        };
        Ok(TaskView {
            task,
            children,
            events,
        })
    }

    pub fn children_of(&self, task_id: &str) -> Result<Vec<Task>, StoreError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE parent_task_id = ?1 AND deleted_at_ms IS NULL
             ORDER BY position_in_parent ASC, task_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![task_id], task_from_row)?;
        let mut children = Vec::new();
        for row in rows {
            children.push(row?);
        }
        Ok(children)
    }

    /// Root plus every live descendant, in path order. Path order groups a
    /// subtree under its root, so callers can render the tree by indenting
    /// on `hierarchy_level`.
    pub fn get_subtree(&self, task_id: &str) -> Result<Vec<Task>, StoreError> {
        let root = load_task(&self.conn, task_id)?;
        let prefix = format!("{}/", root.hierarchy_path);
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE (task_id = ?1 OR substr(hierarchy_path, 1, length(?2)) = ?2)
               AND deleted_at_ms IS NULL
             ORDER BY hierarchy_path ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![task_id, prefix], task_from_row)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }
}
