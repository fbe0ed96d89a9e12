#![forbid(unsafe_code)]

use super::super::*;
use super::create::{check_sibling_count, ensure_parent, next_position};
use crate::store::events::insert_event_tx;
use serde_json::json;
use tl_core::events::EVENT_MOVED;
use tl_core::hierarchy;

impl SqliteStore {
    /// Reparents a task and rewrites `hierarchy_path`/`hierarchy_level`
    /// for its whole subtree in one statement. Soft-deleted descendants
    /// are rebased too so their paths stay consistent with the tree.
    pub fn move_task(&mut self, request: MoveTaskRequest) -> Result<Task, StoreError> {
        let MoveTaskRequest {
            task_id,
            new_parent_task_id,
            position,
            triggered_by,
        } = request;

        let max_depth = self.limits.max_depth;
        let max_subtasks = self.limits.max_subtasks;
        let now = now_ms();
        let tx = self.conn.transaction()?;

        let task = load_task(&tx, &task_id)?;
        if task.deleted_at_ms.is_some() {
            return Err(StoreError::InvalidInput("task is deleted"));
        }

        let new_parent = match new_parent_task_id.as_deref() {
            Some(parent_id) => {
                if parent_id == task_id {
                    return Err(StoreError::CycleDetected);
                }
                let parent = ensure_parent(&tx, parent_id)?;
                if hierarchy::is_strict_descendant(&parent.hierarchy_path, &task.hierarchy_path) {
                    return Err(StoreError::CycleDetected);
                }
                Some(parent)
            }
            None => None,
        };

        let old_path = task.hierarchy_path.clone();
        let old_prefix = format!("{old_path}/");
        let subtree_max_level: i64 = tx.query_row(
            "SELECT COALESCE(MAX(hierarchy_level), ?3) FROM tasks
             WHERE task_id = ?1 OR substr(hierarchy_path, 1, length(?2)) = ?2",
            params![task_id, old_prefix, task.hierarchy_level],
            |row| row.get(0),
        )?;
        let new_level = new_parent
            .as_ref()
            .map(|p| p.hierarchy_level + 1)
            .unwrap_or(0);
        let level_shift = new_level - task.hierarchy_level;
        if subtree_max_level + level_shift >= max_depth as i64 {
            return Err(StoreError::DepthExceeded { max: max_depth });
        }

        let parent_changed = task.parent_task_id.as_deref() != new_parent_task_id.as_deref();
        if parent_changed && let Some(parent) = &new_parent {
            check_sibling_count(&tx, &parent.task_id, max_subtasks)?;
        }

        let new_position = match position {
            Some(requested) => requested.max(0),
            None => next_position(&tx, new_parent_task_id.as_deref())?,
        };
        let new_path = hierarchy::child_path(
            new_parent.as_ref().map(|p| p.hierarchy_path.as_str()),
            &task_id,
        );

        if new_path != old_path {
            tx.execute(
                "UPDATE tasks
                 SET hierarchy_path = ?1 || substr(hierarchy_path, length(?2) + 1),
                     hierarchy_level = hierarchy_level + ?3,
                     updated_at_ms = ?4
                 WHERE task_id = ?5 OR substr(hierarchy_path, 1, length(?6)) = ?6",
                params![new_path, old_path, level_shift, now, task_id, old_prefix],
            )?;
        }
        tx.execute(
            "UPDATE tasks
             SET parent_task_id = ?2, position_in_parent = ?3, updated_at_ms = ?4
             WHERE task_id = ?1",
            params![task_id, new_parent_task_id, new_position, now],
        )?;

        insert_event_tx(
            &tx,
            &task_id,
            EVENT_MOVED,
            &triggered_by,
            now,
            Some(&json!({
                "from_parent": task.parent_task_id,
                "to_parent": new_parent_task_id,
                "from_path": old_path,
                "to_path": new_path,
            })),
        )?;

        let moved = load_task(&tx, &task_id)?;
        tx.commit()?;
        Ok(moved)
    }
}
