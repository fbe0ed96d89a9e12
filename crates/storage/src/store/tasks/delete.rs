#![forbid(unsafe_code)]

use super::super::*;
use tl_core::model::TaskStatus;

impl SqliteStore {
    /// Soft delete archives the task and stamps `deleted_at`; descendants
    /// stay in place and drop out of the ready set through the ancestor
    /// rule. Hard delete removes the whole subtree, deepest rows first so
    /// the parent foreign key never trips.
    pub fn delete_task(&mut self, request: DeleteTaskRequest) -> Result<DeleteOutcome, StoreError> {
        let DeleteTaskRequest {
            task_id,
            soft,
            force,
            triggered_by,
        } = request;

        let now = now_ms();
        let tx = self.conn.transaction()?;
        let task = load_task(&tx, &task_id)?;

        if soft {
            if task.deleted_at_ms.is_some() {
                tx.commit()?;
                return Ok(DeleteOutcome {
                    removed_task_ids: Vec::new(),
                    soft: true,
                });
            }
            if task.status != TaskStatus::Archived {
                set_status_tx(&tx, &task, TaskStatus::Archived, now, &triggered_by, None)?;
            }
            tx.execute(
                "UPDATE tasks SET deleted_at_ms = ?2, updated_at_ms = ?3 WHERE task_id = ?1",
                params![task_id, now, now],
            )?;
            tx.commit()?;
            return Ok(DeleteOutcome {
                removed_task_ids: vec![task_id],
                soft: true,
            });
        }

        let prefix = format!("{}/", task.hierarchy_path);
        let mut stmt = tx.prepare(
            "SELECT task_id FROM tasks
             WHERE task_id = ?1 OR substr(hierarchy_path, 1, length(?2)) = ?2
             ORDER BY hierarchy_level DESC, task_id ASC",
        )?;
        let rows = stmt.query_map(params![task_id, prefix], |row| row.get::<_, String>(0))?;
        let mut subtree: Vec<String> = Vec::new();
        for row in rows {
            subtree.push(row?);
        }
        drop(stmt);

        let dependents: i64 = tx.query_row(
            r#"
            SELECT COUNT(*) FROM dependencies d
            JOIN tasks dep ON dep.task_id = d.dependent_task_id
            JOIN tasks pre ON pre.task_id = d.prerequisite_task_id
            WHERE (pre.task_id = ?1 OR substr(pre.hierarchy_path, 1, length(?2)) = ?2)
              AND NOT (dep.task_id = ?1 OR substr(dep.hierarchy_path, 1, length(?2)) = ?2)
              AND dep.status <> 'archived'
            "#,
            params![task_id, prefix],
            |row| row.get(0),
        )?;
        if dependents > 0 && !force {
            return Err(StoreError::HasDependents {
                count: dependents as usize,
            });
        }

        for id in &subtree {
            tx.execute("DELETE FROM tasks WHERE task_id = ?1", params![id])?;
        }

        tx.commit()?;
        Ok(DeleteOutcome {
            removed_task_ids: subtree,
            soft: false,
        })
    }
}
