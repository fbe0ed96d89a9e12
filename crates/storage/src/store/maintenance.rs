#![forbid(unsafe_code)]

use std::collections::HashMap;

use super::*;
use tl_core::model::ArtifactRecord;
use tl_core::{graph, hierarchy};

impl SqliteStore {
    /// Live tasks whose parent is gone, archived or deleted. These are
    /// reachable by id but invisible to subtree walks from the roots.
    pub fn orphaned_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let columns = task_columns("t");
        let sql = format!(
            "SELECT {columns} FROM tasks t
             LEFT JOIN tasks p ON p.task_id = t.parent_task_id
             WHERE t.deleted_at_ms IS NULL
               AND t.parent_task_id IS NOT NULL
               AND (p.task_id IS NULL OR p.status = 'archived' OR p.deleted_at_ms IS NOT NULL)
             ORDER BY t.task_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], task_from_row)?;
        let mut orphans = Vec::new();
        for row in rows {
            orphans.push(row?);
        }
        Ok(orphans)
    }

    pub fn counts_by_status(&self) -> Result<Vec<StatusCount>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM tasks
             WHERE deleted_at_ms IS NULL
             GROUP BY status ORDER BY status ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(StatusCount {
                status: row.get(0)?,
                count: row.get(1)?,
            })
        })?;
        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }

    pub fn list_artifacts(&self, task_id: Option<&str>) -> Result<Vec<ArtifactRecord>, StoreError> {
        let base = "SELECT artifact_id, task_id, artifact_type, file_path, size_bytes, digest, \
             created_at_ms FROM artifacts";
        let order = "ORDER BY created_at_ms ASC, artifact_id ASC";
        let mut records = Vec::new();
        match task_id {
            Some(task_id) => {
                let sql = format!("{base} WHERE task_id = ?1 {order}");
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt.query_map(params![task_id], artifact_from_row)?;
                for row in rows {
                    records.push(row?);
                }
            }
            None => {
                let sql = format!("{base} {order}");
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt.query_map([], artifact_from_row)?;
                for row in rows {
                    records.push(row?);
                }
            }
        }
        Ok(records)
    }

    /// Cancelled tasks whose cancellation asked for their work to go.
    /// The marker rides on the cancellation root; the sweep fans out
    /// over the cancelled subtree itself.
    pub fn unpreserved_cancelled(&self) -> Result<Vec<Task>, StoreError> {
        let columns = task_columns("t");
        let sql = format!(
            "SELECT {columns} FROM tasks t
             JOIN task_attributes a ON a.task_id = t.task_id
             WHERE a.name = 'preserve_work' AND a.value = 'false'
               AND t.status = 'cancelled'
               AND t.deleted_at_ms IS NULL
             ORDER BY t.task_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], task_from_row)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    /// Forgets a task's artifact rows and clears its id list. The files
    /// themselves are the artifact store's to remove.
    pub fn detach_artifacts(&mut self, task_id: &str) -> Result<Vec<String>, StoreError> {
        let tx = self.conn.transaction()?;
        let task = load_task(&tx, task_id)?;
        let removed = task.artifact_ids.clone();
        if !removed.is_empty() {
            tx.execute("DELETE FROM artifacts WHERE task_id = ?1", params![task_id])?;
            tx.execute(
                "UPDATE tasks SET artifact_ids = '[]', updated_at_ms = ?2 WHERE task_id = ?1",
                params![task_id, now_ms()],
            )?;
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Drops old events of archived tasks, keeping the newest
    /// `retain_per_task` per task. Returns how many rows went away.
    pub fn prune_events(&mut self, retain_per_task: usize) -> Result<usize, StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM events WHERE seq IN (
                 SELECT seq FROM (
                     SELECT e.seq AS seq,
                            ROW_NUMBER() OVER (PARTITION BY e.task_id ORDER BY e.seq DESC) AS rn
                     FROM events e
                     JOIN tasks t ON t.task_id = e.task_id
                     WHERE t.status = 'archived'
                 ) WHERE rn > ?1
             )",
            params![retain_per_task as i64],
        )?;
        Ok(deleted)
    }

    /// Read-only structural audit. Every finding names the offending task
    /// and the check that caught it; callers decide which checks matter
    /// for their validation level.
    pub fn invariant_scan(&self, scope: &ScanScope) -> Result<Vec<Violation>, StoreError> {
        let all = self.load_all_tasks()?;
        let by_id: HashMap<&str, &Task> = all.iter().map(|t| (t.task_id.as_str(), t)).collect();
        let edges = self.load_all_edges()?;

        let in_scope = |task: &Task| -> bool {
            if let Some(prefix) = &scope.path_prefix {
                let subtree = task.hierarchy_path == *prefix
                    || hierarchy::is_strict_descendant(&task.hierarchy_path, prefix);
                if !subtree {
                    return false;
                }
            }
            if let Some(since) = scope.updated_since_ms
                && task.updated_at_ms < since
            {
                return false;
            }
            true
        };

        let mut violations = Vec::new();
        for task in all.iter().filter(|t| in_scope(t)) {
            self.check_parent(task, &by_id, &mut violations);
            self.check_path(task, &by_id, &mut violations);
            self.check_stage(task, &mut violations);
            self.check_timestamps(task, &mut violations);
        }
        self.check_self_edges(&edges, &mut violations);
        self.check_cycles(&all, &edges, &mut violations);
        self.check_event_coverage(scope, &mut violations)?;
        self.check_artifact_refs(&all, &in_scope, &mut violations)?;
        self.check_edge_statuses(&by_id, &mut violations)?;

        violations.sort_by(|a, b| a.task_id.cmp(&b.task_id).then(a.check.cmp(b.check)));
        Ok(violations)
    }

    fn load_all_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY task_id ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], task_from_row)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    fn load_all_edges(&self) -> Result<Vec<(String, String)>, StoreError> {
        deps::all_edges_tx(&self.conn)
    }

    fn check_parent(
        &self,
        task: &Task,
        by_id: &HashMap<&str, &Task>,
        violations: &mut Vec<Violation>,
    ) {
        let Some(parent_id) = task.parent_task_id.as_deref() else {
            return;
        };
        match by_id.get(parent_id) {
            None => violations.push(Violation {
                task_id: task.task_id.clone(),
                check: "parent_exists",
                detail: format!("parent {parent_id} does not exist"),
            }),
            Some(parent) => {
                if task.deleted_at_ms.is_none()
                    && (parent.deleted_at_ms.is_some() || parent.status == TaskStatus::Archived)
                {
                    violations.push(Violation {
                        task_id: task.task_id.clone(),
                        check: "parent_live",
                        detail: format!("parent {parent_id} is archived or deleted"),
                    });
                }
            }
        }
    }

    fn check_path(
        &self,
        task: &Task,
        by_id: &HashMap<&str, &Task>,
        violations: &mut Vec<Violation>,
    ) {
        let parent_path = task
            .parent_task_id
            .as_deref()
            .and_then(|id| by_id.get(id))
            .map(|p| p.hierarchy_path.as_str());
        let expected_path = hierarchy::child_path(parent_path, &task.task_id);
        if task.hierarchy_path != expected_path {
            violations.push(Violation {
                task_id: task.task_id.clone(),
                check: "hierarchy_path",
                detail: format!(
                    "path is `{}`, expected `{expected_path}`",
                    task.hierarchy_path
                ),
            });
        }
        let expected_level = hierarchy::level_of(&expected_path);
        if task.hierarchy_level != expected_level {
            violations.push(Violation {
                task_id: task.task_id.clone(),
                check: "hierarchy_level",
                detail: format!(
                    "level is {}, expected {expected_level}",
                    task.hierarchy_level
                ),
            });
        }
    }

    fn check_stage(&self, task: &Task, violations: &mut Vec<Violation>) {
        let expected = tl_core::lifecycle::stage_of(task.status);
        if task.lifecycle_stage != expected {
            violations.push(Violation {
                task_id: task.task_id.clone(),
                check: "lifecycle_stage",
                detail: format!(
                    "stage is {}, expected {} for status {}",
                    task.lifecycle_stage.as_str(),
                    expected.as_str(),
                    task.status.as_str()
                ),
            });
        }
    }

    fn check_timestamps(&self, task: &Task, violations: &mut Vec<Violation>) {
        if task.created_at_ms > task.updated_at_ms {
            violations.push(Violation {
                task_id: task.task_id.clone(),
                check: "timestamps_ordered",
                detail: format!(
                    "created_at {} is after updated_at {}",
                    task.created_at_ms, task.updated_at_ms
                ),
            });
        }
        let terminal_needs_completed = matches!(
            task.status,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        );
        if terminal_needs_completed && task.completed_at_ms.is_none() {
            violations.push(Violation {
                task_id: task.task_id.clone(),
                check: "completed_at_set",
                detail: format!("status {} but completed_at is unset", task.status.as_str()),
            });
        }
    }

    fn check_self_edges(&self, edges: &[(String, String)], violations: &mut Vec<Violation>) {
        for (dependent, prerequisite) in edges {
            if dependent == prerequisite {
                violations.push(Violation {
                    task_id: dependent.clone(),
                    check: "no_self_edge",
                    detail: "task depends on itself".to_string(),
                });
            }
        }
    }

    fn check_cycles(
        &self,
        all: &[Task],
        edges: &[(String, String)],
        violations: &mut Vec<Violation>,
    ) {
        let nodes: Vec<String> = all.iter().map(|t| t.task_id.clone()).collect();
        if let Err(graph::OrderError::Cycle { remaining }) = graph::execution_order(&nodes, edges) {
            violations.push(Violation {
                task_id: remaining.first().cloned().unwrap_or_default(),
                check: "acyclic_dependencies",
                detail: format!("dependency cycle among: {}", remaining.join(", ")),
            });
        }
    }

    /// Only meaningful on unrestricted scans; a scoped scan skips it
    /// rather than reporting tasks outside the scope.
    fn check_event_coverage(
        &self,
        scope: &ScanScope,
        violations: &mut Vec<Violation>,
    ) -> Result<(), StoreError> {
        if scope.path_prefix.is_some() || scope.updated_since_ms.is_some() {
            return Ok(());
        }
        let mut stmt = self.conn.prepare(
            "SELECT t.task_id FROM tasks t
             WHERE NOT EXISTS (SELECT 1 FROM events e WHERE e.task_id = t.task_id)
             ORDER BY t.task_id ASC",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for row in rows {
            violations.push(Violation {
                task_id: row?,
                check: "event_trail",
                detail: "task has no events, not even audit:created".to_string(),
            });
        }
        Ok(())
    }

    fn check_artifact_refs(
        &self,
        all: &[Task],
        in_scope: &dyn Fn(&Task) -> bool,
        violations: &mut Vec<Violation>,
    ) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare("SELECT artifact_id FROM artifacts")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut known = std::collections::HashSet::new();
        for row in rows {
            known.insert(row?);
        }
        for task in all.iter().filter(|t| in_scope(t)) {
            for artifact_id in &task.artifact_ids {
                if !known.contains(artifact_id) {
                    violations.push(Violation {
                        task_id: task.task_id.clone(),
                        check: "artifact_recorded",
                        detail: format!("artifact_ids references unknown artifact {artifact_id}"),
                    });
                }
            }
        }
        Ok(())
    }

    fn check_edge_statuses(
        &self,
        by_id: &HashMap<&str, &Task>,
        violations: &mut Vec<Violation>,
    ) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT dependent_task_id, prerequisite_task_id, status FROM dependencies
             WHERE status = 'satisfied'
             ORDER BY dependent_task_id ASC, prerequisite_task_id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (dependent, prerequisite) = row?;
            let completed = by_id
                .get(prerequisite.as_str())
                .is_some_and(|p| p.status == TaskStatus::Completed);
            if !completed {
                violations.push(Violation {
                    task_id: dependent,
                    check: "edge_status",
                    detail: format!(
                        "edge from {prerequisite} is satisfied but the prerequisite never completed"
                    ),
                });
            }
        }
        Ok(())
    }
}

fn artifact_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ArtifactRecord> {
    let type_raw: String = row.get(2)?;
    Ok(ArtifactRecord {
        artifact_id: row.get(0)?,
        task_id: row.get(1)?,
        artifact_type: tl_core::model::ArtifactType::parse(&type_raw)
            .ok_or_else(|| column_error(2, format!("unknown artifact type `{type_raw}`")))?,
        file_path: row.get(3)?,
        size_bytes: row.get(4)?,
        digest: row.get(5)?,
        created_at_ms: row.get(6)?,
    })
}
