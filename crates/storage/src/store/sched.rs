#![forbid(unsafe_code)]

use super::*;
use serde_json::json;
use tl_core::events::EVENT_REVISION_REQUESTED;
use tl_core::model::ArtifactType;

/// Ready predicate over alias `t`: schedulable status, not deleted, no
/// blocking mandatory prerequisite, no cancelled or archived ancestor.
/// A prerequisite blocks while it still represents runnable work; edges
/// marked satisfied or waived never block.
const READY_WHERE: &str = "t.status IN ('pending', 'blocked')
   AND t.deleted_at_ms IS NULL
   AND NOT EXISTS (
       SELECT 1 FROM dependencies d
       JOIN tasks p ON p.task_id = d.prerequisite_task_id
       WHERE d.dependent_task_id = t.task_id
         AND d.mandatory = 1
         AND d.status NOT IN ('satisfied', 'waived')
         AND p.status IN ('pending', 'active', 'in_progress', 'blocked', 'failed')
   )
   AND NOT EXISTS (
       SELECT 1 FROM tasks a
       WHERE a.status IN ('cancelled', 'archived')
         AND substr(t.hierarchy_path, 1, length(a.hierarchy_path) + 1) = a.hierarchy_path || '/'
   )";

const READY_ORDER: &str = "ORDER BY t.hierarchy_level ASC, t.created_at_ms ASC, t.task_id ASC";

fn unmet_prerequisites_tx(conn: &Connection, task_id: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT d.prerequisite_task_id FROM dependencies d
         JOIN tasks p ON p.task_id = d.prerequisite_task_id
         WHERE d.dependent_task_id = ?1
           AND d.mandatory = 1
           AND d.status NOT IN ('satisfied', 'waived')
           AND p.status IN ('pending', 'active', 'in_progress', 'blocked', 'failed')
         ORDER BY d.prerequisite_task_id ASC",
    )?;
    let rows = stmt.query_map(params![task_id], |row| row.get::<_, String>(0))?;
    let mut unmet = Vec::new();
    for row in rows {
        unmet.push(row?);
    }
    Ok(unmet)
}

fn blocking_ancestor_tx(
    conn: &Connection,
    task: &Task,
) -> Result<Option<(String, String)>, StoreError> {
    let found = conn
        .query_row(
            "SELECT a.task_id, a.status FROM tasks a
             WHERE a.status IN ('cancelled', 'archived')
               AND substr(?1, 1, length(a.hierarchy_path) + 1) = a.hierarchy_path || '/'
             ORDER BY a.hierarchy_level ASC LIMIT 1",
            params![task.hierarchy_path],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(found)
}

fn newly_ready_dependents_tx(
    conn: &Connection,
    prerequisite_id: &str,
) -> Result<Vec<String>, StoreError> {
    let sql = format!(
        "SELECT t.task_id FROM tasks t
         WHERE t.task_id IN (
             SELECT dependent_task_id FROM dependencies WHERE prerequisite_task_id = ?1
         )
           AND {READY_WHERE}
         {READY_ORDER}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![prerequisite_id], |row| row.get::<_, String>(0))?;
    let mut ready = Vec::new();
    for row in rows {
        ready.push(row?);
    }
    Ok(ready)
}

fn parent_progress_tx(
    conn: &Connection,
    parent_id: Option<&str>,
) -> Result<Option<ParentProgress>, StoreError> {
    let Some(parent_id) = parent_id else {
        return Ok(None);
    };
    let (total, completed): (i64, i64) = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0)
         FROM tasks WHERE parent_task_id = ?1 AND deleted_at_ms IS NULL",
        params![parent_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(Some(ParentProgress {
        parent_task_id: parent_id.to_string(),
        completed_children: completed,
        total_children: total,
    }))
}

/// The failure side of the contract: mandatory pending edges out of the
/// failed task flip to failed, and dependents caught running stop at
/// blocked. Pending dependents stay pending; the failed prerequisite
/// alone keeps them out of the ready set. Every transition into failed
/// runs this, whichever operation performed the transition.
pub(in crate::store) fn propagate_failure_tx(
    tx: &Transaction<'_>,
    task_id: &str,
    now_ms: i64,
    triggered_by: &str,
) -> Result<Vec<String>, StoreError> {
    tx.execute(
        "UPDATE dependencies SET status = 'failed'
         WHERE prerequisite_task_id = ?1 AND mandatory = 1 AND status = 'pending'",
        params![task_id],
    )?;

    let columns = task_columns("t");
    let sql = format!(
        "SELECT {columns} FROM tasks t
         WHERE t.task_id IN (
             SELECT dependent_task_id FROM dependencies
             WHERE prerequisite_task_id = ?1 AND mandatory = 1
         )
           AND t.status IN ('active', 'in_progress')
           AND t.deleted_at_ms IS NULL
         ORDER BY t.task_id ASC"
    );
    let mut stmt = tx.prepare(&sql)?;
    let rows = stmt.query_map(params![task_id], task_from_row)?;
    let mut dependents = Vec::new();
    for row in rows {
        dependents.push(row?);
    }
    drop(stmt);

    let mut blocked = Vec::new();
    for dependent in &dependents {
        set_status_tx(
            tx,
            dependent,
            TaskStatus::Blocked,
            now_ms,
            triggered_by,
            Some(&json!({ "blocked_by": task_id })),
        )?;
        blocked.push(dependent.task_id.clone());
    }
    Ok(blocked)
}

/// Records finalized artifact rows and folds their ids into the task's
/// `artifact_ids`. Returns the merged id list.
fn attach_artifacts_tx(
    tx: &Transaction<'_>,
    task: &Task,
    artifacts: &[ArtifactAttachment],
    now_ms: i64,
) -> Result<Vec<String>, StoreError> {
    let mut artifact_ids = task.artifact_ids.clone();
    for attachment in artifacts {
        if ArtifactType::parse(&attachment.artifact_type).is_none() {
            return Err(StoreError::InvalidInput("unknown artifact type"));
        }
        tx.execute(
            "INSERT INTO artifacts(
                artifact_id, task_id, artifact_type, file_path, size_bytes, digest, created_at_ms
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(artifact_id) DO NOTHING",
            params![
                attachment.artifact_id,
                task.task_id,
                attachment.artifact_type,
                attachment.file_path,
                attachment.size_bytes,
                attachment.digest,
                now_ms,
            ],
        )?;
        if !artifact_ids.contains(&attachment.artifact_id) {
            artifact_ids.push(attachment.artifact_id.clone());
        }
    }
    if !artifacts.is_empty() {
        let encoded = serde_json::to_string(&artifact_ids)?;
        tx.execute(
            "UPDATE tasks SET artifact_ids = ?2 WHERE task_id = ?1",
            params![task.task_id, encoded],
        )?;
    }
    Ok(artifact_ids)
}

impl SqliteStore {
    /// Tasks the scheduler may hand out right now, in a deterministic
    /// total order: shallower first, then older, then by id. `parent`
    /// restricts to that task's subtree, `specialist` to one role.
    pub fn ready_tasks(
        &self,
        parent: Option<&str>,
        specialist: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Task>, StoreError> {
        let limit = limit.min(MAX_QUERY_LIMIT);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let subtree_prefix = match parent {
            Some(parent_id) => {
                let parent = load_task(&self.conn, parent_id)?;
                Some(format!("{}/", parent.hierarchy_path))
            }
            None => None,
        };

        let mut clauses = vec![READY_WHERE.to_string()];
        let mut sql_params: Vec<rusqlite::types::Value> =
            vec![rusqlite::types::Value::Integer(limit as i64)];
        if let Some(prefix) = subtree_prefix {
            sql_params.push(rusqlite::types::Value::Text(prefix));
            let at = sql_params.len();
            clauses.push(format!(
                "substr(t.hierarchy_path, 1, length(?{at})) = ?{at}"
            ));
        }
        if let Some(specialist) = specialist {
            sql_params.push(rusqlite::types::Value::Text(specialist.to_string()));
            clauses.push(format!("t.specialist_type = ?{}", sql_params.len()));
        }

        let columns = task_columns("t");
        let sql = format!(
            "SELECT {columns} FROM tasks t
             WHERE {}
             {READY_ORDER}
             LIMIT ?1",
            clauses.join(" AND ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(sql_params.iter().cloned()),
            task_from_row,
        )?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    /// Claims a ready task. Readiness is re-checked inside the transaction
    /// so a stale `ready_tasks` answer can never start unready work.
    pub fn begin(&mut self, task_id: &str, triggered_by: &str) -> Result<Task, StoreError> {
        let now = now_ms();
        let tx = self.conn.transaction()?;

        let task = load_task(&tx, task_id)?;
        if task.deleted_at_ms.is_some() {
            return Err(StoreError::NotReady {
                reason: "task is deleted".to_string(),
            });
        }
        if !matches!(task.status, TaskStatus::Pending | TaskStatus::Blocked) {
            return Err(StoreError::NotReady {
                reason: format!("task is {}", task.status.as_str()),
            });
        }
        let unmet = unmet_prerequisites_tx(&tx, task_id)?;
        if !unmet.is_empty() {
            return Err(StoreError::DependencyUnsatisfied {
                task_id: task_id.to_string(),
                unmet,
            });
        }
        if let Some((ancestor_id, ancestor_status)) = blocking_ancestor_tx(&tx, &task)? {
            return Err(StoreError::NotReady {
                reason: format!("ancestor {ancestor_id} is {ancestor_status}"),
            });
        }

        set_status_tx(&tx, &task, TaskStatus::Active, now, triggered_by, None)?;
        let started = load_task(&tx, task_id)?;
        tx.commit()?;
        Ok(started)
    }

    /// Marks work as underway. Calling it again while already in progress
    /// only refreshes the summary; no duplicate event is written.
    pub fn progress(
        &mut self,
        task_id: &str,
        summary: Option<&str>,
        triggered_by: &str,
    ) -> Result<Task, StoreError> {
        let now = now_ms();
        let tx = self.conn.transaction()?;

        let task = load_task(&tx, task_id)?;
        if task.deleted_at_ms.is_some() {
            return Err(StoreError::InvalidInput("task is deleted"));
        }
        if let Some(summary) = summary {
            tx.execute(
                "UPDATE tasks SET summary = ?2, updated_at_ms = ?3 WHERE task_id = ?1",
                params![task_id, summary, now],
            )?;
        }
        if task.status != TaskStatus::InProgress {
            let data = summary.map(|s| json!({ "summary": s }));
            set_status_tx(
                &tx,
                &task,
                TaskStatus::InProgress,
                now,
                triggered_by,
                data.as_ref(),
            )?;
        }
        let updated = load_task(&tx, task_id)?;
        tx.commit()?;
        Ok(updated)
    }

    /// Finishes a task: stores result and summary, attaches finalized
    /// artifacts, satisfies outbound edges and reports what the caller
    /// should schedule next.
    pub fn complete(&mut self, request: CompleteTaskRequest) -> Result<CompletionOutcome, StoreError> {
        let CompleteTaskRequest {
            task_id,
            result,
            summary,
            artifacts,
            triggered_by,
        } = request;

        let now = now_ms();
        let tx = self.conn.transaction()?;

        let task = load_task(&tx, &task_id)?;
        if task.deleted_at_ms.is_some() {
            return Err(StoreError::InvalidInput("task is deleted"));
        }
        if !tl_core::lifecycle::legal_transition(task.status, TaskStatus::Completed) {
            return Err(StoreError::IllegalTransition {
                from: task.status.as_str(),
                to: TaskStatus::Completed.as_str(),
            });
        }

        let artifact_ids = attach_artifacts_tx(&tx, &task, &artifacts, now)?;
        let new_result = result.or_else(|| task.result.clone());
        let new_summary = summary.or_else(|| task.summary.clone());
        tx.execute(
            "UPDATE tasks SET result = ?2, summary = ?3 WHERE task_id = ?1",
            params![task_id, new_result, new_summary],
        )?;
        set_status_tx(
            &tx,
            &task,
            TaskStatus::Completed,
            now,
            &triggered_by,
            Some(&json!({ "artifact_ids": artifact_ids })),
        )?;
        tx.execute(
            "UPDATE dependencies SET status = 'satisfied'
             WHERE prerequisite_task_id = ?1 AND status <> 'waived'",
            params![task_id],
        )?;

        let newly_ready = newly_ready_dependents_tx(&tx, &task_id)?;
        let parent_progress = parent_progress_tx(&tx, task.parent_task_id.as_deref())?;
        let completed = load_task(&tx, &task_id)?;
        tx.commit()?;
        Ok(CompletionOutcome {
            task: completed,
            newly_ready,
            parent_progress,
        })
    }

    /// Records finalized artifacts on a task outside any status change.
    /// Maintenance documents land on their carrier task this way.
    pub fn attach_artifacts(
        &mut self,
        task_id: &str,
        artifacts: &[ArtifactAttachment],
    ) -> Result<Task, StoreError> {
        let now = now_ms();
        let tx = self.conn.transaction()?;
        let task = load_task(&tx, task_id)?;
        if task.deleted_at_ms.is_some() {
            return Err(StoreError::InvalidInput("task is deleted"));
        }
        attach_artifacts_tx(&tx, &task, artifacts, now)?;
        if !artifacts.is_empty() {
            tx.execute(
                "UPDATE tasks SET updated_at_ms = ?2 WHERE task_id = ?1",
                params![task_id, now],
            )?;
        }
        let updated = load_task(&tx, task_id)?;
        tx.commit()?;
        Ok(updated)
    }

    /// The reviewer sent the work back: the task parks in blocked with a
    /// revision event instead of completing. The partial result and any
    /// artifacts produced so far are kept.
    pub fn request_revision(
        &mut self,
        task_id: &str,
        reason: &str,
        result: Option<&str>,
        artifacts: &[ArtifactAttachment],
        triggered_by: &str,
    ) -> Result<Task, StoreError> {
        self.park_at_blocked(
            task_id,
            EVENT_REVISION_REQUESTED,
            reason,
            result,
            artifacts,
            triggered_by,
        )
    }

    /// Work stopped for external input: same bookkeeping as a revision
    /// request, recorded as a plain blocked transition.
    pub fn park_blocked(
        &mut self,
        task_id: &str,
        reason: &str,
        result: Option<&str>,
        artifacts: &[ArtifactAttachment],
        triggered_by: &str,
    ) -> Result<Task, StoreError> {
        self.park_at_blocked(
            task_id,
            tl_core::events::status_event(TaskStatus::Blocked),
            reason,
            result,
            artifacts,
            triggered_by,
        )
    }

    fn park_at_blocked(
        &mut self,
        task_id: &str,
        event_type: &str,
        reason: &str,
        result: Option<&str>,
        artifacts: &[ArtifactAttachment],
        triggered_by: &str,
    ) -> Result<Task, StoreError> {
        let now = now_ms();
        let tx = self.conn.transaction()?;

        let task = load_task(&tx, task_id)?;
        if task.deleted_at_ms.is_some() {
            return Err(StoreError::InvalidInput("task is deleted"));
        }
        attach_artifacts_tx(&tx, &task, artifacts, now)?;
        if let Some(result) = result {
            tx.execute(
                "UPDATE tasks SET result = ?2 WHERE task_id = ?1",
                params![task_id, result],
            )?;
        }
        set_status_with_event_tx(
            &tx,
            &task,
            TaskStatus::Blocked,
            event_type,
            now,
            triggered_by,
            Some(&json!({ "reason": reason })),
        )?;
        let updated = load_task(&tx, task_id)?;
        tx.commit()?;
        Ok(updated)
    }

    /// Fails the task with an error note and pushes the failure outward
    /// through `propagate_failure_tx`. Returns the failed task and the
    /// dependents that were stopped.
    pub fn fail(
        &mut self,
        task_id: &str,
        error: &str,
        triggered_by: &str,
    ) -> Result<(Task, Vec<String>), StoreError> {
        let now = now_ms();
        let tx = self.conn.transaction()?;

        let task = load_task(&tx, task_id)?;
        if task.deleted_at_ms.is_some() {
            return Err(StoreError::InvalidInput("task is deleted"));
        }
        set_status_tx(
            &tx,
            &task,
            TaskStatus::Failed,
            now,
            triggered_by,
            Some(&json!({ "error": error })),
        )?;
        let blocked = propagate_failure_tx(&tx, task_id, now, triggered_by)?;

        let failed = load_task(&tx, task_id)?;
        tx.commit()?;
        Ok((failed, blocked))
    }

    /// Cancels the task and every non-terminal descendant, parents first.
    /// Terminal descendants keep their status. `preserve_work` is recorded
    /// on the root for the cleanup sweep to honor later.
    pub fn cancel(
        &mut self,
        task_id: &str,
        reason: &str,
        preserve_work: bool,
        triggered_by: &str,
    ) -> Result<Vec<String>, StoreError> {
        let now = now_ms();
        let tx = self.conn.transaction()?;

        let root = load_task(&tx, task_id)?;
        if root.deleted_at_ms.is_some() {
            return Err(StoreError::InvalidInput("task is deleted"));
        }
        let prefix = format!("{}/", root.hierarchy_path);
        let columns = task_columns("t");
        let sql = format!(
            "SELECT {columns} FROM tasks t
             WHERE (t.task_id = ?1 OR substr(t.hierarchy_path, 1, length(?2)) = ?2)
               AND t.deleted_at_ms IS NULL
               AND t.status IN ('pending', 'active', 'in_progress', 'blocked')
             ORDER BY t.hierarchy_level ASC, t.task_id ASC"
        );
        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt.query_map(params![task_id, prefix], task_from_row)?;
        let mut targets = Vec::new();
        for row in rows {
            targets.push(row?);
        }
        drop(stmt);

        let mut cancelled = Vec::new();
        for target in &targets {
            set_status_tx(
                &tx,
                target,
                TaskStatus::Cancelled,
                now,
                triggered_by,
                Some(&json!({ "reason": reason })),
            )?;
            cancelled.push(target.task_id.clone());
        }
        tasks::attributes::upsert_attribute_tx(
            &tx,
            task_id,
            "preserve_work",
            if preserve_work { "true" } else { "false" },
            false,
        )?;

        tx.commit()?;
        Ok(cancelled)
    }

    /// Non-terminal tasks older than their specialist's staleness
    /// threshold, oldest first. Age counts from creation: a task that has
    /// been bouncing between states for days is still stale work.
    pub fn detect_stale(&self, thresholds: &StaleThresholds) -> Result<Vec<StaleTask>, StoreError> {
        let now = now_ms();
        let mut stmt = self.conn.prepare(
            "SELECT task_id, title, specialist_type, status, created_at_ms FROM tasks
             WHERE status IN ('pending', 'active', 'in_progress', 'blocked')
               AND deleted_at_ms IS NULL
             ORDER BY created_at_ms ASC, task_id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut stale = Vec::new();
        for row in rows {
            let (task_id, title, specialist_type, status, created_at_ms) = row?;
            let age_hours = (now - created_at_ms) as f64 / 3_600_000.0;
            let threshold_hours = thresholds.hours_for(&specialist_type);
            if age_hours > threshold_hours {
                let reason = format!(
                    "{specialist_type} task {status} for {age_hours:.1} hours (>{threshold_hours}h threshold)"
                );
                stale.push(StaleTask {
                    task_id,
                    title,
                    specialist_type,
                    status,
                    age_hours,
                    threshold_hours,
                    reason,
                });
            }
        }
        Ok(stale)
    }

    /// Retention sweep: terminal tasks untouched for longer than
    /// `older_than_ms` move to archived.
    pub fn archive_terminal(&mut self, older_than_ms: i64) -> Result<Vec<String>, StoreError> {
        let now = now_ms();
        let cutoff = now - older_than_ms;
        let tx = self.conn.transaction()?;

        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE status IN ('completed', 'failed', 'cancelled')
               AND deleted_at_ms IS NULL
               AND updated_at_ms <= ?1
             ORDER BY updated_at_ms ASC, task_id ASC"
        );
        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt.query_map(params![cutoff], task_from_row)?;
        let mut targets = Vec::new();
        for row in rows {
            targets.push(row?);
        }
        drop(stmt);

        let mut archived = Vec::new();
        for target in &targets {
            set_status_tx(&tx, target, TaskStatus::Archived, now, "system", None)?;
            archived.push(target.task_id.clone());
        }

        tx.commit()?;
        Ok(archived)
    }
}
