#![forbid(unsafe_code)]

use super::super::*;
use super::create::{validate_specialist, validate_title};

/// Shallow merge in the JSON-merge-patch style: `null` removes a key,
/// anything else replaces it. Unparseable stored context is treated as
/// empty rather than wedging the task.
fn merged_context(current: Option<&str>, patch: &str) -> Result<String, StoreError> {
    let patch_value: serde_json::Value = serde_json::from_str(patch)
        .map_err(|_| StoreError::InvalidInput("context_patch must be valid JSON"))?;
    let serde_json::Value::Object(patch_map) = patch_value else {
        return Err(StoreError::InvalidInput("context_patch must be a JSON object"));
    };
    let mut merged = match current {
        Some(raw) => match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        },
        None => serde_json::Map::new(),
    };
    for (key, value) in patch_map {
        if value.is_null() {
            merged.remove(&key);
        } else {
            merged.insert(key, value);
        }
    }
    Ok(serde_json::Value::Object(merged).to_string())
}

impl SqliteStore {
    pub fn update_task(&mut self, request: UpdateTaskRequest) -> Result<Task, StoreError> {
        let UpdateTaskRequest {
            task_id,
            expected_updated_at_ms,
            title,
            description,
            summary,
            specialist_type,
            complexity,
            estimated_effort,
            status,
            context_patch,
            triggered_by,
        } = request;

        if title.is_none()
            && description.is_none()
            && summary.is_none()
            && specialist_type.is_none()
            && complexity.is_none()
            && estimated_effort.is_none()
            && status.is_none()
            && context_patch.is_none()
        {
            return Err(StoreError::InvalidInput("no fields to update"));
        }
        if let Some(title) = &title {
            validate_title(title)?;
        }
        if let Some(specialist) = &specialist_type {
            validate_specialist(specialist)?;
        }

        let now = now_ms();
        let tx = self.conn.transaction()?;

        let task = load_task(&tx, &task_id)?;
        if task.deleted_at_ms.is_some() {
            return Err(StoreError::InvalidInput("task is deleted"));
        }
        if let Some(expected) = expected_updated_at_ms
            && expected != task.updated_at_ms
        {
            return Err(StoreError::UpdateConflict {
                expected,
                actual: task.updated_at_ms,
            });
        }

        let new_context = match context_patch.as_deref() {
            Some(patch) => Some(merged_context(task.context_json.as_deref(), patch)?),
            None => task.context_json.clone(),
        };
        let new_title = title.unwrap_or_else(|| task.title.clone());
        let new_description = description.unwrap_or_else(|| task.description.clone());
        let new_summary = summary.or_else(|| task.summary.clone());
        let new_specialist = specialist_type.unwrap_or_else(|| task.specialist_type.clone());
        let new_complexity = complexity.unwrap_or(task.complexity);
        let new_effort = estimated_effort.or_else(|| task.estimated_effort.clone());

        tx.execute(
            r#"
            UPDATE tasks
            SET title = ?2,
                description = ?3,
                summary = ?4,
                specialist_type = ?5,
                complexity = ?6,
                estimated_effort = ?7,
                context_json = ?8,
                updated_at_ms = ?9
            WHERE task_id = ?1
            "#,
            params![
                task_id,
                new_title,
                new_description,
                new_summary,
                new_specialist,
                new_complexity.as_str(),
                new_effort,
                new_context,
                now,
            ],
        )?;

        if let Some(to) = status {
            set_status_tx(&tx, &task, to, now, &triggered_by, None)?;
            if to == TaskStatus::Failed {
                crate::store::sched::propagate_failure_tx(&tx, &task_id, now, &triggered_by)?;
            }
        }

        let updated = load_task(&tx, &task_id)?;
        tx.commit()?;
        Ok(updated)
    }

    /// Stores result text without touching status, for results assembled
    /// from children rather than produced by the task itself.
    pub fn set_result(&mut self, task_id: &str, result: &str) -> Result<Task, StoreError> {
        let now = now_ms();
        let tx = self.conn.transaction()?;
        let task = load_task(&tx, task_id)?;
        if task.deleted_at_ms.is_some() {
            return Err(StoreError::InvalidInput("task is deleted"));
        }
        tx.execute(
            "UPDATE tasks SET result = ?2, updated_at_ms = ?3 WHERE task_id = ?1",
            params![task_id, result, now],
        )?;
        let updated = load_task(&tx, task_id)?;
        tx.commit()?;
        Ok(updated)
    }
}
