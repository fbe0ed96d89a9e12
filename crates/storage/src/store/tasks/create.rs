#![forbid(unsafe_code)]

use super::super::*;
use crate::store::events::insert_event_tx;
use serde_json::json;
use tl_core::events::EVENT_CREATED;
use tl_core::hierarchy;
use tl_core::lifecycle::stage_of;
use tl_core::model::{LifecycleStage, MAX_TITLE_LEN};

const MAX_SPECIALIST_LEN: usize = 64;

pub(in crate::store) fn validate_title(title: &str) -> Result<(), StoreError> {
    if title.trim().is_empty() {
        return Err(StoreError::InvalidInput("title must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(StoreError::TitleTooLong { max: MAX_TITLE_LEN });
    }
    Ok(())
}

pub(in crate::store) fn validate_specialist(specialist: &str) -> Result<(), StoreError> {
    if specialist.trim().is_empty() {
        return Err(StoreError::InvalidInput("specialist_type must not be empty"));
    }
    if specialist.chars().count() > MAX_SPECIALIST_LEN {
        return Err(StoreError::InvalidInput("specialist_type is too long"));
    }
    Ok(())
}

pub(in crate::store) fn validate_context(context_json: Option<&str>) -> Result<(), StoreError> {
    if let Some(raw) = context_json {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|_| StoreError::InvalidInput("context must be valid JSON"))?;
        if !value.is_object() {
            return Err(StoreError::InvalidInput("context must be a JSON object"));
        }
    }
    Ok(())
}

/// Parent must exist and still be live to accept children.
pub(in crate::store) fn ensure_parent(
    conn: &Connection,
    parent_id: &str,
) -> Result<Task, StoreError> {
    let parent = load_task(conn, parent_id)?;
    if parent.deleted_at_ms.is_some() || parent.status == TaskStatus::Archived {
        return Err(StoreError::InvalidInput("parent task is archived or deleted"));
    }
    Ok(parent)
}

pub(in crate::store) fn check_depth(parent: &Task, max_depth: usize) -> Result<(), StoreError> {
    let child_level = parent.hierarchy_level + 1;
    if child_level >= max_depth as i64 {
        return Err(StoreError::DepthExceeded { max: max_depth });
    }
    Ok(())
}

pub(in crate::store) fn check_sibling_count(
    conn: &Connection,
    parent_id: &str,
    max_subtasks: usize,
) -> Result<(), StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE parent_task_id = ?1 AND deleted_at_ms IS NULL",
        params![parent_id],
        |row| row.get(0),
    )?;
    if count as usize >= max_subtasks {
        return Err(StoreError::SubtaskLimitExceeded { max: max_subtasks });
    }
    Ok(())
}

pub(in crate::store) fn next_position(
    conn: &Connection,
    parent_id: Option<&str>,
) -> Result<i64, StoreError> {
    let position: i64 = match parent_id {
        Some(parent) => conn.query_row(
            "SELECT COALESCE(MAX(position_in_parent) + 1, 0) FROM tasks WHERE parent_task_id = ?1",
            params![parent],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            "SELECT COALESCE(MAX(position_in_parent) + 1, 0) FROM tasks WHERE parent_task_id IS NULL",
            [],
            |row| row.get(0),
        )?,
    };
    Ok(position)
}

pub(in crate::store) struct NewTask<'a> {
    pub parent: Option<&'a Task>,
    pub title: &'a str,
    pub description: &'a str,
    pub task_type: TaskType,
    pub specialist_type: &'a str,
    pub complexity: Complexity,
    pub estimated_effort: Option<&'a str>,
    pub context_json: Option<&'a str>,
    pub position: i64,
    pub now_ms: i64,
    pub triggered_by: &'a str,
}

pub(in crate::store) fn insert_task_tx(
    tx: &Transaction<'_>,
    spec: &NewTask<'_>,
) -> Result<Task, StoreError> {
    let task_id = next_task_id_tx(tx)?;
    let parent_path = spec.parent.map(|p| p.hierarchy_path.as_str());
    let hierarchy_path = hierarchy::child_path(parent_path, &task_id);
    let hierarchy_level = hierarchy::level_of(&hierarchy_path);
    let status = TaskStatus::Pending;
    let stage: LifecycleStage = stage_of(status);

    let insert = tx.execute(
        r#"
        INSERT INTO tasks(
            task_id, parent_task_id, title, description, task_type, specialist_type,
            status, lifecycle_stage, complexity, hierarchy_path, hierarchy_level,
            position_in_parent, estimated_effort, result, summary, context_json,
            artifact_ids, created_at_ms, updated_at_ms
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, NULL, NULL, ?14, '[]', ?15, ?15)
        "#,
        params![
            task_id,
            spec.parent.map(|p| p.task_id.as_str()),
            spec.title,
            spec.description,
            spec.task_type.as_str(),
            spec.specialist_type,
            status.as_str(),
            stage.as_str(),
            spec.complexity.as_str(),
            hierarchy_path,
            hierarchy_level,
            spec.position,
            spec.estimated_effort,
            spec.context_json,
            spec.now_ms,
        ],
    );
    if let Err(err) = insert {
        if is_constraint_violation(&err) {
            return Err(StoreError::DuplicateTask);
        }
        return Err(err.into());
    }

    insert_event_tx(
        tx,
        &task_id,
        EVENT_CREATED,
        spec.triggered_by,
        spec.now_ms,
        Some(&json!({
            "title": spec.title,
            "parent_task_id": spec.parent.map(|p| p.task_id.as_str()),
        })),
    )?;

    Ok(Task {
        task_id,
        parent_task_id: spec.parent.map(|p| p.task_id.clone()),
        title: spec.title.to_string(),
        description: spec.description.to_string(),
        task_type: spec.task_type,
        specialist_type: spec.specialist_type.to_string(),
        status,
        lifecycle_stage: stage,
        complexity: spec.complexity,
        hierarchy_path,
        hierarchy_level,
        position_in_parent: spec.position,
        estimated_effort: spec.estimated_effort.map(|s| s.to_string()),
        result: None,
        summary: None,
        context_json: spec.context_json.map(|s| s.to_string()),
        artifact_ids: Vec::new(),
        created_at_ms: spec.now_ms,
        updated_at_ms: spec.now_ms,
        started_at_ms: None,
        completed_at_ms: None,
        deleted_at_ms: None,
    })
}

impl SqliteStore {
    pub fn create_task(&mut self, request: CreateTaskRequest) -> Result<Task, StoreError> {
        validate_title(&request.title)?;
        validate_specialist(&request.specialist_type)?;
        validate_context(request.context_json.as_deref())?;

        let max_depth = self.limits.max_depth;
        let max_subtasks = self.limits.max_subtasks;
        let now = now_ms();
        let tx = self.conn.transaction()?;

        let parent = match request.parent_task_id.as_deref() {
            Some(parent_id) => {
                let parent = ensure_parent(&tx, parent_id)?;
                check_depth(&parent, max_depth)?;
                check_sibling_count(&tx, parent_id, max_subtasks)?;
                Some(parent)
            }
            None => None,
        };
        let position = next_position(&tx, request.parent_task_id.as_deref())?;

        let task = insert_task_tx(
            &tx,
            &NewTask {
                parent: parent.as_ref(),
                title: &request.title,
                description: &request.description,
                task_type: request.task_type,
                specialist_type: &request.specialist_type,
                complexity: request.complexity,
                estimated_effort: request.estimated_effort.as_deref(),
                context_json: request.context_json.as_deref(),
                position,
                now_ms: now,
                triggered_by: &request.triggered_by,
            },
        )?;

        for attribute in &request.attributes {
            super::attributes::upsert_attribute_tx(
                &tx,
                &task.task_id,
                &attribute.name,
                &attribute.value,
                attribute.indexed,
            )?;
        }

        tx.commit()?;
        Ok(task)
    }

    /// Creates a breakdown parent plus its subtasks and their dependency
    /// edges in one transaction. Subtask dependencies reference sibling
    /// titles; a failure anywhere leaves nothing behind.
    pub fn create_breakdown(
        &mut self,
        request: CreateBreakdownRequest,
    ) -> Result<Breakdown, StoreError> {
        validate_title(&request.title)?;
        validate_context(request.context_json.as_deref())?;
        if request.subtasks.is_empty() {
            return Err(StoreError::InvalidInput("at least one subtask is required"));
        }
        if request.subtasks.len() > self.limits.max_subtasks {
            return Err(StoreError::SubtaskLimitExceeded {
                max: self.limits.max_subtasks,
            });
        }
        for subtask in &request.subtasks {
            validate_title(&subtask.title)?;
            validate_specialist(&subtask.specialist_type)?;
        }

        let titles: Vec<String> = request.subtasks.iter().map(|s| s.title.clone()).collect();
        {
            let mut seen = std::collections::HashSet::new();
            for title in &titles {
                if !seen.insert(title.as_str()) {
                    return Err(StoreError::InvalidInput(
                        "subtask titles must be unique within a plan",
                    ));
                }
            }
        }

        let mut title_edges: Vec<(String, String)> = Vec::new();
        for subtask in &request.subtasks {
            for prerequisite_title in &subtask.depends_on_titles {
                title_edges.push((subtask.title.clone(), prerequisite_title.clone()));
            }
        }
        let title_order = match tl_core::graph::execution_order(&titles, &title_edges) {
            Ok(order) => order,
            Err(tl_core::graph::OrderError::UnknownNode { .. }) => {
                return Err(StoreError::InvalidInput(
                    "dependency references an unknown subtask title",
                ));
            }
            Err(tl_core::graph::OrderError::Cycle { .. }) => {
                return Err(StoreError::CycleDetected);
            }
        };

        let parent_complexity = request
            .subtasks
            .iter()
            .map(|s| s.complexity)
            .max()
            .unwrap_or(Complexity::Moderate);

        let now = now_ms();
        let tx = self.conn.transaction()?;

        let parent_position = next_position(&tx, None)?;
        let parent = insert_task_tx(
            &tx,
            &NewTask {
                parent: None,
                title: &request.title,
                description: &request.description,
                task_type: TaskType::Breakdown,
                specialist_type: "default",
                complexity: parent_complexity,
                estimated_effort: None,
                context_json: request.context_json.as_deref(),
                position: parent_position,
                now_ms: now,
                triggered_by: &request.triggered_by,
            },
        )?;

        let mut subtasks: Vec<Task> = Vec::with_capacity(request.subtasks.len());
        let mut id_by_title: std::collections::HashMap<&str, String> =
            std::collections::HashMap::new();
        for (position, spec) in request.subtasks.iter().enumerate() {
            let task = insert_task_tx(
                &tx,
                &NewTask {
                    parent: Some(&parent),
                    title: &spec.title,
                    description: &spec.description,
                    task_type: spec.task_type,
                    specialist_type: &spec.specialist_type,
                    complexity: spec.complexity,
                    estimated_effort: spec.estimated_effort.as_deref(),
                    context_json: None,
                    position: position as i64,
                    now_ms: now,
                    triggered_by: &request.triggered_by,
                },
            )?;
            id_by_title.insert(spec.title.as_str(), task.task_id.clone());
            subtasks.push(task);
        }

        for spec in &request.subtasks {
            let dependent_id = id_by_title[spec.title.as_str()].clone();
            for prerequisite_title in &spec.depends_on_titles {
                let prerequisite_id = id_by_title[prerequisite_title.as_str()].clone();
                crate::store::deps::insert_dependency_tx(
                    &tx,
                    &dependent_id,
                    &prerequisite_id,
                    tl_core::model::DependencyType::Completion,
                    true,
                    now,
                )?;
            }
        }

        let execution_order: Vec<Vec<String>> = title_order
            .iter()
            .map(|level| {
                level
                    .iter()
                    .map(|title| id_by_title[title.as_str()].clone())
                    .collect()
            })
            .collect();

        tx.commit()?;
        Ok(Breakdown {
            parent,
            subtasks,
            execution_order,
        })
    }
}
