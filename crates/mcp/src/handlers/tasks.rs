#![forbid(unsafe_code)]

use serde_json::{Value, json};
use tl_core::model::{Complexity, TaskType};
use tl_storage::{
    AttributeSpec, CreateTaskRequest, DeleteTaskRequest, QueryOrder, QueryTasksRequest,
    UpdateTaskRequest,
};

use crate::config::{DEFAULT_QUERY_LIMIT, QUERY_DEADLINE_MS};
use crate::handlers::{parse_complexity, parse_order, parse_status, parse_task_type};
use crate::orchestrator::OrchestratorCore;
use crate::support::{
    Args, Deadline, ToolError, optional_bool, optional_i64, optional_object, optional_string,
    optional_string_list, optional_usize, require_string, success, triggered_by,
};
use crate::views::{dependency_json, event_json, task_json};

pub(crate) fn create_generic_task(
    core: &mut OrchestratorCore,
    args: &Args,
) -> Result<Value, ToolError> {
    let title = require_string(args, "title")?;
    let description = optional_string(args, "description")?.unwrap_or_default();
    let parent_task_id = optional_string(args, "parent_task_id")?;
    let task_type = match optional_string(args, "task_type")? {
        Some(raw) => parse_task_type(&raw)?,
        None => TaskType::Standard,
    };
    let specialist_type =
        optional_string(args, "specialist_type")?.unwrap_or_else(|| "default".to_string());
    let complexity = match optional_string(args, "complexity")? {
        Some(raw) => parse_complexity(&raw)?,
        None => Complexity::Moderate,
    };
    let context_json = optional_object(args, "context")?.map(|map| Value::Object(map).to_string());
    let mut attributes = Vec::new();
    if let Some(map) = optional_object(args, "attributes")? {
        for (name, value) in map {
            let Value::String(value) = value else {
                return Err(ToolError::invalid(format!(
                    "attribute `{name}` must be a string"
                )));
            };
            attributes.push(AttributeSpec {
                name,
                value,
                indexed: true,
            });
        }
    }

    let task = core.store.create_task(CreateTaskRequest {
        parent_task_id,
        title,
        description,
        task_type,
        specialist_type,
        complexity,
        estimated_effort: optional_string(args, "estimated_effort")?,
        context_json,
        attributes,
        triggered_by: triggered_by(args)?,
    })?;
    let task_id = task.task_id.clone();
    Ok(success(
        json!({ "task": task_json(&task) }),
        format!("created {task_id}"),
    ))
}

pub(crate) fn update_task(core: &mut OrchestratorCore, args: &Args) -> Result<Value, ToolError> {
    let task_id = require_string(args, "task_id")?;
    let status = match optional_string(args, "status")? {
        Some(raw) => Some(parse_status(&raw)?),
        None => None,
    };
    let complexity = match optional_string(args, "complexity")? {
        Some(raw) => Some(parse_complexity(&raw)?),
        None => None,
    };
    let context_patch =
        optional_object(args, "context_patch")?.map(|map| Value::Object(map).to_string());

    let task = core.store.update_task(UpdateTaskRequest {
        task_id: task_id.clone(),
        expected_updated_at_ms: optional_i64(args, "expected_updated_at_ms")?,
        title: optional_string(args, "title")?,
        description: optional_string(args, "description")?,
        summary: optional_string(args, "summary")?,
        specialist_type: optional_string(args, "specialist_type")?,
        complexity,
        estimated_effort: optional_string(args, "estimated_effort")?,
        status,
        context_patch,
        triggered_by: triggered_by(args)?,
    })?;
    Ok(success(
        json!({ "task": task_json(&task) }),
        format!("updated {task_id}"),
    ))
}

pub(crate) fn delete_task(core: &mut OrchestratorCore, args: &Args) -> Result<Value, ToolError> {
    let task_id = require_string(args, "task_id")?;
    let soft = optional_bool(args, "soft")?.unwrap_or(true);
    let force = optional_bool(args, "force")?.unwrap_or(false);

    let outcome = core.store.delete_task(DeleteTaskRequest {
        task_id: task_id.clone(),
        soft,
        force,
        triggered_by: triggered_by(args)?,
    })?;
    // Hard deletes take the artifact directories with them.
    if !outcome.soft {
        for removed in &outcome.removed_task_ids {
            core.artifacts.purge(removed)?;
        }
    }
    let message = if outcome.soft {
        format!("archived {task_id}")
    } else {
        format!("deleted {} task(s)", outcome.removed_task_ids.len())
    };
    Ok(success(
        json!({
            "removed_task_ids": outcome.removed_task_ids,
            "soft": outcome.soft,
        }),
        message,
    ))
}

pub(crate) fn cancel_task(core: &mut OrchestratorCore, args: &Args) -> Result<Value, ToolError> {
    let task_id = require_string(args, "task_id")?;
    let reason = optional_string(args, "reason")?.unwrap_or_else(|| "cancelled".to_string());
    let preserve_work = optional_bool(args, "preserve_work")?.unwrap_or(true);

    let cancelled = core
        .store
        .cancel(&task_id, &reason, preserve_work, &triggered_by(args)?)?;
    Ok(success(
        json!({
            "cancelled_task_ids": cancelled,
            "preserve_work": preserve_work,
        }),
        format!("cancelled {} task(s)", cancelled.len()),
    ))
}

pub(crate) fn query_tasks(core: &mut OrchestratorCore, args: &Args) -> Result<Value, ToolError> {
    // Exact fetch takes precedence over filters.
    if let Some(task_id) = optional_string(args, "task_id")? {
        let include_children = optional_bool(args, "include_children")?.unwrap_or(false);
        let include_events = optional_bool(args, "include_events")?.unwrap_or(false);
        let view = core.store.get_task(&task_id, include_children, include_events)?;
        let links = core.store.list_dependencies(&task_id)?;
        let mut data = json!({
            "task": task_json(&view.task),
            "dependencies": {
                "prerequisites": links.prerequisites.iter().map(dependency_json).collect::<Vec<_>>(),
                "dependents": links.dependents.iter().map(dependency_json).collect::<Vec<_>>(),
            },
        });
        if let Some(children) = &view.children {
            data["children"] = children.iter().map(task_json).collect();
        }
        if let Some(events) = &view.events {
            data["events"] = events.iter().map(event_json).collect();
        }
        return Ok(success(data, format!("task {task_id}")));
    }

    let deadline = Deadline::new("query_tasks", QUERY_DEADLINE_MS);
    let statuses = match optional_string_list(args, "statuses")? {
        Some(list) => list
            .iter()
            .map(|raw| parse_status(raw))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    let task_types = match optional_string_list(args, "task_types")? {
        Some(list) => list
            .iter()
            .map(|raw| parse_task_type(raw))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    let complexities = match optional_string_list(args, "complexities")? {
        Some(list) => list
            .iter()
            .map(|raw| parse_complexity(raw))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    let order_by = match optional_string(args, "order_by")? {
        Some(raw) => parse_order(&raw)?,
        None => QueryOrder::CreatedAt,
    };

    let request = QueryTasksRequest {
        statuses,
        task_types,
        specialists: optional_string_list(args, "specialists")?.unwrap_or_default(),
        complexities,
        parent_task_id: optional_string(args, "parent_task_id")?,
        text: optional_string(args, "text")?,
        created_after_ms: optional_i64(args, "created_after_ms")?,
        created_before_ms: optional_i64(args, "created_before_ms")?,
        include_archived: optional_bool(args, "include_archived")?.unwrap_or(false),
        order_by,
        descending: optional_bool(args, "descending")?.unwrap_or(false),
        limit: optional_usize(args, "limit")?.unwrap_or(DEFAULT_QUERY_LIMIT),
        offset: optional_usize(args, "offset")?.unwrap_or(0),
    };
    let page = core.store.query_tasks(&request)?;
    deadline.check()?;

    let returned = page.tasks.len();
    Ok(success(
        json!({
            "tasks": page.tasks.iter().map(task_json).collect::<Vec<_>>(),
            "total": page.total,
            "limit": page.limit,
            "offset": page.offset,
            "returned": returned,
        }),
        format!("{returned} of {} task(s)", page.total),
    ))
}
