#![forbid(unsafe_code)]

use crate::support::time::ms_to_rfc3339;
use serde_json::{Value, json};
use tl_core::model::{Dependency, Task, TaskEvent};
use tl_storage::{
    ArtifactReference, CompletionOutcome, DependencyReport, ParentProgress, StaleTask, Violation,
};

fn optional_ts(ts_ms: Option<i64>) -> Value {
    match ts_ms {
        Some(ts_ms) => Value::String(ms_to_rfc3339(ts_ms)),
        None => Value::Null,
    }
}

fn parsed_context(raw: Option<&str>) -> Value {
    raw.and_then(|text| serde_json::from_str(text).ok())
        .unwrap_or(Value::Null)
}

pub(crate) fn task_json(task: &Task) -> Value {
    json!({
        "task_id": task.task_id,
        "parent_task_id": task.parent_task_id,
        "title": task.title,
        "description": task.description,
        "task_type": task.task_type.as_str(),
        "specialist_type": task.specialist_type,
        "status": task.status.as_str(),
        "lifecycle_stage": task.lifecycle_stage.as_str(),
        "complexity": task.complexity.as_str(),
        "hierarchy_path": task.hierarchy_path,
        "hierarchy_level": task.hierarchy_level,
        "position_in_parent": task.position_in_parent,
        "estimated_effort": task.estimated_effort,
        "result": task.result,
        "summary": task.summary,
        "context": parsed_context(task.context_json.as_deref()),
        "artifact_ids": task.artifact_ids,
        "created_at": ms_to_rfc3339(task.created_at_ms),
        "updated_at": ms_to_rfc3339(task.updated_at_ms),
        "updated_at_ms": task.updated_at_ms,
        "started_at": optional_ts(task.started_at_ms),
        "completed_at": optional_ts(task.completed_at_ms),
        "deleted": task.deleted_at_ms.is_some(),
    })
}

/// Compact listing row for status digests and query previews.
pub(crate) fn task_digest(task: &Task) -> Value {
    json!({
        "task_id": task.task_id,
        "title": task.title,
        "status": task.status.as_str(),
        "specialist_type": task.specialist_type,
        "complexity": task.complexity.as_str(),
        "hierarchy_level": task.hierarchy_level,
    })
}

pub(crate) fn event_json(event: &TaskEvent) -> Value {
    json!({
        "event_id": event.event_id(),
        "task_id": event.task_id,
        "event_type": event.event_type,
        "triggered_by": event.triggered_by,
        "timestamp": ms_to_rfc3339(event.timestamp_ms),
        "data": event
            .data_json
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .unwrap_or(Value::Null),
    })
}

pub(crate) fn dependency_json(dependency: &Dependency) -> Value {
    json!({
        "dependent_task_id": dependency.dependent_task_id,
        "prerequisite_task_id": dependency.prerequisite_task_id,
        "dependency_type": dependency.dependency_type.as_str(),
        "mandatory": dependency.mandatory,
        "status": dependency.status.as_str(),
    })
}

pub(crate) fn dependency_report_json(report: &DependencyReport) -> Value {
    json!({
        "task_id": report.task_id,
        "satisfied": report.satisfied,
        "checks": report
            .checks
            .iter()
            .map(|check| {
                json!({
                    "prerequisite_task_id": check.prerequisite_task_id,
                    "dependency_type": check.dependency_type,
                    "mandatory": check.mandatory,
                    "edge_status": check.edge_status,
                    "prerequisite_status": check.prerequisite_status,
                    "satisfied": check.satisfied,
                })
            })
            .collect::<Vec<_>>(),
    })
}

pub(crate) fn violation_json(violation: &Violation) -> Value {
    json!({
        "task_id": violation.task_id,
        "invariant": violation.check,
        "detail": violation.detail,
    })
}

pub(crate) fn stale_json(stale: &StaleTask) -> Value {
    json!({
        "task_id": stale.task_id,
        "title": stale.title,
        "specialist_type": stale.specialist_type,
        "status": stale.status,
        "age_hours": (stale.age_hours * 10.0).round() / 10.0,
        "threshold_hours": stale.threshold_hours,
        "reason": stale.reason,
    })
}

pub(crate) fn parent_progress_json(progress: &ParentProgress) -> Value {
    json!({
        "parent_task_id": progress.parent_task_id,
        "completed_children": progress.completed_children,
        "total_children": progress.total_children,
    })
}

/// A finalized artifact with its path relative to the storage directory.
pub(crate) fn artifact_reference_json(
    reference: &ArtifactReference,
    relative_path: &str,
) -> Value {
    json!({
        "artifact_id": reference.artifact_id,
        "task_id": reference.task_id,
        "artifact_type": reference.artifact_type.as_str(),
        "file_path": relative_path,
        "size_bytes": reference.size_bytes,
        "digest": reference.digest,
    })
}

pub(crate) fn completion_json(outcome: &CompletionOutcome) -> Value {
    json!({
        "task": task_json(&outcome.task),
        "newly_ready": outcome.newly_ready,
        "parent_progress": outcome
            .parent_progress
            .as_ref()
            .map(parent_progress_json)
            .unwrap_or(Value::Null),
    })
}
