#![forbid(unsafe_code)]

use serde_json::{Map, Value, json};
use std::path::Path;
use tl_core::model::{TASK_STATUSES, TaskStatus};
use tl_storage::{QueryOrder, QueryTasksRequest};

use crate::orchestrator::OrchestratorCore;
use crate::support::{Args, ToolError, optional_bool, optional_string, success};
use crate::support::time::ms_to_rfc3339;
use crate::views::{stale_json, task_digest};

fn counts_object(core: &OrchestratorCore) -> Result<Value, ToolError> {
    let mut counts = Map::new();
    for entry in core.store.counts_by_status()? {
        counts.insert(entry.status, Value::from(entry.count));
    }
    Ok(Value::Object(counts))
}

fn config_echo(core: &OrchestratorCore) -> Value {
    let mut staleness = Map::new();
    for (role, hours) in &core.config.staleness.hours_by_specialist {
        staleness.insert(role.clone(), json!(hours));
    }
    staleness.insert(
        "default".to_string(),
        json!(core.config.staleness.default_hours),
    );
    json!({
        "max_subtasks": core.config.max_subtasks,
        "max_depth": core.config.max_depth,
        "default_timeout_seconds": core.config.default_timeout_seconds,
        "artifact_max_bytes": core.config.artifact_max_bytes,
        "log_level": core.config.log_level.as_str(),
        "staleness_hours": staleness,
    })
}

pub(crate) fn initialize_session(
    core: &mut OrchestratorCore,
    args: &Args,
) -> Result<Value, ToolError> {
    let working_directory = optional_string(args, "working_directory")?;
    let mut notes = core.config_notes.clone();
    if let Some(dir) = &working_directory
        && Path::new(dir) != core.storage_dir
    {
        notes.push(format!(
            "working_directory `{dir}` is advisory; storage stays at {}",
            core.storage_dir.display()
        ));
    }

    let roots: Vec<Value> = core
        .store
        .query_tasks(&QueryTasksRequest {
            order_by: QueryOrder::Hierarchy,
            ..QueryTasksRequest::default()
        })?
        .tasks
        .iter()
        .filter(|task| task.parent_task_id.is_none())
        .take(10)
        .map(task_digest)
        .collect();
    let ready: Vec<Value> = core
        .store
        .ready_tasks(None, None, 10)?
        .iter()
        .map(task_digest)
        .collect();
    let in_flight: Vec<Value> = core
        .artifacts
        .list_sessions()?
        .iter()
        .map(|session| {
            json!({
                "task_id": session.task_id,
                "artifact_id": session.artifact_id,
                "artifact_type": session.artifact_type,
                "offset": session.offset,
            })
        })
        .collect();

    let data = json!({
        "server": { "name": crate::SERVER_NAME, "version": crate::SERVER_VERSION },
        "storage_dir": core.storage_dir.display().to_string(),
        "schema_version": core.store.schema_version()?,
        "session_started_at": ms_to_rfc3339(core.started_at_ms),
        "counts_by_status": counts_object(core)?,
        "root_tasks": roots,
        "ready_preview": ready,
        "in_flight_artifacts": in_flight,
        "restore": core.restore_report.clone(),
        "maintenance_mode": core.store.maintenance_mode()?,
        "config": config_echo(core),
        "config_notes": notes,
        "specialists": {
            "roster": core.specialists.names(),
            "load_note": core.specialists.load_note(),
        },
    });
    Ok(success(data, "session initialized"))
}

pub(crate) fn get_status(core: &mut OrchestratorCore, args: &Args) -> Result<Value, ToolError> {
    let include_completed = optional_bool(args, "include_completed")?.unwrap_or(false);

    let open = core.store.query_tasks(&QueryTasksRequest {
        statuses: vec![
            TaskStatus::Pending,
            TaskStatus::Active,
            TaskStatus::InProgress,
            TaskStatus::Blocked,
        ],
        order_by: QueryOrder::Hierarchy,
        ..QueryTasksRequest::default()
    })?;
    // Group digests under their status, in the canonical status order.
    let mut by_status = Map::new();
    for status in TASK_STATUSES {
        let digests: Vec<Value> = open
            .tasks
            .iter()
            .filter(|task| task.status.as_str() == *status)
            .map(task_digest)
            .collect();
        if !digests.is_empty() {
            by_status.insert((*status).to_string(), Value::Array(digests));
        }
    }

    let completed = if include_completed {
        let page = core.store.query_tasks(&QueryTasksRequest {
            statuses: vec![TaskStatus::Completed],
            order_by: QueryOrder::UpdatedAt,
            descending: true,
            limit: 100,
            ..QueryTasksRequest::default()
        })?;
        Value::Array(page.tasks.iter().map(task_digest).collect())
    } else {
        Value::Null
    };

    let stale = core.store.detect_stale(&core.config.staleness)?;
    let open_count = open.total;

    let data = json!({
        "counts_by_status": counts_object(core)?,
        "open_tasks": by_status,
        "completed_tasks": completed,
        "stale": {
            "count": stale.len(),
            "tasks": stale.iter().take(10).map(stale_json).collect::<Vec<_>>(),
        },
        "shutdown_phase": core.shutdown.phase().as_str(),
        "maintenance_mode": core.store.maintenance_mode()?,
    });
    Ok(success(data, format!("{open_count} open task(s)")))
}
