#![forbid(unsafe_code)]

//! Maintenance coordinator: one operation at a time, each one scoped,
//! leveled and reported under a `mop-` operation id.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde_json::{Value, json};
use tl_core::model::{ArtifactType, Complexity, Task, TaskStatus, TaskType};
use tl_storage::{
    ArtifactAttachment, ArtifactReference, CreateTaskRequest, QueryOrder, QueryTasksRequest,
    ScanScope, StoreError, UpdateTaskRequest,
};

use crate::config::{ARCHIVE_TERMINAL_AFTER_MS, EVENT_RETENTION_PER_TASK, STAGING_PURGE_AFTER_MS};
use crate::orchestrator::OrchestratorCore;
use crate::support::ToolError;
use crate::support::time::{ms_to_rfc3339, now_ms, now_rfc3339};
use crate::views::{stale_json, task_digest, violation_json};

pub(crate) const MAINTENANCE_ACTIONS: &[&str] = &[
    "scan_cleanup",
    "validate_structure",
    "update_documentation",
    "prepare_handover",
];

pub(crate) const MAINTENANCE_SCOPES: &[&str] =
    &["current_session", "full_project", "specific_subtask"];

pub(crate) const VALIDATION_LEVELS: &[&str] = &["basic", "comprehensive", "full_audit"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MaintenanceAction {
    ScanCleanup,
    ValidateStructure,
    UpdateDocumentation,
    PrepareHandover,
}

impl MaintenanceAction {
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw {
            "scan_cleanup" => Some(MaintenanceAction::ScanCleanup),
            "validate_structure" => Some(MaintenanceAction::ValidateStructure),
            "update_documentation" => Some(MaintenanceAction::UpdateDocumentation),
            "prepare_handover" => Some(MaintenanceAction::PrepareHandover),
            _ => None,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            MaintenanceAction::ScanCleanup => "scan_cleanup",
            MaintenanceAction::ValidateStructure => "validate_structure",
            MaintenanceAction::UpdateDocumentation => "update_documentation",
            MaintenanceAction::PrepareHandover => "prepare_handover",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MaintenanceScope {
    CurrentSession,
    FullProject,
    SpecificSubtask,
}

impl MaintenanceScope {
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw {
            "current_session" => Some(MaintenanceScope::CurrentSession),
            "full_project" => Some(MaintenanceScope::FullProject),
            "specific_subtask" => Some(MaintenanceScope::SpecificSubtask),
            _ => None,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            MaintenanceScope::CurrentSession => "current_session",
            MaintenanceScope::FullProject => "full_project",
            MaintenanceScope::SpecificSubtask => "specific_subtask",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum ValidationLevel {
    Basic,
    Comprehensive,
    FullAudit,
}

impl ValidationLevel {
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw {
            "basic" => Some(ValidationLevel::Basic),
            "comprehensive" => Some(ValidationLevel::Comprehensive),
            "full_audit" => Some(ValidationLevel::FullAudit),
            _ => None,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ValidationLevel::Basic => "basic",
            ValidationLevel::Comprehensive => "comprehensive",
            ValidationLevel::FullAudit => "full_audit",
        }
    }
}

/// Serializes maintenance operations. The flag lives in an `Arc` so the
/// guard can clear it on drop without borrowing the coordinator.
pub(crate) struct MaintenanceCoordinator {
    busy: Arc<AtomicBool>,
    next_op: AtomicU64,
}

pub(crate) struct MaintenanceGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for MaintenanceGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

impl MaintenanceCoordinator {
    pub(crate) fn new() -> Self {
        Self {
            busy: Arc::new(AtomicBool::new(false)),
            next_op: AtomicU64::new(1),
        }
    }

    fn acquire(&self) -> Result<MaintenanceGuard, ToolError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ToolError::new(
                "maintenance_busy",
                "another maintenance operation is already running",
            ));
        }
        Ok(MaintenanceGuard {
            busy: Arc::clone(&self.busy),
        })
    }

    fn next_operation_id(&self) -> String {
        let seq = self.next_op.fetch_add(1, Ordering::SeqCst);
        format!("mop-{seq:06}")
    }
}

pub(crate) fn run(
    core: &mut OrchestratorCore,
    action: MaintenanceAction,
    scope: MaintenanceScope,
    level: ValidationLevel,
    target: Option<Task>,
) -> Result<Value, ToolError> {
    let guard = core.maintenance.acquire()?;
    let operation_id = core.maintenance.next_operation_id();
    let started_at_ms = now_ms();
    core.oplog.debug(
        "maintenance_start",
        &json!({
            "operation_id": operation_id,
            "action": action.as_str(),
            "scope": scope.as_str(),
            "level": level.as_str(),
        }),
    );

    let results = match action {
        MaintenanceAction::ScanCleanup => scan_cleanup(core, scope, level, target.as_ref())?,
        MaintenanceAction::ValidateStructure => {
            validate_structure(core, scope, level, target.as_ref())?
        }
        MaintenanceAction::UpdateDocumentation => {
            update_documentation(core, scope, level, target.as_ref())?
        }
        MaintenanceAction::PrepareHandover => prepare_handover(core, scope, level, target.as_ref())?,
    };
    drop(guard);

    let finished_at_ms = now_ms();
    core.oplog.info(
        "maintenance",
        &json!({
            "operation_id": operation_id,
            "action": action.as_str(),
            "scope": scope.as_str(),
            "level": level.as_str(),
            "elapsed_ms": finished_at_ms.saturating_sub(started_at_ms),
        }),
    );

    Ok(json!({
        "operation_id": operation_id,
        "action": action.as_str(),
        "scope": scope.as_str(),
        "validation_level": level.as_str(),
        "target_task_id": target.map(|task| Value::String(task.task_id)).unwrap_or(Value::Null),
        "started_at": ms_to_rfc3339(started_at_ms),
        "finished_at": ms_to_rfc3339(finished_at_ms),
        "results": results,
    }))
}

/// Scope predicate for tasks already loaded. Session scope keys on the
/// update stamp, subtask scope on the hierarchy path.
fn in_scope(
    core: &OrchestratorCore,
    scope: MaintenanceScope,
    target: Option<&Task>,
    task: &Task,
) -> bool {
    match scope {
        MaintenanceScope::FullProject => true,
        MaintenanceScope::CurrentSession => task.updated_at_ms >= core.started_at_ms,
        MaintenanceScope::SpecificSubtask => match target {
            Some(root) => {
                task.task_id == root.task_id
                    || task
                        .hierarchy_path
                        .starts_with(&format!("{}/", root.hierarchy_path))
            }
            None => false,
        },
    }
}

fn scan_scope(
    core: &OrchestratorCore,
    scope: MaintenanceScope,
    target: Option<&Task>,
) -> ScanScope {
    match scope {
        MaintenanceScope::FullProject => ScanScope::everything(),
        MaintenanceScope::CurrentSession => ScanScope {
            path_prefix: None,
            updated_since_ms: Some(core.started_at_ms),
        },
        MaintenanceScope::SpecificSubtask => ScanScope {
            path_prefix: target.map(|task| task.hierarchy_path.clone()),
            updated_since_ms: None,
        },
    }
}

fn task_if_any(core: &OrchestratorCore, task_id: &str) -> Result<Option<Task>, ToolError> {
    match core.store.get_task(task_id, false, false) {
        Ok(view) => Ok(Some(view.task)),
        Err(StoreError::UnknownTask) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn scan_cleanup(
    core: &mut OrchestratorCore,
    scope: MaintenanceScope,
    level: ValidationLevel,
    target: Option<&Task>,
) -> Result<Value, ToolError> {
    let now = now_ms();

    let mut stale = Vec::new();
    for candidate in core.store.detect_stale(&core.config.staleness)? {
        if scope != MaintenanceScope::FullProject {
            let task = core.store.get_task(&candidate.task_id, false, false)?.task;
            if !in_scope(core, scope, target, &task) {
                continue;
            }
        }
        stale.push(stale_json(&candidate));
    }

    let orphans: Vec<Value> = core
        .store
        .orphaned_tasks()?
        .into_iter()
        .filter(|task| in_scope(core, scope, target, task))
        .map(|task| task_digest(&task))
        .collect();

    // Staging directories of tasks that were hard-deleted only ever show
    // up under full_project scope.
    let mut stale_staging = Vec::new();
    for session in core.artifacts.list_sessions()? {
        let age_ms = now.saturating_sub(session.updated_at_ms);
        if age_ms < STAGING_PURGE_AFTER_MS {
            continue;
        }
        if scope != MaintenanceScope::FullProject {
            match task_if_any(core, &session.task_id)? {
                Some(task) if in_scope(core, scope, target, &task) => {}
                _ => continue,
            }
        }
        stale_staging.push(json!({
            "task_id": session.task_id,
            "artifact_id": session.artifact_id,
            "artifact_type": session.artifact_type,
            "offset": session.offset,
            "age_hours": (age_ms as f64 / 3_600_000.0 * 10.0).round() / 10.0,
        }));
    }

    let mut archived: Vec<String> = Vec::new();
    let mut purged: Vec<Value> = Vec::new();
    let mut dropped: Vec<Value> = Vec::new();
    let mut pruned_events = 0usize;
    if level >= ValidationLevel::Comprehensive {
        // Cancellations that declined preserve_work surrender their
        // artifacts here, before archival hides the tasks.
        let cancelled_pool = core.store.query_tasks(&QueryTasksRequest {
            statuses: vec![TaskStatus::Cancelled],
            ..Default::default()
        })?;
        for root in core.store.unpreserved_cancelled()? {
            if !in_scope(core, scope, target, &root) {
                continue;
            }
            let members: Vec<String> = cancelled_pool
                .tasks
                .iter()
                .filter(|task| {
                    task.task_id == root.task_id
                        || task
                            .hierarchy_path
                            .starts_with(&format!("{}/", root.hierarchy_path))
                })
                .map(|task| task.task_id.clone())
                .collect();
            for task_id in members {
                let artifact_ids = core.store.detach_artifacts(&task_id)?;
                let dir_removed = core.artifacts.purge(&task_id)?;
                if !artifact_ids.is_empty() || dir_removed {
                    dropped.push(json!({
                        "task_id": task_id,
                        "artifact_ids": artifact_ids,
                    }));
                }
            }
        }
        if scope == MaintenanceScope::FullProject {
            archived = core.store.archive_terminal(ARCHIVE_TERMINAL_AFTER_MS)?;
            purged = core
                .artifacts
                .purge_stale_staging(STAGING_PURGE_AFTER_MS)?
                .into_iter()
                .map(|(task_id, artifact_id)| {
                    json!({ "task_id": task_id, "artifact_id": artifact_id })
                })
                .collect();
        } else {
            let cutoff = now - ARCHIVE_TERMINAL_AFTER_MS;
            let terminal = core.store.query_tasks(&QueryTasksRequest {
                statuses: vec![
                    TaskStatus::Completed,
                    TaskStatus::Failed,
                    TaskStatus::Cancelled,
                ],
                ..Default::default()
            })?;
            let targets: Vec<String> = terminal
                .tasks
                .iter()
                .filter(|task| task.updated_at_ms <= cutoff && in_scope(core, scope, target, task))
                .map(|task| task.task_id.clone())
                .collect();
            for task_id in targets {
                core.store.update_task(UpdateTaskRequest {
                    task_id: task_id.clone(),
                    status: Some(TaskStatus::Archived),
                    triggered_by: "maintenance".to_string(),
                    ..Default::default()
                })?;
                archived.push(task_id);
            }
        }
        if level == ValidationLevel::FullAudit && scope == MaintenanceScope::FullProject {
            pruned_events = core.store.prune_events(EVENT_RETENTION_PER_TASK)?;
        }
    }

    let mut recommendations = Vec::new();
    if !stale.is_empty() {
        recommendations.push(format!(
            "{} task(s) exceed their staleness threshold; review, reassign or cancel them",
            stale.len()
        ));
    }
    if !orphans.is_empty() {
        recommendations.push(format!(
            "{} orphaned task(s) reference a missing or archived parent; move or delete them",
            orphans.len()
        ));
    }
    if !stale_staging.is_empty() && purged.is_empty() {
        recommendations.push(format!(
            "{} stale artifact session(s) hold staging space; run scan_cleanup at comprehensive level with full_project scope to purge them",
            stale_staging.len()
        ));
    }

    Ok(json!({
        "stale_tasks": stale,
        "orphaned_tasks": orphans,
        "stale_staging": stale_staging,
        "archived_task_ids": archived,
        "purged_staging": purged,
        "dropped_work": dropped,
        "pruned_events": pruned_events,
        "recommendations": recommendations,
    }))
}

fn checks_for(level: ValidationLevel) -> &'static [&'static str] {
    const BASIC: &[&str] = &[
        "parent_exists",
        "parent_live",
        "hierarchy_path",
        "hierarchy_level",
        "no_self_edge",
        "acyclic_dependencies",
    ];
    const COMPREHENSIVE: &[&str] = &[
        "parent_exists",
        "parent_live",
        "hierarchy_path",
        "hierarchy_level",
        "no_self_edge",
        "acyclic_dependencies",
        "lifecycle_stage",
        "timestamps_ordered",
        "completed_at_set",
        "event_trail",
        "edge_status",
    ];
    const FULL_AUDIT: &[&str] = &[
        "parent_exists",
        "parent_live",
        "hierarchy_path",
        "hierarchy_level",
        "no_self_edge",
        "acyclic_dependencies",
        "lifecycle_stage",
        "timestamps_ordered",
        "completed_at_set",
        "event_trail",
        "edge_status",
        "artifact_recorded",
    ];
    match level {
        ValidationLevel::Basic => BASIC,
        ValidationLevel::Comprehensive => COMPREHENSIVE,
        ValidationLevel::FullAudit => FULL_AUDIT,
    }
}

fn validate_structure(
    core: &mut OrchestratorCore,
    scope: MaintenanceScope,
    level: ValidationLevel,
    target: Option<&Task>,
) -> Result<Value, ToolError> {
    let scan = scan_scope(core, scope, target);
    let checks = checks_for(level);
    let mut reported: Vec<Value> = core
        .store
        .invariant_scan(&scan)?
        .iter()
        .filter(|violation| checks.contains(&violation.check))
        .map(violation_json)
        .collect();

    let mut checks_run: Vec<&str> = checks.to_vec();
    if level == ValidationLevel::FullAudit {
        checks_run.push("artifact_file_exists");
        for record in core.store.list_artifacts(None)? {
            if scope != MaintenanceScope::FullProject {
                match task_if_any(core, &record.task_id)? {
                    Some(task) if in_scope(core, scope, target, &task) => {}
                    _ => continue,
                }
            }
            if !core.storage_dir.join(&record.file_path).exists() {
                reported.push(json!({
                    "task_id": record.task_id,
                    "invariant": "artifact_file_exists",
                    "detail": format!("{} missing from disk", record.file_path),
                }));
            }
        }
    }

    Ok(json!({
        "clean": reported.is_empty(),
        "violations": reported,
        "checks_run": checks_run,
    }))
}

fn status_counts_json(core: &OrchestratorCore) -> Result<Value, ToolError> {
    let mut counts = serde_json::Map::new();
    for entry in core.store.counts_by_status()? {
        counts.insert(entry.status, Value::from(entry.count));
    }
    Ok(Value::Object(counts))
}

/// Finds or creates the root maintenance task that carries generated
/// documents. Matching is by exact title among maintenance tasks.
fn ensure_carrier(
    core: &mut OrchestratorCore,
    title: &str,
    description: &str,
) -> Result<String, ToolError> {
    let page = core.store.query_tasks(&QueryTasksRequest {
        task_types: vec![TaskType::Maintenance],
        text: Some(title.to_string()),
        ..Default::default()
    })?;
    if let Some(existing) = page.tasks.iter().find(|task| task.title == title) {
        return Ok(existing.task_id.clone());
    }
    let created = core.store.create_task(CreateTaskRequest {
        parent_task_id: None,
        title: title.to_string(),
        description: description.to_string(),
        task_type: TaskType::Maintenance,
        specialist_type: "documenter".to_string(),
        complexity: Complexity::Simple,
        estimated_effort: None,
        context_json: None,
        attributes: Vec::new(),
        triggered_by: "maintenance".to_string(),
    })?;
    Ok(created.task_id)
}

fn write_document(
    core: &mut OrchestratorCore,
    task_id: &str,
    content: &str,
) -> Result<(ArtifactReference, String), ToolError> {
    let artifact_id = core.store.next_artifact_id()?;
    let mut session = core
        .artifacts
        .create_session(task_id, &artifact_id, ArtifactType::Documentation)?;
    core.artifacts.append(&mut session, content.as_bytes())?;
    let reference = core.artifacts.finalize(session)?;
    let relative = core.relative_artifact_path(&reference.file_path);
    let attachment = ArtifactAttachment {
        artifact_id: reference.artifact_id.clone(),
        artifact_type: reference.artifact_type.as_str().to_string(),
        file_path: relative.clone(),
        size_bytes: reference.size_bytes as i64,
        digest: reference.digest.clone(),
    };
    core.store.attach_artifacts(task_id, &[attachment])?;
    Ok((reference, relative))
}

fn tree_lines(tasks: &[Task], base_level: i64, out: &mut String) {
    for task in tasks {
        let depth = (task.hierarchy_level - base_level).max(0) as usize;
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!(
            "- [{}] {} ({}, {})\n",
            task.status.as_str(),
            task.title,
            task.task_id,
            task.specialist_type
        ));
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}

/// Pulls `decisions`, `learnings` and `notes` entries out of task
/// contexts. Each value may be a string or an array of strings.
fn collect_context_notes(tasks: &[Task]) -> Vec<String> {
    let mut lines = Vec::new();
    for task in tasks {
        let Some(raw) = task.context_json.as_deref() else {
            continue;
        };
        let Ok(context) = serde_json::from_str::<Value>(raw) else {
            continue;
        };
        for key in ["decisions", "learnings", "notes"] {
            match context.get(key) {
                Some(Value::String(text)) => {
                    lines.push(format!("- {key} ({}): {text}", task.task_id));
                }
                Some(Value::Array(items)) => {
                    for item in items {
                        if let Some(text) = item.as_str() {
                            lines.push(format!("- {key} ({}): {text}", task.task_id));
                        }
                    }
                }
                _ => {}
            }
        }
    }
    lines
}

fn update_documentation(
    core: &mut OrchestratorCore,
    scope: MaintenanceScope,
    level: ValidationLevel,
    target: Option<&Task>,
) -> Result<Value, ToolError> {
    let tasks: Vec<Task> = match (scope, target) {
        (MaintenanceScope::SpecificSubtask, Some(root)) => core.store.get_subtree(&root.task_id)?,
        _ => core
            .store
            .query_tasks(&QueryTasksRequest {
                order_by: QueryOrder::Hierarchy,
                ..Default::default()
            })?
            .tasks
            .into_iter()
            .filter(|task| in_scope(core, scope, target, task))
            .collect(),
    };
    let base_level = target.map(|root| root.hierarchy_level).unwrap_or(0);

    let mut doc = String::new();
    doc.push_str("# Project documentation\n\n");
    doc.push_str(&format!("- generated: {}\n", now_rfc3339()));
    doc.push_str(&format!("- scope: {}\n", scope.as_str()));
    if let Some(root) = target {
        doc.push_str(&format!("- subtree: {} ({})\n", root.title, root.task_id));
    }
    doc.push_str("\n## Status counts\n\n");
    if let Value::Object(counts) = status_counts_json(core)? {
        for (status, count) in &counts {
            doc.push_str(&format!("- {status}: {count}\n"));
        }
    }
    doc.push_str("\n## Progress by root\n\n");
    let roots: Vec<&Task> = tasks
        .iter()
        .filter(|task| task.hierarchy_level == base_level)
        .collect();
    if roots.is_empty() {
        doc.push_str("(no root tasks in scope)\n");
    }
    for root in &roots {
        let prefix = format!("{}/", root.hierarchy_path);
        let descendants: Vec<&Task> = tasks
            .iter()
            .filter(|task| task.hierarchy_path.starts_with(&prefix))
            .collect();
        let done = descendants
            .iter()
            .filter(|task| task.status == TaskStatus::Completed)
            .count();
        doc.push_str(&format!(
            "- {} ({}): {}/{} subtasks completed, status {}\n",
            root.title,
            root.task_id,
            done,
            descendants.len(),
            root.status.as_str()
        ));
    }

    doc.push_str("\n## Task tree\n\n");
    if tasks.is_empty() {
        doc.push_str("(no tasks in scope)\n");
    } else {
        tree_lines(&tasks, base_level, &mut doc);
    }

    let notes = collect_context_notes(&tasks);
    if !notes.is_empty() {
        doc.push_str("\n## Decisions and learnings\n\n");
        for line in &notes {
            doc.push_str(line);
            doc.push('\n');
        }
    }

    let failed: Vec<&Task> = tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Failed)
        .collect();
    if !failed.is_empty() {
        doc.push_str("\n## Recent failures\n");
        for task in &failed {
            doc.push_str(&format!("\n### {} ({})\n\n", task.title, task.task_id));
            let text = task.result.as_deref().unwrap_or("(no failure detail)");
            doc.push_str(&snippet(text, 400));
            doc.push('\n');
        }
    }

    if level >= ValidationLevel::Comprehensive {
        let completed: Vec<&Task> = tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Completed)
            .collect();
        if !completed.is_empty() {
            doc.push_str("\n## Completed work\n");
            for task in &completed {
                doc.push_str(&format!("\n### {} ({})\n\n", task.title, task.task_id));
                let text = task
                    .summary
                    .as_deref()
                    .or(task.result.as_deref())
                    .unwrap_or("(no recorded result)");
                doc.push_str(&snippet(text, 400));
                doc.push('\n');
            }
        }
    }

    if level == ValidationLevel::FullAudit {
        let records = core.store.list_artifacts(None)?;
        let in_tree: Vec<_> = records
            .iter()
            .filter(|record| tasks.iter().any(|task| task.task_id == record.task_id))
            .collect();
        if !in_tree.is_empty() {
            doc.push_str("\n## Artifacts\n\n");
            for record in in_tree {
                doc.push_str(&format!(
                    "- {} ({}, {} bytes) on {}: {}\n",
                    record.artifact_id,
                    record.artifact_type.as_str(),
                    record.size_bytes,
                    record.task_id,
                    record.file_path
                ));
            }
        }
    }

    let carrier = match (scope, target) {
        (MaintenanceScope::SpecificSubtask, Some(root)) => root.task_id.clone(),
        _ => ensure_carrier(
            core,
            "Project documentation",
            "Rolling project documentation written by the maintenance coordinator.",
        )?,
    };
    let (reference, relative) = write_document(core, &carrier, &doc)?;

    Ok(json!({
        "task_id": carrier,
        "artifact": crate::views::artifact_reference_json(&reference, &relative),
        "document": doc,
    }))
}

fn scoped_tasks(
    core: &OrchestratorCore,
    scope: MaintenanceScope,
    target: Option<&Task>,
    statuses: Vec<TaskStatus>,
    limit: usize,
) -> Result<Vec<Task>, ToolError> {
    let page = core.store.query_tasks(&QueryTasksRequest {
        statuses,
        order_by: QueryOrder::UpdatedAt,
        descending: true,
        ..Default::default()
    })?;
    Ok(page
        .tasks
        .into_iter()
        .filter(|task| in_scope(core, scope, target, task))
        .take(limit)
        .collect())
}

fn prepare_handover(
    core: &mut OrchestratorCore,
    scope: MaintenanceScope,
    level: ValidationLevel,
    target: Option<&Task>,
) -> Result<Value, ToolError> {
    let completed = scoped_tasks(core, scope, target, vec![TaskStatus::Completed], 50)?;
    let in_progress = scoped_tasks(
        core,
        scope,
        target,
        vec![TaskStatus::Active, TaskStatus::InProgress],
        50,
    )?;
    let blocked = scoped_tasks(core, scope, target, vec![TaskStatus::Blocked], 20)?;
    let failed = scoped_tasks(core, scope, target, vec![TaskStatus::Failed], 20)?;

    // Ready work is what the next driver should pick up; the session
    // filter never applies here, only the subtree filter does.
    let ready_parent = match (scope, target) {
        (MaintenanceScope::SpecificSubtask, Some(root)) => Some(root.task_id.as_str()),
        _ => None,
    };
    let ready = core.store.ready_tasks(ready_parent, None, 10)?;

    let mut stale = Vec::new();
    for candidate in core.store.detect_stale(&core.config.staleness)? {
        if scope != MaintenanceScope::FullProject {
            let task = core.store.get_task(&candidate.task_id, false, false)?.task;
            if !in_scope(core, scope, target, &task) {
                continue;
            }
        }
        stale.push(candidate);
    }

    let completed_json: Vec<Value> = completed
        .iter()
        .map(|task| {
            let mut entry = task_digest(task);
            if let Value::Object(map) = &mut entry {
                map.insert("summary".into(), json!(task.summary));
                map.insert("artifact_ids".into(), json!(task.artifact_ids));
                if level >= ValidationLevel::Comprehensive {
                    let text = task.result.as_deref().unwrap_or("");
                    map.insert("result_snippet".into(), json!(snippet(text, 200)));
                }
            }
            entry
        })
        .collect();

    let mut in_progress_json = Vec::new();
    for task in &in_progress {
        let mut entry = task_digest(task);
        if let Value::Object(map) = &mut entry
            && level == ValidationLevel::FullAudit
        {
            let events: Vec<Value> = core
                .store
                .list_events(&task.task_id, None, 5)?
                .iter()
                .map(crate::views::event_json)
                .collect();
            map.insert("recent_events".into(), Value::Array(events));
        }
        in_progress_json.push(entry);
    }

    let mut next_steps = Vec::new();
    for task in ready.iter().take(3) {
        next_steps.push(format!("Start ready task {} ({})", task.task_id, task.title));
    }
    for task in blocked.iter().take(2) {
        next_steps.push(format!("Unblock {} ({})", task.task_id, task.title));
    }
    for task in failed.iter().take(2) {
        next_steps.push(format!(
            "Review failure of {} ({})",
            task.task_id, task.title
        ));
    }
    if next_steps.is_empty() {
        next_steps.push("No actionable work; plan the next breakdown".to_string());
    }

    let package = json!({
        "generated_at": now_rfc3339(),
        "session": {
            "started_at": ms_to_rfc3339(core.started_at_ms),
            "status_counts": status_counts_json(core)?,
        },
        "completed": completed_json,
        "in_progress": in_progress_json,
        "ready": ready.iter().map(|task| task_digest(task)).collect::<Vec<_>>(),
        "risks": {
            "blocked": blocked.iter().map(|task| task_digest(task)).collect::<Vec<_>>(),
            "failed": failed.iter().map(|task| task_digest(task)).collect::<Vec<_>>(),
            "stale": stale.iter().map(stale_json).collect::<Vec<_>>(),
        },
        "next_steps": next_steps,
    });

    let mut doc = String::new();
    doc.push_str("# Session handover\n\n");
    doc.push_str(&format!("- generated: {}\n", now_rfc3339()));
    doc.push_str(&format!(
        "- session started: {}\n",
        ms_to_rfc3339(core.started_at_ms)
    ));
    doc.push_str(&format!("- scope: {}\n", scope.as_str()));
    doc.push_str("\n## Completed\n\n");
    if completed.is_empty() {
        doc.push_str("(nothing completed in scope)\n");
    }
    for task in &completed {
        let extra = match &task.summary {
            Some(summary) => format!("; {}", snippet(summary, 120)),
            None => String::new(),
        };
        doc.push_str(&format!(
            "- {} ({}, {}){extra}\n",
            task.title, task.task_id, task.specialist_type
        ));
    }
    doc.push_str("\n## In progress\n\n");
    if in_progress.is_empty() {
        doc.push_str("(nothing in progress)\n");
    }
    for task in &in_progress {
        doc.push_str(&format!(
            "- [{}] {} ({}, {})\n",
            task.status.as_str(),
            task.title,
            task.task_id,
            task.specialist_type
        ));
    }
    doc.push_str("\n## Ready to start\n\n");
    if ready.is_empty() {
        doc.push_str("(nothing ready)\n");
    }
    for task in &ready {
        doc.push_str(&format!(
            "- {} ({}, {})\n",
            task.title, task.task_id, task.specialist_type
        ));
    }
    doc.push_str("\n## Risks\n\n");
    doc.push_str(&format!(
        "- blocked: {}, failed: {}, stale: {}\n",
        blocked.len(),
        failed.len(),
        stale.len()
    ));
    for candidate in &stale {
        doc.push_str(&format!("- stale: {}\n", candidate.reason));
    }
    doc.push_str("\n## Suggested next steps\n\n");
    for (index, step) in next_steps.iter().enumerate() {
        doc.push_str(&format!("{}. {step}\n", index + 1));
    }

    let carrier = match (scope, target) {
        (MaintenanceScope::SpecificSubtask, Some(root)) => root.task_id.clone(),
        _ => ensure_carrier(
            core,
            "Session handover",
            "Handover packages written by the maintenance coordinator.",
        )?,
    };
    let (reference, relative) = write_document(core, &carrier, &doc)?;

    Ok(json!({
        "task_id": carrier,
        "artifact": crate::views::artifact_reference_json(&reference, &relative),
        "package": package,
        "document": doc,
    }))
}
