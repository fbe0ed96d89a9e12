#![forbid(unsafe_code)]

use serde_json::{Value, json};
use std::fmt::Write as _;
use tl_core::model::{Task, TaskStatus};

use crate::config::PLANNING_DEADLINE_MS;
use crate::orchestrator::OrchestratorCore;
use crate::support::time::{ms_to_rfc3339, now_ms};
use crate::support::{Args, Deadline, ToolError, require_string, success};
use crate::views::task_digest;

/// Collates completed descendants into one markdown document, grouped
/// by specialist in hierarchy order. The document becomes the parent's
/// result once every direct child is terminal.
pub(crate) fn synthesize_results(
    core: &mut OrchestratorCore,
    args: &Args,
) -> Result<Value, ToolError> {
    let parent_task_id = require_string(args, "parent_task_id")?;
    let deadline = Deadline::new("synthesize_results", PLANNING_DEADLINE_MS);

    let parent = core.store.get_task(&parent_task_id, false, false)?.task;
    let subtree = core.store.get_subtree(&parent_task_id)?;
    let descendants: Vec<&Task> = subtree
        .iter()
        .filter(|task| task.task_id != parent_task_id)
        .collect();
    if descendants.is_empty() {
        return Err(ToolError::invalid(format!(
            "task {parent_task_id} has no subtasks to synthesize"
        )));
    }

    let mut groups: Vec<(String, Vec<&Task>)> = Vec::new();
    for task in descendants.iter().copied() {
        if task.status != TaskStatus::Completed {
            continue;
        }
        match groups
            .iter_mut()
            .find(|(name, _)| name == &task.specialist_type)
        {
            Some((_, members)) => members.push(task),
            None => groups.push((task.specialist_type.clone(), vec![task])),
        }
    }
    let completed_count: usize = groups.iter().map(|(_, members)| members.len()).sum();
    deadline.check()?;

    let children = core.store.children_of(&parent_task_id)?;
    let incomplete: Vec<&Task> = children
        .iter()
        .filter(|child| !child.status.is_terminal())
        .collect();
    let all_terminal = incomplete.is_empty() && !children.is_empty();

    let mut doc = String::new();
    let _ = writeln!(doc, "# Synthesis: {}", parent.title);
    let _ = writeln!(doc);
    let _ = writeln!(
        doc,
        "Generated {} for task {parent_task_id}: {completed_count} completed subtask(s).",
        ms_to_rfc3339(now_ms())
    );
    for (specialist, members) in &groups {
        let _ = writeln!(doc);
        let _ = writeln!(doc, "## {specialist}");
        for task in members {
            let _ = writeln!(doc);
            let _ = writeln!(doc, "### {} ({})", task.title, task.task_id);
            if let Some(summary) = &task.summary {
                let _ = writeln!(doc);
                let _ = writeln!(doc, "_{summary}_");
            }
            let _ = writeln!(doc);
            let _ = writeln!(
                doc,
                "{}",
                task.result.as_deref().unwrap_or("(no result recorded)").trim_end()
            );
            let records = core.store.list_artifacts(Some(&task.task_id))?;
            if !records.is_empty() {
                let _ = writeln!(doc);
                let _ = writeln!(doc, "Artifacts:");
                for record in records {
                    let _ = writeln!(
                        doc,
                        "- {} ({}, {} bytes)",
                        record.file_path,
                        record.artifact_type.as_str(),
                        record.size_bytes
                    );
                }
            }
        }
    }
    if !incomplete.is_empty() {
        let _ = writeln!(doc);
        let _ = writeln!(doc, "## Not yet complete");
        let _ = writeln!(doc);
        for child in &incomplete {
            let _ = writeln!(
                doc,
                "- {} ({}, {})",
                child.title,
                child.task_id,
                child.status.as_str()
            );
        }
    }
    deadline.check()?;

    if all_terminal {
        core.store.set_result(&parent_task_id, &doc)?;
    }

    let incomplete_children: Vec<Value> = incomplete.iter().copied().map(task_digest).collect();
    Ok(success(
        json!({
            "parent_task_id": parent_task_id,
            "synthesis": doc,
            "completed_count": completed_count,
            "specialists": groups.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(),
            "incomplete_children": incomplete_children,
            "stored_as_parent_result": all_terminal,
        }),
        format!("synthesized {completed_count} completed subtask(s)"),
    ))
}
