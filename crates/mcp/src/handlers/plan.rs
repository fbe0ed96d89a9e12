#![forbid(unsafe_code)]

use serde_json::{Value, json};
use tl_core::model::{Complexity, TaskType};
use tl_storage::{CreateBreakdownRequest, SubtaskSpec};

use crate::config::PLANNING_DEADLINE_MS;
use crate::handlers::{parse_complexity, parse_task_type};
use crate::orchestrator::OrchestratorCore;
use crate::support::{
    Args, Deadline, ToolError, optional_object, optional_string, optional_string_list,
    require_string, success, triggered_by,
};
use crate::views::task_json;

fn in_subtask(index: usize, err: ToolError) -> ToolError {
    ToolError {
        message: format!("subtasks[{index}]: {}", err.message),
        ..err
    }
}

pub(crate) fn plan_task(core: &mut OrchestratorCore, args: &Args) -> Result<Value, ToolError> {
    let deadline = Deadline::new("plan_task", PLANNING_DEADLINE_MS);
    let title = require_string(args, "title")?;
    let description = require_string(args, "description")?;
    let context_json = optional_object(args, "context")?.map(|map| Value::Object(map).to_string());
    let triggered_by = triggered_by(args)?;

    let Some(Value::Array(raw_subtasks)) = args.get("subtasks") else {
        return Err(ToolError::invalid("subtasks must be an array of objects"));
    };
    let mut subtasks = Vec::with_capacity(raw_subtasks.len());
    for (index, entry) in raw_subtasks.iter().enumerate() {
        let Value::Object(fields) = entry else {
            return Err(ToolError::invalid(format!(
                "subtasks[{index}] must be an object"
            )));
        };
        let task_type = match optional_string(fields, "task_type").map_err(|e| in_subtask(index, e))? {
            Some(raw) => parse_task_type(&raw).map_err(|e| in_subtask(index, e))?,
            None => TaskType::Standard,
        };
        let complexity = match optional_string(fields, "complexity").map_err(|e| in_subtask(index, e))? {
            Some(raw) => parse_complexity(&raw).map_err(|e| in_subtask(index, e))?,
            None => Complexity::Moderate,
        };
        subtasks.push(SubtaskSpec {
            title: require_string(fields, "title").map_err(|e| in_subtask(index, e))?,
            description: require_string(fields, "description").map_err(|e| in_subtask(index, e))?,
            task_type,
            specialist_type: require_string(fields, "specialist_type")
                .map_err(|e| in_subtask(index, e))?,
            complexity,
            estimated_effort: optional_string(fields, "estimated_effort")
                .map_err(|e| in_subtask(index, e))?,
            depends_on_titles: optional_string_list(fields, "dependencies")
                .map_err(|e| in_subtask(index, e))?
                .unwrap_or_default(),
        });
    }
    let dependency_count: usize = subtasks
        .iter()
        .map(|spec| spec.depends_on_titles.len())
        .sum();
    deadline.check()?;

    let breakdown = core.store.create_breakdown(CreateBreakdownRequest {
        title,
        description,
        context_json,
        subtasks,
        triggered_by,
    })?;
    deadline.check()?;

    let subtask_count = breakdown.subtasks.len();
    let data = json!({
        "parent": task_json(&breakdown.parent),
        "subtasks": breakdown.subtasks.iter().map(task_json).collect::<Vec<_>>(),
        "execution_order": breakdown.execution_order,
        "dependency_count": dependency_count,
    });
    Ok(success(
        data,
        format!(
            "planned `{}` with {subtask_count} subtask(s)",
            breakdown.parent.title
        ),
    ))
}
