#![forbid(unsafe_code)]

//! One module per tool family. Every handler has the same signature so
//! the dispatch table can hold plain function pointers.

pub(crate) mod execute;
pub(crate) mod maintenance;
pub(crate) mod plan;
pub(crate) mod session;
pub(crate) mod shutdown;
pub(crate) mod synthesize;
pub(crate) mod tasks;

use serde_json::json;
use tl_core::model::{
    ArtifactType, Complexity, NextAction, TaskStatus, TaskType, ARTIFACT_TYPES, COMPLEXITIES,
    NEXT_ACTIONS, TASK_STATUSES, TASK_TYPES,
};
use tl_storage::QueryOrder;

use crate::support::ToolError;

fn unknown_value(what: &str, raw: &str, accepted: &[&str]) -> ToolError {
    ToolError::with_details(
        "invalid_argument",
        format!("unknown {what} `{raw}`"),
        json!({ "accepted": accepted }),
    )
}

pub(crate) fn parse_task_type(raw: &str) -> Result<TaskType, ToolError> {
    TaskType::parse(raw).ok_or_else(|| unknown_value("task_type", raw, TASK_TYPES))
}

pub(crate) fn parse_status(raw: &str) -> Result<TaskStatus, ToolError> {
    TaskStatus::parse(raw).ok_or_else(|| unknown_value("status", raw, TASK_STATUSES))
}

pub(crate) fn parse_complexity(raw: &str) -> Result<Complexity, ToolError> {
    Complexity::parse(raw).ok_or_else(|| unknown_value("complexity", raw, COMPLEXITIES))
}

pub(crate) fn parse_artifact_type(raw: &str) -> Result<ArtifactType, ToolError> {
    ArtifactType::parse(raw).ok_or_else(|| unknown_value("artifact_type", raw, ARTIFACT_TYPES))
}

pub(crate) fn parse_next_action(raw: &str) -> Result<NextAction, ToolError> {
    NextAction::parse(raw).ok_or_else(|| unknown_value("next_action", raw, NEXT_ACTIONS))
}

pub(crate) fn parse_order(raw: &str) -> Result<QueryOrder, ToolError> {
    match raw {
        "created_at" => Ok(QueryOrder::CreatedAt),
        "updated_at" => Ok(QueryOrder::UpdatedAt),
        "title" => Ok(QueryOrder::Title),
        "hierarchy" => Ok(QueryOrder::Hierarchy),
        _ => Err(unknown_value(
            "order_by",
            raw,
            &["created_at", "updated_at", "title", "hierarchy"],
        )),
    }
}
