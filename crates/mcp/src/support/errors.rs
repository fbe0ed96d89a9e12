#![forbid(unsafe_code)]

use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use tl_storage::StoreError;

/// A tool failure ready to be rendered as an error envelope. `code` is
/// one of the stable taxonomy values drivers are expected to branch on;
/// `details` carries machine-readable context for that code.
#[derive(Debug)]
pub(crate) struct ToolError {
    pub(crate) code: &'static str,
    pub(crate) message: String,
    pub(crate) details: Value,
    /// Full fault detail for the operation log when the envelope only
    /// carries a correlation id.
    pub(crate) log_detail: Option<String>,
}

impl ToolError {
    pub(crate) fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: json!({}),
            log_detail: None,
        }
    }

    pub(crate) fn with_details(code: &'static str, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            log_detail: None,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::new("invalid_argument", message)
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    /// Internal fault: the envelope carries only a correlation id, the
    /// full detail goes to the operation log.
    pub(crate) fn internal(detail: impl Into<String>) -> Self {
        internal(detail.into())
    }

    pub(crate) fn render(&self, tool: &str) -> Value {
        json!({
            "status": "error",
            "error_code": self.code,
            "message": self.message,
            "tool": tool,
            "details": self.details,
        })
    }
}

static CORRELATION_SEQ: AtomicU64 = AtomicU64::new(1);

fn internal(detail: String) -> ToolError {
    let correlation_id = format!("corr-{:06}", CORRELATION_SEQ.fetch_add(1, Ordering::Relaxed));
    let mut mapped = ToolError::with_details(
        "internal",
        format!("internal error ({correlation_id})"),
        json!({ "correlation_id": correlation_id }),
    );
    mapped.log_detail = Some(detail);
    mapped
}

/// Maps storage failures onto the envelope taxonomy. Internal faults
/// surface only a correlation id; the detail goes to the operation log.
impl From<StoreError> for ToolError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io(ref cause) => internal(format!("io: {cause}")),
            StoreError::Sql(ref cause) => internal(format!("sql: {cause}")),
            StoreError::Json(ref cause) => internal(format!("json: {cause}")),
            StoreError::InvalidInput(message) => ToolError::new("invalid_argument", message),
            StoreError::UnknownTask => ToolError::not_found("no such task"),
            StoreError::UnknownArtifact => ToolError::not_found("no such artifact"),
            StoreError::DuplicateTask => ToolError::new("conflict", "task id already exists"),
            StoreError::UpdateConflict { expected, actual } => ToolError::with_details(
                "conflict",
                "task changed since it was read",
                json!({ "expected_updated_at_ms": expected, "actual_updated_at_ms": actual }),
            ),
            StoreError::IllegalTransition { from, to } => ToolError::with_details(
                "illegal_transition",
                format!("cannot move a {from} task to {to}"),
                json!({ "from": from, "to": to }),
            ),
            StoreError::CycleDetected => {
                ToolError::new("cycle_detected", "dependency would create a cycle")
            }
            StoreError::DependencyExists => {
                ToolError::new("conflict", "dependency already recorded")
            }
            StoreError::DependencyUnsatisfied { task_id, unmet } => ToolError::with_details(
                "dependency_unsatisfied",
                format!("task {task_id} has unmet prerequisites"),
                json!({ "task_id": task_id, "unmet": unmet }),
            ),
            StoreError::NotReady { reason } => {
                ToolError::new("conflict", format!("task is not ready: {reason}"))
            }
            StoreError::DepthExceeded { max } => ToolError::with_details(
                "invalid_argument",
                format!("hierarchy depth limit is {max}"),
                json!({ "max_depth": max }),
            ),
            StoreError::SubtaskLimitExceeded { max } => ToolError::with_details(
                "invalid_argument",
                format!("subtask limit per parent is {max}"),
                json!({ "max_subtasks": max }),
            ),
            StoreError::TitleTooLong { max } => ToolError::with_details(
                "invalid_argument",
                format!("title exceeds {max} characters"),
                json!({ "max_title_len": max }),
            ),
            StoreError::HasDependents { count } => ToolError::with_details(
                "conflict",
                format!("{count} tasks outside the subtree depend on it"),
                json!({ "dependents": count }),
            ),
            StoreError::ArtifactNotFinalized => ToolError::new(
                "artifact_not_finalized",
                "artifact has not been finalized",
            ),
            StoreError::ArtifactTooLarge { size, max } => ToolError::with_details(
                "artifact_too_large",
                format!("artifact of {size} bytes exceeds the {max} byte limit"),
                json!({ "size_bytes": size, "max_bytes": max }),
            ),
            StoreError::ArtifactSessionLost { reason } => ToolError::with_details(
                "conflict",
                format!("artifact session lost: {reason}"),
                json!({ "reason": reason }),
            ),
            StoreError::SchemaIncompatible { found, expected } => ToolError::with_details(
                "schema_incompatible",
                format!("database schema v{found} is newer than this binary (v{expected})"),
                json!({ "found": found, "expected": expected }),
            ),
            StoreError::LockHeld { pid, age_ms } => ToolError::with_details(
                "conflict",
                format!("storage directory is locked by pid {pid}"),
                json!({ "pid": pid, "age_ms": age_ms }),
            ),
            StoreError::CorruptSnapshot { detail } => internal(format!("snapshot: {detail}")),
        }
    }
}
