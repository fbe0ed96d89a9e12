#![forbid(unsafe_code)]

use serde_json::Value;

use crate::orchestrator::OrchestratorCore;
use crate::support::{Args, ToolError, optional_u64, success};

pub(crate) fn shutdown_prepare(
    core: &mut OrchestratorCore,
    args: &Args,
) -> Result<Value, ToolError> {
    let timeout_seconds = optional_u64(args, "timeout_seconds")?;
    let OrchestratorCore {
        store,
        artifacts,
        storage_dir,
        oplog,
        shutdown,
        ..
    } = core;
    let progress = shutdown.prepare(store, artifacts, storage_dir, oplog, timeout_seconds)?;
    let message = if progress["partial"].as_bool() == Some(true) {
        "shutdown finished partially within the timeout budget".to_string()
    } else {
        "shutdown complete; safe to stop the process".to_string()
    };
    Ok(success(progress, message))
}

pub(crate) fn shutdown_status(
    core: &mut OrchestratorCore,
    _args: &Args,
) -> Result<Value, ToolError> {
    let status = core
        .shutdown
        .status(&core.store, &core.artifacts, &core.storage_dir)?;
    let phase = core.shutdown.phase().as_str();
    Ok(success(status, format!("shutdown phase {phase}")))
}
