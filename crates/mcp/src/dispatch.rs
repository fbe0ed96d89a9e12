#![forbid(unsafe_code)]

//! Tool-name routing. Every reply, success or failure, leaves through
//! `finish` so the envelope shape and the operation log line are
//! uniform across all fourteen tools.

use serde_json::{Value, json};
use std::time::Instant;

use crate::handlers;
use crate::orchestrator::OrchestratorCore;
use crate::support::{Args, ToolError, envelope};

pub(crate) const TOOL_NAMES: &[&str] = &[
    "initialize_session",
    "plan_task",
    "create_generic_task",
    "update_task",
    "delete_task",
    "cancel_task",
    "query_tasks",
    "execute_task",
    "complete_task",
    "synthesize_results",
    "get_status",
    "maintenance_coordinator",
    "shutdown_prepare",
    "shutdown_status",
];

type Handler = fn(&mut OrchestratorCore, &Args) -> Result<Value, ToolError>;

fn handler_for(name: &str) -> Option<Handler> {
    Some(match name {
        "initialize_session" => handlers::session::initialize_session,
        "plan_task" => handlers::plan::plan_task,
        "create_generic_task" => handlers::tasks::create_generic_task,
        "update_task" => handlers::tasks::update_task,
        "delete_task" => handlers::tasks::delete_task,
        "cancel_task" => handlers::tasks::cancel_task,
        "query_tasks" => handlers::tasks::query_tasks,
        "execute_task" => handlers::execute::execute_task,
        "complete_task" => handlers::execute::complete_task,
        "synthesize_results" => handlers::synthesize::synthesize_results,
        "get_status" => handlers::session::get_status,
        "maintenance_coordinator" => handlers::maintenance::maintenance_coordinator,
        "shutdown_prepare" => handlers::shutdown::shutdown_prepare,
        "shutdown_status" => handlers::shutdown::shutdown_status,
        _ => return None,
    })
}

pub(crate) fn dispatch_tool(core: &mut OrchestratorCore, name: &str, arguments: Value) -> Value {
    let started = Instant::now();
    let outcome = run_tool(core, name, arguments);
    finish(core, name, started, outcome)
}

fn run_tool(
    core: &mut OrchestratorCore,
    name: &str,
    arguments: Value,
) -> Result<Value, ToolError> {
    let Some(handler) = handler_for(name) else {
        return Err(ToolError::with_details(
            "not_found",
            format!("unknown tool `{name}`"),
            json!({ "known_tools": TOOL_NAMES }),
        ));
    };
    if core.shutdown.refuses(name) {
        return Err(ToolError::new(
            "shutdown_in_progress",
            "server is shutting down; only shutdown_status and get_status answer",
        ));
    }
    let args = match arguments {
        Value::Null => Args::new(),
        Value::Object(map) => map,
        _ => return Err(ToolError::invalid("tool arguments must be an object")),
    };
    handler(core, &args)
}

fn finish(
    core: &mut OrchestratorCore,
    name: &str,
    started: Instant,
    outcome: Result<Value, ToolError>,
) -> Value {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let (reply, error_code) = match outcome {
        Ok(reply) => (reply, None),
        Err(err) => {
            if let Some(detail) = &err.log_detail {
                core.oplog
                    .info("internal_error", &json!({ "tool": name, "detail": detail }));
            }
            let code = err.code;
            (err.render(name), Some(code))
        }
    };
    debug_assert!(
        envelope::well_formed(&reply),
        "malformed envelope from {name}"
    );
    core.oplog.info(
        "tool",
        &json!({
            "tool": name,
            "status": if error_code.is_none() { "success" } else { "error" },
            "error_code": error_code,
            "elapsed_ms": elapsed_ms,
        }),
    );
    reply
}
