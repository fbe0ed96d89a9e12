#![forbid(unsafe_code)]

//! Tool schemas served by `tools/list`. Kept in one place so the sync
//! test in `dispatch` can hold them against the handler table.

use serde_json::{Value, json};
use tl_core::model::{ARTIFACT_TYPES, COMPLEXITIES, NEXT_ACTIONS, TASK_STATUSES, TASK_TYPES};

use crate::maintenance::{MAINTENANCE_ACTIONS, MAINTENANCE_SCOPES, VALIDATION_LEVELS};

pub(crate) fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "initialize_session",
            "description": "Open or resume the orchestration session: counts, roots, ready work, in-flight artifact sessions and the snapshot restoration report.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "working_directory": { "type": "string", "description": "advisory; storage location is fixed at process start" }
                },
                "required": []
            }
        }),
        json!({
            "name": "plan_task",
            "description": "Create a breakdown: one parent task plus subtasks with title-resolved dependencies and an execution order, atomically.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "description": { "type": "string" },
                    "context": { "type": "object" },
                    "subtasks": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "title": { "type": "string" },
                                "description": { "type": "string" },
                                "specialist_type": { "type": "string" },
                                "task_type": { "type": "string", "enum": TASK_TYPES },
                                "complexity": { "type": "string", "enum": COMPLEXITIES },
                                "estimated_effort": { "type": "string" },
                                "dependencies": {
                                    "type": "array",
                                    "items": { "type": "string" },
                                    "description": "titles of sibling subtasks this one depends on"
                                }
                            },
                            "required": ["title", "description", "specialist_type"]
                        }
                    },
                    "triggered_by": { "type": "string" }
                },
                "required": ["title", "description", "subtasks"]
            }
        }),
        json!({
            "name": "create_generic_task",
            "description": "Create a single task outside any breakdown.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "description": { "type": "string" },
                    "parent_task_id": { "type": "string" },
                    "task_type": { "type": "string", "enum": TASK_TYPES },
                    "specialist_type": { "type": "string" },
                    "complexity": { "type": "string", "enum": COMPLEXITIES },
                    "estimated_effort": { "type": "string" },
                    "context": { "type": "object" },
                    "attributes": { "type": "object", "description": "string-valued attributes, stored indexed" },
                    "triggered_by": { "type": "string" }
                },
                "required": ["title"]
            }
        }),
        json!({
            "name": "update_task",
            "description": "Update task fields; status changes go through the transition matrix.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "task_id": { "type": "string" },
                    "title": { "type": "string" },
                    "description": { "type": "string" },
                    "summary": { "type": "string" },
                    "specialist_type": { "type": "string" },
                    "complexity": { "type": "string", "enum": COMPLEXITIES },
                    "estimated_effort": { "type": "string" },
                    "status": { "type": "string", "enum": TASK_STATUSES },
                    "context_patch": { "type": "object", "description": "merged key by key; null values remove keys" },
                    "expected_updated_at_ms": { "type": "integer", "description": "optimistic concurrency token from a prior read" },
                    "triggered_by": { "type": "string" }
                },
                "required": ["task_id"]
            }
        }),
        json!({
            "name": "delete_task",
            "description": "Archive a task (soft, default) or remove it and its subtree outright.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "task_id": { "type": "string" },
                    "soft": { "type": "boolean", "description": "default true" },
                    "force": { "type": "boolean", "description": "hard-delete even with live dependents" },
                    "triggered_by": { "type": "string" }
                },
                "required": ["task_id"]
            }
        }),
        json!({
            "name": "cancel_task",
            "description": "Cancel a task and its non-terminal descendants.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "task_id": { "type": "string" },
                    "reason": { "type": "string" },
                    "preserve_work": { "type": "boolean", "description": "default true" },
                    "triggered_by": { "type": "string" }
                },
                "required": ["task_id"]
            }
        }),
        json!({
            "name": "query_tasks",
            "description": "Fetch one task by id, or list tasks by filters with ordering and paging.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "task_id": { "type": "string", "description": "exact fetch; other filters ignored" },
                    "include_children": { "type": "boolean" },
                    "include_events": { "type": "boolean" },
                    "statuses": { "type": "array", "items": { "type": "string", "enum": TASK_STATUSES } },
                    "task_types": { "type": "array", "items": { "type": "string", "enum": TASK_TYPES } },
                    "specialists": { "type": "array", "items": { "type": "string" } },
                    "complexities": { "type": "array", "items": { "type": "string", "enum": COMPLEXITIES } },
                    "parent_task_id": { "type": "string" },
                    "text": { "type": "string", "description": "substring over title and description" },
                    "created_after_ms": { "type": "integer" },
                    "created_before_ms": { "type": "integer" },
                    "include_archived": { "type": "boolean" },
                    "order_by": { "type": "string", "enum": ["created_at", "updated_at", "title", "hierarchy"] },
                    "descending": { "type": "boolean" },
                    "limit": { "type": "integer", "description": "default 100, clamped to 1000" },
                    "offset": { "type": "integer" }
                },
                "required": []
            }
        }),
        json!({
            "name": "execute_task",
            "description": "Begin a ready task and return the specialist execution context and dependency report.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "task_id": { "type": "string" },
                    "triggered_by": { "type": "string" }
                },
                "required": ["task_id"]
            }
        }),
        json!({
            "name": "complete_task",
            "description": "Finish a task: store detailed work as a finalized artifact, mirror named files, then complete, request revision or park blocked.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "task_id": { "type": "string" },
                    "result": { "type": "string" },
                    "summary": { "type": "string" },
                    "detailed_work": { "type": "string", "description": "full work product; stored as an artifact, never echoed back" },
                    "artifact_type": { "type": "string", "enum": ARTIFACT_TYPES },
                    "file_paths": { "type": "array", "items": { "type": "string" }, "description": "files mirrored next to the artifact" },
                    "next_action": { "type": "string", "enum": NEXT_ACTIONS, "description": "default complete" },
                    "triggered_by": { "type": "string" }
                },
                "required": ["task_id"]
            }
        }),
        json!({
            "name": "synthesize_results",
            "description": "Concatenate completed descendants' results by specialist into a synthesis document on the parent.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "parent_task_id": { "type": "string" },
                    "triggered_by": { "type": "string" }
                },
                "required": ["parent_task_id"]
            }
        }),
        json!({
            "name": "get_status",
            "description": "Project health: counts by status, digests of open work, stale summary.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "include_completed": { "type": "boolean", "description": "default false" }
                },
                "required": []
            }
        }),
        json!({
            "name": "maintenance_coordinator",
            "description": "Run one maintenance operation: scan_cleanup, validate_structure, update_documentation or prepare_handover.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": MAINTENANCE_ACTIONS },
                    "scope": { "type": "string", "enum": MAINTENANCE_SCOPES, "description": "default current_session" },
                    "validation_level": { "type": "string", "enum": VALIDATION_LEVELS, "description": "default basic" },
                    "target_task_id": { "type": "string", "description": "required for specific_subtask scope" }
                },
                "required": ["action"]
            }
        }),
        json!({
            "name": "shutdown_prepare",
            "description": "Quiesce, snapshot and drain the store so a successor process can restore the session.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "timeout_seconds": { "type": "integer", "description": "budget; exceeding it yields a partial but stopped shutdown" }
                },
                "required": []
            }
        }),
        json!({
            "name": "shutdown_status",
            "description": "Phase, percent and restart readiness of a prepared shutdown.",
            "inputSchema": {
                "type": "object",
                "properties": {},
                "required": []
            }
        }),
    ]
}
