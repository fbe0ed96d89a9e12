#![forbid(unsafe_code)]

//! Protocol-level coverage of the stdio server: handshake gating, the
//! advertised tool list, and the reply envelope both ways.

mod support;

use serde_json::json;
use support::{Server, assert_json_rpc_error};

const EXPECTED_TOOLS: &[&str] = &[
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

#[test]
fn initialize_reports_server_identity() {
    let mut server = Server::start("initialize_identity");
    let resp = server.rpc(
        "initialize",
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": { "name": "test", "version": "0" }
        }),
    );
    assert_eq!(resp["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(resp["result"]["serverInfo"]["name"], "taskloom");
    assert!(resp["result"]["serverInfo"]["version"].is_string());
    assert!(resp["result"]["capabilities"]["tools"].is_object());
}

#[test]
fn requests_before_initialize_are_refused() {
    let mut server = Server::start("uninitialized");
    let resp = server.rpc("tools/list", json!({}));
    assert_json_rpc_error(&resp, -32002);

    server.initialize_default();
    let resp = server.rpc("tools/list", json!({}));
    assert!(resp["result"]["tools"].is_array());
}

#[test]
fn tools_list_advertises_every_tool_once() {
    let mut server = Server::start_initialized("tools_list");
    let resp = server.rpc("tools/list", json!({}));
    let tools = resp["result"]["tools"].as_array().expect("tools array");
    let names: Vec<&str> = tools
        .iter()
        .map(|tool| tool["name"].as_str().expect("tool name"))
        .collect();
    assert_eq!(names, EXPECTED_TOOLS);
    for tool in tools {
        assert!(
            tool["description"].as_str().is_some_and(|d| !d.is_empty()),
            "missing description: {tool}"
        );
        assert_eq!(tool["inputSchema"]["type"], "object", "schema: {tool}");
    }
}

#[test]
fn ping_and_resource_stubs_answer() {
    let mut server = Server::start_initialized("stubs");
    let resp = server.rpc("ping", json!({}));
    assert!(resp["result"].is_object());

    let resp = server.rpc("resources/list", json!({}));
    assert_eq!(resp["result"]["resources"], json!([]));

    let resp = server.rpc("resources/read", json!({ "uri": "anything" }));
    assert_eq!(resp["result"]["contents"], json!([]));
}

#[test]
fn unknown_methods_report_not_found() {
    let mut server = Server::start_initialized("unknown_method");
    let resp = server.rpc("prompts/list", json!({}));
    assert_json_rpc_error(&resp, -32601);
}

#[test]
fn tools_call_params_are_validated() {
    let mut server = Server::start_initialized("call_params");
    let resp = server.rpc("tools/call", json!("not an object"));
    assert_json_rpc_error(&resp, -32602);

    let resp = server.rpc("tools/call", json!({ "arguments": {} }));
    assert_json_rpc_error(&resp, -32602);
}

#[test]
fn unknown_tool_lists_the_known_ones() {
    let mut server = Server::start_initialized("unknown_tool");
    let envelope = server.call_err("drop_all_tables", json!({}));
    assert_eq!(envelope["error_code"], "not_found");
    assert_eq!(envelope["tool"], "drop_all_tables");
    let known = envelope["details"]["known_tools"]
        .as_array()
        .expect("known_tools");
    assert_eq!(known.len(), EXPECTED_TOOLS.len());
}

#[test]
fn envelopes_carry_the_same_shape_both_ways() {
    let mut server = Server::start_initialized("envelopes");

    let (envelope, is_error) = server.call_raw("initialize_session", json!({}));
    assert!(!is_error);
    assert_eq!(envelope["status"], "success");
    assert!(envelope["data"].is_object());
    assert!(envelope["message"].is_string());
    assert!(envelope.get("error_code").is_none(), "{envelope}");

    let (envelope, is_error) = server.call_raw("execute_task", json!({}));
    assert!(is_error);
    assert_eq!(envelope["status"], "error");
    assert_eq!(envelope["error_code"], "invalid_argument");
    assert_eq!(envelope["tool"], "execute_task");
    assert!(envelope["message"].is_string());
}

#[test]
fn bad_enum_values_name_the_field() {
    let mut server = Server::start_initialized("bad_enum");
    let envelope = server.call_err(
        "create_generic_task",
        json!({ "title": "t", "complexity": "trivial-ish" }),
    );
    assert_eq!(envelope["error_code"], "invalid_argument");
    let message = envelope["message"].as_str().expect("message");
    assert!(message.contains("complexity"), "{message}");
}

#[test]
fn null_arguments_are_accepted_as_empty() {
    let mut server = Server::start_initialized("null_args");
    let resp = server.rpc("tools/call", json!({ "name": "get_status", "arguments": null }));
    assert_eq!(resp["result"]["isError"], false, "{resp}");
}

#[test]
fn notifications_produce_no_reply() {
    let mut server = Server::start_initialized("notifications");
    server.send(json!({
        "jsonrpc": "2.0",
        "method": "notifications/progress",
        "params": {}
    }));
    // The next reply on the wire must belong to the next request, not
    // the notification.
    let resp = server.rpc("ping", json!({}));
    assert!(resp["result"].is_object(), "{resp}");
}

#[test]
fn parse_errors_use_standard_codes() {
    let mut server = Server::start("parse_errors");
    // A well-formed request first, so the newline framing is pinned
    // before the malformed line arrives.
    let resp = server.rpc("ping", json!({}));
    assert_json_rpc_error(&resp, -32002);

    server.send_raw_line("{\"jsonrpc\": \"2.0\", \"method\":");
    let resp = server.recv();
    assert_json_rpc_error(&resp, -32700);

    let resp = server.request(json!([1, 2, 3]));
    assert_json_rpc_error(&resp, -32600);

    let resp = server.request(json!({ "id": 4 }));
    assert_json_rpc_error(&resp, -32600);
    assert_eq!(resp["id"], 4);
}

#[test]
fn missing_required_argument_is_invalid() {
    let mut server = Server::start_initialized("missing_required");
    let envelope = server.call_err("plan_task", json!({ "title": "only a title" }));
    assert_eq!(envelope["error_code"], "invalid_argument");
    let message = envelope["message"].as_str().expect("message");
    assert!(message.contains("description"), "{message}");
}
