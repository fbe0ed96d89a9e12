#![forbid(unsafe_code)]

use serde_json::{Value, json};

use crate::definitions::tool_definitions;
use crate::dispatch::dispatch_tool;
use crate::orchestrator::OrchestratorCore;
use crate::support::{
    JsonRpcRequest, envelope, json_rpc_error, json_rpc_response, tool_text_content,
};

pub(crate) struct McpServer {
    core: OrchestratorCore,
    initialized: bool,
}

impl McpServer {
    pub(crate) fn new(core: OrchestratorCore) -> Self {
        Self {
            core,
            initialized: false,
        }
    }

    /// Routes one JSON-RPC request. `None` means a notification with no
    /// reply on the wire.
    pub(crate) fn handle(&mut self, request: JsonRpcRequest) -> Option<Value> {
        let method = request.method.as_str();

        if method == "initialize" {
            return Some(json_rpc_response(
                request.id,
                json!({
                    "protocolVersion": crate::MCP_VERSION,
                    "serverInfo": { "name": crate::SERVER_NAME, "version": crate::SERVER_VERSION },
                    "capabilities": { "tools": {} }
                }),
            ));
        }

        if !self.initialized && method != "notifications/initialized" {
            return Some(json_rpc_error(request.id, -32002, "Server not initialized"));
        }

        if method == "notifications/initialized" {
            self.initialized = true;
            return None;
        }

        if method == "ping" {
            return Some(json_rpc_response(request.id, json!({})));
        }

        // Some clients probe the optional resources methods by default;
        // advertise an empty set instead of erroring.
        if method == "resources/list" {
            return Some(json_rpc_response(request.id, json!({ "resources": [] })));
        }
        if method == "resources/read" {
            return Some(json_rpc_response(request.id, json!({ "contents": [] })));
        }

        if method == "tools/list" {
            return Some(json_rpc_response(
                request.id,
                json!({ "tools": tool_definitions() }),
            ));
        }

        if method == "tools/call" {
            let Some(params) = request.params.as_ref().and_then(Value::as_object) else {
                return Some(json_rpc_error(
                    request.id,
                    -32602,
                    "params must be an object",
                ));
            };
            let Some(tool_name) = params.get("name").and_then(Value::as_str) else {
                return Some(json_rpc_error(request.id, -32602, "params.name is required"));
            };
            let arguments = params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));
            let reply = dispatch_tool(&mut self.core, tool_name, arguments);
            return Some(json_rpc_response(
                request.id,
                json!({
                    "content": [tool_text_content(&reply)],
                    "isError": !envelope::is_success(&reply),
                }),
            ));
        }

        if method.starts_with("notifications/") {
            return None;
        }

        Some(json_rpc_error(
            request.id,
            -32601,
            &format!("Method not found: {method}"),
        ))
    }
}
