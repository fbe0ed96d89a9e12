#![forbid(unsafe_code)]
#![allow(dead_code)]

use serde_json::{Value, json};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

pub(crate) struct Server {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    storage_dir: PathBuf,
    cleanup_storage: bool,
    next_id: i64,
}

impl Server {
    pub(crate) fn start(test_name: &str) -> Self {
        Self::start_with_storage_dir(temp_dir(test_name), true, &[])
    }

    pub(crate) fn start_with_env(test_name: &str, envs: &[(&str, &str)]) -> Self {
        Self::start_with_storage_dir(temp_dir(test_name), true, envs)
    }

    pub(crate) fn start_with_storage_dir(
        storage_dir: PathBuf,
        cleanup_storage: bool,
        envs: &[(&str, &str)],
    ) -> Self {
        std::fs::create_dir_all(&storage_dir).expect("create storage dir");
        let mut command = Command::new(env!("CARGO_BIN_EXE_tl_mcp"));
        command
            .arg("--storage-dir")
            .arg(&storage_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped());
        for (key, value) in envs {
            command.env(key, value);
        }
        let mut child = command.spawn().expect("spawn tl_mcp");

        let stdin = child.stdin.take().expect("stdin");
        let stdout = BufReader::new(child.stdout.take().expect("stdout"));
        Self {
            child,
            stdin,
            stdout,
            storage_dir,
            cleanup_storage,
            next_id: 1,
        }
    }

    pub(crate) fn start_initialized(test_name: &str) -> Self {
        let mut server = Self::start(test_name);
        server.initialize_default();
        server
    }

    pub(crate) fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub(crate) fn send(&mut self, request: Value) {
        writeln!(self.stdin, "{request}").expect("write request");
        self.stdin.flush().expect("flush request");
    }

    pub(crate) fn send_raw_line(&mut self, line: &str) {
        writeln!(self.stdin, "{line}").expect("write raw line");
        self.stdin.flush().expect("flush raw line");
    }

    pub(crate) fn recv(&mut self) -> Value {
        let mut line = String::new();
        self.stdout.read_line(&mut line).expect("read response");
        assert!(!line.trim().is_empty(), "empty response line");
        serde_json::from_str(&line).expect("parse response json")
    }

    pub(crate) fn request(&mut self, request: Value) -> Value {
        self.send(request);
        self.recv()
    }

    pub(crate) fn rpc(&mut self, method: &str, params: Value) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        self.request(json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
    }

    /// Calls a tool, returning the parsed envelope and the MCP isError flag.
    pub(crate) fn call_raw(&mut self, tool: &str, arguments: Value) -> (Value, bool) {
        let resp = self.rpc("tools/call", json!({ "name": tool, "arguments": arguments }));
        let is_error = resp["result"]["isError"].as_bool().expect("isError flag");
        (extract_tool_text(&resp), is_error)
    }

    /// Calls a tool, asserts success, and returns the envelope's `data`.
    pub(crate) fn call_ok(&mut self, tool: &str, arguments: Value) -> Value {
        let (envelope, is_error) = self.call_raw(tool, arguments);
        assert!(!is_error, "{tool} failed: {envelope}");
        assert_eq!(envelope["status"], "success", "{tool}: {envelope}");
        envelope["data"].clone()
    }

    /// Calls a tool expecting failure and returns the error envelope.
    pub(crate) fn call_err(&mut self, tool: &str, arguments: Value) -> Value {
        let (envelope, is_error) = self.call_raw(tool, arguments);
        assert!(is_error, "{tool} unexpectedly succeeded: {envelope}");
        assert_eq!(envelope["status"], "error", "{tool}: {envelope}");
        envelope
    }

    pub(crate) fn initialize_default(&mut self) {
        let _ = self.rpc(
            "initialize",
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "test", "version": "0" }
            }),
        );
        self.send(json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
            "params": {}
        }));
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        if self.cleanup_storage {
            let _ = std::fs::remove_dir_all(&self.storage_dir);
        }
    }
}

pub(crate) fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("tl_mcp_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub(crate) fn extract_tool_text(resp: &Value) -> Value {
    let text = resp
        .get("result")
        .and_then(|value| value.get("content"))
        .and_then(|value| value.get(0))
        .and_then(|value| value.get("text"))
        .and_then(Value::as_str)
        .expect("result.content[0].text");
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

pub(crate) fn assert_json_rpc_error(resp: &Value, expected_code: i64) {
    let code = resp
        .get("error")
        .and_then(|value| value.get("code"))
        .and_then(Value::as_i64)
        .expect("error.code");
    assert_eq!(code, expected_code);
}
