//! MCP protocol integration tests.
//!
//! These tests spawn the actual `ctxg mcp` process and communicate via
//! JSON-RPC over stdio, testing the complete MCP protocol flow.
//!
//! The rmcp library uses line-delimited JSON (each message is one line):
//! ```
//! {"jsonrpc":"2.0","id":1,"method":"initialize",...}\n
//! {"jsonrpc":"2.0","id":1,"result":{...}}\n
//! ```

use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

/// JSON-RPC 2.0 response
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl JsonRpcResponse {
    /// True for protocol errors and for tool results flagged `isError`.
    fn is_error(&self) -> bool {
        self.error.is_some()
            || self
                .result
                .as_ref()
                .and_then(|r| r.get("isError"))
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }

    /// First text block of a tool result.
    fn text(&self) -> String {
        self.result
            .as_ref()
            .and_then(|r| r["content"][0]["text"].as_str())
            .unwrap_or_else(|| panic!("Expected text content in {:?}", self))
            .to_string()
    }

    /// First text block of a tool result, parsed as JSON.
    fn json(&self) -> Value {
        serde_json::from_str(&self.text()).expect("Tool text should be JSON")
    }
}

/// Drives a `ctxg mcp` child process over line-delimited JSON-RPC.
struct McpTestClient {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
    _temp_dir: tempfile::TempDir,
}

impl McpTestClient {
    /// Spawn a server with its own session database and the keyword
    /// classifier, then complete the initialize handshake.
    fn connect() -> (Self, JsonRpcResponse) {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");

        let mut child = Command::new(env!("CARGO_BIN_EXE_ctxg"))
            .arg("--db")
            .arg(temp_dir.path().join("sessions.db"))
            .arg("mcp")
            .env("CONTEXT_GATE_CLASSIFIER", "keyword")
            .env_remove("CONTEXT_GATE_DB")
            .env("XDG_CONFIG_HOME", temp_dir.path())
            .env("HOME", temp_dir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("Failed to spawn ctxg mcp");

        let stdin = child.stdin.take().expect("Failed to get stdin");
        let stdout = BufReader::new(child.stdout.take().expect("Failed to get stdout"));
        let mut client = Self {
            child,
            stdin,
            stdout,
            next_id: 0,
            _temp_dir: temp_dir,
        };

        let init = client.request(
            "initialize",
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "ctxg-test", "version": "0.0.0" }
            }),
        );
        client.send(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }));
        (client, init)
    }

    fn spawn() -> Self {
        Self::connect().0
    }

    fn send(&mut self, message: Value) {
        writeln!(self.stdin, "{}", message).expect("Failed to write message");
        self.stdin.flush().expect("Failed to flush stdin");
    }

    fn request(&mut self, method: &str, params: Value) -> JsonRpcResponse {
        self.next_id += 1;
        let id = self.next_id;
        let mut message = json!({ "jsonrpc": "2.0", "id": id, "method": method });
        if !params.is_null() {
            message["params"] = params;
        }
        self.send(message);

        let mut line = String::new();
        self.stdout
            .read_line(&mut line)
            .expect("Failed to read line");
        let response: JsonRpcResponse =
            serde_json::from_str(line.trim()).expect("Failed to parse response");
        assert_eq!(response.id, Some(id), "Response id mismatch");
        response
    }

    fn list_tools(&mut self) -> Vec<Value> {
        let response = self.request("tools/list", Value::Null);
        assert!(!response.is_error(), "tools/list failed: {:?}", response);
        response.result.expect("Expected result")["tools"]
            .as_array()
            .expect("Tools should be array")
            .clone()
    }

    fn call_tool(&mut self, name: &str, arguments: Value) -> JsonRpcResponse {
        self.request(
            "tools/call",
            json!({ "name": name, "arguments": arguments }),
        )
    }

    /// Call a tool that must succeed and return its JSON payload.
    fn call_json(&mut self, name: &str, arguments: Value) -> Value {
        let response = self.call_tool(name, arguments);
        assert!(!response.is_error(), "{} failed: {:?}", name, response);
        response.json()
    }
}

impl Drop for McpTestClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

// ============================================================
// Protocol Tests
// ============================================================

mod protocol {
    use super::*;

    #[test]
    fn initialize_returns_server_info() {
        let (_client, response) = McpTestClient::connect();

        assert!(response.error.is_none(), "Expected success, got error");
        let result = response.result.expect("Expected result");

        assert_eq!(result["serverInfo"]["name"], "context-gate");
        assert!(result.get("capabilities").is_some());
        assert!(result["instructions"]
            .as_str()
            .expect("Expected instructions")
            .contains("commit_context"));
    }

    #[test]
    fn tools_list_returns_all_tools() {
        let mut client = McpTestClient::spawn();

        let tools = client.list_tools();
        let mut names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
        names.sort();

        assert_eq!(
            names,
            vec![
                "check_refinement_trigger",
                "commit_context",
                "detect_context",
                "get_session_context",
                "refine_context",
                "render_review",
            ]
        );
    }

    #[test]
    fn tools_have_descriptions_and_schemas() {
        let mut client = McpTestClient::spawn();

        for tool in client.list_tools() {
            let name = tool["name"].as_str().unwrap_or("?");
            assert!(tool.get("description").is_some(), "Tool {} missing description", name);
            assert!(tool.get("inputSchema").is_some(), "Tool {} missing inputSchema", name);
        }
    }
}

// ============================================================
// Tool Call Tests
// ============================================================

mod tool_calls {
    use super::*;

    const RAG: &str = "Build a RAG system for document search";

    #[test]
    fn detect_context_returns_review_prompt() {
        let mut client = McpTestClient::spawn();

        let detected = client.call_json("detect_context", json!({ "description": RAG }));

        assert_eq!(detected["context"]["domain"], "ai");
        assert_eq!(detected["fallback"], false);
        assert!(detected["review_prompt"]
            .as_str()
            .expect("Expected prompt")
            .contains("Reply `approve`"));
    }

    #[test]
    fn full_review_workflow() {
        let mut client = McpTestClient::spawn();
        let session = json!({ "session_id": "t-1" });

        // Nothing stored yet
        let stored = client.call_json("get_session_context", session.clone());
        assert_eq!(stored["found"], false);

        // Detect, then the human answers "refine: domain=web"
        let detected = client.call_json("detect_context", json!({ "description": RAG }));
        let refined = client.call_json(
            "refine_context",
            json!({ "context": detected["context"], "feedback": "domain=web" }),
        );
        assert_eq!(refined["context"]["domain"], "web");
        assert_eq!(refined["context"]["refined"], true);

        // The human approves
        client.call_json(
            "commit_context",
            json!({ "session_id": "t-1", "context": refined["context"] }),
        );

        // Later conversations reuse it
        let stored = client.call_json("get_session_context", session.clone());
        assert_eq!(stored["found"], true);
        assert_eq!(stored["context"]["domain"], "web");
        assert_eq!(stored["history_len"], 1);

        // A trigger phrase reopens refinement without committing
        let trigger = client.call_json(
            "check_refinement_trigger",
            json!({ "session_id": "t-1", "message": "refine: intent=bug_fix" }),
        );
        assert_eq!(trigger["triggered"], true);
        assert_eq!(trigger["context"]["intent"], "bug_fix");
        assert_eq!(trigger["context"]["domain"], "web");

        let stored = client.call_json("get_session_context", session);
        assert_eq!(stored["context"]["intent"], "new_feature");
    }

    #[test]
    fn render_review_returns_plain_text() {
        let mut client = McpTestClient::spawn();

        let response = client.call_tool(
            "render_review",
            json!({
                "context": {
                    "complexity": "simple",
                    "domain": "cli",
                    "intent": "refactor",
                    "entities": []
                }
            }),
        );

        let text = response.text();
        assert!(text.contains("Domain:     cli"));
        assert!(text.contains("Entities:   (none)"));
    }
}

// ============================================================
// Error Handling Tests
// ============================================================

mod errors {
    use super::*;

    #[test]
    fn invalid_tool_name_returns_error() {
        let mut client = McpTestClient::spawn();

        let response = client.call_tool("nonexistent_tool", json!({}));

        assert!(response.error.is_some(), "Expected error for invalid tool");
    }

    #[test]
    fn invalid_complexity_returns_error() {
        let mut client = McpTestClient::spawn();

        let response = client.call_tool(
            "commit_context",
            json!({
                "session_id": "t-1",
                "context": { "complexity": "huge", "domain": "web", "intent": "refactor" }
            }),
        );

        assert!(response.is_error());
    }

    #[test]
    fn missing_required_param_returns_error() {
        let mut client = McpTestClient::spawn();

        // detect_context requires 'description'
        let response = client.call_tool("detect_context", json!({}));

        assert!(response.is_error());
    }
}
