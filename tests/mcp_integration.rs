//! Integration tests against the built binary.
//!
//! Each test starts `mcp-learning-server` on stdio with a configuration file,
//! speaks newline-delimited JSON-RPC to it and checks the replies.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde_json::{json, Value};
use tempfile::NamedTempFile;

// =============================================================================
// Harness
// =============================================================================

struct StdioServer {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    _config: NamedTempFile,
}

impl StdioServer {
    fn start(config: &Value) -> Self {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), config.to_string()).unwrap();

        let mut child = Command::new(env!("CARGO_BIN_EXE_mcp-learning-server"))
            .arg(file.path())
            .arg("-q")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to start server binary");

        let stdin = child.stdin.take();
        let stdout = BufReader::new(child.stdout.take().unwrap());
        Self {
            child,
            stdin,
            stdout,
            _config: file,
        }
    }

    fn send_line(&mut self, line: &str) {
        let stdin = self.stdin.as_mut().unwrap();
        writeln!(stdin, "{line}").unwrap();
        stdin.flush().unwrap();
    }

    fn send(&mut self, message: &Value) {
        self.send_line(&message.to_string());
    }

    fn recv(&mut self) -> Value {
        let mut line = String::new();
        let n = self.stdout.read_line(&mut line).unwrap();
        assert!(n > 0, "server closed stdout");
        assert!(line.ends_with('\n'));
        serde_json::from_str(&line).unwrap()
    }

    fn request(&mut self, id: i64, method: &str, params: Value) -> Value {
        self.send(&json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}));
        let reply = self.recv();
        assert_eq!(reply["id"], id, "reply out of step: {reply}");
        reply
    }

    fn initialize(&mut self) -> Value {
        let reply = self.request(
            0,
            "initialize",
            json!({
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": {"name": "integration", "version": "1.0.0"}
            }),
        );
        self.send(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}));
        reply
    }

    /// Closes stdin and waits for the process to exit.
    fn finish(mut self) -> std::process::ExitStatus {
        drop(self.stdin.take());
        self.child.wait().unwrap()
    }
}

impl Drop for StdioServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn calculator_config() -> Value {
    json!({
        "server": { "name": "integration-server" },
        "providers": { "calculator": {} }
    })
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_initialize_list_and_call_over_stdio() {
    let mut server = StdioServer::start(&calculator_config());

    let init = server.initialize();
    assert_eq!(init["jsonrpc"], "2.0");
    assert_eq!(init["result"]["protocolVersion"], "2025-06-18");
    assert_eq!(init["result"]["serverInfo"]["name"], "integration-server");
    assert_eq!(init["result"]["capabilities"]["tools"]["listChanged"], true);

    let list = server.request(1, "tools/list", json!({}));
    let names: Vec<&str> = list["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["calculate", "solve_quadratic", "unit_converter", "statistics_calculator"]);

    let call = server.request(
        2,
        "tools/call",
        json!({"name": "calculate", "arguments": {"expression": "sqrt(16) + 2 * 3"}}),
    );
    assert_eq!(call["result"]["structuredContent"]["result"], 10);
    assert_eq!(call["result"]["isError"], false);

    assert!(server.finish().success());
}

#[test]
fn test_requests_before_initialize_are_rejected() {
    let mut server = StdioServer::start(&calculator_config());

    let early = server.request(1, "tools/list", json!({}));
    assert_eq!(early["error"]["code"], -32600);

    let init = server.initialize();
    assert!(init.get("error").is_none(), "{init}");
    let ping = server.request(2, "ping", json!({}));
    assert_eq!(ping["result"], json!({}));
}

#[test]
fn test_garbage_line_does_not_end_the_session() {
    let mut server = StdioServer::start(&calculator_config());
    server.initialize();

    server.send_line("{ this is not json");
    let error = server.recv();
    assert_eq!(error["error"]["code"], -32700);
    assert_eq!(error["id"], Value::Null);

    let reply = server.request(3, "tools/call", json!({"name": "nonexistent", "arguments": {}}));
    assert_eq!(reply["error"]["code"], -32601);

    let reply = server.request(4, "tools/call", json!({"name": "calculate", "arguments": {"expression": "1/0"}}));
    assert_eq!(reply["result"]["isError"], true);

    assert!(server.finish().success());
}

#[test]
fn test_deeply_nested_expression_is_rejected_not_fatal() {
    let mut server = StdioServer::start(&calculator_config());
    server.initialize();

    let nested = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
    let reply = server.request(1, "tools/call", json!({"name": "calculate", "arguments": {"expression": nested}}));
    assert_eq!(reply["result"]["isError"], true);

    let reply = server.request(2, "tools/call", json!({"name": "calculate", "arguments": {"expression": "2+2"}}));
    assert_eq!(reply["result"]["structuredContent"]["result"], 4);

    assert!(server.finish().success());
}

#[test]
fn test_missing_config_file_fails_start_up() {
    let status = Command::new(env!("CARGO_BIN_EXE_mcp-learning-server"))
        .arg("/definitely/not/here/config.json")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert!(!status.success());
}
