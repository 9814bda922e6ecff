#![cfg(feature = "cli")]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::process::{Command, Output};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::protocol::Message;

fn rpcwire(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rpcwire"))
        .args(args)
        .env_remove("RPCWIRE_TIMEOUT")
        .env_remove("RPCWIRE_RETRIES")
        .output()
        .expect("rpcwire should run")
}

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "rpcwire-cli-{tag}-{}-{}",
        std::process::id(),
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    listener.local_addr().expect("local addr").port()
}

/// WebSocket RPC server on its own runtime.
///
/// `sum` streams "working" then the total, `text` answers with a string,
/// `silent` never answers, anything else is an error.
fn spawn_rpc_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let addr = listener.local_addr().expect("local addr");
    listener
        .set_nonblocking(true)
        .expect("nonblocking should be settable");

    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime should build");
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).expect("listener");
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(message)) = ws.next().await {
                        let Message::Text(text) = message else {
                            continue;
                        };
                        let call: Value = serde_json::from_str(&text).expect("call envelope");
                        for reply in answer(&call) {
                            if ws.send(Message::Text(reply.to_string())).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });
    });

    addr
}

fn answer(call: &Value) -> Vec<Value> {
    let marker = call["marker"].clone();
    match call["function_name"].as_str() {
        Some("sum") => {
            let total: i64 = call["parameters_list"]
                .as_array()
                .map(|args| args.iter().filter_map(Value::as_i64).sum())
                .unwrap_or_default();
            vec![
                json!({"result": "working", "marker": marker, "eod": 0}),
                json!({"result": total, "marker": marker, "eod": 1}),
            ]
        }
        Some("text") => vec![json!({"result": "plain", "marker": marker})],
        Some("silent") => Vec::new(),
        other => vec![json!({"error": format!("unknown procedure {other:?}"), "marker": marker})],
    }
}

/// Answers every HTTP request, including WebSocket upgrades, with 401.
fn spawn_unauthorized_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let addr = listener.local_addr().expect("local addr");
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else {
                continue;
            };
            let mut buf = [0u8; 2048];
            let _ = stream.read(&mut buf);
            let _ = stream.write_all(
                b"HTTP/1.1 401 Unauthorized\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
            );
        }
    });
    addr
}

fn stdout_json_lines(output: &Output) -> Vec<Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("stdout line should be JSON"))
        .collect()
}

#[test]
fn version_prints_name_and_version() {
    let output = rpcwire(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("rpcwire {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn call_prints_final_result_as_json() {
    let addr = spawn_rpc_server();
    let url = format!("ws://{addr}/rpc");
    let output = rpcwire(&["--format", "json", "call", &url, "sum", "1", "2", "3"]);

    assert_eq!(output.status.code(), Some(0), "{output:?}");
    let lines = stdout_json_lines(&output);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["procedure"], "sum");
    assert_eq!(lines[0]["result"], 6);
}

#[test]
fn stream_prints_every_partial_result() {
    let addr = spawn_rpc_server();
    let url = format!("ws://{addr}/rpc");
    let output = rpcwire(&["--format", "json", "call", &url, "sum", "4", "5", "--stream"]);

    assert_eq!(output.status.code(), Some(0), "{output:?}");
    let results: Vec<Value> = stdout_json_lines(&output)
        .into_iter()
        .map(|line| line["result"].clone())
        .collect();
    assert_eq!(results, vec![json!("working"), json!(9)]);
}

#[test]
fn raw_format_prints_strings_unquoted() {
    let addr = spawn_rpc_server();
    let url = format!("ws://{addr}/rpc");
    let output = rpcwire(&["--format", "raw", "call", &url, "text"]);

    assert_eq!(output.status.code(), Some(0), "{output:?}");
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "plain");
}

#[test]
fn server_error_exits_with_failure() {
    let addr = spawn_rpc_server();
    let url = format!("ws://{addr}/rpc");
    let output = rpcwire(&["call", &url, "missing"]);

    assert_eq!(output.status.code(), Some(1), "{output:?}");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing failed"), "{stderr}");
}

#[test]
fn unanswered_call_times_out() {
    let addr = spawn_rpc_server();
    let url = format!("ws://{addr}/rpc");
    let output = rpcwire(&["call", &url, "silent", "--timeout", "300ms"]);

    assert_eq!(output.status.code(), Some(124), "{output:?}");
}

#[test]
fn result_violating_its_schema_is_data_invalid() {
    let addr = spawn_rpc_server();
    let url = format!("ws://{addr}/rpc");
    let dir = unique_temp_dir("schema");
    std::fs::write(dir.join("text.schema.json"), r#"{"type": "integer"}"#)
        .expect("schema should be writable");

    let output = rpcwire(&[
        "call",
        &url,
        "text",
        "--validate",
        dir.to_str().expect("utf-8 temp path"),
    ]);

    assert_eq!(output.status.code(), Some(60), "{output:?}");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn invalid_address_is_a_usage_error() {
    let output = rpcwire(&["call", "http://127.0.0.1:1/rpc", "sum"]);
    assert_eq!(output.status.code(), Some(64), "{output:?}");

    let output = rpcwire(&["probe", "not a url"]);
    assert_eq!(output.status.code(), Some(64), "{output:?}");
}

#[test]
fn unreachable_server_exhausts_retries() {
    let url = format!("ws://127.0.0.1:{}/rpc", closed_port());
    let output = rpcwire(&["call", &url, "sum", "--retries", "0", "--timeout", "20s"]);

    assert_eq!(output.status.code(), Some(3), "{output:?}");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("gave up after 0 reconnection attempts"), "{stderr}");
}

#[test]
fn rejected_authorization_stops_the_call() {
    let addr = spawn_unauthorized_server();
    let url = format!("ws://{addr}/rpc");
    let output = rpcwire(&["call", &url, "sum", "--timeout", "20s"]);

    assert_eq!(output.status.code(), Some(50), "{output:?}");
}

#[test]
fn probe_reports_unauthorized() {
    let addr = spawn_unauthorized_server();
    let url = format!("ws://{addr}/rpc");
    let output = rpcwire(&["--format", "json", "probe", &url]);

    assert_eq!(output.status.code(), Some(50), "{output:?}");
    let lines = stdout_json_lines(&output);
    assert_eq!(lines[0]["outcome"], "unauthorized");
    assert_eq!(lines[0]["probe_url"], format!("http://{addr}/rpc"));
}

#[test]
fn probe_reports_unreachable() {
    let url = format!("ws://127.0.0.1:{}/rpc", closed_port());
    let output = rpcwire(&["--format", "json", "probe", &url, "--timeout", "2s"]);

    assert_eq!(output.status.code(), Some(30), "{output:?}");
    let lines = stdout_json_lines(&output);
    assert_eq!(lines[0]["outcome"], "unreachable");
}
