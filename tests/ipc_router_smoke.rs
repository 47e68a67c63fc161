use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_learnquestd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn learnquestd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn health_unknown_method_and_workspace_guard() {
    let workspace = temp_dir("learnquest-smoke");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health.get("ok").and_then(|v| v.as_bool()), Some(true));
    let version = health
        .get("result")
        .and_then(|r| r.get("version"))
        .and_then(|v| v.as_str())
        .expect("version");
    assert!(!version.is_empty());

    // Mutating methods refuse to run before a workspace is selected.
    let guarded = request(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({ "username": "ada" }),
    );
    assert_eq!(guarded.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(error_code(&guarded), "no_workspace");

    let unknown = request(&mut stdin, &mut reader, "3", "nope.method", json!({}));
    assert_eq!(error_code(&unknown), "not_implemented");

    let selected = request(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected.get("ok").and_then(|v| v.as_bool()), Some(true));

    let bad = request(&mut stdin, &mut reader, "5", "users.create", json!({}));
    assert_eq!(error_code(&bad), "bad_params");

    let created = request(
        &mut stdin,
        &mut reader,
        "6",
        "users.create",
        json!({ "username": "ada", "role": "student" }),
    );
    assert_eq!(created.get("ok").and_then(|v| v.as_bool()), Some(true));

    let duplicate = request(
        &mut stdin,
        &mut reader,
        "7",
        "users.create",
        json!({ "username": "ada" }),
    );
    assert_eq!(error_code(&duplicate), "conflict");

    let _ = std::fs::remove_dir_all(workspace);
}
