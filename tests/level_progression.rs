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

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn seeded_thresholds_match_the_growth_formula() {
    let workspace = temp_dir("learnquest-levels");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seeded = request_ok(&mut stdin, &mut reader, "2", "levels.seed", json!({ "count": 10 }));
    assert_eq!(seeded.get("seeded").and_then(|v| v.as_i64()), Some(10));

    let listed = request_ok(&mut stdin, &mut reader, "3", "levels.list", json!({}));
    let levels = listed.get("levels").and_then(|v| v.as_array()).expect("levels");
    assert_eq!(levels.len(), 10);

    let exp = |i: usize| -> i64 {
        levels[i]
            .get("expRequired")
            .and_then(|v| v.as_i64())
            .expect("expRequired")
    };
    // round(100 * n^1.5) per step: 100, 283, 520, 800, 1118, ...
    assert_eq!(exp(0), 0);
    assert_eq!(exp(1), 100);
    assert_eq!(exp(2), 383);
    assert_eq!(exp(3), 903);
    assert_eq!(exp(4), 1703);
    assert_eq!(exp(5), 2821);

    // Re-seeding must not change anything.
    let _ = request_ok(&mut stdin, &mut reader, "4", "levels.seed", json!({ "count": 10 }));
    let listed2 = request_ok(&mut stdin, &mut reader, "5", "levels.list", json!({}));
    let levels2 = listed2.get("levels").and_then(|v| v.as_array()).expect("levels");
    assert_eq!(levels.len(), levels2.len());
    assert_eq!(
        levels2[5].get("expRequired").and_then(|v| v.as_i64()),
        Some(2821)
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn xp_awards_move_users_through_levels() {
    let workspace = temp_dir("learnquest-xp");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "levels.seed", json!({ "count": 10 }));
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "users.create",
        json!({ "username": "ada", "displayName": "Ada" }),
    );
    let user_id = created
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("userId")
        .to_string();

    // 2821 XP is the exact level 6 boundary.
    let award = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "users.awardXp",
        json!({ "userId": user_id, "amount": 2821, "reason": "seed" }),
    );
    assert_eq!(award.get("levelAfter").and_then(|v| v.as_i64()), Some(6));
    assert_eq!(award.get("leveledUp").and_then(|v| v.as_bool()), Some(true));

    let profile = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "users.get",
        json!({ "userId": user_id }),
    );
    assert_eq!(profile.get("levelNumber").and_then(|v| v.as_i64()), Some(6));
    assert_eq!(profile.get("xpIntoLevel").and_then(|v| v.as_i64()), Some(0));
    // level 7 needs round(100 * 6^1.5) = 1470 more.
    assert_eq!(
        profile.get("xpToNextLevel").and_then(|v| v.as_i64()),
        Some(1470)
    );

    let events = request_ok(&mut stdin, &mut reader, "6", "events.poll", json!({}));
    let rows = events.get("events").and_then(|v| v.as_array()).expect("events");
    let level_up = rows
        .iter()
        .find(|e| e.get("eventType").and_then(|v| v.as_str()) == Some("level_up"))
        .expect("level_up event");
    assert_eq!(
        level_up
            .get("payload")
            .and_then(|p| p.get("levelNumber"))
            .and_then(|v| v.as_i64()),
        Some(6)
    );

    // XP far past the table clamps at the top seeded level.
    let award = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "users.awardXp",
        json!({ "userId": user_id, "amount": 1000000 }),
    );
    assert_eq!(award.get("levelAfter").and_then(|v| v.as_i64()), Some(10));

    let _ = std::fs::remove_dir_all(workspace);
}
