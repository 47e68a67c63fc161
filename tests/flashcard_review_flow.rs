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

struct Session {
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u32,
}

impl Session {
    fn call_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        request_ok(
            &mut self.stdin,
            &mut self.reader,
            &self.next_id.to_string(),
            method,
            params,
        )
    }

    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        request(
            &mut self.stdin,
            &mut self.reader,
            &self.next_id.to_string(),
            method,
            params,
        )
    }
}

fn setup(prefix: &str) -> (Child, Session, PathBuf, String, String) {
    let workspace = temp_dir(prefix);
    let (child, stdin, reader) = spawn_sidecar();
    let mut session = Session {
        stdin,
        reader,
        next_id: 0,
    };
    session.call_ok(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    session.call_ok("levels.seed", json!({ "count": 20 }));
    let user = session.call_ok("users.create", json!({ "username": "ada" }));
    let user_id = user
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("userId")
        .to_string();
    let card = session.call_ok(
        "flashcards.create",
        json!({ "front": "capital of France?", "back": "Paris" }),
    );
    let card_id = card
        .get("flashcardId")
        .and_then(|v| v.as_str())
        .expect("flashcardId")
        .to_string();
    (child, session, workspace, user_id, card_id)
}

#[test]
fn perfect_recall_sequence_follows_sm2() {
    let (_child, mut session, workspace, user_id, card_id) = setup("learnquest-srs");

    // A never-reviewed card is due immediately.
    let due = session.call_ok("flashcards.due", json!({ "userId": user_id }));
    assert_eq!(
        due.get("due").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    let first = session.call_ok(
        "flashcards.review",
        json!({ "userId": user_id, "flashcardId": card_id, "quality": 5 }),
    );
    assert_eq!(first.get("repetitions").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(first.get("intervalDays").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(first.get("easeFactor").and_then(|v| v.as_i64()), Some(260));
    assert_eq!(first.get("streakDays").and_then(|v| v.as_i64()), Some(1));

    // Scheduled a day out, so no longer due.
    let due = session.call_ok("flashcards.due", json!({ "userId": user_id }));
    assert_eq!(
        due.get("due").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    let second = session.call_ok(
        "flashcards.review",
        json!({ "userId": user_id, "flashcardId": card_id, "quality": 5 }),
    );
    assert_eq!(second.get("repetitions").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(second.get("intervalDays").and_then(|v| v.as_i64()), Some(6));
    assert_eq!(second.get("easeFactor").and_then(|v| v.as_i64()), Some(270));

    let third = session.call_ok(
        "flashcards.review",
        json!({ "userId": user_id, "flashcardId": card_id, "quality": 5 }),
    );
    assert_eq!(third.get("repetitions").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(third.get("easeFactor").and_then(|v| v.as_i64()), Some(280));
    // round(6 * 280 / 100) = 17 days out.
    assert_eq!(third.get("intervalDays").and_then(|v| v.as_i64()), Some(17));

    // Successful recalls paid 5 XP each.
    let profile = session.call_ok("users.get", json!({ "userId": user_id }));
    assert_eq!(profile.get("xp").and_then(|v| v.as_i64()), Some(15));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn failed_recall_resets_and_ease_never_sinks_below_floor() {
    let (_child, mut session, workspace, user_id, card_id) = setup("learnquest-srs-fail");

    for _ in 0..3 {
        session.call_ok(
            "flashcards.review",
            json!({ "userId": user_id, "flashcardId": card_id, "quality": 5 }),
        );
    }

    let failed = session.call_ok(
        "flashcards.review",
        json!({ "userId": user_id, "flashcardId": card_id, "quality": 0 }),
    );
    assert_eq!(failed.get("repetitions").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(failed.get("intervalDays").and_then(|v| v.as_i64()), Some(1));

    let mut last_ease = failed.get("easeFactor").and_then(|v| v.as_i64()).expect("ease");
    for _ in 0..6 {
        let blackout = session.call_ok(
            "flashcards.review",
            json!({ "userId": user_id, "flashcardId": card_id, "quality": 0 }),
        );
        last_ease = blackout.get("easeFactor").and_then(|v| v.as_i64()).expect("ease");
        assert!(last_ease >= 130, "ease factor sank to {}", last_ease);
    }
    assert_eq!(last_ease, 130);

    // Failed reviews earn no XP on top of the three successes.
    let profile = session.call_ok("users.get", json!({ "userId": user_id }));
    assert_eq!(profile.get("xp").and_then(|v| v.as_i64()), Some(15));

    let invalid = session.call(
        "flashcards.review",
        json!({ "userId": user_id, "flashcardId": card_id, "quality": 9 }),
    );
    assert_eq!(
        invalid
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );

    let _ = std::fs::remove_dir_all(workspace);
}
