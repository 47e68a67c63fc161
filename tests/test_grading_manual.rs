use chrono::{Duration, Utc};
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

struct Session {
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u32,
}

impl Session {
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

    fn call_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.call(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "request failed: {}",
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }
}

fn error_code(value: &serde_json::Value) -> Option<String> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .map(String::from)
}

fn str_of(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, value))
        .to_string()
}

#[test]
fn essay_tests_wait_for_manual_grades() {
    let workspace = temp_dir("learnquest-grading");
    let (_child, stdin, reader) = spawn_sidecar();
    let mut s = Session {
        stdin,
        reader,
        next_id: 0,
    };

    s.call_ok(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    s.call_ok("levels.seed", json!({ "count": 20 }));
    let teacher = s.call_ok(
        "users.create",
        json!({ "username": "grace", "role": "teacher" }),
    );
    let teacher_id = str_of(&teacher, "userId");
    let student = s.call_ok("users.create", json!({ "username": "ada" }));
    let student_id = str_of(&student, "userId");

    let start_time = (Utc::now() - Duration::hours(1)).to_rfc3339();
    let end_time = (Utc::now() + Duration::hours(1)).to_rfc3339();
    let test = s.call_ok(
        "tests.create",
        json!({
            "teacherId": teacher_id,
            "title": "Essay Final",
            "slug": "essay-final",
            "startTime": start_time,
            "endTime": end_time
        }),
    );
    let test_id = str_of(&test, "testId");

    let quiz = s.call_ok(
        "tests.addItem",
        json!({
            "testId": test_id,
            "kind": "quiz",
            "prompt": "2+2?",
            "answerKey": "4",
            "points": 5
        }),
    );
    let quiz_id = str_of(&quiz, "itemId");
    let essay = s.call_ok(
        "tests.addItem",
        json!({
            "testId": test_id,
            "kind": "essay",
            "prompt": "Discuss the industrial revolution.",
            "points": 10
        }),
    );
    let essay_id = str_of(&essay, "itemId");

    s.call_ok(
        "tests.assign",
        json!({ "testId": test_id, "studentId": student_id }),
    );
    s.call_ok(
        "tests.setStatus",
        json!({ "testId": test_id, "status": "scheduled" }),
    );

    let attempt = s.call_ok(
        "tests.start",
        json!({ "testId": test_id, "studentId": student_id }),
    );
    let attempt_id = str_of(&attempt, "id");

    s.call_ok(
        "tests.submitItem",
        json!({ "attemptId": attempt_id, "itemId": quiz_id, "answer": "4" }),
    );
    let essay_sub = s.call_ok(
        "tests.submitItem",
        json!({ "attemptId": attempt_id, "itemId": essay_id, "answer": "Steam changed everything." }),
    );
    let essay_sub_id = str_of(&essay_sub, "id");
    assert!(essay_sub.get("score").map(|v| v.is_null()).unwrap_or(false));

    let submitted = s.call_ok("tests.submit", json!({ "attemptId": attempt_id }));
    assert_eq!(
        submitted.get("status").and_then(|v| v.as_str()),
        Some("submitted")
    );
    assert!(submitted
        .get("totalScore")
        .map(|v| v.is_null())
        .unwrap_or(false));

    // Submitting again must fail and leave the stored attempt untouched.
    let resubmit = s.call("tests.submit", json!({ "attemptId": attempt_id }));
    assert_eq!(error_code(&resubmit).as_deref(), Some("conflict"));
    let frozen = s.call_ok("tests.attempt", json!({ "attemptId": attempt_id }));
    assert_eq!(frozen.get("status").and_then(|v| v.as_str()), Some("submitted"));

    // 11 points against a 10-point essay is out of range.
    let too_high = s.call(
        "tests.grade",
        json!({ "submissionId": essay_sub_id, "score": 11 }),
    );
    assert_eq!(error_code(&too_high).as_deref(), Some("out_of_range"));

    let graded = s.call_ok(
        "tests.grade",
        json!({ "submissionId": essay_sub_id, "score": 8, "feedback": "Good argument." }),
    );
    assert_eq!(
        graded
            .get("attempt")
            .and_then(|a| a.get("status"))
            .and_then(|v| v.as_str()),
        Some("graded")
    );
    assert_eq!(
        graded
            .get("attempt")
            .and_then(|a| a.get("totalScore"))
            .and_then(|v| v.as_f64()),
        Some(13.0)
    );
    assert_eq!(
        graded
            .get("submission")
            .and_then(|sub| sub.get("feedback"))
            .and_then(|v| v.as_str()),
        Some("Good argument.")
    );

    // The graded total became completion XP exactly once.
    let profile = s.call_ok("users.get", json!({ "userId": student_id }));
    assert_eq!(profile.get("xp").and_then(|v| v.as_i64()), Some(13));

    // Regrading adjusts the total without paying XP again.
    let regraded = s.call_ok(
        "tests.grade",
        json!({ "submissionId": essay_sub_id, "score": 9 }),
    );
    assert_eq!(
        regraded
            .get("attempt")
            .and_then(|a| a.get("totalScore"))
            .and_then(|v| v.as_f64()),
        Some(14.0)
    );
    let profile = s.call_ok("users.get", json!({ "userId": student_id }));
    assert_eq!(profile.get("xp").and_then(|v| v.as_i64()), Some(13));

    let _ = std::fs::remove_dir_all(workspace);
}
