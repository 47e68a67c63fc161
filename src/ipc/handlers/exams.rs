use crate::achievements;
use crate::domain::{fmt_ts, parse_ts};
use crate::exams::{self, AttemptRow, AttemptStatus, ItemKind, SubmissionRow, TestStatus};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::progression;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, None)
    }
}

fn require_teacher(conn: &Connection, user_id: &str) -> Result<(), HandlerErr> {
    let role: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [user_id], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
        })?;
    match role.as_deref() {
        None => Err(HandlerErr {
            code: "not_found",
            message: "teacher not found".to_string(),
        }),
        Some("teacher") | Some("admin") => Ok(()),
        Some(_) => Err(HandlerErr {
            code: "bad_params",
            message: "user is not a teacher".to_string(),
        }),
    }
}

fn attempt_to_json(attempt: &AttemptRow) -> serde_json::Value {
    json!({
        "id": attempt.id,
        "testId": attempt.test_id,
        "studentId": attempt.student_id,
        "attemptNumber": attempt.attempt_number,
        "startedAt": fmt_ts(attempt.started_at),
        "submittedAt": attempt.submitted_at.map(fmt_ts),
        "timeSpentMinutes": attempt.time_spent_minutes,
        "totalScore": attempt.total_score,
        "status": attempt.status.as_str()
    })
}

fn submission_to_json(sub: &SubmissionRow) -> serde_json::Value {
    json!({
        "id": sub.id,
        "attemptId": sub.test_attempt_id,
        "itemId": sub.test_item_id,
        "answer": sub.answer,
        "score": sub.score,
        "isCorrect": sub.is_correct,
        "feedback": sub.feedback
    })
}

/// Round the attempt total into whole XP; graded attempts feed progression.
fn completion_xp(total_score: Option<f64>) -> i64 {
    total_score.map(|s| s.round() as i64).unwrap_or(0).max(0)
}

fn handle_tests_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };
    let title = match req.params.get("title").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing title", None),
    };
    if title.is_empty() {
        return err(&req.id, "bad_params", "title must not be empty", None);
    }
    let slug = match req.params.get("slug").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing slug", None),
    };
    if slug.is_empty() {
        return err(&req.id, "bad_params", "slug must not be empty", None);
    }
    let course_id = req
        .params
        .get("courseId")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());
    let duration_minutes = req.params.get("durationMinutes").and_then(|v| v.as_i64());
    if duration_minutes.map(|d| d < 1).unwrap_or(false) {
        return err(&req.id, "bad_params", "durationMinutes must be >= 1", None);
    }
    let max_attempts = req
        .params
        .get("maxAttempts")
        .and_then(|v| v.as_i64())
        .unwrap_or(1);
    if max_attempts < 1 {
        return err(&req.id, "bad_params", "maxAttempts must be >= 1", None);
    }

    let start_time = match req.params.get("startTime").and_then(|v| v.as_str()) {
        Some(v) => match parse_ts(v) {
            Ok(t) => Some(t),
            Err(e) => return e.response(&req.id),
        },
        None => None,
    };
    let end_time = match req.params.get("endTime").and_then(|v| v.as_str()) {
        Some(v) => match parse_ts(v) {
            Ok(t) => Some(t),
            Err(e) => return e.response(&req.id),
        },
        None => None,
    };
    if let (Some(start), Some(end)) = (start_time, end_time) {
        if end <= start {
            return err(&req.id, "bad_params", "endTime must be after startTime", None);
        }
    }

    let shuffle_questions = req
        .params
        .get("shuffleQuestions")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let show_results_immediately = req
        .params
        .get("showResultsImmediately")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    let allow_review = req
        .params
        .get("allowReview")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    if let Err(e) = require_teacher(conn, &teacher_id) {
        return e.response(&req.id);
    }
    if let Some(course_id) = &course_id {
        let exists: Option<i64> = match conn
            .query_row(
                "SELECT 1 FROM courses WHERE id = ? AND deleted_at IS NULL",
                [course_id],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if exists.is_none() {
            return err(&req.id, "not_found", "course not found", None);
        }
    }

    let test_id = Uuid::new_v4().to_string();
    let insert = conn.execute(
        "INSERT INTO tests(
            id, teacher_id, course_id, title, slug, duration_minutes,
            start_time, end_time, status, shuffle_questions,
            show_results_immediately, allow_review, max_attempts)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 'draft', ?, ?, ?, ?)",
        (
            &test_id,
            &teacher_id,
            &course_id,
            &title,
            &slug,
            duration_minutes,
            start_time.map(fmt_ts),
            end_time.map(fmt_ts),
            shuffle_questions as i64,
            show_results_immediately as i64,
            allow_review as i64,
            max_attempts,
        ),
    );
    if let Err(e) = insert {
        if let rusqlite::Error::SqliteFailure(code, _) = &e {
            if code.code == rusqlite::ErrorCode::ConstraintViolation {
                return err(
                    &req.id,
                    "conflict",
                    "test slug already exists",
                    Some(json!({ "slug": slug })),
                );
            }
        }
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "tests" })),
        );
    }

    ok(&req.id, json!({ "testId": test_id, "status": "draft" }))
}

fn handle_tests_add_item(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let test_id = match req.params.get("testId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing testId", None),
    };
    let kind = match req
        .params
        .get("kind")
        .and_then(|v| v.as_str())
        .and_then(ItemKind::parse)
    {
        Some(v) => v,
        None => {
            return err(
                &req.id,
                "bad_params",
                "kind must be one of: quiz, essay, coding",
                None,
            )
        }
    };
    let prompt = match req.params.get("prompt").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing prompt", None),
    };
    if prompt.is_empty() {
        return err(&req.id, "bad_params", "prompt must not be empty", None);
    }
    let answer_key = req
        .params
        .get("answerKey")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());
    let points = match req.params.get("points").and_then(|v| v.as_f64()) {
        Some(v) if v > 0.0 => v,
        _ => return err(&req.id, "bad_params", "points must be > 0", None),
    };

    if kind.auto_gradable() && answer_key.is_none() {
        return err(
            &req.id,
            "bad_params",
            "quiz and coding items require an answerKey",
            None,
        );
    }
    if !kind.auto_gradable() && answer_key.is_some() {
        return err(&req.id, "bad_params", "essay items take no answerKey", None);
    }

    let test = match exams::load_test(conn, &test_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if test.status != TestStatus::Draft {
        return err(
            &req.id,
            "conflict",
            "items can only be added to a draft test",
            Some(json!({ "reason": "test_not_editable", "status": test.status.as_str() })),
        );
    }

    let sort_order: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM test_items WHERE test_id = ?",
        [&test_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let item_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO test_items(id, test_id, item_kind, prompt, answer_key, sort_order, points)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &item_id,
            &test_id,
            kind.as_str(),
            &prompt,
            &answer_key,
            sort_order,
            points,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "test_items" })),
        );
    }

    // Keep the denormalized total in step with the items.
    if let Err(e) = conn.execute(
        "UPDATE tests SET total_points =
           (SELECT COALESCE(SUM(points), 0) FROM test_items WHERE test_id = ?)
         WHERE id = ?",
        (&test_id, &test_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "itemId": item_id, "sortOrder": sort_order }),
    )
}

fn handle_tests_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let test_id = match req.params.get("testId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing testId", None),
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    if let Err(e) = exams::load_test(conn, &test_id) {
        return e.response(&req.id);
    }
    let role: Option<String> = match conn
        .query_row("SELECT role FROM users WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match role.as_deref() {
        None => return err(&req.id, "not_found", "student not found", None),
        Some("student") => {}
        Some(_) => return err(&req.id, "bad_params", "user is not a student", None),
    }

    let inserted = match conn.execute(
        "INSERT OR IGNORE INTO test_students(test_id, student_id) VALUES(?, ?)",
        (&test_id, &student_id),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "assigned": inserted > 0 }))
}

fn handle_tests_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "tests": [] }));
    };

    let teacher_id = req.params.get("teacherId").and_then(|v| v.as_str());

    let base = "SELECT t.id, t.title, t.slug, t.status, t.total_points, t.max_attempts,
                       t.start_time, t.end_time,
                       (SELECT COUNT(*) FROM test_items i WHERE i.test_id = t.id) AS item_count,
                       (SELECT COUNT(*) FROM test_students s WHERE s.test_id = t.id) AS roster_count
                FROM tests t
                WHERE t.deleted_at IS NULL";

    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "title": row.get::<_, String>(1)?,
            "slug": row.get::<_, String>(2)?,
            "status": row.get::<_, String>(3)?,
            "totalPoints": row.get::<_, f64>(4)?,
            "maxAttempts": row.get::<_, i64>(5)?,
            "startTime": row.get::<_, Option<String>>(6)?,
            "endTime": row.get::<_, Option<String>>(7)?,
            "itemCount": row.get::<_, i64>(8)?,
            "rosterCount": row.get::<_, i64>(9)?
        }))
    };

    let rows = if let Some(teacher_id) = teacher_id {
        let sql = format!("{} AND t.teacher_id = ? ORDER BY t.title", base);
        let mut stmt = match conn.prepare(&sql) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        stmt.query_map([teacher_id], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        let sql = format!("{} ORDER BY t.title", base);
        let mut stmt = match conn.prepare(&sql) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        stmt.query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    };

    match rows {
        Ok(tests) => ok(&req.id, json!({ "tests": tests })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_tests_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let test_id = match req.params.get("testId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing testId", None),
    };

    let test = match exams::load_test(conn, &test_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let items = {
        let mut stmt = match conn.prepare(
            "SELECT id, item_kind, prompt, answer_key, sort_order, points
             FROM test_items
             WHERE test_id = ?
             ORDER BY sort_order",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt
            .query_map([&test_id], |row| {
                Ok(json!({
                    "id": row.get::<_, String>(0)?,
                    "kind": row.get::<_, String>(1)?,
                    "prompt": row.get::<_, String>(2)?,
                    "answerKey": row.get::<_, Option<String>>(3)?,
                    "sortOrder": row.get::<_, i64>(4)?,
                    "points": row.get::<_, f64>(5)?
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match rows {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    ok(
        &req.id,
        json!({
            "id": test.id,
            "teacherId": test.teacher_id,
            "courseId": test.course_id,
            "title": test.title,
            "slug": test.slug,
            "durationMinutes": test.duration_minutes,
            "totalPoints": test.total_points,
            "startTime": test.start_time.map(fmt_ts),
            "endTime": test.end_time.map(fmt_ts),
            "status": test.status.as_str(),
            "shuffleQuestions": test.shuffle_questions,
            "showResultsImmediately": test.show_results_immediately,
            "allowReview": test.allow_review,
            "maxAttempts": test.max_attempts,
            "items": items
        }),
    )
}

fn handle_tests_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let test_id = match req.params.get("testId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing testId", None),
    };
    let target = match req
        .params
        .get("status")
        .and_then(|v| v.as_str())
        .and_then(TestStatus::parse)
    {
        Some(v) => v,
        None => {
            return err(
                &req.id,
                "bad_params",
                "status must be one of: draft, scheduled, active, closed, archived",
                None,
            )
        }
    };

    match exams::set_status(conn, &test_id, target) {
        Ok(test) => ok(&req.id, json!({ "testId": test.id, "status": test.status.as_str() })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_tests_start(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let test_id = match req.params.get("testId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing testId", None),
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let now = Utc::now();
    let attempt = match exams::start_attempt(conn, &test_id, &student_id, now) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let streak = match progression::touch_streak(conn, &student_id, now.date_naive()) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut body = attempt_to_json(&attempt);
    body["streakDays"] = json!(streak);
    ok(&req.id, body)
}

fn handle_tests_submit_item(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let attempt_id = match req.params.get("attemptId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing attemptId", None),
    };
    let item_id = match req.params.get("itemId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing itemId", None),
    };
    let answer = match req.params.get("answer").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing answer", None),
    };

    match exams::submit_item_answer(conn, &attempt_id, &item_id, &answer, Utc::now()) {
        Ok(sub) => ok(&req.id, submission_to_json(&sub)),
        Err(e) => e.response(&req.id),
    }
}

fn handle_tests_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let attempt_id = match req.params.get("attemptId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing attemptId", None),
    };

    let now = Utc::now();
    let attempt = match exams::submit_test(conn, &attempt_id, now) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut unlocked: Vec<String> = Vec::new();
    if attempt.status == AttemptStatus::Graded {
        let reward = completion_xp(attempt.total_score);
        if let Err(e) =
            progression::award_xp(conn, &attempt.student_id, reward, "test_graded", now)
        {
            return e.response(&req.id);
        }
        match achievements::check_unlocks(conn, &attempt.student_id, now) {
            Ok(v) => unlocked = v.iter().map(|a| a.code.clone()).collect(),
            Err(e) => return e.response(&req.id),
        }
    }

    let mut body = attempt_to_json(&attempt);
    body["unlocked"] = json!(unlocked);
    ok(&req.id, body)
}

fn handle_tests_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let submission_id = match req.params.get("submissionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing submissionId", None),
    };
    let score = match req.params.get("score").and_then(|v| v.as_f64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing/invalid score", None),
    };
    let feedback = req
        .params
        .get("feedback")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());

    // Completion XP must fire only on the submitted -> graded edge, so take
    // the status before grading mutates it.
    let status_before = match exams::load_submission(conn, &submission_id)
        .and_then(|sub| exams::load_attempt(conn, &sub.test_attempt_id))
    {
        Ok(attempt) => attempt.status,
        Err(e) => return e.response(&req.id),
    };

    let now = Utc::now();
    let (submission, attempt) =
        match exams::grade_submission(conn, &submission_id, score, feedback.as_deref()) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };

    let mut unlocked: Vec<String> = Vec::new();
    if status_before != AttemptStatus::Graded && attempt.status == AttemptStatus::Graded {
        let reward = completion_xp(attempt.total_score);
        if let Err(e) =
            progression::award_xp(conn, &attempt.student_id, reward, "test_graded", now)
        {
            return e.response(&req.id);
        }
        match achievements::check_unlocks(conn, &attempt.student_id, now) {
            Ok(v) => unlocked = v.iter().map(|a| a.code.clone()).collect(),
            Err(e) => return e.response(&req.id),
        }
    }

    ok(
        &req.id,
        json!({
            "submission": submission_to_json(&submission),
            "attempt": attempt_to_json(&attempt),
            "unlocked": unlocked
        }),
    )
}

fn handle_tests_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let test_id = match req.params.get("testId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing testId", None),
    };

    match exams::close_test(conn, &test_id, Utc::now()) {
        Ok((test, abandoned)) => ok(
            &req.id,
            json!({
                "testId": test.id,
                "status": test.status.as_str(),
                "abandonedAttempts": abandoned
            }),
        ),
        Err(e) => e.response(&req.id),
    }
}

fn handle_tests_attempt(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let attempt_id = match req.params.get("attemptId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing attemptId", None),
    };

    let attempt = match exams::load_attempt(conn, &attempt_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let submissions = {
        let mut stmt = match conn.prepare(
            "SELECT s.id, s.test_attempt_id, s.test_item_id, s.answer, s.score, s.is_correct,
                    s.feedback
             FROM test_item_submissions s
             JOIN test_items i ON i.id = s.test_item_id
             WHERE s.test_attempt_id = ?
             ORDER BY i.sort_order",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt
            .query_map([&attempt_id], |row| {
                Ok(json!({
                    "id": row.get::<_, String>(0)?,
                    "attemptId": row.get::<_, String>(1)?,
                    "itemId": row.get::<_, String>(2)?,
                    "answer": row.get::<_, String>(3)?,
                    "score": row.get::<_, Option<f64>>(4)?,
                    "isCorrect": row.get::<_, Option<i64>>(5)?.map(|v| v != 0),
                    "feedback": row.get::<_, Option<String>>(6)?
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match rows {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    let mut body = attempt_to_json(&attempt);
    body["submissions"] = json!(submissions);
    ok(&req.id, body)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tests.create" => Some(handle_tests_create(state, req)),
        "tests.addItem" => Some(handle_tests_add_item(state, req)),
        "tests.assign" => Some(handle_tests_assign(state, req)),
        "tests.list" => Some(handle_tests_list(state, req)),
        "tests.get" => Some(handle_tests_get(state, req)),
        "tests.setStatus" => Some(handle_tests_set_status(state, req)),
        "tests.start" => Some(handle_tests_start(state, req)),
        "tests.submitItem" => Some(handle_tests_submit_item(state, req)),
        "tests.submit" => Some(handle_tests_submit(state, req)),
        "tests.grade" => Some(handle_tests_grade(state, req)),
        "tests.close" => Some(handle_tests_close(state, req)),
        "tests.attempt" => Some(handle_tests_attempt(state, req)),
        _ => None,
    }
}
