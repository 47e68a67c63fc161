use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::domain::{fmt_ts, parse_ts, DomainError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Draft,
    Scheduled,
    Active,
    Closed,
    Archived,
}

impl TestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TestStatus::Draft => "draft",
            TestStatus::Scheduled => "scheduled",
            TestStatus::Active => "active",
            TestStatus::Closed => "closed",
            TestStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(TestStatus::Draft),
            "scheduled" => Some(TestStatus::Scheduled),
            "active" => Some(TestStatus::Active),
            "closed" => Some(TestStatus::Closed),
            "archived" => Some(TestStatus::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    InProgress,
    Submitted,
    Graded,
    Abandoned,
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Submitted => "submitted",
            AttemptStatus::Graded => "graded",
            AttemptStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(AttemptStatus::InProgress),
            "submitted" => Some(AttemptStatus::Submitted),
            "graded" => Some(AttemptStatus::Graded),
            "abandoned" => Some(AttemptStatus::Abandoned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Quiz,
    Essay,
    Coding,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Quiz => "quiz",
            ItemKind::Essay => "essay",
            ItemKind::Coding => "coding",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "quiz" => Some(ItemKind::Quiz),
            "essay" => Some(ItemKind::Essay),
            "coding" => Some(ItemKind::Coding),
            _ => None,
        }
    }

    /// Quiz answers and coding outputs are checked against the stored key;
    /// essays wait for a human grader.
    pub fn auto_gradable(self) -> bool {
        !matches!(self, ItemKind::Essay)
    }
}

#[derive(Debug, Clone)]
pub struct TestRow {
    pub id: String,
    pub teacher_id: String,
    pub course_id: Option<String>,
    pub title: String,
    pub slug: String,
    pub duration_minutes: Option<i64>,
    pub total_points: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: TestStatus,
    pub shuffle_questions: bool,
    pub show_results_immediately: bool,
    pub allow_review: bool,
    pub max_attempts: i64,
}

#[derive(Debug, Clone)]
pub struct AttemptRow {
    pub id: String,
    pub test_id: String,
    pub student_id: String,
    pub attempt_number: i64,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub time_spent_minutes: Option<i64>,
    pub total_score: Option<f64>,
    pub status: AttemptStatus,
}

#[derive(Debug, Clone)]
pub struct SubmissionRow {
    pub id: String,
    pub test_attempt_id: String,
    pub test_item_id: String,
    pub answer: String,
    pub score: Option<f64>,
    pub is_correct: Option<bool>,
    pub feedback: Option<String>,
}

pub fn load_test(conn: &Connection, test_id: &str) -> Result<TestRow, DomainError> {
    let row = conn
        .query_row(
            "SELECT id, teacher_id, course_id, title, slug, duration_minutes, total_points,
                    start_time, end_time, status, shuffle_questions, show_results_immediately,
                    allow_review, max_attempts
             FROM tests
             WHERE id = ? AND deleted_at IS NULL",
            [test_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, Option<i64>>(5)?,
                    r.get::<_, f64>(6)?,
                    r.get::<_, Option<String>>(7)?,
                    r.get::<_, Option<String>>(8)?,
                    r.get::<_, String>(9)?,
                    r.get::<_, i64>(10)?,
                    r.get::<_, i64>(11)?,
                    r.get::<_, i64>(12)?,
                    r.get::<_, i64>(13)?,
                ))
            },
        )
        .optional()
        .map_err(|e| DomainError::db("db_query_failed", e))?;
    let Some((
        id,
        teacher_id,
        course_id,
        title,
        slug,
        duration_minutes,
        total_points,
        start_time,
        end_time,
        status,
        shuffle_questions,
        show_results_immediately,
        allow_review,
        max_attempts,
    )) = row
    else {
        return Err(DomainError::not_found("test not found"));
    };

    Ok(TestRow {
        id,
        teacher_id,
        course_id,
        title,
        slug,
        duration_minutes,
        total_points,
        start_time: start_time.as_deref().map(parse_ts).transpose()?,
        end_time: end_time.as_deref().map(parse_ts).transpose()?,
        status: TestStatus::parse(&status)
            .ok_or_else(|| DomainError::bad_params(format!("unknown test status '{}'", status)))?,
        shuffle_questions: shuffle_questions != 0,
        show_results_immediately: show_results_immediately != 0,
        allow_review: allow_review != 0,
        max_attempts,
    })
}

pub fn load_attempt(conn: &Connection, attempt_id: &str) -> Result<AttemptRow, DomainError> {
    let row = conn
        .query_row(
            "SELECT id, test_id, student_id, attempt_number, started_at, submitted_at,
                    time_spent_minutes, total_score, status
             FROM test_attempts
             WHERE id = ?",
            [attempt_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, Option<String>>(5)?,
                    r.get::<_, Option<i64>>(6)?,
                    r.get::<_, Option<f64>>(7)?,
                    r.get::<_, String>(8)?,
                ))
            },
        )
        .optional()
        .map_err(|e| DomainError::db("db_query_failed", e))?;
    let Some((
        id,
        test_id,
        student_id,
        attempt_number,
        started_at,
        submitted_at,
        time_spent_minutes,
        total_score,
        status,
    )) = row
    else {
        return Err(DomainError::not_found("attempt not found"));
    };

    Ok(AttemptRow {
        id,
        test_id,
        student_id,
        attempt_number,
        started_at: parse_ts(&started_at)?,
        submitted_at: submitted_at.as_deref().map(parse_ts).transpose()?,
        time_spent_minutes,
        total_score,
        status: AttemptStatus::parse(&status)
            .ok_or_else(|| DomainError::bad_params(format!("unknown attempt status '{}'", status)))?,
    })
}

pub fn load_submission(conn: &Connection, submission_id: &str) -> Result<SubmissionRow, DomainError> {
    let row = conn
        .query_row(
            "SELECT id, test_attempt_id, test_item_id, answer, score, is_correct, feedback
             FROM test_item_submissions
             WHERE id = ?",
            [submission_id],
            |r| {
                Ok(SubmissionRow {
                    id: r.get(0)?,
                    test_attempt_id: r.get(1)?,
                    test_item_id: r.get(2)?,
                    answer: r.get(3)?,
                    score: r.get(4)?,
                    is_correct: r.get::<_, Option<i64>>(5)?.map(|v| v != 0),
                    feedback: r.get(6)?,
                })
            },
        )
        .optional()
        .map_err(|e| DomainError::db("db_query_failed", e))?;
    row.ok_or_else(|| DomainError::not_found("submission not found"))
}

/// Student availability is derived, not trusted from `status` alone: the
/// persisted status must be scheduled/active AND the clock must sit inside
/// the window. Missing bounds leave that side open.
pub fn is_open_for_students(test: &TestRow, now: DateTime<Utc>) -> bool {
    if !matches!(test.status, TestStatus::Scheduled | TestStatus::Active) {
        return false;
    }
    if let Some(start) = test.start_time {
        if now < start {
            return false;
        }
    }
    if let Some(end) = test.end_time {
        if now > end {
            return false;
        }
    }
    true
}

/// Administrative transitions: draft -> scheduled -> active, and anything can
/// be archived. Closing runs through `close_test` because of its side effects.
pub fn set_status(
    conn: &Connection,
    test_id: &str,
    target: TestStatus,
) -> Result<TestRow, DomainError> {
    let test = load_test(conn, test_id)?;

    let allowed = match (test.status, target) {
        (_, TestStatus::Archived) => test.status != TestStatus::Archived,
        (TestStatus::Draft, TestStatus::Scheduled) => true,
        (TestStatus::Scheduled, TestStatus::Active) => true,
        _ => false,
    };
    if target == TestStatus::Closed {
        return Err(DomainError::bad_params("use tests.close to close a test"));
    }
    if !allowed {
        return Err(DomainError::conflict(
            "bad_transition",
            format!(
                "cannot transition test from {} to {}",
                test.status.as_str(),
                target.as_str()
            ),
        ));
    }

    conn.execute(
        "UPDATE tests SET status = ? WHERE id = ?",
        (target.as_str(), test_id),
    )
    .map_err(|e| DomainError::db("db_update_failed", e))?;

    load_test(conn, test_id)
}

pub fn start_attempt(
    conn: &Connection,
    test_id: &str,
    student_id: &str,
    now: DateTime<Utc>,
) -> Result<AttemptRow, DomainError> {
    let test = load_test(conn, test_id)?;

    let student_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [student_id], |r| r.get(0))
        .optional()
        .map_err(|e| DomainError::db("db_query_failed", e))?;
    if student_exists.is_none() {
        return Err(DomainError::not_found("student not found"));
    }

    let assigned: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM test_students WHERE test_id = ? AND student_id = ?",
            (test_id, student_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| DomainError::db("db_query_failed", e))?;
    if assigned.is_none() {
        return Err(DomainError::conflict(
            "not_assigned",
            "student is not assigned to this test",
        ));
    }

    if !is_open_for_students(&test, now) {
        return Err(DomainError::conflict(
            "test_not_open",
            "test is not open for attempts",
        ));
    }

    // Abandoned attempts do not consume the allowance.
    let used: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM test_attempts
             WHERE test_id = ? AND student_id = ? AND status != 'abandoned'",
            (test_id, student_id),
            |r| r.get(0),
        )
        .map_err(|e| DomainError::db("db_query_failed", e))?;
    if used >= test.max_attempts {
        return Err(DomainError::conflict(
            "attempt_limit",
            format!("attempt limit of {} reached", test.max_attempts),
        ));
    }

    let attempt_number: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(attempt_number), 0) + 1 FROM test_attempts
             WHERE test_id = ? AND student_id = ?",
            (test_id, student_id),
            |r| r.get(0),
        )
        .map_err(|e| DomainError::db("db_query_failed", e))?;

    let attempt_id = Uuid::new_v4().to_string();
    let insert = conn.execute(
        "INSERT INTO test_attempts(id, test_id, student_id, attempt_number, started_at, status)
         VALUES(?, ?, ?, ?, ?, 'in_progress')",
        (
            &attempt_id,
            test_id,
            student_id,
            attempt_number,
            fmt_ts(now),
        ),
    );
    if let Err(e) = insert {
        // The unique key on (test, student, attempt_number) backstops two
        // overlapping starts that both passed the count check.
        if let rusqlite::Error::SqliteFailure(code, _) = &e {
            if code.code == rusqlite::ErrorCode::ConstraintViolation {
                return Err(DomainError::conflict(
                    "attempt_conflict",
                    "a concurrent attempt start won; retry",
                ));
            }
        }
        return Err(DomainError::db("db_insert_failed", e));
    }

    load_attempt(conn, &attempt_id)
}

fn normalize_answer(s: &str) -> String {
    s.trim().to_lowercase()
}

pub fn submit_item_answer(
    conn: &Connection,
    attempt_id: &str,
    item_id: &str,
    answer: &str,
    now: DateTime<Utc>,
) -> Result<SubmissionRow, DomainError> {
    let attempt = load_attempt(conn, attempt_id)?;
    if attempt.status != AttemptStatus::InProgress {
        return Err(DomainError::conflict(
            "attempt_closed",
            "attempt is no longer in progress",
        ));
    }

    let test = load_test(conn, &attempt.test_id)?;
    if !is_open_for_students(&test, now) {
        return Err(DomainError::conflict(
            "test_not_open",
            "test window has closed",
        ));
    }
    if let Some(duration) = test.duration_minutes {
        if now > attempt.started_at + Duration::minutes(duration) {
            return Err(DomainError::conflict(
                "attempt_expired",
                "time allowance for this attempt is spent",
            ));
        }
    }

    let item: Option<(String, String, Option<String>, f64)> = conn
        .query_row(
            "SELECT test_id, item_kind, answer_key, points FROM test_items WHERE id = ?",
            [item_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(|e| DomainError::db("db_query_failed", e))?;
    let Some((item_test_id, kind_str, answer_key, points)) = item else {
        return Err(DomainError::not_found("test item not found"));
    };
    if item_test_id != attempt.test_id {
        return Err(DomainError::conflict(
            "item_not_in_test",
            "item belongs to a different test",
        ));
    }
    let kind = ItemKind::parse(&kind_str)
        .ok_or_else(|| DomainError::bad_params(format!("unknown item kind '{}'", kind_str)))?;

    let (score, is_correct) = if kind.auto_gradable() {
        let correct = answer_key
            .as_deref()
            .map(|key| normalize_answer(answer) == normalize_answer(key))
            .unwrap_or(false);
        (Some(if correct { points } else { 0.0 }), Some(correct))
    } else {
        (None, None)
    };

    let submission_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO test_item_submissions(
            id, test_attempt_id, test_item_id, answer, score, is_correct)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(test_attempt_id, test_item_id) DO UPDATE SET
           answer = excluded.answer,
           score = excluded.score,
           is_correct = excluded.is_correct",
        (
            &submission_id,
            attempt_id,
            item_id,
            answer,
            score,
            is_correct.map(i64::from),
        ),
    )
    .map_err(|e| DomainError::db("db_insert_failed", e))?;

    // The upsert keeps the original row id; fetch by the natural key.
    let existing_id: String = conn
        .query_row(
            "SELECT id FROM test_item_submissions
             WHERE test_attempt_id = ? AND test_item_id = ?",
            (attempt_id, item_id),
            |r| r.get(0),
        )
        .map_err(|e| DomainError::db("db_query_failed", e))?;
    load_submission(conn, &existing_id)
}

pub fn submit_test(
    conn: &Connection,
    attempt_id: &str,
    now: DateTime<Utc>,
) -> Result<AttemptRow, DomainError> {
    let attempt = load_attempt(conn, attempt_id)?;
    if attempt.status != AttemptStatus::InProgress {
        return Err(DomainError::conflict(
            "attempt_closed",
            "attempt was already submitted or closed",
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| DomainError::db("db_tx_failed", e))?;

    let time_spent = (now - attempt.started_at).num_minutes().max(0);

    let has_manual_items: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM test_items WHERE test_id = ? AND item_kind = 'essay' LIMIT 1",
            [&attempt.test_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| DomainError::db("db_query_failed", e))?;

    if has_manual_items.is_none() {
        // Everything auto-graded: recompute the total from the submissions
        // (never accumulated, so a retried submit lands on the same value).
        let total: f64 = tx
            .query_row(
                "SELECT COALESCE(SUM(score), 0) FROM test_item_submissions
                 WHERE test_attempt_id = ?",
                [attempt_id],
                |r| r.get(0),
            )
            .map_err(|e| DomainError::db("db_query_failed", e))?;
        tx.execute(
            "UPDATE test_attempts
             SET submitted_at = ?, time_spent_minutes = ?, total_score = ?, status = 'graded'
             WHERE id = ?",
            (fmt_ts(now), time_spent, total, attempt_id),
        )
        .map_err(|e| DomainError::db("db_update_failed", e))?;
    } else {
        tx.execute(
            "UPDATE test_attempts
             SET submitted_at = ?, time_spent_minutes = ?, status = 'submitted'
             WHERE id = ?",
            (fmt_ts(now), time_spent, attempt_id),
        )
        .map_err(|e| DomainError::db("db_update_failed", e))?;
    }

    tx.commit()
        .map_err(|e| DomainError::db("db_commit_failed", e))?;

    load_attempt(conn, attempt_id)
}

pub fn grade_submission(
    conn: &Connection,
    submission_id: &str,
    score: f64,
    feedback: Option<&str>,
) -> Result<(SubmissionRow, AttemptRow), DomainError> {
    let submission = load_submission(conn, submission_id)?;
    let attempt = load_attempt(conn, &submission.test_attempt_id)?;

    match attempt.status {
        AttemptStatus::Submitted | AttemptStatus::Graded => {}
        AttemptStatus::InProgress => {
            return Err(DomainError::conflict(
                "attempt_open",
                "attempt has not been submitted yet",
            ));
        }
        AttemptStatus::Abandoned => {
            return Err(DomainError::conflict(
                "attempt_closed",
                "abandoned attempts are not graded",
            ));
        }
    }

    let points: f64 = conn
        .query_row(
            "SELECT points FROM test_items WHERE id = ?",
            [&submission.test_item_id],
            |r| r.get(0),
        )
        .map_err(|e| DomainError::db("db_query_failed", e))?;
    if score < 0.0 || score > points {
        return Err(DomainError::out_of_range(
            format!("score must be between 0 and {}", points),
            Some(serde_json::json!({ "score": score, "points": points })),
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| DomainError::db("db_tx_failed", e))?;

    tx.execute(
        "UPDATE test_item_submissions
         SET score = ?, is_correct = ?, feedback = ?
         WHERE id = ?",
        (score, i64::from(score >= points), feedback, submission_id),
    )
    .map_err(|e| DomainError::db("db_update_failed", e))?;

    // Recompute from the rows; never add deltas.
    let (total, ungraded): (f64, i64) = tx
        .query_row(
            "SELECT COALESCE(SUM(score), 0),
                    COUNT(*) FILTER (WHERE score IS NULL)
             FROM test_item_submissions
             WHERE test_attempt_id = ?",
            [&attempt.id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(|e| DomainError::db("db_query_failed", e))?;

    if ungraded == 0 {
        tx.execute(
            "UPDATE test_attempts SET total_score = ?, status = 'graded' WHERE id = ?",
            (total, &attempt.id),
        )
        .map_err(|e| DomainError::db("db_update_failed", e))?;
    } else {
        tx.execute(
            "UPDATE test_attempts SET total_score = ? WHERE id = ?",
            (total, &attempt.id),
        )
        .map_err(|e| DomainError::db("db_update_failed", e))?;
    }

    tx.commit()
        .map_err(|e| DomainError::db("db_commit_failed", e))?;

    Ok((
        load_submission(conn, submission_id)?,
        load_attempt(conn, &attempt.id)?,
    ))
}

pub fn close_test(
    conn: &Connection,
    test_id: &str,
    now: DateTime<Utc>,
) -> Result<(TestRow, usize), DomainError> {
    let test = load_test(conn, test_id)?;
    if matches!(test.status, TestStatus::Closed | TestStatus::Archived) {
        return Err(DomainError::conflict(
            "already_closed",
            "test is already closed",
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| DomainError::db("db_tx_failed", e))?;

    tx.execute("UPDATE tests SET status = 'closed' WHERE id = ?", [test_id])
        .map_err(|e| DomainError::db("db_update_failed", e))?;

    let open_attempts: Vec<(String, String)> = {
        let mut stmt = tx
            .prepare(
                "SELECT id, started_at FROM test_attempts
                 WHERE test_id = ? AND status = 'in_progress'",
            )
            .map_err(|e| DomainError::db("db_query_failed", e))?;
        stmt.query_map([test_id], |r| Ok((r.get(0)?, r.get(1)?)))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(|e| DomainError::db("db_query_failed", e))?
    };

    let mut abandoned = 0_usize;
    for (attempt_id, started_at) in open_attempts {
        let started = parse_ts(&started_at)?;
        let duration_expired = test
            .duration_minutes
            .map(|d| now > started + Duration::minutes(d))
            .unwrap_or(false);
        let window_expired = test.end_time.map(|end| now > end).unwrap_or(false);
        if duration_expired || window_expired {
            tx.execute(
                "UPDATE test_attempts SET status = 'abandoned' WHERE id = ?",
                [&attempt_id],
            )
            .map_err(|e| DomainError::db("db_update_failed", e))?;
            abandoned += 1;
        }
    }

    tx.commit()
        .map_err(|e| DomainError::db("db_commit_failed", e))?;

    Ok((load_test(conn, test_id)?, abandoned))
}
