use crate::achievements;
use crate::domain::fmt_ts;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::progression;
use crate::srs;
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

/// XP credited for a successful recall (quality >= 3).
const REVIEW_XP: i64 = 5;

const DUE_LIST_MAX: i64 = 500;

fn handle_flashcards_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let front = match req.params.get("front").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing front", None),
    };
    let back = match req.params.get("back").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing back", None),
    };
    if front.is_empty() || back.is_empty() {
        return err(&req.id, "bad_params", "front and back must not be empty", None);
    }
    let course_id = req
        .params
        .get("courseId")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());

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

    let flashcard_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO flashcards(id, course_id, front, back) VALUES(?, ?, ?, ?)",
        (&flashcard_id, &course_id, &front, &back),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "flashcards" })),
        );
    }

    ok(&req.id, json!({ "flashcardId": flashcard_id }))
}

fn handle_flashcards_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "flashcards": [] }));
    };

    let course_id = req.params.get("courseId").and_then(|v| v.as_str());

    let result = if let Some(course_id) = course_id {
        let mut stmt = match conn.prepare(
            "SELECT id, course_id, front, back FROM flashcards WHERE course_id = ? ORDER BY rowid",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        stmt.query_map([course_id], row_to_card)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        let mut stmt = match conn
            .prepare("SELECT id, course_id, front, back FROM flashcards ORDER BY rowid")
        {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        stmt.query_map([], row_to_card)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    };

    match result {
        Ok(cards) => ok(&req.id, json!({ "flashcards": cards })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn row_to_card(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "courseId": row.get::<_, Option<String>>(1)?,
        "front": row.get::<_, String>(2)?,
        "back": row.get::<_, String>(3)?
    }))
}

fn handle_flashcards_due(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let user_id = match req.params.get("userId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing userId", None),
    };
    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(50)
        .clamp(1, DUE_LIST_MAX);

    let now = fmt_ts(Utc::now());
    let mut stmt = match conn.prepare(
        "SELECT f.id, f.front, f.back, p.next_review_at, p.repetitions, p.interval_days
         FROM flashcards f
         LEFT JOIN user_flashcard_progress p
           ON p.flashcard_id = f.id AND p.user_id = ?
         WHERE p.next_review_at IS NULL OR p.next_review_at <= ?
         ORDER BY p.next_review_at IS NULL DESC, p.next_review_at
         LIMIT ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&user_id, &now, limit), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "front": row.get::<_, String>(1)?,
                "back": row.get::<_, String>(2)?,
                "nextReviewAt": row.get::<_, Option<String>>(3)?,
                "repetitions": row.get::<_, Option<i64>>(4)?.unwrap_or(0),
                "intervalDays": row.get::<_, Option<i64>>(5)?.unwrap_or(0)
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(cards) => ok(&req.id, json!({ "due": cards })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_flashcards_review(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let user_id = match req.params.get("userId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing userId", None),
    };
    let flashcard_id = match req.params.get("flashcardId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing flashcardId", None),
    };
    let quality = match req.params.get("quality").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing/invalid quality", None),
    };

    let now = Utc::now();
    let progress = match srs::record_review(conn, &user_id, &flashcard_id, quality, now) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let streak = match progression::touch_streak(conn, &user_id, now.date_naive()) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut xp = None;
    if quality >= 3 {
        match progression::award_xp(conn, &user_id, REVIEW_XP, "flashcard_review", now) {
            Ok(outcome) => xp = Some(outcome.xp),
            Err(e) => return e.response(&req.id),
        }
    }
    let unlocked = match achievements::check_unlocks(conn, &user_id, now) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    ok(
        &req.id,
        json!({
            "easeFactor": progress.state.ease_factor,
            "intervalDays": progress.state.interval_days,
            "repetitions": progress.state.repetitions,
            "nextReviewAt": fmt_ts(progress.next_review_at),
            "streakDays": streak,
            "xp": xp,
            "unlocked": unlocked.iter().map(|a| a.code.clone()).collect::<Vec<_>>()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "flashcards.create" => Some(handle_flashcards_create(state, req)),
        "flashcards.list" => Some(handle_flashcards_list(state, req)),
        "flashcards.due" => Some(handle_flashcards_due(state, req)),
        "flashcards.review" => Some(handle_flashcards_review(state, req)),
        _ => None,
    }
}
