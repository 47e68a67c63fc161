use crate::achievements;
use crate::domain::fmt_ts;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::progression;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_dash = true;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

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

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let slug = req
        .params
        .get("slug")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| slugify(&title));
    let description = req
        .params
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    if let Err(e) = require_teacher(conn, &teacher_id) {
        return e.response(&req.id);
    }

    let course_id = Uuid::new_v4().to_string();
    let insert = conn.execute(
        "INSERT INTO courses(id, teacher_id, title, slug, description) VALUES(?, ?, ?, ?, ?)",
        (&course_id, &teacher_id, &title, &slug, &description),
    );
    if let Err(e) = insert {
        if let rusqlite::Error::SqliteFailure(code, _) = &e {
            if code.code == rusqlite::ErrorCode::ConstraintViolation {
                return err(
                    &req.id,
                    "conflict",
                    "course slug already exists",
                    Some(json!({ "slug": slug })),
                );
            }
        }
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    ok(&req.id, json!({ "courseId": course_id, "slug": slug }))
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "courses": [] }));
    };

    let include_deleted = req
        .params
        .get("includeDeleted")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let sql = if include_deleted {
        "SELECT c.id, c.teacher_id, c.title, c.slug, c.description, c.deleted_at,
                (SELECT COUNT(*) FROM lessons l WHERE l.course_id = c.id) AS lesson_count
         FROM courses c
         ORDER BY c.title"
    } else {
        "SELECT c.id, c.teacher_id, c.title, c.slug, c.description, c.deleted_at,
                (SELECT COUNT(*) FROM lessons l WHERE l.course_id = c.id) AS lesson_count
         FROM courses c
         WHERE c.deleted_at IS NULL
         ORDER BY c.title"
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "teacherId": row.get::<_, String>(1)?,
                "title": row.get::<_, String>(2)?,
                "slug": row.get::<_, String>(3)?,
                "description": row.get::<_, String>(4)?,
                "deletedAt": row.get::<_, Option<String>>(5)?,
                "lessonCount": row.get::<_, i64>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match req.params.get("courseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing courseId", None),
    };

    let updated = match conn.execute(
        "UPDATE courses SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
        (fmt_ts(Utc::now()), &course_id),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "course not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_lessons_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match req.params.get("courseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing courseId", None),
    };
    let title = match req.params.get("title").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing title", None),
    };
    if title.is_empty() {
        return err(&req.id, "bad_params", "title must not be empty", None);
    }
    let xp_reward = req
        .params
        .get("xpReward")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    if xp_reward < 0 {
        return err(&req.id, "bad_params", "xpReward must be >= 0", None);
    }

    let course_exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM courses WHERE id = ? AND deleted_at IS NULL",
            [&course_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if course_exists.is_none() {
        return err(&req.id, "not_found", "course not found", None);
    }

    let sort_order: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM lessons WHERE course_id = ?",
        [&course_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let lesson_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO lessons(id, course_id, title, sort_order, xp_reward) VALUES(?, ?, ?, ?, ?)",
        (&lesson_id, &course_id, &title, sort_order, xp_reward),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "lessons" })),
        );
    }

    ok(&req.id, json!({ "lessonId": lesson_id, "sortOrder": sort_order }))
}

fn handle_lessons_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "lessons": [] }));
    };

    let course_id = match req.params.get("courseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing courseId", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT id, title, sort_order, xp_reward FROM lessons
         WHERE course_id = ?
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&course_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "title": row.get::<_, String>(1)?,
                "sortOrder": row.get::<_, i64>(2)?,
                "xpReward": row.get::<_, i64>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(lessons) => ok(&req.id, json!({ "lessons": lessons })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_lessons_complete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let lesson_id = match req.params.get("lessonId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing lessonId", None),
    };
    let user_id = match req.params.get("userId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing userId", None),
    };

    let xp_reward: Option<i64> = match conn
        .query_row("SELECT xp_reward FROM lessons WHERE id = ?", [&lesson_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(xp_reward) = xp_reward else {
        return err(&req.id, "not_found", "lesson not found", None);
    };

    let user_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [&user_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if user_exists.is_none() {
        return err(&req.id, "not_found", "user not found", None);
    }

    let now = Utc::now();
    let insert = conn.execute(
        "INSERT INTO lesson_completions(lesson_id, user_id, completed_at) VALUES(?, ?, ?)",
        (&lesson_id, &user_id, fmt_ts(now)),
    );
    if let Err(e) = insert {
        if let rusqlite::Error::SqliteFailure(code, _) = &e {
            if code.code == rusqlite::ErrorCode::ConstraintViolation {
                return err(
                    &req.id,
                    "conflict",
                    "lesson already completed",
                    Some(json!({ "reason": "already_completed" })),
                );
            }
        }
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "lesson_completions" })),
        );
    }

    let streak = match progression::touch_streak(conn, &user_id, now.date_naive()) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let outcome = match progression::award_xp(conn, &user_id, xp_reward, "lesson_completed", now) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let unlocked = match achievements::check_unlocks(conn, &user_id, now) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    ok(
        &req.id,
        json!({
            "xp": outcome.xp,
            "levelAfter": outcome.level_after,
            "leveledUp": outcome.level_after > outcome.level_before,
            "streakDays": streak,
            "unlocked": unlocked.iter().map(|a| a.code.clone()).collect::<Vec<_>>()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.delete" => Some(handle_courses_delete(state, req)),
        "lessons.create" => Some(handle_lessons_create(state, req)),
        "lessons.list" => Some(handle_lessons_list(state, req)),
        "lessons.complete" => Some(handle_lessons_complete(state, req)),
        _ => None,
    }
}
