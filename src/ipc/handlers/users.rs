use crate::achievements;
use crate::domain::fmt_ts;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::progression;
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const ROLES: &[&str] = &["student", "teacher", "admin"];

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let username = match req.params.get("username").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing username", None),
    };
    if username.is_empty() {
        return err(&req.id, "bad_params", "username must not be empty", None);
    }
    let display_name = req
        .params
        .get("displayName")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| username.clone());
    let role = req
        .params
        .get("role")
        .and_then(|v| v.as_str())
        .unwrap_or("student")
        .to_string();
    if !ROLES.contains(&role.as_str()) {
        return err(
            &req.id,
            "bad_params",
            "role must be one of: student, teacher, admin",
            Some(json!({ "role": role })),
        );
    }

    let user_id = Uuid::new_v4().to_string();
    let insert = conn.execute(
        "INSERT INTO users(id, username, display_name, role, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (&user_id, &username, &display_name, &role, fmt_ts(Utc::now())),
    );
    if let Err(e) = insert {
        if let rusqlite::Error::SqliteFailure(code, _) = &e {
            if code.code == rusqlite::ErrorCode::ConstraintViolation {
                return err(
                    &req.id,
                    "conflict",
                    "username already taken",
                    Some(json!({ "username": username })),
                );
            }
        }
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    ok(
        &req.id,
        json!({ "userId": user_id, "username": username, "role": role }),
    )
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "users": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, username, display_name, role, xp, level_number, streak_days
         FROM users
         ORDER BY username",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "username": row.get::<_, String>(1)?,
                "displayName": row.get::<_, String>(2)?,
                "role": row.get::<_, String>(3)?,
                "xp": row.get::<_, i64>(4)?,
                "levelNumber": row.get::<_, i64>(5)?,
                "streakDays": row.get::<_, i64>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_users_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let user_id = match req.params.get("userId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing userId", None),
    };

    let row: Option<(String, String, String, i64, i64, i64, Option<String>)> = match conn
        .query_row(
            "SELECT username, display_name, role, xp, level_number, streak_days, last_active_date
             FROM users WHERE id = ?",
            [&user_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                ))
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((username, display_name, role, xp, level_number, streak_days, last_active)) = row
    else {
        return err(&req.id, "not_found", "user not found", None);
    };

    let levels = match progression::load_levels(conn) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let current = levels.iter().find(|l| l.level_number == level_number);
    let next = levels.iter().find(|l| l.level_number == level_number + 1);
    let xp_into_level = current.map(|l| xp - l.exp_required);
    let xp_to_next = next.map(|l| l.exp_required - xp);

    let earned = {
        let mut stmt = match conn.prepare(
            "SELECT a.code, a.name, a.icon_url, ua.earned_at
             FROM user_achievements ua
             JOIN achievements a ON a.id = ua.achievement_id
             WHERE ua.user_id = ?
             ORDER BY ua.earned_at",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt
            .query_map([&user_id], |row| {
                Ok(json!({
                    "code": row.get::<_, String>(0)?,
                    "name": row.get::<_, String>(1)?,
                    "iconUrl": row.get::<_, String>(2)?,
                    "earnedAt": row.get::<_, String>(3)?
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
            "id": user_id,
            "username": username,
            "displayName": display_name,
            "role": role,
            "xp": xp,
            "levelNumber": level_number,
            "levelName": current.map(|l| l.name.clone()),
            "xpIntoLevel": xp_into_level,
            "xpToNextLevel": xp_to_next,
            "streakDays": streak_days,
            "lastActiveDate": last_active,
            "achievements": earned
        }),
    )
}

fn handle_users_award_xp(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let user_id = match req.params.get("userId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing userId", None),
    };
    let amount = match req.params.get("amount").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing/invalid amount", None),
    };
    let reason = req
        .params
        .get("reason")
        .and_then(|v| v.as_str())
        .unwrap_or("manual");

    let now = Utc::now();
    let outcome = match progression::award_xp(conn, &user_id, amount, reason, now) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let unlocked = match achievements::check_unlocks(conn, &user_id, now) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // Unlock rewards may have added more XP on top of the award itself.
    let final_xp: i64 = match conn.query_row("SELECT xp FROM users WHERE id = ?", [&user_id], |r| {
        r.get(0)
    }) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "xp": final_xp,
            "levelBefore": outcome.level_before,
            "levelAfter": outcome.level_after,
            "leveledUp": outcome.level_after > outcome.level_before,
            "unlocked": unlocked.iter().map(|a| a.code.clone()).collect::<Vec<_>>()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(handle_users_create(state, req)),
        "users.list" => Some(handle_users_list(state, req)),
        "users.get" => Some(handle_users_get(state, req)),
        "users.awardXp" => Some(handle_users_award_xp(state, req)),
        _ => None,
    }
}
