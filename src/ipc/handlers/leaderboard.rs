use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const LEADERBOARD_MAX_ROWS: i64 = 200;

fn handle_leaderboard_xp(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "entries": [] }));
    };

    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(20)
        .clamp(1, LEADERBOARD_MAX_ROWS);

    let mut stmt = match conn.prepare(
        "SELECT id, username, display_name, xp, level_number, streak_days
         FROM users
         WHERE role = 'student'
         ORDER BY xp DESC, username
         LIMIT ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([limit], |row| {
            Ok(json!({
                "userId": row.get::<_, String>(0)?,
                "username": row.get::<_, String>(1)?,
                "displayName": row.get::<_, String>(2)?,
                "xp": row.get::<_, i64>(3)?,
                "levelNumber": row.get::<_, i64>(4)?,
                "streakDays": row.get::<_, i64>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(mut entries) => {
            for (i, entry) in entries.iter_mut().enumerate() {
                entry["rank"] = json!(i + 1);
            }
            ok(&req.id, json!({ "entries": entries }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_leaderboard_test(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let test_id = match req.params.get("testId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing testId", None),
    };

    // Only graded attempts rank; abandoned and in-flight attempts never score.
    let mut stmt = match conn.prepare(
        "SELECT a.student_id, u.username, u.display_name,
                MAX(a.total_score) AS best_score,
                COUNT(*) AS graded_attempts
         FROM test_attempts a
         JOIN users u ON u.id = a.student_id
         WHERE a.test_id = ? AND a.status = 'graded'
         GROUP BY a.student_id
         ORDER BY best_score DESC, u.username",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&test_id], |row| {
            Ok(json!({
                "studentId": row.get::<_, String>(0)?,
                "username": row.get::<_, String>(1)?,
                "displayName": row.get::<_, String>(2)?,
                "bestScore": row.get::<_, Option<f64>>(3)?,
                "gradedAttempts": row.get::<_, i64>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(mut entries) => {
            for (i, entry) in entries.iter_mut().enumerate() {
                entry["rank"] = json!(i + 1);
            }
            ok(&req.id, json!({ "entries": entries }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "leaderboard.xp" => Some(handle_leaderboard_xp(state, req)),
        "leaderboard.test" => Some(handle_leaderboard_test(state, req)),
        _ => None,
    }
}
