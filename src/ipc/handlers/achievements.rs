use crate::achievements;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_achievements_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let code = match req.params.get("code").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing code", None),
    };
    if code.is_empty() {
        return err(&req.id, "bad_params", "code must not be empty", None);
    }
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let kind = match req.params.get("kind").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing kind", None),
    };
    if !achievements::KINDS.contains(&kind.as_str()) {
        return err(
            &req.id,
            "bad_params",
            format!("kind must be one of: {}", achievements::KINDS.join(", ")),
            Some(json!({ "kind": kind })),
        );
    }
    let threshold = match req.params.get("threshold").and_then(|v| v.as_i64()) {
        Some(v) if v >= 1 => v,
        _ => return err(&req.id, "bad_params", "threshold must be >= 1", None),
    };
    let description = req
        .params
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let icon_url = req
        .params
        .get("iconUrl")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let xp_reward = req
        .params
        .get("xpReward")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    if xp_reward < 0 {
        return err(&req.id, "bad_params", "xpReward must be >= 0", None);
    }

    let achievement_id = Uuid::new_v4().to_string();
    let insert = conn.execute(
        "INSERT INTO achievements(id, code, name, description, icon_url, xp_reward, kind, threshold)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &achievement_id,
            &code,
            &name,
            &description,
            &icon_url,
            xp_reward,
            &kind,
            threshold,
        ),
    );
    if let Err(e) = insert {
        if let rusqlite::Error::SqliteFailure(sq, _) = &e {
            if sq.code == rusqlite::ErrorCode::ConstraintViolation {
                return err(
                    &req.id,
                    "conflict",
                    "achievement code already exists",
                    Some(json!({ "code": code })),
                );
            }
        }
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "achievements" })),
        );
    }

    ok(&req.id, json!({ "achievementId": achievement_id, "code": code }))
}

fn handle_achievements_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "achievements": [] }));
    };

    match achievements::list(conn) {
        Ok(rows) => {
            let body: Vec<serde_json::Value> = rows
                .iter()
                .map(|a| {
                    json!({
                        "id": a.id,
                        "code": a.code,
                        "name": a.name,
                        "description": a.description,
                        "iconUrl": a.icon_url,
                        "xpReward": a.xp_reward,
                        "kind": a.kind,
                        "threshold": a.threshold
                    })
                })
                .collect();
            ok(&req.id, json!({ "achievements": body }))
        }
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "achievements.create" => Some(handle_achievements_create(state, req)),
        "achievements.list" => Some(handle_achievements_list(state, req)),
        _ => None,
    }
}
