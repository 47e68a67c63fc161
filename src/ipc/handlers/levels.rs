use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::progression;
use serde_json::json;

fn handle_levels_seed(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let count = match req.params.get("count").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing/invalid count", None),
    };

    match progression::seed_levels(conn, count) {
        Ok(seeded) => ok(&req.id, json!({ "seeded": seeded })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_levels_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "levels": [] }));
    };

    match progression::load_levels(conn) {
        Ok(levels) => {
            let rows: Vec<serde_json::Value> = levels
                .iter()
                .map(|l| {
                    json!({
                        "levelNumber": l.level_number,
                        "name": l.name,
                        "description": l.description,
                        "expRequired": l.exp_required
                    })
                })
                .collect();
            ok(&req.id, json!({ "levels": rows }))
        }
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "levels.seed" => Some(handle_levels_seed(state, req)),
        "levels.list" => Some(handle_levels_list(state, req)),
        _ => None,
    }
}
