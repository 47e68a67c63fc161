use crate::events;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const POLL_MAX_ROWS: i64 = 500;

fn handle_events_poll(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "events": [] }));
    };

    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(100)
        .clamp(1, POLL_MAX_ROWS);

    match events::poll(conn, limit) {
        Ok(rows) => {
            let body: Vec<serde_json::Value> = rows
                .iter()
                .map(|e| {
                    json!({
                        "id": e.id,
                        "userId": e.user_id,
                        "eventType": e.event_type,
                        "payload": e.payload,
                        "createdAt": e.created_at
                    })
                })
                .collect();
            ok(&req.id, json!({ "events": body }))
        }
        Err(e) => e.response(&req.id),
    }
}

fn handle_events_ack(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(ids_arr) = req.params.get("ids").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing ids[]", None);
    };
    let mut ids = Vec::with_capacity(ids_arr.len());
    for (i, v) in ids_arr.iter().enumerate() {
        match v.as_i64() {
            Some(id) => ids.push(id),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("ids[{}] must be an integer", i),
                    None,
                )
            }
        }
    }

    match events::ack(conn, &ids) {
        Ok(acked) => ok(&req.id, json!({ "acked": acked })),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "events.poll" => Some(handle_events_poll(state, req)),
        "events.ack" => Some(handle_events_ack(state, req)),
        _ => None,
    }
}
