use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use crate::domain::{fmt_ts, DomainError};

/// Outbound domain-event queue. Rows stay until the consumer acks them; the
/// push channel that delivers them lives outside this process.
#[derive(Debug, Clone)]
pub struct EventRow {
    pub id: i64,
    pub user_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: String,
}

pub fn emit(
    conn: &Connection,
    user_id: &str,
    event_type: &str,
    payload: serde_json::Value,
    now: DateTime<Utc>,
) -> Result<i64, DomainError> {
    conn.execute(
        "INSERT INTO domain_events(user_id, event_type, payload, created_at)
         VALUES(?, ?, ?, ?)",
        (user_id, event_type, payload.to_string(), fmt_ts(now)),
    )
    .map_err(|e| DomainError::db("db_insert_failed", e))?;
    Ok(conn.last_insert_rowid())
}

pub fn poll(conn: &Connection, limit: i64) -> Result<Vec<EventRow>, DomainError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, user_id, event_type, payload, created_at
             FROM domain_events
             WHERE acked = 0
             ORDER BY id
             LIMIT ?",
        )
        .map_err(|e| DomainError::db("db_query_failed", e))?;
    stmt.query_map([limit], |r| {
        let payload_text: String = r.get(3)?;
        Ok(EventRow {
            id: r.get(0)?,
            user_id: r.get(1)?,
            event_type: r.get(2)?,
            payload: serde_json::from_str(&payload_text).unwrap_or(serde_json::Value::Null),
            created_at: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| DomainError::db("db_query_failed", e))
}

pub fn ack(conn: &Connection, ids: &[i64]) -> Result<usize, DomainError> {
    if ids.is_empty() {
        return Ok(0);
    }
    let placeholders = std::iter::repeat("?")
        .take(ids.len())
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "UPDATE domain_events SET acked = 1 WHERE acked = 0 AND id IN ({})",
        placeholders
    );
    let bind_values: Vec<Value> = ids.iter().map(|id| Value::Integer(*id)).collect();
    conn.execute(&sql, params_from_iter(bind_values))
        .map_err(|e| DomainError::db("db_update_failed", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_test_db;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn emit_poll_ack_drains_in_order() {
        let conn = open_test_db();
        conn.execute(
            "INSERT INTO users(id, username, display_name, role, created_at)
             VALUES('u1', 'ada', 'Ada', 'student', '2026-01-01T00:00:00+00:00')",
            [],
        )
        .expect("insert user");
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).single().expect("ts");

        let first = emit(&conn, "u1", "level_up", json!({ "levelNumber": 2 }), now).expect("emit");
        let second =
            emit(&conn, "u1", "achievement_unlocked", json!({ "code": "str7" }), now).expect("emit");
        assert!(second > first);

        let pending = poll(&conn, 10).expect("poll");
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].event_type, "level_up");

        assert_eq!(ack(&conn, &[first]).expect("ack"), 1);
        let remaining = poll(&conn, 10).expect("poll");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second);

        // Acking again is a no-op.
        assert_eq!(ack(&conn, &[first]).expect("ack"), 0);
    }
}
