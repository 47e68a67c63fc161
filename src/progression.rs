use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::domain::DomainError;
use crate::events;

/// XP needed to go from level 1 to level 2.
pub const BASE_XP: f64 = 100.0;
/// Geometric growth applied per level.
pub const LEVEL_EXPONENT: f64 = 1.5;

#[derive(Debug, Clone)]
pub struct LevelRow {
    pub level_number: i64,
    pub name: String,
    pub description: String,
    pub exp_required: i64,
}

/// XP required to advance from `level` to `level + 1`:
/// `round(BASE_XP * level^EXPONENT)`.
pub fn level_cost(level: i64) -> Result<i64, DomainError> {
    if level < 1 {
        return Err(DomainError::bad_params("level must be >= 1"));
    }
    Ok((BASE_XP * (level as f64).powf(LEVEL_EXPONENT)).round() as i64)
}

/// Total XP required to reach `level` from zero. Computed once at seed time
/// and persisted as `levels.exp_required`; runtime lookups read the table.
pub fn cumulative_xp(level: i64) -> Result<i64, DomainError> {
    if level <= 1 {
        return Ok(0);
    }
    let mut total = 0_i64;
    for l in 1..level {
        total += level_cost(l)?;
    }
    Ok(total)
}

/// Highest level whose `exp_required <= total_xp`. `levels` must be sorted by
/// `level_number`; XP past the last seeded level resolves to that level.
pub fn resolve_level(total_xp: i64, levels: &[LevelRow]) -> Option<&LevelRow> {
    if levels.is_empty() {
        return None;
    }
    let idx = levels.partition_point(|l| l.exp_required <= total_xp);
    Some(&levels[idx.saturating_sub(1)])
}

pub fn load_levels(conn: &Connection) -> Result<Vec<LevelRow>, DomainError> {
    let mut stmt = conn
        .prepare(
            "SELECT level_number, name, description, exp_required
             FROM levels
             ORDER BY level_number",
        )
        .map_err(|e| DomainError::db("db_query_failed", e))?;
    stmt.query_map([], |r| {
        Ok(LevelRow {
            level_number: r.get(0)?,
            name: r.get(1)?,
            description: r.get(2)?,
            exp_required: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| DomainError::db("db_query_failed", e))
}

/// Writes levels 1..=count with their cumulative thresholds. Upserts, so
/// re-seeding (e.g. to extend the table) is safe and deterministic.
pub fn seed_levels(conn: &Connection, count: i64) -> Result<usize, DomainError> {
    if count < 1 {
        return Err(DomainError::bad_params("count must be >= 1"));
    }
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| DomainError::db("db_tx_failed", e))?;
    for level in 1..=count {
        let exp_required = cumulative_xp(level)?;
        tx.execute(
            "INSERT INTO levels(level_number, name, description, exp_required)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(level_number) DO UPDATE SET
               exp_required = excluded.exp_required",
            (
                level,
                format!("Level {}", level),
                format!("Reach {} total XP", exp_required),
                exp_required,
            ),
        )
        .map_err(|e| DomainError::db("db_insert_failed", e))?;
    }
    tx.commit()
        .map_err(|e| DomainError::db("db_commit_failed", e))?;
    Ok(count as usize)
}

#[derive(Debug, Clone)]
pub struct AwardOutcome {
    pub xp: i64,
    pub level_before: i64,
    pub level_after: i64,
    pub level_name: Option<String>,
}

/// Adds XP to a user and re-resolves their level against the seeded table.
/// A level rise emits a `level_up` event on the outbox.
pub fn award_xp(
    conn: &Connection,
    user_id: &str,
    amount: i64,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<AwardOutcome, DomainError> {
    if amount < 0 {
        return Err(DomainError::bad_params("xp amount must be >= 0"));
    }

    let row: Option<(i64, i64)> = conn
        .query_row(
            "SELECT xp, level_number FROM users WHERE id = ?",
            [user_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| DomainError::db("db_query_failed", e))?;
    let Some((xp, level_before)) = row else {
        return Err(DomainError::not_found("user not found"));
    };

    let new_xp = xp + amount;
    let levels = load_levels(conn)?;
    let resolved = resolve_level(new_xp, &levels);
    let level_after = resolved.map(|l| l.level_number).unwrap_or(level_before);
    let level_name = resolved.map(|l| l.name.clone());

    conn.execute(
        "UPDATE users SET xp = ?, level_number = ? WHERE id = ?",
        (new_xp, level_after, user_id),
    )
    .map_err(|e| DomainError::db("db_update_failed", e))?;

    if level_after > level_before {
        let name = level_name.clone().unwrap_or_else(|| format!("Level {}", level_after));
        events::emit(
            conn,
            user_id,
            "level_up",
            json!({
                "levelNumber": level_after,
                "name": name,
                "reason": reason,
                "message": format!("You've reached {}!", name),
            }),
            now,
        )?;
    }

    Ok(AwardOutcome {
        xp: new_xp,
        level_before,
        level_after,
        level_name,
    })
}

/// Daily-activity streak. Same-day activity is a no-op, the day after the
/// last activity extends the streak, anything else restarts it at 1.
pub fn touch_streak(conn: &Connection, user_id: &str, today: NaiveDate) -> Result<i64, DomainError> {
    let row: Option<(i64, Option<String>)> = conn
        .query_row(
            "SELECT streak_days, last_active_date FROM users WHERE id = ?",
            [user_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| DomainError::db("db_query_failed", e))?;
    let Some((streak, last_active)) = row else {
        return Err(DomainError::not_found("user not found"));
    };

    let last_date = last_active.and_then(|s| s.parse::<NaiveDate>().ok());
    let new_streak = match last_date {
        Some(d) if d == today => streak.max(1),
        Some(d) if today.signed_duration_since(d).num_days() == 1 => streak + 1,
        _ => 1,
    };

    conn.execute(
        "UPDATE users SET streak_days = ?, last_active_date = ? WHERE id = ?",
        (new_streak, today.to_string(), user_id),
    )
    .map_err(|e| DomainError::db("db_update_failed", e))?;

    Ok(new_streak)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_test_db;
    use chrono::TimeZone;

    fn insert_user(conn: &Connection, id: &str, username: &str) {
        conn.execute(
            "INSERT INTO users(id, username, display_name, role, xp, level_number, streak_days, created_at)
             VALUES(?, ?, ?, 'student', 0, 1, 0, '2026-01-01T00:00:00+00:00')",
            (id, username, username),
        )
        .expect("insert user");
    }

    #[test]
    fn level_cost_matches_formula() {
        assert_eq!(level_cost(1).expect("cost"), 100);
        assert_eq!(level_cost(2).expect("cost"), 283);
        assert_eq!(level_cost(3).expect("cost"), 520);
        assert_eq!(level_cost(4).expect("cost"), 800);
        assert_eq!(level_cost(5).expect("cost"), 1118);
        assert_eq!(level_cost(0).expect_err("must reject").code, "bad_params");
    }

    #[test]
    fn cumulative_xp_telescopes() {
        assert_eq!(cumulative_xp(1).expect("xp"), 0);
        assert_eq!(cumulative_xp(6).expect("xp"), 2821);
        for l in 1..=20 {
            let step = cumulative_xp(l + 1).expect("xp") - cumulative_xp(l).expect("xp");
            assert_eq!(step, level_cost(l).expect("cost"), "level {}", l);
        }
    }

    #[test]
    fn resolve_level_is_exact_at_boundaries() {
        let conn = open_test_db();
        seed_levels(&conn, 10).expect("seed");
        let levels = load_levels(&conn).expect("load");
        assert_eq!(levels.len(), 10);
        assert_eq!(levels[0].exp_required, 0);

        for l in 1..=10 {
            let at = cumulative_xp(l).expect("xp");
            let hit = resolve_level(at, &levels).expect("resolve");
            assert_eq!(hit.level_number, l, "boundary of level {}", l);
            let below = resolve_level(at - 1, &levels).expect("resolve");
            assert_eq!(below.level_number, (l - 1).max(1), "below level {}", l);
        }

        // XP beyond the table clamps to the top level.
        let top = resolve_level(i64::MAX, &levels).expect("resolve");
        assert_eq!(top.level_number, 10);
    }

    #[test]
    fn seed_levels_is_idempotent() {
        let conn = open_test_db();
        seed_levels(&conn, 5).expect("seed");
        seed_levels(&conn, 8).expect("reseed");
        let levels = load_levels(&conn).expect("load");
        assert_eq!(levels.len(), 8);
        assert_eq!(levels[5].exp_required, 2821);
    }

    #[test]
    fn award_xp_levels_up_and_emits_event() {
        let conn = open_test_db();
        seed_levels(&conn, 10).expect("seed");
        insert_user(&conn, "u1", "ada");
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("ts");

        let out = award_xp(&conn, "u1", 150, "lesson", now).expect("award");
        assert_eq!(out.xp, 150);
        assert_eq!(out.level_before, 1);
        assert_eq!(out.level_after, 2);

        let events = events::poll(&conn, 10).expect("poll");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "level_up");
        assert_eq!(
            events[0].payload.get("levelNumber").and_then(|v| v.as_i64()),
            Some(2)
        );

        assert_eq!(
            award_xp(&conn, "u1", -5, "bad", now).expect_err("negative").code,
            "bad_params"
        );
        assert_eq!(
            award_xp(&conn, "ghost", 5, "x", now).expect_err("ghost").code,
            "not_found"
        );
    }

    #[test]
    fn streak_extends_and_resets() {
        let conn = open_test_db();
        insert_user(&conn, "u1", "ada");

        let d1 = NaiveDate::from_ymd_opt(2026, 3, 1).expect("date");
        assert_eq!(touch_streak(&conn, "u1", d1).expect("day 1"), 1);
        // Same day again: unchanged.
        assert_eq!(touch_streak(&conn, "u1", d1).expect("same day"), 1);
        // Next day extends.
        let d2 = NaiveDate::from_ymd_opt(2026, 3, 2).expect("date");
        assert_eq!(touch_streak(&conn, "u1", d2).expect("day 2"), 2);
        // A gap resets.
        let d5 = NaiveDate::from_ymd_opt(2026, 3, 5).expect("date");
        assert_eq!(touch_streak(&conn, "u1", d5).expect("gap"), 1);
    }
}
