use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::domain::{fmt_ts, DomainError};
use crate::events;
use crate::progression;

#[derive(Debug, Clone)]
pub struct AchievementRow {
    pub id: String,
    pub code: String,
    pub name: String,
    pub description: String,
    pub icon_url: String,
    pub xp_reward: i64,
    pub kind: String,
    pub threshold: i64,
}

pub const KINDS: &[&str] = &["xp_total", "streak_days", "reviews_total", "tests_graded"];

pub fn list(conn: &Connection) -> Result<Vec<AchievementRow>, DomainError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, code, name, description, icon_url, xp_reward, kind, threshold
             FROM achievements
             ORDER BY kind, threshold",
        )
        .map_err(|e| DomainError::db("db_query_failed", e))?;
    stmt.query_map([], row_to_achievement)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| DomainError::db("db_query_failed", e))
}

fn row_to_achievement(r: &rusqlite::Row<'_>) -> rusqlite::Result<AchievementRow> {
    Ok(AchievementRow {
        id: r.get(0)?,
        code: r.get(1)?,
        name: r.get(2)?,
        description: r.get(3)?,
        icon_url: r.get(4)?,
        xp_reward: r.get(5)?,
        kind: r.get(6)?,
        threshold: r.get(7)?,
    })
}

fn metric_for(conn: &Connection, user_id: &str, kind: &str) -> Result<i64, DomainError> {
    let value = match kind {
        "xp_total" => conn.query_row("SELECT xp FROM users WHERE id = ?", [user_id], |r| r.get(0)),
        "streak_days" => conn.query_row(
            "SELECT streak_days FROM users WHERE id = ?",
            [user_id],
            |r| r.get(0),
        ),
        "reviews_total" => conn.query_row(
            "SELECT COUNT(*) FROM user_flashcard_progress
             WHERE user_id = ? AND last_reviewed_at IS NOT NULL",
            [user_id],
            |r| r.get(0),
        ),
        "tests_graded" => conn.query_row(
            "SELECT COUNT(*) FROM test_attempts WHERE student_id = ? AND status = 'graded'",
            [user_id],
            |r| r.get(0),
        ),
        other => {
            return Err(DomainError::bad_params(format!(
                "unknown achievement kind '{}'",
                other
            )))
        }
    };
    value.map_err(|e| DomainError::db("db_query_failed", e))
}

/// Unlocks every achievement whose metric now meets its threshold. Each
/// unlock records the earn, queues an `achievement_unlocked` event, and
/// credits the reward XP. One pass only: a reward that itself crosses a
/// further threshold unlocks on the next activity.
pub fn check_unlocks(
    conn: &Connection,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<AchievementRow>, DomainError> {
    let user_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [user_id], |r| r.get(0))
        .optional()
        .map_err(|e| DomainError::db("db_query_failed", e))?;
    if user_exists.is_none() {
        return Err(DomainError::not_found("user not found"));
    }

    let candidates: Vec<AchievementRow> = {
        let mut stmt = conn
            .prepare(
                "SELECT id, code, name, description, icon_url, xp_reward, kind, threshold
                 FROM achievements
                 WHERE id NOT IN (
                   SELECT achievement_id FROM user_achievements WHERE user_id = ?
                 )
                 ORDER BY kind, threshold",
            )
            .map_err(|e| DomainError::db("db_query_failed", e))?;
        stmt.query_map([user_id], row_to_achievement)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(|e| DomainError::db("db_query_failed", e))?
    };

    let mut unlocked = Vec::new();
    for achievement in candidates {
        let metric = metric_for(conn, user_id, &achievement.kind)?;
        if metric < achievement.threshold {
            continue;
        }

        conn.execute(
            "INSERT INTO user_achievements(user_id, achievement_id, earned_at) VALUES(?, ?, ?)",
            (user_id, &achievement.id, fmt_ts(now)),
        )
        .map_err(|e| DomainError::db("db_insert_failed", e))?;

        events::emit(
            conn,
            user_id,
            "achievement_unlocked",
            json!({
                "code": achievement.code,
                "name": achievement.name,
                "description": achievement.description,
                "iconUrl": achievement.icon_url,
                "xpReward": achievement.xp_reward,
                "message": format!("You've earned the '{}' achievement!", achievement.name),
            }),
            now,
        )?;

        if achievement.xp_reward > 0 {
            progression::award_xp(conn, user_id, achievement.xp_reward, "achievement", now)?;
        }

        unlocked.push(achievement);
    }

    Ok(unlocked)
}
