use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::domain::{fmt_ts, DomainError};

/// Ease factor is stored in centiunits: 250 is the SM-2 default of 2.5.
pub const DEFAULT_EASE_FACTOR: i64 = 250;
pub const MIN_EASE_FACTOR: i64 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewState {
    pub ease_factor: i64,
    pub interval_days: i64,
    pub repetitions: i64,
}

impl Default for ReviewState {
    fn default() -> Self {
        Self {
            ease_factor: DEFAULT_EASE_FACTOR,
            interval_days: 1,
            repetitions: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressRow {
    pub user_id: String,
    pub flashcard_id: String,
    pub state: ReviewState,
    pub next_review_at: DateTime<Utc>,
    pub last_reviewed_at: Option<DateTime<Utc>>,
}

/// SM-2 transition for one review. `quality` grades recall from 0 (blackout)
/// to 5 (perfect). The ease factor moves on every review; the repetition
/// counter and interval reset on a failed recall (quality < 3).
pub fn next_state(state: ReviewState, quality: i64) -> Result<ReviewState, DomainError> {
    if !(0..=5).contains(&quality) {
        return Err(DomainError::bad_params("quality must be between 0 and 5"));
    }

    let miss = (5 - quality) as f64;
    let delta = ((0.1 - miss * (miss * 0.02 + 0.08)) * 100.0).round() as i64;
    let ease_factor = (state.ease_factor + delta).max(MIN_EASE_FACTOR);

    if quality < 3 {
        return Ok(ReviewState {
            ease_factor,
            interval_days: 1,
            repetitions: 0,
        });
    }

    let repetitions = state.repetitions + 1;
    let interval_days = match repetitions {
        1 => 1,
        2 => 6,
        _ => ((state.interval_days as f64) * (ease_factor as f64) / 100.0).round() as i64,
    };

    Ok(ReviewState {
        ease_factor,
        interval_days,
        repetitions,
    })
}

/// Applies one review to the (user, flashcard) progress row and persists the
/// result. Runs inside a write transaction so overlapping reviews of the same
/// pair serialize at the database.
pub fn record_review(
    conn: &Connection,
    user_id: &str,
    flashcard_id: &str,
    quality: i64,
    now: DateTime<Utc>,
) -> Result<ProgressRow, DomainError> {
    let user_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [user_id], |r| r.get(0))
        .optional()
        .map_err(|e| DomainError::db("db_query_failed", e))?;
    if user_exists.is_none() {
        return Err(DomainError::not_found("user not found"));
    }
    let card_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM flashcards WHERE id = ?", [flashcard_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| DomainError::db("db_query_failed", e))?;
    if card_exists.is_none() {
        return Err(DomainError::not_found("flashcard not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| DomainError::db("db_tx_failed", e))?;

    let current: Option<(i64, i64, i64)> = tx
        .query_row(
            "SELECT ease_factor, interval_days, repetitions
             FROM user_flashcard_progress
             WHERE user_id = ? AND flashcard_id = ?",
            (user_id, flashcard_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(|e| DomainError::db("db_query_failed", e))?;

    let state = current
        .map(|(ease_factor, interval_days, repetitions)| ReviewState {
            ease_factor,
            interval_days,
            repetitions,
        })
        .unwrap_or_default();

    let next = next_state(state, quality)?;
    let next_review_at = now + Duration::days(next.interval_days);

    tx.execute(
        "INSERT INTO user_flashcard_progress(
            user_id, flashcard_id, ease_factor, interval_days, repetitions,
            next_review_at, last_reviewed_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(user_id, flashcard_id) DO UPDATE SET
           ease_factor = excluded.ease_factor,
           interval_days = excluded.interval_days,
           repetitions = excluded.repetitions,
           next_review_at = excluded.next_review_at,
           last_reviewed_at = excluded.last_reviewed_at",
        (
            user_id,
            flashcard_id,
            next.ease_factor,
            next.interval_days,
            next.repetitions,
            fmt_ts(next_review_at),
            fmt_ts(now),
        ),
    )
    .map_err(|e| DomainError::db("db_insert_failed", e))?;

    tx.commit()
        .map_err(|e| DomainError::db("db_commit_failed", e))?;

    Ok(ProgressRow {
        user_id: user_id.to_string(),
        flashcard_id: flashcard_id.to_string(),
        state: next,
        next_review_at,
        last_reviewed_at: Some(now),
    })
}
