use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "learnquest.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    create_schema(&conn)?;
    Ok(conn)
}

fn create_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'student',
            xp INTEGER NOT NULL DEFAULT 0,
            level_number INTEGER NOT NULL DEFAULT 1,
            streak_days INTEGER NOT NULL DEFAULT 0,
            last_active_date TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    // Early workspaces predate the streak columns. Add them if needed.
    ensure_users_streak_columns(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS levels(
            level_number INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL,
            exp_required INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            title TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            deleted_at TEXT,
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_teacher ON courses(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            title TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            xp_reward INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_course ON lessons(course_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lesson_completions(
            lesson_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            PRIMARY KEY(lesson_id, user_id),
            FOREIGN KEY(lesson_id) REFERENCES lessons(id),
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lesson_completions_user ON lesson_completions(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS flashcards(
            id TEXT PRIMARY KEY,
            course_id TEXT,
            front TEXT NOT NULL,
            back TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_flashcards_course ON flashcards(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_flashcard_progress(
            user_id TEXT NOT NULL,
            flashcard_id TEXT NOT NULL,
            ease_factor INTEGER NOT NULL DEFAULT 250,
            interval_days INTEGER NOT NULL DEFAULT 1,
            repetitions INTEGER NOT NULL DEFAULT 0,
            next_review_at TEXT NOT NULL,
            last_reviewed_at TEXT,
            PRIMARY KEY(user_id, flashcard_id),
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(flashcard_id) REFERENCES flashcards(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_flashcard_progress_due
         ON user_flashcard_progress(user_id, next_review_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tests(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            course_id TEXT,
            title TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            duration_minutes INTEGER,
            total_points REAL NOT NULL DEFAULT 0,
            start_time TEXT,
            end_time TEXT,
            status TEXT NOT NULL DEFAULT 'draft',
            shuffle_questions INTEGER NOT NULL DEFAULT 0,
            show_results_immediately INTEGER NOT NULL DEFAULT 1,
            allow_review INTEGER NOT NULL DEFAULT 1,
            max_attempts INTEGER NOT NULL DEFAULT 1,
            deleted_at TEXT,
            FOREIGN KEY(teacher_id) REFERENCES users(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    ensure_tests_delivery_columns(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tests_teacher ON tests(teacher_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tests_course ON tests(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS test_items(
            id TEXT PRIMARY KEY,
            test_id TEXT NOT NULL,
            item_kind TEXT NOT NULL,
            prompt TEXT NOT NULL,
            answer_key TEXT,
            sort_order INTEGER NOT NULL,
            points REAL NOT NULL,
            FOREIGN KEY(test_id) REFERENCES tests(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_test_items_test ON test_items(test_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS test_students(
            test_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            PRIMARY KEY(test_id, student_id),
            FOREIGN KEY(test_id) REFERENCES tests(id),
            FOREIGN KEY(student_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_test_students_student ON test_students(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS test_attempts(
            id TEXT PRIMARY KEY,
            test_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            attempt_number INTEGER NOT NULL,
            started_at TEXT NOT NULL,
            submitted_at TEXT,
            time_spent_minutes INTEGER,
            total_score REAL,
            status TEXT NOT NULL DEFAULT 'in_progress',
            UNIQUE(test_id, student_id, attempt_number),
            FOREIGN KEY(test_id) REFERENCES tests(id),
            FOREIGN KEY(student_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_test_attempts_test ON test_attempts(test_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_test_attempts_student ON test_attempts(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS test_item_submissions(
            id TEXT PRIMARY KEY,
            test_attempt_id TEXT NOT NULL,
            test_item_id TEXT NOT NULL,
            answer TEXT NOT NULL,
            score REAL,
            is_correct INTEGER,
            feedback TEXT,
            UNIQUE(test_attempt_id, test_item_id),
            FOREIGN KEY(test_attempt_id) REFERENCES test_attempts(id),
            FOREIGN KEY(test_item_id) REFERENCES test_items(id)
        )",
        [],
    )?;
    ensure_submissions_feedback(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_attempt
         ON test_item_submissions(test_attempt_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS achievements(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            icon_url TEXT NOT NULL DEFAULT '',
            xp_reward INTEGER NOT NULL DEFAULT 0,
            kind TEXT NOT NULL,
            threshold INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_achievements(
            user_id TEXT NOT NULL,
            achievement_id TEXT NOT NULL,
            earned_at TEXT NOT NULL,
            PRIMARY KEY(user_id, achievement_id),
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(achievement_id) REFERENCES achievements(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS domain_events(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL,
            acked INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_domain_events_pending ON domain_events(acked, id)",
        [],
    )?;

    Ok(())
}

fn ensure_users_streak_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "users", "streak_days")? {
        conn.execute(
            "ALTER TABLE users ADD COLUMN streak_days INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    if !table_has_column(conn, "users", "last_active_date")? {
        conn.execute("ALTER TABLE users ADD COLUMN last_active_date TEXT", [])?;
    }
    Ok(())
}

fn ensure_tests_delivery_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "tests", "shuffle_questions")? {
        conn.execute(
            "ALTER TABLE tests ADD COLUMN shuffle_questions INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    if !table_has_column(conn, "tests", "show_results_immediately")? {
        conn.execute(
            "ALTER TABLE tests ADD COLUMN show_results_immediately INTEGER NOT NULL DEFAULT 1",
            [],
        )?;
    }
    if !table_has_column(conn, "tests", "allow_review")? {
        conn.execute(
            "ALTER TABLE tests ADD COLUMN allow_review INTEGER NOT NULL DEFAULT 1",
            [],
        )?;
    }
    Ok(())
}

fn ensure_submissions_feedback(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "test_item_submissions", "feedback")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE test_item_submissions ADD COLUMN feedback TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
pub fn open_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    create_schema(&conn).expect("create schema");
    conn
}
