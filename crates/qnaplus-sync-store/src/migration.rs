//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::sqlite::now_millis;

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
            tracing::debug!(version, "applied schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Mirrored forum questions, full record kept as JSON
        CREATE TABLE questions (
            id INTEGER PRIMARY KEY,
            program TEXT NOT NULL,
            season TEXT NOT NULL,
            asked_timestamp_ms INTEGER NOT NULL,
            answered INTEGER NOT NULL,
            data TEXT NOT NULL
        );

        -- Frontier singleton
        CREATE TABLE metadata (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            current_season TEXT NOT NULL,
            oldest_unanswered_id TEXT NOT NULL
        );

        -- Ids that failed to fetch on a prior run
        CREATE TABLE failures (
            id INTEGER PRIMARY KEY
        );

        -- Outbox
        CREATE TABLE event_queue (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            event TEXT NOT NULL CHECK (event IN ('answered', 'answer_edited', 'replay', 'forum_change')),
            payload TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- Per-program forum state
        CREATE TABLE forum_state (
            program TEXT PRIMARY KEY,
            open INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Questions queued for re-announcement
        CREATE TABLE renotify_queue (
            id INTEGER PRIMARY KEY REFERENCES questions(id),
            queued_at INTEGER NOT NULL
        );

        CREATE INDEX idx_questions_season_answered ON questions(season, answered);
        CREATE INDEX idx_questions_asked ON questions(asked_timestamp_ms);
        CREATE INDEX idx_event_queue_event ON event_queue(event);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "questions",
            "metadata",
            "failures",
            "event_queue",
            "forum_state",
            "renotify_queue",
            "schema_migrations",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_metadata_is_singleton() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        conn.execute(
            "INSERT INTO metadata (id, current_season, oldest_unanswered_id) VALUES (1, 's', '1')",
            [],
        )
        .unwrap();
        let second = conn.execute(
            "INSERT INTO metadata (id, current_season, oldest_unanswered_id) VALUES (2, 's', '1')",
            [],
        );
        assert!(second.is_err());
    }
}
