//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend for qnaplus-sync. It uses rusqlite
//! with bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use qnaplus_sync_core::{
    classify_forum, DomainEvent, EventId, EventKind, ForumState, ForumTransition, Frontier,
    Question, QuestionId,
};

use crate::error::{lock_poisoned, Result, StoreError};
use crate::migration;
use crate::traits::{OutboxEntry, Store, UpsertReport};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(lock_poisoned)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

/// SQLite integers are signed; ids past `i64::MAX` would sort wrongly.
fn to_sql_id(id: QuestionId) -> Result<i64> {
    i64::try_from(id.get())
        .map_err(|_| StoreError::InvalidData(format!("question id {id} is out of range")))
}

fn from_sql_id(id: i64) -> QuestionId {
    QuestionId::new(id as u64)
}

fn decode_question(data: &str) -> Result<Question> {
    Ok(serde_json::from_str(data)?)
}

fn load_question(conn: &Connection, id: QuestionId) -> Result<Option<Question>> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM questions WHERE id = ?1",
            params![to_sql_id(id)?],
            |row| row.get(0),
        )
        .optional()?;
    data.as_deref().map(decode_question).transpose()
}

fn query_questions(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Question>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.iter().map(|data| decode_question(data)).collect()
}

/// Write every question whose content differs from its stored copy.
fn upsert_questions(conn: &Connection, questions: &[Question]) -> Result<UpsertReport> {
    let mut report = UpsertReport::default();
    let mut stmt = conn.prepare(
        "INSERT INTO questions (id, program, season, asked_timestamp_ms, answered, data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            program = excluded.program,
            season = excluded.season,
            asked_timestamp_ms = excluded.asked_timestamp_ms,
            answered = excluded.answered,
            data = excluded.data",
    )?;

    for question in questions {
        let stored = load_question(conn, question.id)?;
        if !report.record(stored.as_ref(), question) {
            continue;
        }
        stmt.execute(params![
            to_sql_id(question.id)?,
            question.program,
            question.season,
            question.asked_timestamp_ms,
            question.answered,
            serde_json::to_string(question)?,
        ])?;
    }
    Ok(report)
}

fn insert_events(conn: &Connection, events: &[DomainEvent]) -> Result<Vec<EventId>> {
    let now = now_millis();
    let mut stmt = conn.prepare(
        "INSERT INTO event_queue (id, event, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
    )?;
    let mut ids = Vec::with_capacity(events.len());
    for event in events {
        let id = EventId::new(Uuid::new_v4().to_string());
        let payload = event.to_payload()?;
        stmt.execute(params![
            id.as_str(),
            event.kind().as_str(),
            payload.to_string(),
            now,
        ])?;
        ids.push(id);
    }
    Ok(ids)
}

fn decode_entry(id: String, kind: &str, payload: &str) -> Result<OutboxEntry> {
    let kind: EventKind = kind.parse()?;
    let payload: serde_json::Value = serde_json::from_str(payload)?;
    Ok(OutboxEntry {
        id: EventId::new(id),
        event: DomainEvent::from_payload(kind, payload)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn ping(&self) -> Result<()> {
        self.blocking(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }

    async fn get_frontier(&self) -> Result<Option<Frontier>> {
        self.blocking(|conn| {
            let row: Option<(String, String)> = conn
                .query_row(
                    "SELECT current_season, oldest_unanswered_id FROM metadata WHERE id = 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match row {
                Some((season, oldest)) => Ok(Some(Frontier::new(season, oldest.parse()?))),
                None => Ok(None),
            }
        })
        .await
    }

    async fn save_frontier(&self, frontier: &Frontier) -> Result<()> {
        let frontier = frontier.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO metadata (id, current_season, oldest_unanswered_id)
                 VALUES (1, ?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET
                    current_season = excluded.current_season,
                    oldest_unanswered_id = excluded.oldest_unanswered_id",
                params![
                    frontier.current_season,
                    frontier.oldest_unanswered_id.to_string()
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_failures(&self) -> Result<Vec<QuestionId>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM failures ORDER BY id")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, i64>(0))?
                .map(|id| id.map(from_sql_id))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
        .await
    }

    async fn replace_failures(&self, ids: &[QuestionId]) -> Result<()> {
        let ids = ids.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM failures", [])?;
            {
                let mut stmt = tx.prepare("INSERT OR IGNORE INTO failures (id) VALUES (?1)")?;
                for id in &ids {
                    stmt.execute(params![to_sql_id(*id)?])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_question(&self, id: QuestionId) -> Result<Option<Question>> {
        self.blocking(move |conn| load_question(conn, id)).await
    }

    async fn get_questions(&self, ids: &[QuestionId]) -> Result<Vec<Question>> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();
        self.blocking(move |conn| {
            let mut found = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(question) = load_question(conn, id)? {
                    found.push(question);
                }
            }
            Ok(found)
        })
        .await
    }

    async fn all_questions(&self) -> Result<Vec<Question>> {
        self.blocking(|conn| query_questions(conn, "SELECT data FROM questions ORDER BY id", []))
            .await
    }

    async fn questions_asked_since(&self, asked_after_ms: i64) -> Result<Vec<Question>> {
        self.blocking(move |conn| {
            query_questions(
                conn,
                "SELECT data FROM questions
                 WHERE answered = 1 AND asked_timestamp_ms >= ?1
                 ORDER BY id",
                params![asked_after_ms],
            )
        })
        .await
    }

    async fn resolve_failures(&self, questions: &[Question]) -> Result<UpsertReport> {
        let questions = questions.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let report = upsert_questions(&tx, &questions)?;
            {
                let mut stmt = tx.prepare("DELETE FROM failures WHERE id = ?1")?;
                for question in &questions {
                    stmt.execute(params![to_sql_id(question.id)?])?;
                }
            }
            tx.commit()?;
            Ok(report)
        })
        .await
    }

    async fn apply_update(
        &self,
        questions: &[Question],
        events: &[DomainEvent],
    ) -> Result<UpsertReport> {
        let questions = questions.to_vec();
        let events = events.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let report = upsert_questions(&tx, &questions)?;
            insert_events(&tx, &events)?;
            tx.commit()?;
            Ok(report)
        })
        .await
    }

    async fn append_events(&self, events: &[DomainEvent]) -> Result<Vec<EventId>> {
        let events = events.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let ids = insert_events(&tx, &events)?;
            tx.commit()?;
            Ok(ids)
        })
        .await
    }

    async fn drain_grouped(&self) -> Result<BTreeMap<EventKind, Vec<OutboxEntry>>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare("SELECT id, event, payload FROM event_queue ORDER BY seq")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut grouped: BTreeMap<EventKind, Vec<OutboxEntry>> = BTreeMap::new();
            for (id, kind, payload) in rows {
                match decode_entry(id.clone(), &kind, &payload) {
                    Ok(entry) => grouped.entry(entry.event.kind()).or_default().push(entry),
                    Err(e) => tracing::warn!(event_id = %id, kind = %kind, error = %e, "skipping undecodable outbox row"),
                }
            }
            Ok(grouped)
        })
        .await
    }

    async fn delete_events(&self, ids: &[EventId]) -> Result<usize> {
        let ids = ids.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let mut deleted = 0;
            {
                let mut stmt = tx.prepare("DELETE FROM event_queue WHERE id = ?1")?;
                for id in &ids {
                    deleted += stmt.execute(params![id.as_str()])?;
                }
            }
            tx.commit()?;
            Ok(deleted)
        })
        .await
    }

    async fn get_forum_states(&self) -> Result<Vec<ForumState>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare("SELECT program, open FROM forum_state ORDER BY program")?;
            let states = stmt
                .query_map([], |row| Ok(ForumState::new(row.get::<_, String>(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(states)
        })
        .await
    }

    async fn update_forum_states(&self, states: &[ForumState]) -> Result<Vec<ForumTransition>> {
        let states = states.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let now = now_millis();
            let mut transitions = Vec::new();
            let mut events = Vec::new();

            for state in &states {
                let previous: Option<bool> = tx
                    .query_row(
                        "SELECT open FROM forum_state WHERE program = ?1",
                        params![state.program],
                        |row| row.get(0),
                    )
                    .optional()?;

                if previous == Some(state.open) {
                    continue;
                }
                tx.execute(
                    "INSERT INTO forum_state (program, open, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(program) DO UPDATE SET open = excluded.open, updated_at = excluded.updated_at",
                    params![state.program, state.open, now],
                )?;

                if let Some(open) = previous {
                    let before = ForumState::new(state.program.clone(), open);
                    if let Some(event) = classify_forum(&before, state) {
                        events.push(event);
                    }
                    transitions.push(ForumTransition {
                        before,
                        after: state.clone(),
                    });
                }
            }

            insert_events(&tx, &events)?;
            tx.commit()?;
            Ok(transitions)
        })
        .await
    }

    async fn queue_renotify(&self, ids: &[QuestionId]) -> Result<usize> {
        let ids = ids.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let now = now_millis();
            let mut queued = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO renotify_queue (id, queued_at)
                     SELECT id, ?2 FROM questions WHERE id = ?1",
                )?;
                for id in &ids {
                    queued += stmt.execute(params![to_sql_id(*id)?, now])?;
                }
            }
            tx.commit()?;
            Ok(queued)
        })
        .await
    }

    async fn get_renotify_queue(&self) -> Result<Vec<Question>> {
        self.blocking(|conn| {
            query_questions(
                conn,
                "SELECT q.data FROM renotify_queue r JOIN questions q ON q.id = r.id ORDER BY r.id",
                [],
            )
        })
        .await
    }

    async fn clear_renotify_queue(&self, ids: &[QuestionId]) -> Result<usize> {
        let ids = ids.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            {
                let mut stmt = tx.prepare("DELETE FROM renotify_queue WHERE id = ?1")?;
                for id in &ids {
                    removed += stmt.execute(params![to_sql_id(*id)?])?;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
        .await
    }
}

/// Get current time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
