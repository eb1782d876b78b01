mod schema;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::config::StoreConfig;
use crate::models::*;

/// Durable per-session storage of approved contexts.
///
/// `put` is only ever called on approval. It overwrites the session's current
/// context and records it in the history unless it equals the latest entry.
pub trait SessionStore: Send + Sync {
    fn get(&self, session_id: &str) -> Result<Option<Session>>;

    fn put(&self, session_id: &str, context: &ProjectContext) -> Result<Session>;
}

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "context-gate")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        let db_path = dirs.data_dir().join("sessions.db");
        Self::open(db_path)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open the configured database, or the platform default.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        match &config.database_path {
            Some(path) => Self::open(path.clone()),
            None => Self::open_default(),
        }
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let applied = schema::run_migrations(&conn)?;
        if applied > 0 {
            tracing::info!(applied, "Session database migrated");
        }
        Ok(())
    }

    // ============================================================
    // Session operations
    // ============================================================

    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        load_session(&conn, session_id)
    }

    /// Commit an approved context for `session_id`.
    ///
    /// The id is opaque and stored exactly as given; only a blank id is
    /// rejected. `context` is stored verbatim, so callers normalize it at
    /// their boundary. The current context is always overwritten and
    /// `updated_at` bumped. A history entry is appended only when `context`
    /// differs from the most recent one, so re-approving an unchanged context
    /// does not grow the trail.
    pub fn put_session(&self, session_id: &str, context: &ProjectContext) -> Result<Session> {
        if session_id.trim().is_empty() {
            anyhow::bail!("Session id must not be empty");
        }

        let context_json = serde_json::to_string(context)?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);

        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO sessions (session_id, context, created_at, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET context = excluded.context, updated_at = excluded.updated_at",
            (session_id, &context_json, &now, &now),
        )?;

        let latest: Option<String> = tx
            .query_row(
                "SELECT context FROM session_history WHERE session_id = ? ORDER BY id DESC LIMIT 1",
                [session_id],
                |row| row.get(0),
            )
            .optional()?;
        let unchanged = match latest {
            Some(json) => parse_context(&json)? == *context,
            None => false,
        };

        if unchanged {
            tracing::debug!(session_id, "Approved context unchanged, history not extended");
        } else {
            tx.execute(
                "INSERT INTO session_history (session_id, context, recorded_at) VALUES (?, ?, ?)",
                (session_id, &context_json, &now),
            )?;
        }

        let session = load_session(&tx, session_id)?
            .ok_or_else(|| anyhow::anyhow!("Session {} vanished during commit", session_id))?;
        tx.commit()?;

        tracing::info!(
            session_id,
            domain = %session.context.domain,
            history_len = session.history.len(),
            "Committed session context"
        );
        Ok(session)
    }

    /// History of approved contexts for a session, oldest first. Unknown
    /// sessions have an empty history.
    pub fn get_history(&self, session_id: &str) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        load_history(&conn, session_id)
    }

    /// All sessions, most recently updated first.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT s.session_id, s.context, s.updated_at,
                    (SELECT COUNT(*) FROM session_history h WHERE h.session_id = s.session_id)
             FROM sessions s ORDER BY s.updated_at DESC, s.session_id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(session_id, context, updated_at, history_len)| {
                let context = parse_context(&context)?;
                Ok::<_, anyhow::Error>(SessionSummary {
                    session_id,
                    domain: context.domain,
                    complexity: context.complexity.as_str().to_string(),
                    intent: context.intent.as_str().to_string(),
                    refined: context.refined,
                    history_len: usize::try_from(history_len).unwrap_or_default(),
                    updated_at: parse_datetime(updated_at),
                })
            })
            .collect()
    }

    /// Delete a session and its history. Returns whether it existed.
    pub fn delete_session(&self, session_id: &str) -> Result<bool> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM session_history WHERE session_id = ?",
            [session_id],
        )?;
        let rows = tx.execute("DELETE FROM sessions WHERE session_id = ?", [session_id])?;
        tx.commit()?;
        Ok(rows > 0)
    }
}

impl SessionStore for Database {
    fn get(&self, session_id: &str) -> Result<Option<Session>> {
        self.get_session(session_id)
    }

    fn put(&self, session_id: &str, context: &ProjectContext) -> Result<Session> {
        self.put_session(session_id, context)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

fn load_session(conn: &Connection, session_id: &str) -> Result<Option<Session>> {
    let row = conn
        .query_row(
            "SELECT context, created_at, updated_at FROM sessions WHERE session_id = ?",
            [session_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((context, created_at, updated_at)) = row else {
        return Ok(None);
    };

    Ok(Some(Session {
        session_id: session_id.to_string(),
        context: parse_context(&context)?,
        history: load_history(conn, session_id)?,
        created_at: parse_datetime(created_at),
        updated_at: parse_datetime(updated_at),
    }))
}

fn load_history(conn: &Connection, session_id: &str) -> Result<Vec<HistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT context, recorded_at FROM session_history WHERE session_id = ? ORDER BY id",
    )?;

    let rows = stmt
        .query_map([session_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(context, recorded_at)| {
            Ok::<_, anyhow::Error>(HistoryEntry {
                context: parse_context(&context)?,
                recorded_at: parse_datetime(recorded_at),
            })
        })
        .collect()
}

fn parse_context(json: &str) -> Result<ProjectContext> {
    serde_json::from_str(json).context("Stored context is not valid JSON")
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
