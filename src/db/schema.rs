//! Versioned schema migrations, tracked in `schema_migrations`.

use std::collections::HashSet;

use anyhow::{Context, Result};
use rusqlite::Connection;

/// One embedded migration script.
struct Migration {
    version: &'static str,
    name: &'static str,
    sql: &'static str,
}

/// Applied in order. Never edit a released entry; append a new one.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "001",
        name: "initial",
        sql: include_str!("migrations/001_initial.sql"),
    },
    Migration {
        version: "002",
        name: "session_recency",
        sql: include_str!("migrations/002_session_recency.sql"),
    },
];

/// Bring `conn` up to the latest schema. Returns how many migrations ran.
pub fn run_migrations(conn: &Connection) -> Result<usize> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )
    .context("Failed to create schema_migrations table")?;

    let applied = applied_versions(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS
        .iter()
        .filter(|m| !applied.contains(m.version))
        .collect();

    if pending.is_empty() {
        tracing::debug!(version = latest_version(), "Session schema is up to date");
        return Ok(0);
    }

    for migration in &pending {
        apply(conn, migration)?;
    }
    Ok(pending.len())
}

fn latest_version() -> &'static str {
    MIGRATIONS.last().map(|m| m.version).unwrap_or("000")
}

fn applied_versions(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations")?;
    let versions = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<HashSet<String>, _>>()?;
    Ok(versions)
}

/// Run the script and record it in the same transaction, so a failed script
/// leaves neither its tables nor a version row behind.
fn apply(conn: &Connection, migration: &Migration) -> Result<()> {
    tracing::info!(
        version = migration.version,
        name = migration.name,
        "Applying schema migration"
    );

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql).with_context(|| {
        format!(
            "Failed to apply migration {} ({})",
            migration.version, migration.name
        )
    })?;
    tx.execute(
        "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)",
        (
            migration.version,
            migration.name,
            chrono::Utc::now().to_rfc3339(),
        ),
    )?;
    tx.commit()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(conn: &Connection, kind: &str, name: &str) -> i32 {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = ? AND name = ?",
            [kind, name],
            |row| row.get(0),
        )
        .unwrap()
    }

    fn versions(conn: &Connection) -> Vec<String> {
        let mut versions: Vec<String> = applied_versions(conn).unwrap().into_iter().collect();
        versions.sort();
        versions
    }

    #[test]
    fn fresh_database_gets_every_migration() {
        let conn = Connection::open_in_memory().unwrap();

        assert_eq!(run_migrations(&conn).unwrap(), MIGRATIONS.len());

        assert_eq!(count(&conn, "table", "sessions"), 1);
        assert_eq!(count(&conn, "table", "session_history"), 1);
        assert_eq!(versions(&conn), vec!["001", "002"]);
    }

    #[test]
    fn second_run_is_a_no_op() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        assert_eq!(run_migrations(&conn).unwrap(), 0);
        assert_eq!(versions(&conn), vec!["001", "002"]);
    }

    #[test]
    fn partially_migrated_database_catches_up() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute_batch(
            "DROP INDEX idx_sessions_updated;
             DELETE FROM schema_migrations WHERE version = '002';",
        )
        .unwrap();

        assert_eq!(run_migrations(&conn).unwrap(), 1);
        assert_eq!(count(&conn, "index", "idx_sessions_updated"), 1);
    }

    #[test]
    fn failed_script_is_not_recorded() {
        let conn = Connection::open_in_memory().unwrap();
        let broken = Migration {
            version: "999",
            name: "broken",
            sql: "CREATE TABLE half (id INTEGER); SELECT * FROM missing_table;",
        };
        run_migrations(&conn).unwrap();

        assert!(apply(&conn, &broken).is_err());
        assert_eq!(count(&conn, "table", "half"), 0);
        assert!(!applied_versions(&conn).unwrap().contains("999"));
    }
}
