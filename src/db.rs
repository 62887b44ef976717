use std::path::Path;

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

pub fn open(path: &Path) -> Result<Connection> {
    info!("opening database at {}", path.display());
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;

    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    migrate(&conn)?;
    Ok(conn)
}

/// Run database migrations. Exposed for tests that use in-memory DBs.
pub(crate) fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Prompt cards, kept in library order
        CREATE TABLE IF NOT EXISTS prompts (
            id          TEXT PRIMARY KEY,
            position    INTEGER NOT NULL,
            content     TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            category    TEXT NOT NULL DEFAULT '',
            tags        TEXT NOT NULL DEFAULT '[]',
            created_at  TEXT NOT NULL,
            parent_id   TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_prompts_position ON prompts(position);

        -- Favorites, in the order they were marked
        CREATE TABLE IF NOT EXISTS favorites (
            prompt_id   TEXT PRIMARY KEY REFERENCES prompts(id) ON DELETE CASCADE,
            position    INTEGER NOT NULL
        );

        -- Generation settings and sealed secrets
        CREATE TABLE IF NOT EXISTS settings (
            key         TEXT PRIMARY KEY,
            value       TEXT NOT NULL,
            updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}

/// Creates an in-memory database with migrations applied. Use in tests.
#[cfg(test)]
pub(crate) fn test_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
    migrate(&conn).unwrap();
    conn
}
