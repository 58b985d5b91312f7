//! SQLite schema for the investigation repository.

use rusqlite::Connection;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Create tables and indexes.
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS investigations (
            id          TEXT PRIMARY KEY,
            status      TEXT NOT NULL,
            intent      TEXT NOT NULL,
            started_at  TEXT NOT NULL,
            result      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_investigations_status
            ON investigations(status);

        CREATE TABLE IF NOT EXISTS schema_meta (
            key   TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );
        ",
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('version', ?1)",
        [SCHEMA_VERSION],
    )?;
    Ok(())
}

/// Whether the schema is present.
pub fn is_initialized(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT name FROM sqlite_master WHERE type='table' AND name='investigations'",
        [],
        |_| Ok(()),
    )
    .is_ok()
}
