//! Database open and schema.

use crate::StoreError;
use rusqlite::Connection;
use std::path::Path;

/// Open (or create) the attendance database and ensure the schema exists.
pub fn open(path: &Path) -> Result<Connection, StoreError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir).map_err(|e| {
                StoreError::Io(format!("failed to create {}: {e}", dir.display()))
            })?;
        }
    }
    let conn = Connection::open(path)?;
    init_schema(&conn)?;
    tracing::info!(path = %path.display(), "attendance database opened");
    Ok(conn)
}

/// In-memory database with the full schema, for tests and diagnostics.
pub fn open_in_memory() -> Result<Connection, StoreError> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    // The UNIQUE(employee_id, date) constraint is the at-most-one-per-day
    // invariant; the ledger's INSERT OR IGNORE rides on it.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS employees (
             id             INTEGER PRIMARY KEY AUTOINCREMENT,
             name           TEXT NOT NULL,
             employee_code  TEXT UNIQUE,
             email          TEXT,
             embedding      BLOB NOT NULL,
             department     TEXT DEFAULT 'General',
             created_at     TIMESTAMP DEFAULT CURRENT_TIMESTAMP
         );
         CREATE TABLE IF NOT EXISTS attendance (
             id           INTEGER PRIMARY KEY AUTOINCREMENT,
             employee_id  INTEGER NOT NULL,
             date         TEXT NOT NULL,
             time         TEXT NOT NULL,
             status       TEXT DEFAULT 'Present',
             UNIQUE (employee_id, date),
             FOREIGN KEY (employee_id) REFERENCES employees (id)
         );",
    )?;
    Ok(())
}
