use crate::core::error::BoardError;
use crate::core::schemas;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::time::Duration;

const BUSY_TIMEOUT_SECS: u64 = 5;

pub fn db_connect(db_path: &Path) -> Result<Connection, BoardError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

pub fn db_connect_in_memory() -> Result<Connection, BoardError> {
    let conn = Connection::open_in_memory()?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

pub fn ensure_schema(conn: &Connection) -> Result<(), BoardError> {
    for stmt in schemas::INDEX_DB_SCHEMA {
        conn.execute(stmt, [])?;
    }
    let version: Option<String> = conn
        .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| {
            row.get(0)
        })
        .optional()?;
    match version {
        None => {
            conn.execute(
                "INSERT OR IGNORE INTO meta(key, value) VALUES('schema_version', ?1)",
                params![schemas::INDEX_SCHEMA_VERSION.to_string()],
            )?;
        }
        Some(v) if v != schemas::INDEX_SCHEMA_VERSION.to_string() => {
            return Err(BoardError::ValidationError(format!(
                "board.db schema version {} is not supported (expected {})",
                v,
                schemas::INDEX_SCHEMA_VERSION
            )));
        }
        Some(_) => {}
    }
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES('applied_sequence', '0')",
        [],
    )?;
    Ok(())
}
