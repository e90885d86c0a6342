//! The verification table written into the source database.

use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::error::VerifyResult;

/// Name of the table holding sentinel rows.
pub const SENTINEL_TABLE: &str = "_litestream_verification";

/// A marker row inserted into the source database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sentinel {
    pub id: i64,
    pub uuid: Uuid,
}

/// Create the verification table if it is absent.
pub fn ensure_table(conn: &Connection) -> VerifyResult<()> {
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {SENTINEL_TABLE} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL
            )"
        ),
        [],
    )?;
    Ok(())
}

/// Insert a fresh sentinel row.
pub fn insert(conn: &Connection, uuid: Uuid) -> VerifyResult<Sentinel> {
    conn.execute(
        &format!("INSERT INTO {SENTINEL_TABLE} (uuid) VALUES (?1)"),
        params![uuid.to_string()],
    )?;
    Ok(Sentinel {
        id: conn.last_insert_rowid(),
        uuid,
    })
}

/// Whether a row with `uuid` exists. A database without the table has none.
pub fn contains(conn: &Connection, uuid: Uuid) -> VerifyResult<bool> {
    let table_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params![SENTINEL_TABLE],
        |row| row.get(0),
    )?;
    if !table_exists {
        return Ok(false);
    }

    let found = conn
        .query_row(
            &format!("SELECT id FROM {SENTINEL_TABLE} WHERE uuid = ?1 LIMIT 1"),
            params![uuid.to_string()],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Delete every row with `uuid`, returning the number removed.
pub fn remove(conn: &Connection, uuid: Uuid) -> VerifyResult<usize> {
    let removed = conn.execute(
        &format!("DELETE FROM {SENTINEL_TABLE} WHERE uuid = ?1"),
        params![uuid.to_string()],
    )?;
    Ok(removed)
}
