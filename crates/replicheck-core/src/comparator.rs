//! Structural comparison of a database and its restored copy.

use std::path::Path;

use rusqlite::{Connection, OpenFlags};
use serde::Serialize;

use crate::error::{VerifyError, VerifyResult};

/// A value measured on the original database and on its restored copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Measure {
    pub original: u64,
    pub restored: u64,
}

impl Measure {
    pub fn matches(&self) -> bool {
        self.original == self.restored
    }
}

/// Result of [`BackupComparator::compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackupDiff {
    pub tables: Measure,
    pub size: Measure,
}

/// How a restored copy's schema differs from the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Divergence {
    MissingTables(u64),
    ExtraTables(u64),
}

impl BackupDiff {
    /// Classify the table count difference, if any.
    ///
    /// File size is not part of the verdict: a restored copy is rebuilt from
    /// snapshots and WAL and is rarely byte-identical to the source.
    pub fn divergence(&self) -> Option<Divergence> {
        let Measure { original, restored } = self.tables;
        if restored < original {
            Some(Divergence::MissingTables(original - restored))
        } else if restored > original {
            Some(Divergence::ExtraTables(restored - original))
        } else {
            None
        }
    }
}

/// Reads schema facts from SQLite files without modifying them.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackupComparator;

impl BackupComparator {
    pub fn new() -> Self {
        Self
    }

    /// Compare table counts and file sizes of `original` and `restored`.
    pub fn compare(&self, original: &Path, restored: &Path) -> VerifyResult<BackupDiff> {
        let (original_tables, original_size) = Self::inspect(original)?;
        let (restored_tables, restored_size) = Self::inspect(restored)?;

        Ok(BackupDiff {
            tables: Measure {
                original: original_tables,
                restored: restored_tables,
            },
            size: Measure {
                original: original_size,
                restored: restored_size,
            },
        })
    }

    fn inspect(path: &Path) -> VerifyResult<(u64, u64)> {
        let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VerifyError::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => VerifyError::Io(e),
        })?;

        let conn = open_read_only(path)?;
        let tables = count_tables(&conn)?;
        Ok((tables, metadata.len()))
    }
}

/// Open an existing database without write access.
pub(crate) fn open_read_only(path: &Path) -> VerifyResult<Connection> {
    if !path.exists() {
        return Err(VerifyError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    Ok(conn)
}

fn count_tables(conn: &Connection) -> VerifyResult<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
        [],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}
