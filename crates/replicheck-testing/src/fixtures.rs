//! SQLite fixtures for verification tests.

use std::path::{Path, PathBuf};

use replicheck_core::SENTINEL_TABLE;
use rusqlite::{Connection, params};
use tempfile::TempDir;

/// A database file inside its own temporary directory.
///
/// The directory, and everything a test leaves in it, is removed on drop.
pub struct TestDatabase {
    dir: TempDir,
    path: PathBuf,
}

impl TestDatabase {
    /// Create `test.sqlite3` with one `(id, value)` table per name.
    pub fn with_tables(tables: &[&str]) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("test.sqlite3");
        create_database(&path, tables);
        Self { dir, path }
    }

    /// A database of exactly five 4096-byte pages: the schema page, two
    /// tables and two indexes.
    pub fn twenty_kib() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("test.sqlite3");

        let conn = Connection::open(&path).expect("failed to open database");
        conn.execute_batch(
            "PRAGMA page_size = 4096;
             CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL);
             CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER NOT NULL, title TEXT);
             CREATE INDEX idx_users_email ON users (email);
             CREATE INDEX idx_posts_user_id ON posts (user_id);",
        )
        .expect("failed to create schema");
        conn.execute(
            "INSERT INTO users (email) VALUES (?1)",
            params!["someone@example.com"],
        )
        .expect("failed to insert user");

        Self { dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// File names in the database directory, sorted.
    pub fn dir_entries(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.dir.path())
            .expect("failed to list temp dir")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    pub fn sentinel_rows(&self) -> i64 {
        sentinel_rows(&self.path)
    }

    pub fn table_exists(&self, table: &str) -> bool {
        let conn = Connection::open(&self.path).expect("failed to open database");
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table],
            |row| row.get(0),
        )
        .expect("failed to query schema")
    }
}

/// Create a database at `path` with one `(id, value)` table per name.
pub fn create_database(path: &Path, tables: &[&str]) {
    let conn = Connection::open(path).expect("failed to open database");
    for table in tables {
        conn.execute(
            &format!("CREATE TABLE {table} (id INTEGER PRIMARY KEY, value TEXT)"),
            [],
        )
        .expect("failed to create table");
    }
}

/// Rows in the verification table, zero if the table does not exist.
pub fn sentinel_rows(path: &Path) -> i64 {
    let conn = Connection::open(path).expect("failed to open database");
    let exists: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![SENTINEL_TABLE],
            |row| row.get(0),
        )
        .expect("failed to query schema");
    if !exists {
        return 0;
    }
    conn.query_row(&format!("SELECT COUNT(*) FROM {SENTINEL_TABLE}"), [], |row| {
        row.get(0)
    })
    .expect("failed to count sentinel rows")
}
