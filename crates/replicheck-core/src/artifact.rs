//! Restored backup files.
//!
//! A restore writes `<dir>/<base>-<YYYYMMDDHHMMSS>.<ext>` next to the source
//! database. SQLite may create sidecar files (`-wal`, `-shm`, `-journal`)
//! sharing that path as a prefix; removing an artifact removes those too.
//! When that name is already taken, a counter is appended to the timestamp
//! (`<base>-<YYYYMMDDHHMMSS>-1.<ext>`) so an existing file is never reused.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::command::Flags;
use crate::error::{VerifyError, VerifyResult};
use crate::runner::ReplicationTool;

/// Timestamped sibling path for a restored copy of `database`.
pub fn backup_path_for(database: &Path, now: DateTime<Utc>) -> PathBuf {
    sibling_path(database, &now.format("%Y%m%d%H%M%S").to_string())
}

/// Like [`backup_path_for`], but never a path that already exists or that
/// another file uses as a prefix.
pub fn unused_backup_path(database: &Path, now: DateTime<Utc>) -> PathBuf {
    let stamp = now.format("%Y%m%d%H%M%S").to_string();
    let mut candidate = sibling_path(database, &stamp);
    let mut counter: u32 = 0;
    while is_taken(&candidate) {
        counter += 1;
        candidate = sibling_path(database, &format!("{}-{}", stamp, counter));
    }
    candidate
}

fn sibling_path(database: &Path, suffix: &str) -> PathBuf {
    let dir = database.parent().unwrap_or_else(|| Path::new(""));
    let base = database
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let file_name = match database.extension() {
        Some(ext) => format!("{}-{}.{}", base, suffix, ext.to_string_lossy()),
        None => format!("{}-{}", base, suffix),
    };
    dir.join(file_name)
}

fn is_taken(path: &Path) -> bool {
    if path.exists() {
        return true;
    }
    let Some(prefix) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return false;
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::read_dir(dir).is_ok_and(|entries| {
        entries
            .flatten()
            .any(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
    })
}

/// Remove `path` and every sibling whose file name starts with its file name.
///
/// Best effort: failures are logged and counted, never returned. Returns the
/// number of files removed.
pub fn remove_with_sidecars(path: &Path) -> usize {
    let Some(prefix) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return 0;
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to list backup directory");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().starts_with(&prefix) {
            continue;
        }
        let target = entry.path();
        if !target.is_file() {
            continue;
        }
        match std::fs::remove_file(&target) {
            Ok(()) => {
                tracing::debug!(file = %target.display(), "removed backup file");
                removed += 1;
            }
            Err(e) => {
                tracing::warn!(file = %target.display(), error = %e, "failed to remove backup file")
            }
        }
    }
    removed
}

/// Restore `database` into a timestamped sibling and return its path.
///
/// The restored copy is kept; the caller owns it.
pub fn restore_to_timestamped_copy<T>(
    tool: &T,
    database: &Path,
    flags: &Flags,
) -> VerifyResult<PathBuf>
where
    T: ReplicationTool + ?Sized,
{
    let backup = unused_backup_path(database, Utc::now());
    tool.restore(database, &backup, flags)?;

    if !backup.exists() {
        return Err(VerifyError::BackupFailed {
            backup,
            reason: "restore reported success but wrote no file".to_string(),
        });
    }
    tracing::info!(database = %database.display(), backup = %backup.display(), "restored database");
    Ok(backup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn test_backup_path_for() {
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 11, 10, 58).unwrap();
        let path = backup_path_for(Path::new("db/test.sqlite3"), now);
        assert_eq!(path, PathBuf::from("db/test-20240701111058.sqlite3"));
    }

    #[test]
    fn test_backup_path_without_extension() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let path = backup_path_for(Path::new("/var/data/app"), now);
        assert_eq!(path, PathBuf::from("/var/data/app-20240102030405"));
    }

    #[test]
    fn test_backup_path_in_current_directory() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let path = backup_path_for(Path::new("test.db"), now);
        assert_eq!(path, PathBuf::from("test-20240102030405.db"));
    }

    #[test]
    fn test_unused_backup_path_skips_existing_files() {
        let dir = tempdir().unwrap();
        let database = dir.path().join("test.sqlite3");
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 11, 10, 58).unwrap();

        assert_eq!(
            unused_backup_path(&database, now),
            dir.path().join("test-20240701111058.sqlite3")
        );

        std::fs::write(dir.path().join("test-20240701111058.sqlite3"), b"kept").unwrap();
        std::fs::write(dir.path().join("test-20240701111058-1.sqlite3-wal"), b"").unwrap();

        assert_eq!(
            unused_backup_path(&database, now),
            dir.path().join("test-20240701111058-2.sqlite3")
        );
    }

    #[test]
    fn test_remove_with_sidecars() {
        let dir = tempdir().unwrap();
        let backup = dir.path().join("test-20240101000000.sqlite3");
        for suffix in ["", "-wal", "-shm", "-journal"] {
            std::fs::write(format!("{}{}", backup.display(), suffix), b"x").unwrap();
        }
        let source = dir.path().join("test.sqlite3");
        std::fs::write(&source, b"source").unwrap();

        assert_eq!(remove_with_sidecars(&backup), 4);
        assert!(!backup.exists());
        assert!(source.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_remove_with_sidecars_nothing_to_remove() {
        let dir = tempdir().unwrap();
        assert_eq!(remove_with_sidecars(&dir.path().join("absent.sqlite3")), 0);
    }
}
