//! # Verification Engine
//!
//! Checks that a live database actually reaches its replica:
//!
//! 1. write a sentinel row with a fresh UUID into the source database
//! 2. wait for the replication process to ship it
//! 3. restore the replica into a timestamped sibling file
//! 4. look for the sentinel in the restored copy (or diff the two schemas)
//! 5. remove the sentinel row and the restored files
//!
//! Step 5 runs on every exit path through [`Cleanup`]'s `Drop`, so a failed
//! restore or a cancelled wait never leaves a sentinel row or a backup file
//! behind. Runs against the same database are serialised.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::artifact;
use crate::command::Flags;
use crate::comparator::{self, BackupComparator, BackupDiff};
use crate::config::{VerificationConfig, VerificationStrategy};
use crate::error::{VerifyError, VerifyResult};
use crate::runner::ReplicationTool;
use crate::sentinel;

const SOURCE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Successful result of a verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerificationOutcome {
    /// The sentinel written to the source was found in the restored copy.
    Consistent { sentinel: Uuid },
    /// Structural comparison of source and restored copy. The caller judges it.
    Diff(BackupDiff),
}

/// Interrupts the replication wait of a running verification.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, condvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `duration` unless cancelled first. Returns true if cancelled.
    pub fn wait(&self, duration: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = condvar
            .wait_timeout_while(guard, duration, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Releases everything a verification run acquired.
struct Cleanup {
    database: PathBuf,
    conn: Option<Connection>,
    sentinel: Option<Uuid>,
    backup: Option<PathBuf>,
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Some(uuid) = self.sentinel {
                if let Err(e) = sentinel::remove(&conn, uuid) {
                    tracing::warn!(
                        database = %self.database.display(),
                        sentinel = %uuid,
                        error = %e,
                        "failed to remove sentinel row"
                    );
                }
            }
            if let Err((_, e)) = conn.close() {
                tracing::warn!(database = %self.database.display(), error = %e, "failed to close source database");
            }
        }

        if let Some(backup) = &self.backup {
            artifact::remove_with_sidecars(backup);
        }
    }
}

/// Orchestrates sentinel write, replication wait, restore and comparison.
pub struct VerificationEngine<T> {
    tool: T,
    options: VerificationConfig,
    comparator: BackupComparator,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl<T: ReplicationTool> VerificationEngine<T> {
    pub fn new(tool: T, options: VerificationConfig) -> Self {
        Self {
            tool,
            options,
            comparator: BackupComparator::new(),
            locks: DashMap::new(),
        }
    }

    pub fn tool(&self) -> &T {
        &self.tool
    }

    pub fn options(&self) -> &VerificationConfig {
        &self.options
    }

    /// Verify `database` with the configured wait and strategy.
    pub fn verify(&self, database: &Path, restore_flags: &Flags) -> VerifyResult<VerificationOutcome> {
        self.verify_with_cancel(database, restore_flags, &CancelToken::new())
    }

    /// Verify `database`, returning `Cancelled` if `cancel` fires during the wait.
    pub fn verify_with_cancel(
        &self,
        database: &Path,
        restore_flags: &Flags,
        cancel: &CancelToken,
    ) -> VerifyResult<VerificationOutcome> {
        if !database.is_file() {
            return Err(VerifyError::database_required(
                "verify",
                format!("database {} does not exist", database.display()),
            ));
        }

        let lock = self.lock_for(database)?;
        let _serialised = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let conn = Connection::open(database)?;
        conn.busy_timeout(SOURCE_BUSY_TIMEOUT)?;
        let mut cleanup = Cleanup {
            database: database.to_path_buf(),
            conn: Some(conn),
            sentinel: None,
            backup: None,
        };

        let uuid = Uuid::new_v4();
        cleanup.sentinel = Some(uuid);
        if let Some(conn) = cleanup.conn.as_ref() {
            sentinel::ensure_table(conn)?;
            sentinel::insert(conn, uuid)?;
        }
        tracing::info!(database = %database.display(), sentinel = %uuid, "wrote verification sentinel");

        if cancel.wait(self.options.replication_wait) {
            tracing::info!(database = %database.display(), "verification cancelled");
            return Err(VerifyError::Cancelled {
                database: database.to_path_buf(),
            });
        }

        let backup = artifact::unused_backup_path(database, Utc::now());
        cleanup.backup = Some(backup.clone());
        self.tool.restore(database, &backup, restore_flags)?;
        if !backup.exists() {
            return Err(VerifyError::BackupFailed {
                backup,
                reason: "restore reported success but wrote no file".to_string(),
            });
        }
        tracing::info!(backup = %backup.display(), "restored replica");

        let outcome = match self.options.strategy {
            VerificationStrategy::Sentinel => {
                let found = {
                    let restored = comparator::open_read_only(&backup)?;
                    sentinel::contains(&restored, uuid)?
                };
                if !found {
                    tracing::warn!(
                        database = %database.display(),
                        sentinel = %uuid,
                        "sentinel missing from restored replica"
                    );
                    return Err(VerifyError::VerificationFailed {
                        sentinel: uuid,
                        backup,
                    });
                }
                VerificationOutcome::Consistent { sentinel: uuid }
            }
            VerificationStrategy::Diff => {
                VerificationOutcome::Diff(self.comparator.compare(database, &backup)?)
            }
        };

        tracing::info!(database = %database.display(), "verification finished");
        Ok(outcome)
    }

    fn lock_for(&self, database: &Path) -> VerifyResult<Arc<Mutex<()>>> {
        let key = database.canonicalize()?;
        Ok(self.locks.entry(key).or_default().clone())
    }
}
