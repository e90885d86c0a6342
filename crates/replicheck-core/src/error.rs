//! Error Types
//!
//! Every fallible operation in this crate returns [`VerifyError`]. The
//! variants fall into two classes, reported by [`VerifyError::severity`]:
//!
//! - **Consistency**: the replica does not contain what was written to the
//!   source database. This is the signal the verification engine exists to
//!   produce.
//! - **Infrastructure**: the tooling itself failed (missing files, a command
//!   that reported an error, a timeout, SQLite or I/O errors).
//!
//! Callers that alert on replication health should page on the first class
//! and open a ticket on the second.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

fn human(duration: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*duration)
}

/// Result alias used throughout the crate.
pub type VerifyResult<T> = Result<T, VerifyError>;

/// Alert class of a [`VerifyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// The replica diverged from the source database.
    Consistency,
    /// The verification tooling failed before it could reach a verdict.
    Infrastructure,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Consistency => write!(f, "consistency"),
            Severity::Infrastructure => write!(f, "infrastructure"),
        }
    }
}

/// Errors raised by the command runner, comparator and verification engine.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("database argument is required for {command} command: {reason}")]
    DatabaseRequired { command: String, reason: String },

    #[error("Failed to execute `{command}`; Reason: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Command `{command}` timed out after {}", human(.timeout))]
    CommandTimeout { command: String, timeout: Duration },

    #[error("Failed to create backup at {}: {reason}", .backup.display())]
    BackupFailed { backup: PathBuf, reason: String },

    #[error("Verification failed: sentinel {sentinel} not found in backup {}", .backup.display())]
    VerificationFailed { sentinel: Uuid, backup: PathBuf },

    #[error("File not found: {}", .path.display())]
    FileNotFound { path: PathBuf },

    #[error("LITESTREAM_INSTALL_DIR is set to {}, but that directory does not exist", .path.display())]
    DirectoryNotFound { path: PathBuf },

    #[error("Cannot find the litestream executable at {}", .path.display())]
    ExecutableNotFound { path: PathBuf },

    #[error(
        "platform {platform} is not supported by upstream litestream releases; install litestream following https://litestream.io/install and set `executable`"
    )]
    UnsupportedPlatform { platform: String },

    #[error("Verification of {} was cancelled", .database.display())]
    Cancelled { database: PathBuf },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VerifyError {
    /// Create a command failed error from a rendered command line.
    pub fn command_failed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        VerifyError::CommandFailed {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Create a database required error for the named command.
    pub fn database_required(command: impl Into<String>, reason: impl Into<String>) -> Self {
        VerifyError::DatabaseRequired {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Classify the error for alert routing.
    pub fn severity(&self) -> Severity {
        match self {
            VerifyError::VerificationFailed { .. } => Severity::Consistency,
            _ => Severity::Infrastructure,
        }
    }

    /// True when the error reports a replication inconsistency.
    pub fn is_consistency_failure(&self) -> bool {
        self.severity() == Severity::Consistency
    }
}
