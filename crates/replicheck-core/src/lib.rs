//! # Replicheck Core
//!
//! Drives the [litestream](https://litestream.io) binary and verifies that
//! SQLite databases really reach their replicas.
//!
//! ## Components
//!
//! - **[CommandRunner]**: builds and runs litestream commands, parsing their
//!   table or logfmt output into [`Record`]s
//! - **[BackupComparator]**: compares table counts and file sizes of a
//!   database and a restored copy
//! - **[VerificationEngine]**: writes a sentinel row, waits for replication,
//!   restores the replica and checks the sentinel arrived, cleaning up on
//!   every path
//! - **[VerificationJob]**: runs the engine over every configured database
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use replicheck_core::{CommandRunner, ConfigBuilder, Flags, VerificationEngine};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigBuilder::from_env()?.build()?;
//!     let options = config.verification.clone();
//!     let engine = VerificationEngine::new(CommandRunner::new(config)?, options);
//!
//!     let outcome = engine.verify(Path::new("db/production.sqlite3"), &Flags::new())?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod command;
pub mod comparator;
pub mod config;
pub mod engine;
pub mod error;
pub mod executable;
pub mod job;
pub mod output;
pub mod runner;
pub mod sentinel;

pub use artifact::{backup_path_for, restore_to_timestamped_copy, unused_backup_path};
pub use command::{CommandLine, Flags, ToolCommand};
pub use comparator::{BackupComparator, BackupDiff, Divergence, Measure};
pub use config::{
    Config, ConfigBuilder, ConfigError, ReplicaEnv, VerificationConfig, VerificationStrategy,
};
pub use engine::{CancelToken, VerificationEngine, VerificationOutcome};
pub use error::{Severity, VerifyError, VerifyResult};
pub use job::{JobReport, VerificationJob};
pub use output::{Record, format_table};
pub use runner::{CommandOutput, CommandRunner, ReplicationTool};
pub use sentinel::SENTINEL_TABLE;
