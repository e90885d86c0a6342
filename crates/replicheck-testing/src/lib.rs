//! # Replicheck Testing
//!
//! Test doubles and fixtures for exercising the verification engine without
//! a litestream binary or a real replica.
//!
//! ```rust
//! use replicheck_core::{Flags, VerificationConfig, VerificationEngine, VerificationOutcome};
//! use replicheck_testing::{MockReplicationTool, TestDatabase};
//! use std::time::Duration;
//!
//! let db = TestDatabase::with_tables(&["users"]);
//! let options = VerificationConfig {
//!     replication_wait: Duration::ZERO,
//!     ..VerificationConfig::default()
//! };
//! let engine = VerificationEngine::new(MockReplicationTool::new(), options);
//!
//! let outcome = engine.verify(db.path(), &Flags::new()).unwrap();
//! assert!(matches!(outcome, VerificationOutcome::Consistent { .. }));
//! assert_eq!(db.sentinel_rows(), 0);
//! ```

/// SQLite databases for tests
pub mod fixtures;
/// Mock litestream
pub mod mock;

pub use fixtures::{TestDatabase, create_database, sentinel_rows};
pub use mock::{MockReplicationTool, RestoreBehavior};
