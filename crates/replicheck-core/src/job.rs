//! Verify every database litestream is configured to replicate.

use std::path::PathBuf;

use crate::command::Flags;
use crate::engine::{VerificationEngine, VerificationOutcome};
use crate::error::VerifyResult;
use crate::runner::ReplicationTool;

/// Result of verifying one configured database.
#[derive(Debug)]
pub struct JobReport {
    pub database: PathBuf,
    pub result: VerifyResult<VerificationOutcome>,
}

impl JobReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs the engine once per database listed by `litestream databases`.
pub struct VerificationJob<'a, T> {
    engine: &'a VerificationEngine<T>,
    restore_flags: Flags,
}

impl<'a, T: ReplicationTool> VerificationJob<'a, T> {
    pub fn new(engine: &'a VerificationEngine<T>) -> Self {
        Self {
            engine,
            restore_flags: Flags::new(),
        }
    }

    pub fn with_restore_flags(mut self, flags: Flags) -> Self {
        self.restore_flags = flags;
        self
    }

    /// Verify each database in turn.
    ///
    /// Only a failure to list the databases aborts the job; a failed
    /// verification is recorded in its report and the job moves on.
    pub fn run(&self) -> VerifyResult<Vec<JobReport>> {
        let records = self.engine.tool().databases(&Flags::new())?;
        tracing::info!(count = records.len(), "verifying configured databases");

        let mut reports = Vec::with_capacity(records.len());
        for record in records {
            let Some(path) = record.get("path") else {
                tracing::warn!(?record, "skipping database row without a path");
                continue;
            };
            let database = PathBuf::from(path);
            let result = self.engine.verify(&database, &self.restore_flags);
            match &result {
                Ok(_) => tracing::info!(database = %database.display(), "database verified"),
                Err(e) => tracing::error!(
                    database = %database.display(),
                    severity = %e.severity(),
                    error = %e,
                    "database verification failed"
                ),
            }
            reports.push(JobReport { database, result });
        }
        Ok(reports)
    }
}
