//! Subcommand handlers. Each returns the process exit code on success.

use std::path::{Path, PathBuf};

use replicheck_core::{
    CommandRunner, Config, ConfigBuilder, Flags, JobReport, Record, ReplicationTool, Severity,
    VerificationEngine, VerificationJob, VerificationOutcome, VerifyError, VerifyResult,
    format_table, restore_to_timestamped_copy,
};
use serde::Serialize;

use crate::{Cli, Commands};

/// Litestream or the verification tooling failed.
pub const EXIT_INFRASTRUCTURE: i32 = 1;
/// The replica does not match the database.
pub const EXIT_INCONSISTENT: i32 = 2;

pub fn exit_code_for(error: &VerifyError) -> i32 {
    match error.severity() {
        Severity::Consistency => EXIT_INCONSISTENT,
        Severity::Infrastructure => EXIT_INFRASTRUCTURE,
    }
}

/// Read the YAML file if given, then apply `REPLICHECK_*` overrides.
pub fn load_config(path: Option<&Path>) -> VerifyResult<Config> {
    let builder = match path {
        Some(path) => ConfigBuilder::from_file(path)?,
        None => ConfigBuilder::new(),
    };
    Ok(builder.with_env()?.build()?)
}

pub fn run_command(cli: Cli) -> VerifyResult<i32> {
    let config = load_config(cli.config.as_deref())?;
    let json = cli.json;

    match cli.command {
        Commands::Replicate { detached, flags } => {
            let runner = CommandRunner::new(config)?;
            let flags = Flags::parse_args(flags);
            if detached {
                let child = runner.replicate_detached(&flags)?;
                println!("{}", child.id());
            } else {
                runner.replicate_foreground(&flags, |line| println!("{}", line))?;
            }
            Ok(0)
        }
        Commands::Restore {
            database,
            timestamped,
            flags,
        } => {
            let database = database_or_default(database, &config, "restore")?;
            let runner = CommandRunner::new(config)?;
            let flags = Flags::parse_args(flags);
            if timestamped {
                let backup = restore_to_timestamped_copy(&runner, &database, &flags)?;
                println!("{}", backup.display());
            } else {
                print_records(&runner.restore_records(&database, &flags)?, json)?;
            }
            Ok(0)
        }
        Commands::Databases { flags } => {
            let runner = CommandRunner::new(config)?;
            print_records(&runner.databases(&Flags::parse_args(flags))?, json)?;
            Ok(0)
        }
        Commands::Generations { database, flags } => {
            let database = database_or_default(database, &config, "generations")?;
            let runner = CommandRunner::new(config)?;
            print_records(&runner.generations(&database, &Flags::parse_args(flags))?, json)?;
            Ok(0)
        }
        Commands::Snapshots { database, flags } => {
            let database = database_or_default(database, &config, "snapshots")?;
            let runner = CommandRunner::new(config)?;
            print_records(&runner.snapshots(&database, &Flags::parse_args(flags))?, json)?;
            Ok(0)
        }
        Commands::Wal { database, flags } => {
            let database = database_or_default(database, &config, "wal")?;
            let runner = CommandRunner::new(config)?;
            print_records(&runner.wal(&database, &Flags::parse_args(flags))?, json)?;
            Ok(0)
        }
        Commands::Verify {
            database,
            strategy,
            wait,
            flags,
        } => {
            let database = database_or_default(database, &config, "verify")?;
            let mut options = config.verification.clone();
            if let Some(strategy) = strategy {
                options.strategy = strategy;
            }
            if let Some(wait) = wait {
                options.replication_wait = wait;
            }

            let engine = VerificationEngine::new(CommandRunner::new(config)?, options);
            let outcome = engine.verify(&database, &Flags::parse_args(flags))?;
            print_outcome(&database, &outcome, json)?;
            Ok(outcome_exit_code(&outcome))
        }
        Commands::VerifyAll { wait, flags } => {
            let mut options = config.verification.clone();
            if let Some(wait) = wait {
                options.replication_wait = wait;
            }

            let engine = VerificationEngine::new(CommandRunner::new(config)?, options);
            let reports = VerificationJob::new(&engine)
                .with_restore_flags(Flags::parse_args(flags))
                .run()?;
            print_reports(&reports, json)?;
            Ok(reports.iter().map(report_exit_code).max().unwrap_or(0))
        }
        Commands::Env => {
            match config.env_exports() {
                Some(exports) => {
                    for (key, value) in exports {
                        println!("{}={}", key, value);
                    }
                }
                None => {
                    tracing::warn!(
                        "You have not configured replicheck with any values to generate ENV variables"
                    );
                }
            }
            Ok(0)
        }
    }
}

fn database_or_default(
    database: Option<PathBuf>,
    config: &Config,
    command: &str,
) -> VerifyResult<PathBuf> {
    database
        .or_else(|| config.database_path.clone())
        .ok_or_else(|| {
            VerifyError::database_required(
                command,
                format!(
                    "e.g. replicheck {} --database path/to/database.sqlite3",
                    command
                ),
            )
        })
}

/// A diff whose table counts disagree is treated like a missing sentinel.
fn outcome_exit_code(outcome: &VerificationOutcome) -> i32 {
    match outcome {
        VerificationOutcome::Consistent { .. } => 0,
        VerificationOutcome::Diff(diff) if diff.divergence().is_some() => EXIT_INCONSISTENT,
        VerificationOutcome::Diff(_) => 0,
    }
}

fn report_exit_code(report: &JobReport) -> i32 {
    match &report.result {
        Ok(outcome) => outcome_exit_code(outcome),
        Err(e) => exit_code_for(e),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> VerifyResult<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(std::io::Error::from)?;
    println!("{}", rendered);
    Ok(())
}

fn print_records(records: &[Record], json: bool) -> VerifyResult<()> {
    if json {
        return print_json(records);
    }
    let table = format_table(records);
    if !table.is_empty() {
        println!("{}", table);
    }
    Ok(())
}

fn print_outcome(database: &Path, outcome: &VerificationOutcome, json: bool) -> VerifyResult<()> {
    if json {
        return print_json(outcome);
    }
    match outcome {
        VerificationOutcome::Consistent { sentinel } => {
            println!("{}: replica verified (sentinel {})", database.display(), sentinel);
        }
        VerificationOutcome::Diff(diff) => {
            println!(
                "{}: tables {} / {}, size {} / {} bytes (original / restored)",
                database.display(),
                diff.tables.original,
                diff.tables.restored,
                diff.size.original,
                diff.size.restored
            );
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct ReportLine<'a> {
    database: &'a Path,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<&'a VerificationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    severity: Option<String>,
}

fn print_reports(reports: &[JobReport], json: bool) -> VerifyResult<()> {
    if json {
        let lines: Vec<ReportLine<'_>> = reports
            .iter()
            .map(|report| ReportLine {
                database: &report.database,
                outcome: report.result.as_ref().ok(),
                error: report.result.as_ref().err().map(ToString::to_string),
                severity: report
                    .result
                    .as_ref()
                    .err()
                    .map(|e| e.severity().to_string()),
            })
            .collect();
        return print_json(&lines);
    }

    for report in reports {
        match &report.result {
            Ok(outcome) => print_outcome(&report.database, outcome, false)?,
            Err(e) => println!("{}: {} failure: {}", report.database.display(), e.severity(), e),
        }
    }
    Ok(())
}
