use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use replicheck_core::VerificationStrategy;

mod commands;

use commands::{exit_code_for, run_command};

#[derive(Parser, Debug)]
#[command(name = "replicheck", version)]
#[command(about = "Replicheck - Litestream replication and backup verification")]
struct Cli {
    /// YAML configuration file; REPLICHECK_* variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log at debug level
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replicate the configured databases continuously
    Replicate {
        /// Start litestream in the background and print its pid
        #[arg(long)]
        detached: bool,
        /// Extra litestream flags, after `--`
        #[arg(last = true)]
        flags: Vec<String>,
    },
    /// Restore a database from its replica
    Restore {
        /// Database to restore (default: configured database_path)
        #[arg(long)]
        database: Option<PathBuf>,
        /// Restore into `<name>-<YYYYMMDDHHMMSS>.<ext>` next to the database
        #[arg(long)]
        timestamped: bool,
        #[arg(last = true)]
        flags: Vec<String>,
    },
    /// List databases in the litestream configuration
    Databases {
        #[arg(last = true)]
        flags: Vec<String>,
    },
    /// List generations of a database
    Generations {
        #[arg(long)]
        database: Option<PathBuf>,
        #[arg(last = true)]
        flags: Vec<String>,
    },
    /// List snapshots of a database
    Snapshots {
        #[arg(long)]
        database: Option<PathBuf>,
        #[arg(last = true)]
        flags: Vec<String>,
    },
    /// List WAL files of a database
    Wal {
        #[arg(long)]
        database: Option<PathBuf>,
        #[arg(last = true)]
        flags: Vec<String>,
    },
    /// Check that a database's latest write reaches its replica
    Verify {
        #[arg(long)]
        database: Option<PathBuf>,
        /// sentinel or diff
        #[arg(long)]
        strategy: Option<VerificationStrategy>,
        /// Time to let replication ship the sentinel, e.g. `10s`
        #[arg(long, value_parser = humantime::parse_duration)]
        wait: Option<Duration>,
        /// Extra flags for `litestream restore`
        #[arg(last = true)]
        flags: Vec<String>,
    },
    /// Verify every database in the litestream configuration
    VerifyAll {
        #[arg(long, value_parser = humantime::parse_duration)]
        wait: Option<Duration>,
        #[arg(last = true)]
        flags: Vec<String>,
    },
    /// Print LITESTREAM_* variables for the current configuration
    Env,
}

fn main() {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = match default_level.parse() {
        Ok(directive) => env_filter.add_directive(directive),
        Err(_) => env_filter,
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .json()
        .try_init();

    match run_command(cli) {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = %e, severity = %e.severity(), "command failed");
            std::process::exit(exit_code_for(&e));
        }
    }
}
