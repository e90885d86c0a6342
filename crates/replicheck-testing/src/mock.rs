//! # Mock Replication Tool
//!
//! A [`ReplicationTool`] that never spawns litestream. Restores are simulated
//! on the local filesystem according to a [`RestoreBehavior`], and every
//! invocation is recorded as the command line the real runner would build.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use replicheck_core::{
    CommandLine, CommandOutput, Flags, ReplicationTool, SENTINEL_TABLE, ToolCommand, VerifyError,
    VerifyResult,
};
use rusqlite::Connection;

/// What a simulated `litestream restore` does with its `-o` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreBehavior {
    /// Copy the source database, sentinel included.
    CopySource,
    /// Copy the source database as it was before the sentinel was written.
    CopyWithoutSentinel,
    /// Write a zero-byte file.
    EmptyFile,
    /// Report success without writing anything.
    NoArtifact,
    /// Print a `level=ERROR` line carrying this message.
    Error(String),
    /// Copy the source and leave a `.tmp` file next to the output.
    CopyWithLeftover,
}

/// Predictable stand-in for the litestream binary.
#[derive(Debug, Clone)]
pub struct MockReplicationTool {
    program: PathBuf,
    config_path: PathBuf,
    restore: RestoreBehavior,
    responses: HashMap<ToolCommand, CommandOutput>,
    call_history: Arc<Mutex<Vec<CommandLine>>>,
}

impl Default for MockReplicationTool {
    fn default() -> Self {
        Self::new()
    }
}

impl MockReplicationTool {
    /// A tool whose restores copy the source database.
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("litestream"),
            config_path: PathBuf::from("config/litestream.yml"),
            restore: RestoreBehavior::CopySource,
            responses: HashMap::new(),
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_restore(mut self, behavior: RestoreBehavior) -> Self {
        self.restore = behavior;
        self
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    /// Canned stdout for a non-restore command.
    pub fn with_output(mut self, command: ToolCommand, stdout: impl Into<String>) -> Self {
        let line = CommandLine::prepare(
            &self.program,
            &self.config_path,
            command,
            &Flags::new(),
            None,
        );
        self.responses
            .insert(command, CommandOutput::success(line.to_string(), stdout));
        self
    }

    /// Answer `databases` with a table listing `paths`.
    pub fn with_databases<P: AsRef<Path>>(self, paths: &[P]) -> Self {
        let mut stdout = String::from("path  replicas\n");
        for path in paths {
            stdout.push_str(&format!("{}  s3\n", path.as_ref().display()));
        }
        self.with_output(ToolCommand::Databases, stdout)
    }

    /// Command lines recorded so far, oldest first.
    pub fn call_history(&self) -> Vec<CommandLine> {
        self.call_history.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.call_history.lock().unwrap().len()
    }

    /// Number of recorded invocations of `command`.
    pub fn calls_of(&self, command: ToolCommand) -> usize {
        self.call_history
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.command == command)
            .count()
    }

    pub fn reset(&self) {
        self.call_history.lock().unwrap().clear();
    }

    fn simulate_restore(
        &self,
        line: &CommandLine,
        flags: &Flags,
        database: Option<&Path>,
    ) -> VerifyResult<CommandOutput> {
        let command = line.to_string();
        let (Some(source), Some(Some(output))) = (database, flags.get("-o")) else {
            return Err(VerifyError::database_required(
                command,
                "mock restore needs a database and -o",
            ));
        };
        let output = Path::new(output);

        match &self.restore {
            RestoreBehavior::CopySource => {
                std::fs::copy(source, output)?;
            }
            RestoreBehavior::CopyWithoutSentinel => {
                std::fs::copy(source, output)?;
                let conn = Connection::open(output)?;
                conn.execute(&format!("DROP TABLE IF EXISTS {SENTINEL_TABLE}"), [])?;
            }
            RestoreBehavior::EmptyFile => {
                std::fs::write(output, b"")?;
            }
            RestoreBehavior::NoArtifact => {}
            RestoreBehavior::Error(message) => {
                return Ok(CommandOutput {
                    command,
                    exit_code: Some(1),
                    stdout: format!(
                        "time=2024-07-01T11:10:58Z level=ERROR msg=\"failed to run\" error=\"{}\"\n",
                        message
                    ),
                    stderr: String::new(),
                });
            }
            RestoreBehavior::CopyWithLeftover => {
                std::fs::copy(source, output)?;
                std::fs::write(format!("{}.tmp", output.display()), b"partial")?;
            }
        }

        tracing::debug!(output = %output.display(), behavior = ?self.restore, "simulated restore");
        Ok(CommandOutput::success(command, ""))
    }
}

impl ReplicationTool for MockReplicationTool {
    fn invoke(
        &self,
        command: ToolCommand,
        flags: &Flags,
        database: Option<&Path>,
    ) -> VerifyResult<CommandOutput> {
        let line = CommandLine::prepare(&self.program, &self.config_path, command, flags, database);
        self.call_history.lock().unwrap().push(line.clone());

        if command.requires_database() && database.is_none() {
            return Err(VerifyError::database_required(
                line.to_string(),
                "database argument is required",
            ));
        }

        match command {
            ToolCommand::Restore => self.simulate_restore(&line, flags, database),
            _ => Ok(self
                .responses
                .get(&command)
                .cloned()
                .unwrap_or_else(|| CommandOutput::success(line.to_string(), ""))),
        }
    }
}
