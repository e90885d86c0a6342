//! Running the litestream binary.
//!
//! [`ReplicationTool`] is the narrow capability the verification engine needs
//! from litestream. [`CommandRunner`] implements it by spawning the real
//! binary; tests substitute canned output.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::command::{CommandLine, Flags, ToolCommand};
use crate::config::{Config, ReplicaEnv};
use crate::error::{VerifyError, VerifyResult};
use crate::executable;
use crate::output::{self, Record};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Captured result of one synchronous invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Rendered command line, used in error messages.
    pub command: String,
    /// Exit code, `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Output of a process that exited with status 0.
    pub fn success(command: impl Into<String>, stdout: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Parse stdout as table rows or logfmt lines.
    pub fn records(&self, tabled: bool) -> Vec<Record> {
        if tabled {
            output::parse_table(&self.stdout)
        } else {
            output::parse_logfmt(&self.stdout)
        }
    }

    /// Parse and classify the output.
    ///
    /// A single `level=ERROR` record on stdout or stderr fails with
    /// `CommandFailed` carrying the embedded message; so does a non-zero
    /// exit status.
    pub fn into_records(self, tabled: bool) -> VerifyResult<Vec<Record>> {
        let records = self.records(tabled);
        if !tabled {
            output::check_for_error(&self.command, &records)?;
        }
        output::check_for_error(&self.command, &output::parse_logfmt(&self.stderr))?;

        if !self.is_success() {
            let detail = if self.stderr.trim().is_empty() {
                self.stdout.trim()
            } else {
                self.stderr.trim()
            };
            let reason = match self.exit_code {
                Some(code) => format!("exit status {}: {}", code, detail),
                None => format!("terminated by signal: {}", detail),
            };
            return Err(VerifyError::command_failed(self.command, reason));
        }

        Ok(records)
    }
}

/// The litestream capability consumed by the verification engine.
pub trait ReplicationTool: Send + Sync {
    /// Run a command synchronously and capture its output.
    fn invoke(
        &self,
        command: ToolCommand,
        flags: &Flags,
        database: Option<&Path>,
    ) -> VerifyResult<CommandOutput>;

    /// Restore `database` from its replica into `output`.
    ///
    /// Fails with `CommandFailed` when litestream reports an error. Whether
    /// the file was actually written is checked by the caller. An `-o` in
    /// `flags` is ignored; the restore always targets `output`.
    fn restore(&self, database: &Path, output: &Path, flags: &Flags) -> VerifyResult<()> {
        if let Some(requested) = flags.get("-o") {
            tracing::warn!(
                requested = requested.unwrap_or_default(),
                output = %output.display(),
                "ignoring -o in restore flags"
            );
        }
        let mut flags = Flags::new()
            .with("-o", output.display())
            .merge(flags);
        flags.insert("-o", Some(output.display().to_string()));
        self.invoke(ToolCommand::Restore, &flags, Some(database))?
            .into_records(false)?;
        Ok(())
    }

    /// Databases configured in the litestream config file.
    fn databases(&self, flags: &Flags) -> VerifyResult<Vec<Record>> {
        self.invoke(ToolCommand::Databases, flags, None)?
            .into_records(true)
    }
}

/// Runs the real litestream binary.
pub struct CommandRunner {
    config: Config,
    executable: PathBuf,
}

impl CommandRunner {
    /// Create a runner, resolving the executable from the config and environment.
    pub fn new(config: Config) -> VerifyResult<Self> {
        let executable = executable::resolve(&config)?;
        Ok(Self { config, executable })
    }

    /// Create a runner for an already resolved executable.
    pub fn with_executable(config: Config, executable: impl Into<PathBuf>) -> Self {
        Self {
            config,
            executable: executable.into(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Assemble the command line for `command`.
    pub fn prepare(
        &self,
        command: ToolCommand,
        flags: &Flags,
        database: Option<&Path>,
    ) -> VerifyResult<CommandLine> {
        if command.requires_database() && database.is_none() {
            return Err(VerifyError::database_required(
                command.as_str(),
                format!(
                    "e.g. replicheck {} --database path/to/database.sqlite3",
                    command
                ),
            ));
        }

        let line = CommandLine::prepare(
            &self.executable,
            &self.config.config_path,
            command,
            flags,
            database,
        );
        tracing::debug!(command = %line, "prepared litestream command");
        Ok(line)
    }

    fn build(&self, line: &CommandLine) -> Command {
        let mut cmd = Command::new(&line.program);
        cmd.args(line.argv());
        for (key, value) in ReplicaEnv::from_process(&self.config).iter() {
            cmd.env(key, value);
        }
        cmd
    }

    /// Start continuous replication in the background and return the child.
    ///
    /// The caller owns the child and is responsible for stopping it.
    pub fn replicate_detached(&self, flags: &Flags) -> VerifyResult<Child> {
        let line = self.prepare(ToolCommand::Replicate, flags, None)?;
        let child = self
            .build(&line)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| VerifyError::command_failed(line.to_string(), e.to_string()))?;
        tracing::info!(pid = child.id(), command = %line, "started litestream replication");
        Ok(child)
    }

    /// Run replication in the foreground, forwarding each output line to
    /// `on_line` until the process exits.
    pub fn replicate_foreground<F>(&self, flags: &Flags, mut on_line: F) -> VerifyResult<ExitStatus>
    where
        F: FnMut(&str),
    {
        let line = self.prepare(ToolCommand::Replicate, flags, None)?;
        let mut child = self
            .build(&line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| VerifyError::command_failed(line.to_string(), e.to_string()))?;

        let (tx, rx) = std::sync::mpsc::channel::<String>();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        for output_line in rx {
            tracing::info!(target: "litestream", "{}", output_line);
            on_line(&output_line);
        }
        for reader in readers {
            let _ = reader.join();
        }

        let status = child.wait()?;
        if !status.success() {
            return Err(VerifyError::command_failed(
                line.to_string(),
                format!("replication exited with {}", status),
            ));
        }
        Ok(status)
    }

    /// Restore and return the parsed logfmt records.
    pub fn restore_records(&self, database: &Path, flags: &Flags) -> VerifyResult<Vec<Record>> {
        self.invoke(ToolCommand::Restore, flags, Some(database))?
            .into_records(false)
    }

    pub fn generations(&self, database: &Path, flags: &Flags) -> VerifyResult<Vec<Record>> {
        self.invoke(ToolCommand::Generations, flags, Some(database))?
            .into_records(true)
    }

    pub fn snapshots(&self, database: &Path, flags: &Flags) -> VerifyResult<Vec<Record>> {
        self.invoke(ToolCommand::Snapshots, flags, Some(database))?
            .into_records(true)
    }

    pub fn wal(&self, database: &Path, flags: &Flags) -> VerifyResult<Vec<Record>> {
        self.invoke(ToolCommand::Wal, flags, Some(database))?
            .into_records(true)
    }
}

impl ReplicationTool for CommandRunner {
    fn invoke(
        &self,
        command: ToolCommand,
        flags: &Flags,
        database: Option<&Path>,
    ) -> VerifyResult<CommandOutput> {
        let line = self.prepare(command, flags, database)?;
        let rendered = line.to_string();

        let mut child = self
            .build(&line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| VerifyError::command_failed(rendered.clone(), e.to_string()))?;

        let stdout = child.stdout.take().map(read_to_string_thread);
        let stderr = child.stderr.take().map(read_to_string_thread);

        let status = wait_with_timeout(
            &mut child,
            self.config.verification.command_timeout,
            &rendered,
        )?;

        let collect = |handle: Option<thread::JoinHandle<String>>| {
            handle
                .and_then(|h| h.join().ok())
                .unwrap_or_default()
        };
        let output = CommandOutput {
            command: rendered,
            exit_code: status.code(),
            stdout: collect(stdout).trim_end().to_string(),
            stderr: collect(stderr).trim_end().to_string(),
        };
        tracing::debug!(
            command = %output.command,
            exit_code = ?output.exit_code,
            "litestream command finished"
        );
        Ok(output)
    }
}

fn read_to_string_thread<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = String::new();
        let _ = reader.read_to_string(&mut buffer);
        buffer
    })
}

fn forward_lines<R: Read + Send + 'static>(
    reader: R,
    tx: std::sync::mpsc::Sender<String>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(reader).lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    })
}

/// Wait for `child`, killing it once `timeout` has elapsed.
fn wait_with_timeout(
    child: &mut Child,
    timeout: Option<Duration>,
    command: &str,
) -> VerifyResult<ExitStatus> {
    let Some(timeout) = timeout else {
        return Ok(child.wait()?);
    };

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            if let Err(e) = child.kill() {
                tracing::warn!(command = %command, error = %e, "failed to kill timed out command");
            }
            let _ = child.wait();
            return Err(VerifyError::CommandTimeout {
                command: command.to_string(),
                timeout,
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}
