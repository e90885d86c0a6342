//! Litestream command lines.
//!
//! A [`CommandLine`] is the fully assembled argument vector for one
//! invocation: `<exe> <command> --config <path> [flags...] [database]`.

use std::fmt;
use std::path::{Path, PathBuf};

/// Subcommands of the litestream binary that this crate drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolCommand {
    Replicate,
    Restore,
    Databases,
    Generations,
    Snapshots,
    Wal,
}

impl ToolCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCommand::Replicate => "replicate",
            ToolCommand::Restore => "restore",
            ToolCommand::Databases => "databases",
            ToolCommand::Generations => "generations",
            ToolCommand::Snapshots => "snapshots",
            ToolCommand::Wal => "wal",
        }
    }

    /// Commands that refuse to run without a database argument.
    pub fn requires_database(&self) -> bool {
        matches!(
            self,
            ToolCommand::Restore
                | ToolCommand::Generations
                | ToolCommand::Snapshots
                | ToolCommand::Wal
        )
    }

    /// Whether stdout is a whitespace-aligned table (otherwise logfmt lines).
    pub fn tabled_output(&self) -> bool {
        matches!(
            self,
            ToolCommand::Databases
                | ToolCommand::Generations
                | ToolCommand::Snapshots
                | ToolCommand::Wal
        )
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered flag map. Inserting an existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags {
    entries: Vec<(String, Option<String>)>,
}

impl Flags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a flag that takes a value, e.g. `--parallelism 10`.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, Some(value.to_string()));
        self
    }

    /// Add a boolean flag, e.g. `--if-db-not-exists`.
    pub fn with_switch(mut self, key: impl Into<String>) -> Self {
        self.insert(key, None);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Option<String>) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Merge `other` into `self`; keys in `other` win.
    pub fn merge(mut self, other: &Flags) -> Self {
        for (key, value) in &other.entries {
            self.insert(key.clone(), value.clone());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse trailing CLI arguments such as `--exec cmd --no-expand-env`.
    ///
    /// A token starting with `-` is a key; it takes the following token as
    /// its value unless that token is itself a key.
    pub fn parse_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut flags = Flags::new();
        let mut tokens = args.into_iter().map(Into::into).peekable();
        while let Some(token) = tokens.next() {
            if !token.starts_with('-') {
                tracing::warn!(argument = %token, "ignoring positional argument without a flag");
                continue;
            }
            let value = match tokens.peek() {
                Some(next) if !next.starts_with('-') => tokens.next(),
                _ => None,
            };
            flags.insert(token, value);
        }
        flags
    }

    fn to_args(&self) -> impl Iterator<Item = String> + '_ {
        self.entries
            .iter()
            .flat_map(|(key, value)| std::iter::once(key.clone()).chain(value.clone()))
    }
}

/// A fully assembled invocation of the litestream binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub command: ToolCommand,
    pub args: Vec<String>,
}

impl CommandLine {
    /// Assemble `<program> <command> --config <config_path> [flags...] [database]`.
    pub fn prepare(
        program: &Path,
        config_path: &Path,
        command: ToolCommand,
        flags: &Flags,
        database: Option<&Path>,
    ) -> Self {
        let seeded = Flags::new()
            .with("--config", config_path.display())
            .merge(flags);

        let mut args: Vec<String> = seeded.to_args().collect();
        if let Some(database) = database {
            args.push(database.display().to_string());
        }

        Self {
            program: program.to_path_buf(),
            command,
            args,
        }
    }

    /// Arguments after the program name, beginning with the subcommand.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.command.as_str().to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.program.display(), self.command)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
