use std::fmt::{self, Display};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A single external command.
///
/// Arguments are handed to the program as an argv vector and never pass through a shell, so a
/// value that slipped past validation still cannot splice in a second command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SystemCommand {
    program: String,
    args: Vec<String>,
}

/// Captured output of a command that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: String,

    /// Standard error.
    pub stderr: String,
}

/// The ways running a command can fail.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    /// The program could not be started at all.
    #[error("failed to spawn `{command}`: {reason}")]
    Spawn {
        /// The command line.
        command: String,

        /// Why spawning failed.
        reason: String,
    },

    /// The command did not finish within its time budget.
    #[error("`{command}` timed out after {seconds}s")]
    Timeout {
        /// The command line.
        command: String,

        /// The time budget in seconds.
        seconds: u64,
    },

    /// The command ran and exited with a non-zero status.
    #[error("`{command}` exited with status {code}: {stderr}")]
    NonZeroExit {
        /// The command line.
        command: String,

        /// The exit code, `-1` when killed by a signal.
        code: i32,

        /// Captured standard output.
        stdout: String,

        /// Captured standard error.
        stderr: String,
    },
}

/// Runs external commands on behalf of hostwarden.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Runs `command` to completion and returns what it printed.
    async fn execute(&self, command: &SystemCommand) -> Result<CommandOutput, CommandError>;
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SystemCommand {
    /// Creates a command for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The program to run.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The arguments passed to the program.
    pub fn arguments(&self) -> &[String] {
        &self.args
    }
}

impl CommandError {
    /// The command line that failed.
    pub fn command(&self) -> &str {
        match self {
            CommandError::Spawn { command, .. }
            | CommandError::Timeout { command, .. }
            | CommandError::NonZeroExit { command, .. } => command,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for SystemCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
