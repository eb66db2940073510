use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::process::Command;

use super::{CommandError, CommandExecutor, CommandOutput, SystemCommand};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Runs commands as child processes of hostwarden.
///
/// Every invocation is bounded by `timeout`. Once dispatched a command is never cancelled by
/// the caller; when the budget runs out the child is killed and the call reports
/// [`CommandError::Timeout`].
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    timeout: Duration,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ProcessExecutor {
    /// Creates an executor whose commands may run for at most `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, command: &SystemCommand) -> Result<CommandOutput, CommandError> {
        let command_line = command.to_string();
        tracing::debug!(command = %command_line, "running command");

        let child = Command::new(command.program())
            .args(command.arguments())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CommandError::Spawn {
                command: command_line.clone(),
                reason: e.to_string(),
            })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(CommandError::Spawn {
                    command: command_line,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                tracing::warn!(command = %command_line, "command timed out");
                return Err(CommandError::Timeout {
                    command: command_line,
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(CommandError::NonZeroExit {
                command: command_line,
                code: output.status.code().unwrap_or(-1),
                stdout,
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
