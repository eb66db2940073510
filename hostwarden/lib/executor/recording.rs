use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CommandError, CommandExecutor, CommandOutput, SystemCommand};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An executor that records commands instead of running them.
///
/// It backs `--dry-run` mode, where hostwarden runs on a machine without firewalld or systemd,
/// and the test suite, where it can be scripted to answer or fail specific commands.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    state: Mutex<RecordingState>,
    delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct RecordingState {
    history: Vec<SystemCommand>,
    failures: Vec<ScriptedFailure>,
    responses: Vec<(String, String)>,
}

#[derive(Debug)]
struct ScriptedFailure {
    pattern: String,
    remaining: Option<usize>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RecordingExecutor {
    /// Creates an executor that succeeds at everything with empty output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every command take `delay` before completing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fails every command whose command line contains `pattern`.
    pub fn fail_when(&self, pattern: impl Into<String>) {
        self.state.lock().failures.push(ScriptedFailure {
            pattern: pattern.into(),
            remaining: None,
        });
    }

    /// Fails the next command whose command line contains `pattern`, then behaves normally.
    pub fn fail_once_when(&self, pattern: impl Into<String>) {
        self.state.lock().failures.push(ScriptedFailure {
            pattern: pattern.into(),
            remaining: Some(1),
        });
    }

    /// Answers commands whose command line contains `pattern` with `stdout`.
    pub fn respond_with(&self, pattern: impl Into<String>, stdout: impl Into<String>) {
        self.state
            .lock()
            .responses
            .push((pattern.into(), stdout.into()));
    }

    /// Every command executed so far, failed ones included.
    pub fn history(&self) -> Vec<SystemCommand> {
        self.state.lock().history.clone()
    }

    /// The rendered command lines executed so far.
    pub fn command_lines(&self) -> Vec<String> {
        self.state
            .lock()
            .history
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Forgets the recorded history. Scripted failures and responses are kept.
    pub fn clear_history(&self) {
        self.state.lock().history.clear();
    }

    fn record(&self, command: &SystemCommand) -> Result<CommandOutput, CommandError> {
        let command_line = command.to_string();
        let mut state = self.state.lock();
        state.history.push(command.clone());

        let failure = state
            .failures
            .iter_mut()
            .find(|f| f.remaining != Some(0) && command_line.contains(&f.pattern));

        if let Some(failure) = failure {
            if let Some(remaining) = failure.remaining.as_mut() {
                *remaining -= 1;
            }

            return Err(CommandError::NonZeroExit {
                command: command_line,
                code: 1,
                stdout: String::new(),
                stderr: "scripted failure".to_string(),
            });
        }

        let stdout = state
            .responses
            .iter()
            .find(|(pattern, _)| command_line.contains(pattern.as_str()))
            .map(|(_, stdout)| stdout.clone())
            .unwrap_or_default();

        Ok(CommandOutput {
            stdout,
            stderr: String::new(),
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(&self, command: &SystemCommand) -> Result<CommandOutput, CommandError> {
        tracing::debug!(command = %command, "recording command");

        let result = self.record(command);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        result
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
