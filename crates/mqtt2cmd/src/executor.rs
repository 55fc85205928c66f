//! Shell command execution for entity actions.
//!
//! Every entity action (switching, querying, setting a VCP value) boils down
//! to running a configured command line. The [`CommandExecutor`] trait is the
//! seam the engine uses, so tests can script outcomes without spawning
//! processes.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Failure modes of a command invocation
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The command ran to completion but exited with a non-zero status
    #[error("command exited with status {code}")]
    NonZeroExit { code: i32, output: String },

    /// The command was killed by a signal before it could exit
    #[error("command terminated by signal")]
    Terminated { output: String },

    /// The shell could not be spawned or its output could not be collected
    #[error("failed to run command: {0}")]
    Spawn(#[source] std::io::Error),

    /// The command did not finish within the configured timeout
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
}

impl CommandError {
    /// Output captured before the command failed, if any
    pub fn output(&self) -> &str {
        match self {
            CommandError::NonZeroExit { output, .. } | CommandError::Terminated { output } => {
                output
            }
            CommandError::Spawn(_) | CommandError::Timeout(_) => "",
        }
    }

    /// Exit code of a command that exited normally with a non-zero status
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            CommandError::NonZeroExit { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Trait for running command lines
///
/// This trait allows for mocking command execution for testing purposes
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a command line and return its combined output
    async fn run(&self, command: &str) -> Result<String, CommandError>;
}

/// Runs commands through `/bin/sh -c`
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    timeout: Duration,
}

impl ShellExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn run(&self, command: &str) -> Result<String, CommandError> {
        debug!(command, "Running command");

        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(CommandError::Spawn)?;

        // Dropping the future on timeout drops the child, which kills it
        let result = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| CommandError::Timeout(self.timeout))?
            .map_err(CommandError::Spawn)?;

        let mut output = String::from_utf8_lossy(&result.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&result.stderr));

        if result.status.success() {
            return Ok(output);
        }

        match result.status.code() {
            Some(code) => Err(CommandError::NonZeroExit { code, output }),
            None => Err(CommandError::Terminated { output }),
        }
    }
}

/// Scripted outcome of a mocked command
#[cfg(test)]
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Success(String),
    Exit(i32),
    SpawnFailure,
}

/// Mock executor for testing
///
/// Commands without a scripted outcome succeed with empty output. Every
/// invocation is recorded in order.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockExecutor {
    outcomes: std::sync::Mutex<std::collections::HashMap<String, MockOutcome>>,
    calls: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcome for every future run of `command`
    pub fn set_outcome(&self, command: &str, outcome: MockOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(command.to_string(), outcome);
    }

    /// All commands run so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of times `command` has been run
    pub fn count(&self, command: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| *c == command)
            .count()
    }
}

#[cfg(test)]
#[async_trait]
impl CommandExecutor for MockExecutor {
    async fn run(&self, command: &str) -> Result<String, CommandError> {
        self.calls.lock().unwrap().push(command.to_string());
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .unwrap_or(MockOutcome::Success(String::new()));

        match outcome {
            MockOutcome::Success(output) => Ok(output),
            MockOutcome::Exit(code) => Err(CommandError::NonZeroExit {
                code,
                output: String::new(),
            }),
            MockOutcome::SpawnFailure => Err(CommandError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "mock spawn failure",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shell_success_captures_output() {
        let executor = ShellExecutor::new(Duration::from_secs(5));
        let output = executor.run("echo hello").await.unwrap();
        assert_eq!(output, "hello\n");
    }

    #[tokio::test]
    async fn test_shell_combines_stderr() {
        let executor = ShellExecutor::new(Duration::from_secs(5));
        let output = executor.run("echo out; echo err 1>&2").await.unwrap();
        assert!(output.contains("out"));
        assert!(output.contains("err"));
    }

    #[tokio::test]
    async fn test_shell_non_zero_exit() {
        let executor = ShellExecutor::new(Duration::from_secs(5));
        let err = executor.run("echo nope; exit 3").await.unwrap_err();
        assert_eq!(err.exit_code(), Some(3));
        assert_eq!(err.output(), "nope\n");
    }

    #[tokio::test]
    async fn test_shell_exit_code_one_is_distinguishable() {
        let executor = ShellExecutor::new(Duration::from_secs(5));
        let err = executor.run("false").await.unwrap_err();
        assert!(matches!(err, CommandError::NonZeroExit { code: 1, .. }));
    }

    #[tokio::test]
    async fn test_shell_timeout() {
        let executor = ShellExecutor::new(Duration::from_millis(100));
        let err = executor.run("sleep 5").await.unwrap_err();
        assert!(matches!(err, CommandError::Timeout(_)));
        assert_eq!(err.exit_code(), None);
    }

    #[tokio::test]
    async fn test_mock_records_calls() {
        let executor = MockExecutor::new();
        executor.set_outcome("query", MockOutcome::Exit(1));

        assert!(executor.run("on").await.is_ok());
        assert_eq!(executor.run("query").await.unwrap_err().exit_code(), Some(1));
        assert_eq!(executor.calls(), vec!["on".to_string(), "query".to_string()]);
        assert_eq!(executor.count("query"), 1);
    }
}
