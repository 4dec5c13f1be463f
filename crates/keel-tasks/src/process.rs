//! Subprocess execution for command-driven tasks

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::reporter::{TaskEvent, TaskReporter};
use crate::task::{TaskFailure, TaskName};

/// Lines of stderr kept in a failure message
const STDERR_TAIL_LINES: usize = 20;

/// Captured output of a finished command
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A shell command line with its working directory and environment
#[derive(Debug, Clone)]
pub struct ShellCommand {
    command: String,
    cwd: PathBuf,
    env: Vec<(OsString, OsString)>,
    timeout: Option<Duration>,
}

impl ShellCommand {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            env: Vec::new(),
            timeout: None,
        }
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<OsString>,
        V: Into<OsString>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    fn build(&self) -> Command {
        let mut cmd = if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C");
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c");
            cmd
        };
        cmd.arg(&self.command)
            .current_dir(&self.cwd)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run the command, streaming every output line to `reporter`.
    ///
    /// The child is killed when the timeout elapses or `cancel` fires.
    pub async fn run(
        &self,
        task: &TaskName,
        reporter: &dyn TaskReporter,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, TaskFailure> {
        debug!(task = %task, command = %self.command, cwd = %self.cwd.display(), "spawning command");

        let mut child = self.build().spawn().map_err(|source| TaskFailure::Spawn {
            command: self.command.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let finished = {
            let run = async {
                let (out, err) = tokio::join!(
                    read_lines(task, stdout, false, reporter),
                    read_lines(task, stderr, true, reporter),
                );
                let status = child.wait().await;
                (out, err, status)
            };

            tokio::select! {
                result = run => Ok(result),
                _ = deadline(self.timeout) => Err(self.timeout.map(TaskFailure::Timeout)),
                _ = cancel.cancelled() => Err(Some(TaskFailure::Cancelled)),
            }
        };

        let (stdout_lines, stderr_lines, status) = match finished {
            Ok(result) => result,
            Err(failure) => {
                warn!(task = %task, "killing command");
                if let Err(e) = child.kill().await {
                    warn!(task = %task, error = %e, "failed to kill command");
                }
                return Err(failure.unwrap_or(TaskFailure::Cancelled));
            }
        };

        let status = status?;
        if status.success() {
            Ok(ProcessOutput {
                stdout: stdout_lines.join("\n"),
                stderr: stderr_lines.join("\n"),
            })
        } else {
            let tail_start = stderr_lines.len().saturating_sub(STDERR_TAIL_LINES);
            Err(TaskFailure::CommandFailed {
                code: status.code(),
                stderr: stderr_lines[tail_start..].join("\n"),
            })
        }
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

async fn read_lines<R: AsyncRead + Unpin>(
    task: &TaskName,
    source: Option<R>,
    is_stderr: bool,
    reporter: &dyn TaskReporter,
) -> Vec<String> {
    let mut collected = Vec::new();
    let Some(source) = source else {
        return collected;
    };
    let mut lines = BufReader::new(source).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        reporter.report(&TaskEvent::Output {
            task: task.clone(),
            line: line.clone(),
            is_stderr,
        });
        collected.push(line);
    }
    collected
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::reporter::CollectingReporter;
    use tempfile::TempDir;

    fn task() -> TaskName {
        TaskName::new(":core:compileJvm")
    }

    #[tokio::test]
    async fn test_run_captures_output() {
        let temp = TempDir::new().unwrap();
        let reporter = CollectingReporter::default();
        let output = ShellCommand::new("echo out; echo err >&2", temp.path())
            .run(&task(), &reporter, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.stdout, "out");
        assert_eq!(output.stderr, "err");
        let streamed = reporter
            .events()
            .iter()
            .filter(|e| matches!(e, TaskEvent::Output { .. }))
            .count();
        assert_eq!(streamed, 2);
    }

    #[tokio::test]
    async fn test_env_and_cwd() {
        let temp = TempDir::new().unwrap();
        let reporter = CollectingReporter::default();
        let output = ShellCommand::new("echo $KEEL_MODULE; pwd", temp.path())
            .env("KEEL_MODULE", "core")
            .run(&task(), &reporter, &CancellationToken::new())
            .await
            .unwrap();

        let mut lines = output.stdout.lines();
        assert_eq!(lines.next(), Some("core"));
        let cwd = PathBuf::from(lines.next().unwrap());
        assert_eq!(cwd.canonicalize().unwrap(), temp.path().canonicalize().unwrap());
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let temp = TempDir::new().unwrap();
        let reporter = CollectingReporter::default();
        let err = ShellCommand::new("echo broken >&2; exit 3", temp.path())
            .run(&task(), &reporter, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            TaskFailure::CommandFailed { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected failure: {}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let temp = TempDir::new().unwrap();
        let reporter = CollectingReporter::default();
        let err = ShellCommand::new("sleep 5", temp.path())
            .timeout(Some(Duration::from_millis(100)))
            .run(&task(), &reporter, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TaskFailure::Timeout(_)));
    }

    #[tokio::test]
    async fn test_cancellation_kills_command() {
        let temp = TempDir::new().unwrap();
        let reporter = CollectingReporter::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = ShellCommand::new("sleep 5", temp.path())
            .run(&task(), &reporter, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskFailure::Cancelled));
    }
}
