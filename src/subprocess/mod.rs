//! Subprocess abstraction for tool CLIs (kubectl).
//!
//! A small trait seam so adapters can be exercised in tests with a mock
//! runner instead of spawning real processes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

impl ProcessCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            timeout: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Timeout,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("'{program}' timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError>;
}

/// Runs commands via tokio's process machinery.
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        debug!(program = %command.program, args = ?command.args, "Spawning process");

        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: command.program.clone(),
            source,
        })?;

        let output = match command.timeout {
            Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_| ProcessError::Timeout {
                    program: command.program.clone(),
                    timeout,
                })??,
            None => child.wait_with_output().await?,
        };

        let status = if output.status.success() {
            ExitStatus::Success
        } else {
            ExitStatus::Error(output.status.code().unwrap_or(-1))
        };

        Ok(ProcessOutput {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: start.elapsed(),
        })
    }
}

/// Mock runner for tests: records commands, replays queued outputs.
#[derive(Default)]
pub struct MockProcessRunner {
    commands: std::sync::Mutex<Vec<ProcessCommand>>,
    responses: std::sync::Mutex<std::collections::VecDeque<ProcessOutput>>,
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, output: ProcessOutput) {
        self.responses.lock().unwrap().push_back(output);
    }

    pub fn enqueue_stdout(&self, stdout: &str) {
        self.enqueue(ProcessOutput {
            status: ExitStatus::Success,
            stdout: stdout.to_string(),
            stderr: String::new(),
            duration: Duration::from_millis(1),
        });
    }

    pub fn recorded_commands(&self) -> Vec<ProcessCommand> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        self.commands.lock().unwrap().push(command);
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ProcessOutput {
                status: ExitStatus::Success,
                stdout: String::new(),
                stderr: String::new(),
                duration: Duration::from_millis(1),
            }))
    }
}
