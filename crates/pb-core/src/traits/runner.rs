//! Command execution traits
//!
//! Every external program the orchestrator touches (git, node, package
//! managers, lsof/netstat, kill/taskkill) goes through `CommandRunner`, so
//! tests can swap in a scripted fake.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::RunnerError;

/// A program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
    /// Maximum run time for `run`
    pub timeout: Duration,
    /// File that receives stdout/stderr for spawned processes
    pub log_file: Option<PathBuf>,
}

impl CommandSpec {
    /// Create a spec with the default two-minute timeout
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            env: BTreeMap::new(),
            timeout: Duration::from_secs(120),
            log_file: None,
        }
    }

    /// Set the working directory
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set the timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Redirect spawned output to a file
    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Program followed by its arguments, space separated
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command_line())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (`None` when killed by a signal)
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Most useful diagnostic text (stderr, else stdout)
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Handle to a spawned long-running process
#[async_trait]
pub trait ChildHandle: Send {
    /// OS process identifier, if known
    fn id(&self) -> Option<u32>;

    /// Non-blocking exit check; `Ok(Some(code))` once the process has exited
    fn try_wait(&mut self) -> std::io::Result<Option<Option<i32>>>;

    /// Forcefully terminate the process
    async fn kill(&mut self) -> std::io::Result<()>;
}

/// Runs external programs
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a program to completion, bounded by `spec.timeout`
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunnerError>;

    /// Start a program without waiting for it
    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ChildHandle>, RunnerError>;
}
