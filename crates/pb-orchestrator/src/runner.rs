//! Command runner backed by `tokio::process`

use async_trait::async_trait;
use std::fs::OpenOptions;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};

use pb_core::error::RunnerError;
use pb_core::traits::{ChildHandle, CommandOutput, CommandRunner, CommandSpec};

/// Hide console windows for child processes on Windows
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Runs real OS processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(spec: &CommandSpec) -> Result<Command, RunnerError> {
        // Bare names are resolved up front so a missing tool reads as
        // "not found" instead of a raw OS error
        let is_bare = !spec.program.contains('/') && !spec.program.contains('\\');
        if is_bare {
            which::which(&spec.program).map_err(|e| RunnerError::NotStarted {
                program: spec.program.clone(),
                reason: e.to_string(),
            })?;
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args).envs(&spec.env).stdin(Stdio::null());
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        Ok(cmd)
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunnerError> {
        tracing::debug!("Running `{}`", spec);

        let mut cmd = Self::command(spec)?;
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(spec.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(RunnerError::NotStarted {
                    program: spec.program.clone(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(RunnerError::TimedOut {
                    program: spec.program.clone(),
                    secs: spec.timeout.as_secs(),
                })
            }
        };

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!("`{}` exited with {:?}", spec.program, result.code);
        Ok(result)
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ChildHandle>, RunnerError> {
        tracing::debug!("Spawning `{}`", spec);

        let mut cmd = Self::command(spec)?;
        match &spec.log_file {
            Some(path) => {
                let (stdout, stderr) = open_log(path).map_err(|e| RunnerError::NotStarted {
                    program: spec.program.clone(),
                    reason: format!("cannot open log {:?}: {}", path, e),
                })?;
                cmd.stdout(stdout).stderr(stderr);
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let child = cmd.spawn().map_err(|e| RunnerError::NotStarted {
            program: spec.program.clone(),
            reason: e.to_string(),
        })?;

        Ok(Box::new(TokioChild { child }))
    }
}

/// Open `path` for appending twice (stdout and stderr)
fn open_log(path: &Path) -> std::io::Result<(Stdio, Stdio)> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let clone = file.try_clone()?;
    Ok((Stdio::from(file), Stdio::from(clone)))
}

/// A spawned service process
pub struct TokioChild {
    child: Child,
}

#[async_trait]
impl ChildHandle for TokioChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_wait(&mut self) -> std::io::Result<Option<Option<i32>>> {
        Ok(self.child.try_wait()?.map(|status| status.code()))
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }
}
