//! Service launcher and child supervision
//!
//! `ServiceLauncher::launch` starts the managed service unless its port is
//! already taken. Liveness is optimistic: a process that survives the grace
//! period counts as started. With `confirm_port_open` the launcher also
//! waits for the port to open.
//!
//! # Supervision
//!
//! The spawned child is kept in a `Supervisor` slot and its PID written to
//! the PID file. A watcher task polls the child and clears the slot when
//! the service exits on its own; it stops when the supervisor is told to.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use pb_core::config::{ServiceConfig, TimeoutConfig};
use pb_core::error::ProcessSpawnError;
use pb_core::pidfile;
use pb_core::traits::{ChildHandle, CommandRunner, CommandSpec};

use crate::platform::Platform;
use crate::ports::is_port_in_use;

/// Poll interval while waiting out the grace period
const GRACE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between watcher checks on a supervised child
const WATCH_INTERVAL: Duration = Duration::from_secs(2);

/// Outcome of a successful launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LaunchResult {
    /// A new process was spawned
    Started { pid: Option<u32> },
    /// The port was already bound; nothing was spawned
    AlreadyRunning,
}

type ChildSlot = Arc<Mutex<Option<Box<dyn ChildHandle>>>>;

/// Holds the handle of the service this process spawned
#[derive(Default)]
pub struct Supervisor {
    child: ChildSlot,
    watcher: Mutex<Option<CancellationToken>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a child handle is currently held
    pub fn is_supervising(&self) -> bool {
        self.child.lock().is_some()
    }

    /// PID of the supervised child
    pub fn pid(&self) -> Option<u32> {
        self.child.lock().as_ref().and_then(|c| c.id())
    }

    /// Take ownership of `child` and start watching it
    pub fn adopt(&self, child: Box<dyn ChildHandle>, pid_path: PathBuf) {
        self.cancel_watcher();
        *self.child.lock() = Some(child);

        let token = CancellationToken::new();
        *self.watcher.lock() = Some(token.clone());
        let slot = Arc::clone(&self.child);

        // Outside a runtime the slot is still held, just not watched
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(watch_child(slot, pid_path, token));
        }
    }

    /// Stop watching and kill the supervised child; returns its PID if one was held
    pub async fn stop(&self) -> Option<u32> {
        self.cancel_watcher();
        let child = self.child.lock().take();
        let mut child = child?;
        let pid = child.id();
        match child.try_wait() {
            Ok(Some(_)) => tracing::debug!("Supervised child {:?} had already exited", pid),
            _ => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill supervised child {:?}: {}", pid, e);
                } else {
                    tracing::info!("Stopped supervised child {:?}", pid);
                }
            }
        }
        pid
    }

    fn cancel_watcher(&self) {
        if let Some(token) = self.watcher.lock().take() {
            token.cancel();
        }
    }
}

/// Clear the slot once the supervised child exits
async fn watch_child(slot: ChildSlot, pid_path: PathBuf, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(WATCH_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let exited = {
                    let mut guard = slot.lock();
                    match guard.as_mut().map(|c| c.try_wait()) {
                        Some(Ok(Some(code))) => {
                            *guard = None;
                            Some(code)
                        }
                        Some(_) => None,
                        // Slot emptied elsewhere
                        None => return,
                    }
                };
                if let Some(code) = exited {
                    tracing::warn!("Managed service exited (code {:?})", code);
                    if let Err(e) = pidfile::remove_pid_file(&pid_path) {
                        tracing::debug!("Failed to remove PID file: {}", e);
                    }
                    return;
                }
            }
            _ = cancel.cancelled() => return,
        }
    }
}

/// Starts the managed service
pub struct ServiceLauncher {
    service: ServiceConfig,
    timeouts: TimeoutConfig,
    runner: Arc<dyn CommandRunner>,
    platform: Arc<dyn Platform>,
    supervisor: Arc<Supervisor>,
    pid_path: PathBuf,
    log_path: PathBuf,
}

impl ServiceLauncher {
    pub fn new(
        service: ServiceConfig,
        timeouts: TimeoutConfig,
        runner: Arc<dyn CommandRunner>,
        platform: Arc<dyn Platform>,
        supervisor: Arc<Supervisor>,
        pid_path: PathBuf,
        log_path: PathBuf,
    ) -> Self {
        Self {
            service,
            timeouts,
            runner,
            platform,
            supervisor,
            pid_path,
            log_path,
        }
    }

    /// Start the service in `target` unless the port is already taken
    pub async fn launch(&self, target: &Path) -> Result<LaunchResult, ProcessSpawnError> {
        let port = self.service.port;
        if is_port_in_use(port) {
            tracing::info!("Port {} already in use, treating service as running", port);
            return Ok(LaunchResult::AlreadyRunning);
        }

        self.pull_latest(target).await;

        let spec = self.start_spec(target)?;
        let command = spec.command_line();
        tracing::info!("Starting service: {} (in {:?})", command, target);
        let mut child = self
            .runner
            .spawn(&spec)
            .map_err(|e| ProcessSpawnError::Spawn {
                command: command.clone(),
                reason: e.to_string(),
            })?;

        if let Some(code) = self.wait_grace(child.as_mut()).await {
            tracing::error!("Service exited during startup with {:?}", code);
            return Err(ProcessSpawnError::ExitedEarly { code });
        }

        if self.service.confirm_port_open && !self.wait_port_open(port).await {
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill unresponsive service: {}", e);
            }
            return Err(ProcessSpawnError::NotListening(port));
        }

        let pid = child.id();
        if let Some(pid) = pid {
            if let Err(e) = pidfile::write_pid_file(&self.pid_path, pid) {
                tracing::warn!("Failed to write PID file {:?}: {}", self.pid_path, e);
            }
        }
        self.supervisor.adopt(child, self.pid_path.clone());

        tracing::info!("Service started (pid {:?})", pid);
        Ok(LaunchResult::Started { pid })
    }

    /// Best-effort `git pull` of the configured branch
    async fn pull_latest(&self, target: &Path) {
        let spec = CommandSpec::new(
            self.platform.executable("git"),
            [
                "-C".to_string(),
                target.to_string_lossy().into_owned(),
                "pull".to_string(),
                "--ff-only".to_string(),
                "origin".to_string(),
                self.service.branch.clone(),
            ],
        )
        .timeout(self.timeouts.command);

        match self.runner.run(&spec).await {
            Ok(out) if out.success() => tracing::debug!("Source updated"),
            Ok(out) => tracing::warn!("Source update failed, continuing: {}", out.diagnostic()),
            Err(e) => tracing::warn!("Source update failed, continuing: {}", e),
        }
    }

    fn start_spec(&self, target: &Path) -> Result<CommandSpec, ProcessSpawnError> {
        let (program, args) = match self.service.start_command.split_first() {
            Some(parts) => parts,
            None => {
                return Err(ProcessSpawnError::Spawn {
                    command: String::new(),
                    reason: "start command is empty".to_string(),
                })
            }
        };

        Ok(
            CommandSpec::new(self.platform.executable(program), args.iter().cloned())
                .current_dir(target)
                .env("PORT", self.service.port.to_string())
                .log_file(&self.log_path),
        )
    }

    /// Returns the exit code if the child dies within the grace period
    async fn wait_grace(&self, child: &mut dyn ChildHandle) -> Option<Option<i32>> {
        let deadline = Instant::now() + self.timeouts.launch_grace;
        loop {
            match child.try_wait() {
                Ok(Some(code)) => return Some(code),
                Ok(None) => {}
                Err(e) => tracing::debug!("try_wait failed during grace period: {}", e),
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            tokio::time::sleep(GRACE_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn wait_port_open(&self, port: u16) -> bool {
        let deadline = Instant::now() + self.timeouts.launch_grace;
        loop {
            if is_port_in_use(port) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(GRACE_POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}
