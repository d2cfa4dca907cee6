//! Process/port reconciliation
//!
//! Answers "is the managed port taken?" and, when it is, finds and kills
//! the processes listening on it. Freeing a port always ends with a bounded
//! re-check loop; a port that stays occupied is reported as a
//! `PortConflictError`, never silently ignored.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use pb_core::error::PortConflictError;
use pb_core::traits::CommandRunner;

use crate::platform::Platform;

/// Check whether a local TCP port is bound by someone else
///
/// Binds a throwaway listener on all interfaces, then on loopback, since a
/// service bound only to `127.0.0.1` does not block the wildcard bind on
/// every platform. `AddrInUse` means the port is taken; any other bind
/// failure is logged and treated as free so a permission quirk never blocks
/// a launch.
pub fn is_port_in_use(port: u16) -> bool {
    [Ipv4Addr::UNSPECIFIED, Ipv4Addr::LOCALHOST]
        .into_iter()
        .any(|ip| bind_in_use(ip, port))
}

/// Whether binding `ip:port` fails with `AddrInUse`
fn bind_in_use(ip: Ipv4Addr, port: u16) -> bool {
    match TcpListener::bind(SocketAddrV4::new(ip, port)) {
        Ok(listener) => {
            drop(listener);
            false
        }
        Err(e) if e.kind() == ErrorKind::AddrInUse => true,
        Err(e) => {
            tracing::warn!("Unexpected error binding {}:{}: {}", ip, port, e);
            false
        }
    }
}

/// Result of one kill pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillReport {
    pub port: u16,
    pub pids: Vec<u32>,
    pub killed: Vec<u32>,
    pub failed: Vec<u32>,
}

/// Result of freeing a port
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortReport {
    pub port: u16,
    /// Whether the port was free when the loop ended
    pub freed: bool,
    /// Kill passes performed
    pub attempts: u32,
    pub killed: Vec<u32>,
    pub failed: Vec<u32>,
    pub error: Option<String>,
}

impl PortReport {
    /// Report for a port that could not be freed
    pub fn conflict(err: &PortConflictError) -> Self {
        Self {
            port: err.port,
            freed: false,
            attempts: err.attempts,
            killed: Vec::new(),
            failed: err.pids.clone(),
            error: Some(err.to_string()),
        }
    }
}

/// Finds and kills processes bound to local ports
pub struct PortReconciler {
    runner: Arc<dyn CommandRunner>,
    platform: Arc<dyn Platform>,
    command_timeout: Duration,
}

impl PortReconciler {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        platform: Arc<dyn Platform>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            platform,
            command_timeout,
        }
    }

    /// See [`is_port_in_use`]
    pub fn is_port_in_use(&self, port: u16) -> bool {
        is_port_in_use(port)
    }

    /// PIDs listening on `port`, deduplicated
    ///
    /// Discovery failures are logged and yield an empty list.
    pub async fn find_pids(&self, port: u16) -> Vec<u32> {
        let spec = self
            .platform
            .port_pid_command(port)
            .timeout(self.command_timeout);

        match self.runner.run(&spec).await {
            // lsof exits 1 when nothing matches
            Ok(output) => self.platform.parse_port_pids(&output.stdout, port),
            Err(e) => {
                tracing::warn!("Could not list processes on port {}: {}", port, e);
                Vec::new()
            }
        }
    }

    /// Kill every process listening on `port`
    ///
    /// Partial failure is reported in `failed`, not returned as an error.
    pub async fn kill_processes_on_port(&self, port: u16) -> KillReport {
        let pids = self.find_pids(port).await;
        let mut report = KillReport {
            port,
            pids: pids.clone(),
            ..Default::default()
        };

        for pid in pids {
            if self.kill_pid(pid).await {
                report.killed.push(pid);
            } else {
                report.failed.push(pid);
            }
        }

        if !report.pids.is_empty() {
            tracing::info!(
                "Port {}: killed {:?}, failed {:?}",
                port,
                report.killed,
                report.failed
            );
        }
        report
    }

    /// Forcefully terminate one process; returns whether the kill succeeded
    pub async fn kill_pid(&self, pid: u32) -> bool {
        let spec = self.platform.kill_command(pid).timeout(self.command_timeout);
        match self.runner.run(&spec).await {
            Ok(output) if output.success() => true,
            Ok(output) => {
                tracing::warn!("Failed to kill pid {}: {}", pid, output.diagnostic());
                false
            }
            Err(e) => {
                tracing::warn!("Failed to kill pid {}: {}", pid, e);
                false
            }
        }
    }

    /// Kill and re-check until `port` is free or the budget runs out
    ///
    /// Each attempt kills whatever listens on the port, waits `interval`,
    /// then checks again.
    pub async fn free_port(
        &self,
        port: u16,
        attempts: u32,
        interval: Duration,
    ) -> Result<PortReport, PortConflictError> {
        let mut report = PortReport {
            port,
            ..Default::default()
        };

        if !self.is_port_in_use(port) {
            report.freed = true;
            return Ok(report);
        }

        let mut last_pids = Vec::new();
        for attempt in 1..=attempts.max(1) {
            report.attempts = attempt;
            let kill = self.kill_processes_on_port(port).await;
            report.killed.extend(kill.killed);
            report.failed.extend(kill.failed);
            last_pids = kill.pids;

            tokio::time::sleep(interval).await;

            if !self.is_port_in_use(port) {
                report.freed = true;
                tracing::info!("Port {} freed after {} attempt(s)", port, attempt);
                return Ok(report);
            }
            tracing::debug!("Port {} still in use after attempt {}", port, attempt);
        }

        Err(PortConflictError {
            port,
            attempts: report.attempts,
            pids: last_pids,
        })
    }
}
