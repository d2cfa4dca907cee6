//! Reset manager
//!
//! Destructive teardown of the managed service. Every step is independently
//! fault tolerant and reports into a `ResetReport`; only an unexpected
//! failure (persisted state that cannot be cleared) makes the overall status
//! `error`. The state machine always ends in `idle`.
//!
//! # Steps
//!
//! 1. Stop the supervised child and any PID recorded in the PID file
//! 2. Free the service port and the auxiliary port
//! 3. Wait for file locks to be released (Windows)
//! 4. Remove the configured and the default installation directories
//! 5. Clear persisted orchestrator keys, progress included, in one write
//! 6. Set the "user removed" marker
//! 7. Optionally uninstall the bootstrap tools

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

use pb_core::config::{ServiceConfig, TimeoutConfig};
use pb_core::error::ResetError;
use pb_core::pidfile;
use pb_core::state::StateMachine;
use pb_core::store::StoreKey;
use pb_core::traits::KeyValueStore;
use pb_core::types::{Metadata, ServiceState};

use crate::launcher::Supervisor;
use crate::platform::{Platform, Tool};
use crate::ports::{PortReconciler, PortReport};
use crate::provision::{remove_directory, BootstrapTools, DirectoryReport, ToolRemoval};

/// Reset switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetOptions {
    /// Also uninstall git and node
    pub remove_tools: bool,
    /// Explicit confirmation required for `remove_tools`
    pub confirm: bool,
}

/// Overall reset status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Success,
    Warning,
    Error,
}

/// Tool uninstall results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolsReport {
    pub removals: Vec<ToolRemoval>,
}

/// Everything a reset did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetReport {
    pub status: ReportStatus,
    /// PIDs that were terminated
    pub processes: Vec<u32>,
    pub directories: Vec<DirectoryReport>,
    pub ports: Vec<PortReport>,
    pub cleared_keys: Vec<String>,
    pub tools: Option<ToolsReport>,
    pub warnings: Vec<String>,
}

impl ResetReport {
    fn new() -> Self {
        Self {
            status: ReportStatus::Success,
            processes: Vec::new(),
            directories: Vec::new(),
            ports: Vec::new(),
            cleared_keys: Vec::new(),
            tools: None,
            warnings: Vec::new(),
        }
    }
}

/// Tears down the managed service
pub struct ResetManager {
    pub(crate) service: ServiceConfig,
    pub(crate) timeouts: TimeoutConfig,
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) ports: Arc<PortReconciler>,
    pub(crate) tools: Arc<BootstrapTools>,
    pub(crate) supervisor: Arc<Supervisor>,
    pub(crate) store: Arc<dyn KeyValueStore>,
    pub(crate) state: Arc<StateMachine>,
    pub(crate) pid_path: PathBuf,
    pub(crate) default_target: PathBuf,
}

impl ResetManager {
    /// Run the full teardown; never fails, see `ResetReport::status`
    pub async fn reset(&self, options: ResetOptions) -> ResetReport {
        tracing::info!("Resetting managed service (remove tools: {})", options.remove_tools);
        self.state
            .force_transition(ServiceState::Resetting, Metadata::new(), None);

        let mut report = ResetReport::new();
        let failures = self.run_steps(options, &mut report).await;

        for failure in &failures {
            tracing::error!("Reset step failed: {}", failure);
            report.warnings.push(failure.to_string());
        }
        report.status = if !failures.is_empty() {
            ReportStatus::Error
        } else if !report.warnings.is_empty() {
            ReportStatus::Warning
        } else {
            ReportStatus::Success
        };

        let mut metadata = Metadata::new();
        metadata.insert("reset_status".to_string(), json!(report.status));
        self.state
            .force_transition(ServiceState::Idle, metadata, None);

        tracing::info!("Reset finished with status {:?}", report.status);
        report
    }

    /// Run every step; returns the unexpected failures
    async fn run_steps(&self, options: ResetOptions, report: &mut ResetReport) -> Vec<ResetError> {
        let mut failures = Vec::new();
        // Read before the keys are cleared
        let configured_target = self
            .service
            .install_dir
            .clone()
            .or_else(|| self.store.get_string(StoreKey::TargetDir).map(PathBuf::from));

        self.stop_processes(report).await;
        self.free_ports(report).await;

        if self.platform.needs_lock_wait() {
            tracing::debug!("Waiting {:?} for file locks", self.timeouts.windows_lock_wait);
            tokio::time::sleep(self.timeouts.windows_lock_wait).await;
        }

        let mut targets = Vec::new();
        for dir in configured_target.into_iter().chain([self.default_target.clone()]) {
            if !targets.contains(&dir) {
                targets.push(dir);
            }
        }
        for dir in targets {
            let dir_report = remove_directory(&dir, &self.service.folder_name);
            if dir_report.is_problem() {
                report.warnings.push(format!(
                    "directory {:?} not removed: {}",
                    dir_report.path,
                    dir_report.reason.as_deref().unwrap_or("unknown")
                ));
            }
            report.directories.push(dir_report);
        }

        let keys = StoreKey::orchestrator_keys();
        match self.store.remove_many(keys) {
            Ok(_) => report
                .cleared_keys
                .extend(keys.iter().map(|k| k.as_str().to_string())),
            Err(e) => failures.push(ResetError::Store(e)),
        }
        if let Err(e) = self.store.set(StoreKey::UserRemoved, json!(true)) {
            failures.push(ResetError::Store(e));
        }

        if options.remove_tools {
            if options.confirm {
                let mut removals = Vec::new();
                for tool in Tool::ALL {
                    let removal = self.tools.uninstall(tool).await;
                    if let Some(err) = &removal.error {
                        report
                            .warnings
                            .push(format!("could not uninstall {}: {}", tool, err));
                    }
                    removals.push(removal);
                }
                report.tools = Some(ToolsReport { removals });
            } else {
                report
                    .warnings
                    .push("tool removal requested without confirmation, skipped".to_string());
            }
        }

        failures
    }

    async fn stop_processes(&self, report: &mut ResetReport) {
        if let Some(pid) = self.supervisor.stop().await {
            report.processes.push(pid);
        }

        if let Some(pid) = pidfile::take_live_pid(&self.pid_path) {
            if report.processes.contains(&pid) {
                return;
            }
            if self.ports.kill_pid(pid).await {
                report.processes.push(pid);
            } else {
                report
                    .warnings
                    .push(format!("could not terminate service process {}", pid));
            }
        }
    }

    async fn free_ports(&self, report: &mut ResetReport) {
        let mut ports = vec![self.service.port];
        if self.service.aux_port != self.service.port {
            ports.push(self.service.aux_port);
        }

        for port in ports {
            let result = self
                .ports
                .free_port(
                    port,
                    self.timeouts.port_recheck_attempts,
                    self.timeouts.port_recheck_interval,
                )
                .await;
            match result {
                Ok(port_report) => report.ports.push(port_report),
                Err(conflict) => {
                    report.warnings.push(conflict.to_string());
                    report.ports.push(PortReport::conflict(&conflict));
                }
            }
        }
    }
}
