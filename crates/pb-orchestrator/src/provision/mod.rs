//! Installer and updater for the managed service
//!
//! A target directory holding the manifest file is an existing installation
//! and goes through the `Updater`; anything else goes through the
//! `Installer`. Both converge without duplicating work when re-run.

mod files;
mod installer;
pub mod paths;
mod tools;
mod updater;

pub use files::{sync_database, write_env_file, DatabaseSync};
pub use installer::{InstallReport, Installer};
pub use paths::{is_safe_target, remove_directory, DirectoryReport, UNSAFE_PATH_REASON};
pub use tools::{parse_version, BootstrapTools, ToolRemoval, ToolStatus};
pub use updater::{UpdateOptions, UpdateReport, Updater};

use std::path::Path;
use std::sync::Arc;

use pb_core::config::{ServiceConfig, TimeoutConfig};
use pb_core::traits::{CommandRunner, CommandSpec};

use crate::platform::Platform;

/// Collaborators shared by the installer and the updater
pub struct ProvisionContext {
    pub service: ServiceConfig,
    pub timeouts: TimeoutConfig,
    pub runner: Arc<dyn CommandRunner>,
    pub platform: Arc<dyn Platform>,
    pub tools: Arc<BootstrapTools>,
}

impl ProvisionContext {
    pub fn new(
        service: ServiceConfig,
        timeouts: TimeoutConfig,
        runner: Arc<dyn CommandRunner>,
        platform: Arc<dyn Platform>,
    ) -> Self {
        let tools = Arc::new(BootstrapTools::new(
            Arc::clone(&runner),
            Arc::clone(&platform),
            timeouts.tool_check,
            timeouts.install,
        ));
        Self {
            service,
            timeouts,
            runner,
            platform,
            tools,
        }
    }

    /// Whether `target` holds an existing installation
    pub fn is_installed(&self, target: &Path) -> bool {
        self.service.manifest_path(target).is_file()
    }

    /// Install the package manager if needed, then project dependencies
    pub async fn install_dependencies(&self, target: &Path) -> Result<(), String> {
        let pm = self.service.package_manager.as_str();

        if self.tools.program_version(pm).await.is_none() {
            tracing::info!("{} not found, installing it globally with npm", pm);
            let spec = CommandSpec::new(self.platform.executable("npm"), ["install", "-g", pm])
                .timeout(self.timeouts.install);
            let out = self
                .runner
                .run(&spec)
                .await
                .map_err(|e| format!("`{}`: {}", spec, e))?;
            if !out.success() {
                return Err(format!("`{}` failed: {}", spec, out.diagnostic()));
            }
            if self.tools.program_version(pm).await.is_none() {
                return Err(format!("{} is still unavailable after installing it", pm));
            }
        }

        let spec = CommandSpec::new(self.platform.executable(pm), ["install"])
            .current_dir(target)
            .timeout(self.timeouts.install);
        tracing::info!("Installing dependencies in {:?}", target);
        let out = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| format!("`{}`: {}", spec, e))?;
        if out.success() {
            Ok(())
        } else {
            Err(format!("`{}` failed: {}", spec, out.diagnostic()))
        }
    }
}
