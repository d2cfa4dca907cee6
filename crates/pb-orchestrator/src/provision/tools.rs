//! Bootstrap tool checks (git, node) and platform installs

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use pb_core::error::InstallError;
use pb_core::traits::{CommandRunner, CommandSpec};

use crate::platform::{Platform, Tool};

/// Extract a version number from `--version` output
///
/// Handles `git version 2.43.0`, `v20.11.1`, and bare `9.1.0`.
pub fn parse_version(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .map(|token| token.trim_start_matches('v'))
        .find(|token| {
            token.chars().next().is_some_and(|c| c.is_ascii_digit()) && token.contains('.')
        })
        .map(str::to_string)
}

/// A tool that is available
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolStatus {
    pub tool: Tool,
    pub version: String,
    /// Installed during this run
    pub installed_now: bool,
}

/// Outcome of uninstalling one tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRemoval {
    pub tool: Tool,
    pub removed: bool,
    pub error: Option<String>,
}

/// Probes and installs the bootstrap tools
pub struct BootstrapTools {
    runner: Arc<dyn CommandRunner>,
    platform: Arc<dyn Platform>,
    version_timeout: Duration,
    install_timeout: Duration,
}

impl BootstrapTools {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        platform: Arc<dyn Platform>,
        version_timeout: Duration,
        install_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            platform,
            version_timeout,
            install_timeout,
        }
    }

    /// Version of `tool`, or `None` when it is not runnable
    pub async fn version(&self, tool: Tool) -> Option<String> {
        self.program_version(tool.program()).await
    }

    /// Version of any program answering `--version`
    pub async fn program_version(&self, program: &str) -> Option<String> {
        let spec = CommandSpec::new(self.platform.executable(program), ["--version"])
            .timeout(self.version_timeout);
        match self.runner.run(&spec).await {
            Ok(out) if out.success() => {
                Some(parse_version(&out.stdout).unwrap_or_else(|| out.stdout.trim().to_string()))
            }
            Ok(out) => {
                tracing::debug!("{} --version failed: {}", program, out.diagnostic());
                None
            }
            Err(e) => {
                tracing::debug!("{} is not available: {}", program, e);
                None
            }
        }
    }

    /// Make sure `tool` is runnable, installing it when missing
    pub async fn ensure(&self, tool: Tool) -> Result<ToolStatus, InstallError> {
        if let Some(version) = self.version(tool).await {
            return Ok(ToolStatus {
                tool,
                version,
                installed_now: false,
            });
        }

        tracing::info!("{} not found, installing via {}", tool, self.platform.name());
        let mut last_error = String::from("no install command for this platform");
        for spec in self.platform.tool_install_commands(tool) {
            let spec = spec.timeout(self.install_timeout);
            match self.runner.run(&spec).await {
                Ok(out) if out.success() => break,
                Ok(out) => last_error = format!("`{}` failed: {}", spec, out.diagnostic()),
                Err(e) => last_error = e.to_string(),
            }
            tracing::warn!("{} install attempt failed: {}", tool, last_error);
        }

        match self.version(tool).await {
            Some(version) => {
                tracing::info!("{} {} installed", tool, version);
                Ok(ToolStatus {
                    tool,
                    version,
                    installed_now: true,
                })
            }
            None => Err(InstallError::ToolUnavailable {
                tool: tool.to_string(),
                reason: last_error,
            }),
        }
    }

    /// Best-effort uninstall of `tool`
    pub async fn uninstall(&self, tool: Tool) -> ToolRemoval {
        let mut error = Some("no uninstall command for this platform".to_string());
        for spec in self.platform.tool_uninstall_commands(tool) {
            let spec = spec.timeout(self.install_timeout);
            match self.runner.run(&spec).await {
                Ok(out) if out.success() => {
                    error = None;
                    break;
                }
                Ok(out) => error = Some(format!("`{}` failed: {}", spec, out.diagnostic())),
                Err(e) => error = Some(e.to_string()),
            }
        }

        if let Some(err) = &error {
            tracing::warn!("Could not uninstall {}: {}", tool, err);
        } else {
            tracing::info!("{} uninstalled", tool);
        }
        ToolRemoval {
            tool,
            removed: error.is_none(),
            error,
        }
    }
}
