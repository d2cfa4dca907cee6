//! Fresh installation path
//!
//! Bootstrap tools, clone, dependencies, environment file, baseline
//! database. A failing step aborts with an `InstallError` and leaves the
//! target as-is for a later reinstall or reset.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pb_core::error::InstallError;
use pb_core::state::StateMachine;
use pb_core::traits::CommandSpec;
use pb_core::types::{Metadata, ResolvedConfig, ServiceState};

use super::files::{sync_database, write_env_file, DatabaseSync};
use super::paths::is_safe_target;
use super::tools::ToolStatus;
use super::ProvisionContext;
use crate::platform::Tool;

/// What the installer did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReport {
    pub target: PathBuf,
    pub git: ToolStatus,
    pub node: ToolStatus,
    /// An interrupted clone was completed instead of cloning afresh
    pub resumed: bool,
    pub env_written: bool,
    pub database: DatabaseSync,
    pub warnings: Vec<String>,
}

/// State of the target directory before cloning
enum TargetPrep {
    Fresh,
    Resume,
}

/// Runs the fresh-install path
pub struct Installer {
    ctx: Arc<ProvisionContext>,
    state: Arc<StateMachine>,
}

impl Installer {
    pub fn new(ctx: Arc<ProvisionContext>, state: Arc<StateMachine>) -> Self {
        Self { ctx, state }
    }

    /// Bring `resolved.target_dir` to a runnable state from scratch
    pub async fn install(&self, resolved: &ResolvedConfig) -> Result<InstallReport, InstallError> {
        let target = resolved.target_dir.as_path();
        let service = &self.ctx.service;
        tracing::info!("Installing {} into {:?}", service.folder_name, target);

        let git = self.ensure_tool(Tool::Git, ServiceState::InstallingGit).await?;
        let node = self.ensure_tool(Tool::Node, ServiceState::InstallingNode).await?;

        let prep = self.prepare_target(target)?;
        self.enter(ServiceState::CloningRepo, json!({ "target": target }));
        let resumed = match prep {
            TargetPrep::Fresh => {
                self.clone_repo(target).await?;
                false
            }
            TargetPrep::Resume => {
                self.resume_clone(target).await?;
                true
            }
        };

        if !self.ctx.is_installed(target) {
            return Err(InstallError::Clone {
                url: service.repository_url.clone(),
                reason: format!("{} missing after clone", service.manifest_file_name),
            });
        }

        self.enter(
            ServiceState::InstallingDependencies,
            json!({ "package_manager": service.package_manager }),
        );
        self.ctx
            .install_dependencies(target)
            .await
            .map_err(InstallError::Dependencies)?;

        let env_path = service.env_path(target);
        let env_written = write_env_file(&env_path, &resolved.env_content).map_err(|source| {
            InstallError::Write {
                path: env_path.clone(),
                source,
            }
        })?;

        let db_path = service.database_file(target);
        let database = sync_database(service.database_template.as_deref(), &db_path, false)
            .map_err(|source| InstallError::Write {
                path: db_path.clone(),
                source,
            })?;

        let mut warnings = Vec::new();
        if database == DatabaseSync::NoTemplate {
            warnings.push(format!(
                "no database template available, {:?} was not seeded",
                db_path
            ));
        }

        Ok(InstallReport {
            target: target.to_path_buf(),
            git,
            node,
            resumed,
            env_written,
            database,
            warnings,
        })
    }

    async fn ensure_tool(&self, tool: Tool, phase: ServiceState) -> Result<ToolStatus, InstallError> {
        if let Some(version) = self.ctx.tools.version(tool).await {
            tracing::debug!("{} {} present", tool, version);
            return Ok(ToolStatus {
                tool,
                version,
                installed_now: false,
            });
        }
        self.enter(phase, json!({ "tool": tool }));
        self.ctx.tools.ensure(tool).await
    }

    /// Decide how to treat whatever already sits at `target`
    fn prepare_target(&self, target: &Path) -> Result<TargetPrep, InstallError> {
        let write_err = |source| InstallError::Write {
            path: target.to_path_buf(),
            source,
        };

        if !target.exists() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(write_err)?;
            }
            return Ok(TargetPrep::Fresh);
        }

        let is_empty = fs::read_dir(target).map_err(write_err)?.next().is_none();
        let folder = &self.ctx.service.folder_name;

        if is_empty {
            if !is_safe_target(target, folder) {
                return Err(InstallError::UnsafePath(target.to_path_buf()));
            }
            // git refuses to clone into an existing directory on some versions
            fs::remove_dir(target).map_err(write_err)?;
            return Ok(TargetPrep::Fresh);
        }

        if target.join(".git").is_dir() {
            if !is_safe_target(target, folder) {
                return Err(InstallError::UnsafePath(target.to_path_buf()));
            }
            tracing::info!("Resuming interrupted clone in {:?}", target);
            return Ok(TargetPrep::Resume);
        }

        Err(InstallError::TargetOccupied(target.to_path_buf()))
    }

    async fn clone_repo(&self, target: &Path) -> Result<(), InstallError> {
        let service = &self.ctx.service;
        let spec = CommandSpec::new(
            self.ctx.platform.executable("git"),
            [
                "clone".to_string(),
                "--depth".to_string(),
                "1".to_string(),
                "--branch".to_string(),
                service.branch.clone(),
                service.repository_url.clone(),
                target.to_string_lossy().into_owned(),
            ],
        )
        .timeout(self.ctx.timeouts.install);
        self.git(spec).await
    }

    async fn resume_clone(&self, target: &Path) -> Result<(), InstallError> {
        let service = &self.ctx.service;
        let dir = target.to_string_lossy().into_owned();
        let git = self.ctx.platform.executable("git");

        let fetch = CommandSpec::new(
            git.clone(),
            [
                "-C".to_string(),
                dir.clone(),
                "fetch".to_string(),
                "--depth".to_string(),
                "1".to_string(),
                "origin".to_string(),
                service.branch.clone(),
            ],
        )
        .timeout(self.ctx.timeouts.install);
        self.git(fetch).await?;

        let reset = CommandSpec::new(git, ["-C", dir.as_str(), "reset", "--hard", "FETCH_HEAD"])
            .timeout(self.ctx.timeouts.command);
        self.git(reset).await
    }

    async fn git(&self, spec: CommandSpec) -> Result<(), InstallError> {
        let url = self.ctx.service.repository_url.clone();
        let out = self
            .ctx
            .runner
            .run(&spec)
            .await
            .map_err(|e| InstallError::Clone {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        if out.success() {
            Ok(())
        } else {
            Err(InstallError::Clone {
                url,
                reason: out.diagnostic(),
            })
        }
    }

    fn enter(&self, state: ServiceState, metadata: serde_json::Value) {
        let metadata: Metadata = match metadata {
            serde_json::Value::Object(map) => map,
            _ => Metadata::new(),
        };
        let outcome = self.state.transition(state, metadata);
        if !outcome.ok {
            tracing::warn!("Installer could not enter {} from {}", state, outcome.previous);
        }
    }
}
