//! In-place update path for an existing installation

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use pb_core::error::UpdateError;
use pb_core::types::ResolvedConfig;

use super::files::{sync_database, write_env_file, DatabaseSync};
use super::ProvisionContext;
use crate::ports::{PortReconciler, PortReport};

/// Updater switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOptions {
    /// Replace an existing database from the template
    pub overwrite_database: bool,
}

/// What the updater did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReport {
    pub env_changed: bool,
    pub database: DatabaseSync,
    /// Dependencies were missing and got reinstalled
    pub dependencies_installed: bool,
    /// Reconciliation of the service port before relaunch
    pub port: PortReport,
}

/// Synchronizes an existing installation
pub struct Updater {
    ctx: Arc<ProvisionContext>,
    ports: Arc<PortReconciler>,
}

impl Updater {
    pub fn new(ctx: Arc<ProvisionContext>, ports: Arc<PortReconciler>) -> Self {
        Self { ctx, ports }
    }

    /// Sync env file and database, heal dependencies, then free the service port
    ///
    /// The port is always reconciled so the relaunch picks up the synced
    /// files; a port that cannot be freed is an `UpdateError::PortConflict`.
    pub async fn update(
        &self,
        resolved: &ResolvedConfig,
        options: UpdateOptions,
    ) -> Result<UpdateReport, UpdateError> {
        let target = resolved.target_dir.as_path();
        let service = &self.ctx.service;
        tracing::info!("Updating existing installation in {:?}", target);

        let env_path = service.env_path(target);
        let env_changed =
            write_env_file(&env_path, &resolved.env_content).map_err(|source| UpdateError::Write {
                path: env_path.clone(),
                source,
            })?;

        let db_path = service.database_file(target);
        let database = sync_database(
            service.database_template.as_deref(),
            &db_path,
            options.overwrite_database,
        )
        .map_err(|source| UpdateError::Write {
            path: db_path.clone(),
            source,
        })?;

        let mut dependencies_installed = false;
        if !service.dependencies_path(target).exists() {
            tracing::warn!("{} missing in {:?}, reinstalling", service.dependencies_dir, target);
            self.ctx
                .install_dependencies(target)
                .await
                .map_err(UpdateError::Dependencies)?;
            dependencies_installed = true;
        }

        if self.ports.is_port_in_use(service.port) {
            tracing::info!(
                "Stopping service on port {} before relaunch (env changed: {})",
                service.port,
                env_changed
            );
        }
        let port = self
            .ports
            .free_port(
                service.port,
                self.ctx.timeouts.port_recheck_attempts,
                self.ctx.timeouts.port_recheck_interval,
            )
            .await?;

        Ok(UpdateReport {
            env_changed,
            database,
            dependencies_installed,
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Platform, UnixPackageManager, UnixPlatform};
    use crate::testing::FakeRunner;
    use pb_core::config::{ServiceConfig, TimeoutConfig};
    use pb_core::traits::{CommandOutput, CommandRunner};
    use pb_core::types::IntegrationMode;
    use parking_lot::Mutex;
    use std::fs;
    use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;

    fn resolved(target: &Path, env: &str) -> ResolvedConfig {
        ResolvedConfig {
            target_dir: target.to_path_buf(),
            session_key: "loja".into(),
            service_token: "tok".into(),
            env_content: env.into(),
            integration_mode: IntegrationMode::Local,
            remote_validated: true,
            remote_validated_at: None,
            last_remote_sync_at: None,
            queue: Default::default(),
            attempts: Vec::new(),
        }
    }

    fn installed_target(dir: &TempDir) -> PathBuf {
        let target = dir.path().join("whatsapp-service");
        fs::create_dir_all(target.join("node_modules")).unwrap();
        fs::write(target.join("package.json"), "{}").unwrap();
        target
    }

    fn updater(runner: Arc<FakeRunner>, port: u16) -> Updater {
        let platform: Arc<dyn Platform> = Arc::new(UnixPlatform::new(UnixPackageManager::Apt));
        let runner: Arc<dyn CommandRunner> = runner;
        let timeouts = TimeoutConfig {
            port_recheck_attempts: 2,
            port_recheck_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let service = ServiceConfig {
            port,
            ..Default::default()
        };
        let ports = Arc::new(PortReconciler::new(
            Arc::clone(&runner),
            Arc::clone(&platform),
            Duration::from_secs(5),
        ));
        let ctx = Arc::new(ProvisionContext::new(service, timeouts, runner, platform));
        Updater::new(ctx, ports)
    }

    fn held_port() -> (TcpListener, u16) {
        let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn test_unchanged_env_still_frees_port() {
        let dir = TempDir::new().unwrap();
        let target = installed_target(&dir);
        fs::write(target.join(".env"), "PORT=1\n").unwrap();
        let (held, port) = held_port();
        let held = Arc::new(Mutex::new(Some(held)));

        let runner = Arc::new(FakeRunner::new());
        runner.on("lsof", CommandOutput::ok("31337\n"));
        let slot = Arc::clone(&held);
        runner.on_with("kill -9 31337", move |_| {
            slot.lock().take();
            Ok(CommandOutput::ok(""))
        });

        let report = updater(runner.clone(), port)
            .update(&resolved(&target, "PORT=1\n"), UpdateOptions::default())
            .await
            .unwrap();

        assert!(!report.env_changed);
        assert!(!report.dependencies_installed);
        assert!(report.port.freed);
        assert_eq!(report.port.killed, vec![31337]);
        assert_eq!(runner.count("lsof"), 1);
        assert_eq!(runner.count("kill -9 31337"), 1);
    }

    #[tokio::test]
    async fn test_unchanged_env_with_stuck_port_conflicts() {
        let dir = TempDir::new().unwrap();
        let target = installed_target(&dir);
        fs::write(target.join(".env"), "PORT=1\n").unwrap();
        let (_held, port) = held_port();

        let runner = Arc::new(FakeRunner::new());
        runner.on("lsof", CommandOutput::ok("31337\n"));

        let err = updater(runner.clone(), port)
            .update(&resolved(&target, "PORT=1\n"), UpdateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::PortConflict(_)));
        assert_eq!(runner.count("kill -9 31337"), 2);
    }

    #[tokio::test]
    async fn test_changed_env_with_busy_port_conflicts() {
        let dir = TempDir::new().unwrap();
        let target = installed_target(&dir);
        let (_held, port) = held_port();

        let runner = Arc::new(FakeRunner::new());
        runner.on("lsof", CommandOutput::ok("31337\n"));

        let err = updater(runner.clone(), port)
            .update(&resolved(&target, "PORT=2\n"), UpdateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::PortConflict(_)));
        assert_eq!(runner.count("kill -9 31337"), 2);
        // The env file is still written for the next attempt
        assert_eq!(fs::read_to_string(target.join(".env")).unwrap(), "PORT=2\n");
    }

    #[tokio::test]
    async fn test_changed_env_with_free_port_needs_no_kill() {
        let dir = TempDir::new().unwrap();
        let target = installed_target(&dir);
        let (held, port) = held_port();
        drop(held);

        let runner = Arc::new(FakeRunner::new());
        let report = updater(runner.clone(), port)
            .update(&resolved(&target, "PORT=3\n"), UpdateOptions::default())
            .await
            .unwrap();
        assert!(report.env_changed);
        assert!(report.port.freed);
        assert_eq!(report.port.attempts, 0);
        assert_eq!(runner.count("lsof"), 0);
    }

    #[tokio::test]
    async fn test_missing_dependencies_are_reinstalled() {
        let dir = TempDir::new().unwrap();
        let target = installed_target(&dir);
        fs::remove_dir_all(target.join("node_modules")).unwrap();
        let (held, port) = held_port();
        drop(held);

        let runner = Arc::new(FakeRunner::new());
        runner.on("pnpm --version", CommandOutput::ok("9.1.0"));
        let report = updater(runner.clone(), port)
            .update(&resolved(&target, "PORT=1\n"), UpdateOptions::default())
            .await
            .unwrap();
        assert!(report.dependencies_installed);
        assert_eq!(runner.count("pnpm install"), 1);
    }
}
