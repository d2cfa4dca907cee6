//! CLI command implementations

mod config;
mod lifecycle;
mod port;
mod status;

pub use config::{config_get, config_init, config_path, config_set, config_show};
pub use lifecycle::{reset_command, start_command, sync_command};
pub use port::{port_check, port_free};
pub use status::status_command;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};

use pb_core::config::{self as core_config, BridgeConfig};
use pb_core::store::JsonFileStore;
use pb_orchestrator::{platform, OperationOutcome, Orchestrator, RuntimePaths};

/// Base credentials given on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct BackendOverrides {
    pub api_base_url: Option<String>,
    pub api_token: Option<String>,
    pub company_id: Option<String>,
}

/// Settings shared by every command
#[derive(Debug, Clone)]
pub struct CliContext {
    /// Directory holding the config file, state, PID file and logs
    pub home: PathBuf,
    /// Explicit config file, else `home/config.toml`
    pub config_file: Option<PathBuf>,
    /// Print machine-readable output
    pub json: bool,
    pub overrides: BackendOverrides,
}

impl CliContext {
    pub fn new(home: Option<PathBuf>, config_file: Option<PathBuf>, json: bool) -> Self {
        Self {
            home: home.unwrap_or_else(core_config::default_config_dir),
            config_file,
            json,
            overrides: BackendOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: BackendOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Config file in effect
    pub fn config_path(&self) -> PathBuf {
        self.config_file
            .clone()
            .unwrap_or_else(|| self.home.join("config.toml"))
    }

    /// Load the config file (defaults when absent) and apply overrides
    pub fn load_config(&self) -> Result<BridgeConfig> {
        let path = self.config_path();
        let mut config = core_config::load_or_default(&path)
            .with_context(|| format!("Failed to load config from {:?}", path))?;

        let backend = &mut config.backend;
        if let Some(url) = &self.overrides.api_base_url {
            backend.api_base_url = url.clone();
        }
        if let Some(token) = &self.overrides.api_token {
            backend.api_token = token.clone();
        }
        if let Some(id) = &self.overrides.company_id {
            backend.company_id = id.clone();
        }
        Ok(config)
    }

    /// Orchestrator wired to the real system, rooted at `home`
    pub fn orchestrator(&self) -> Result<Orchestrator> {
        let config = self.load_config()?;
        let platform = platform::current();
        tracing::debug!("Using home {:?} on {}", self.home, platform.name());

        let store_path = self.home.join("state.json");
        let store = JsonFileStore::open(&store_path)
            .with_context(|| format!("Failed to open state file {:?}", store_path))?;
        let paths = RuntimePaths::under(
            &self.home,
            platform.default_install_dir(&config.service.folder_name),
        );

        Orchestrator::builder(config)
            .store(Arc::new(store))
            .platform(platform)
            .paths(paths)
            .build()
            .context("Failed to initialize orchestrator")
    }
}

/// Exit code for an outcome: non-zero only for errors
pub fn exit_code(outcome: &OperationOutcome) -> ExitCode {
    if outcome.is_error() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
