//! Orchestrator facade
//!
//! The single entry point for lifecycle operations. It owns the shared
//! context (store, state machine, progress ledger) and wires it into every
//! component by injection.
//!
//! # Concurrency
//!
//! `ensure_ready_and_start` and `refresh_and_sync` are single-flight:
//! concurrent callers share one execution and receive the same outcome.
//! Every operation, `reset` included, also takes an operation lock, so a
//! reset requested mid-install waits for the install to settle.
//!
//! No entry point returns an error. Failures become an `OperationOutcome`
//! with status `error`, the state machine ends in `running`, `idle`, or
//! `error`, and the progress record ends in a terminal entry.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

use pb_core::config::{self, BridgeConfig};
use pb_core::error::{BridgeError, ConfigError, InstallError, StoreError, UpdateError};
use pb_core::pidfile;
use pb_core::progress::{ProgressLedger, ProgressRecord};
use pb_core::state::{StateChange, StateMachine, StateObserver, StateSnapshot};
use pb_core::store::{JsonFileStore, StoreKey};
use pb_core::time::current_time_millis;
use pb_core::traits::{CommandRunner, KeyValueStore};
use pb_core::types::{IntegrationMode, Metadata, ResolvedConfig, ServiceState};

use crate::flight::SingleFlight;
use crate::launcher::{LaunchResult, ServiceLauncher, Supervisor};
use crate::platform::{self, Platform};
use crate::ports::{is_port_in_use, PortReconciler};
use crate::provision::{
    remove_directory, Installer, ProvisionContext, UpdateOptions, UpdateReport, Updater,
    UNSAFE_PATH_REASON,
};
use crate::reset::{ReportStatus, ResetManager, ResetOptions};
use crate::resolver::{ConfigResolver, HttpConfigSource, RemoteConfigSource};
use crate::runner::SystemRunner;

/// Outcome classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Warning,
    Error,
    Skipped,
}

/// Structured result of every facade operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub status: OutcomeStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl OperationOutcome {
    fn new(status: OutcomeStatus, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            status,
            message: message.into(),
            data,
        }
    }

    /// Whether the operation failed
    pub fn is_error(&self) -> bool {
        self.status == OutcomeStatus::Error
    }
}

/// Who asked for the service to start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// Host startup or a background watcher
    #[default]
    Automatic,
    /// An explicit user action
    User,
}

/// Options for `ensure_ready_and_start`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsureOptions {
    pub trigger: Trigger,
    /// Remove the target directory and install from scratch
    pub reinstall: bool,
    /// Replace an existing database from the template
    pub overwrite_database: bool,
}

/// Files the orchestrator owns outside the target directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    pub pid_file: PathBuf,
    pub service_log: PathBuf,
    /// Platform default installation directory
    pub default_install_dir: PathBuf,
}

impl RuntimePaths {
    /// Paths under `config_dir`
    pub fn under(config_dir: &Path, default_install_dir: PathBuf) -> Self {
        Self {
            pid_file: config_dir.join("service.pid"),
            service_log: config_dir.join("logs").join("service.log"),
            default_install_dir,
        }
    }

    /// Standard per-user locations
    pub fn standard(platform: &dyn Platform, folder_name: &str) -> Self {
        Self {
            pid_file: config::default_pid_path(),
            service_log: config::default_service_log_path(),
            default_install_dir: platform.default_install_dir(folder_name),
        }
    }
}

/// Point-in-time view for status displays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: StateSnapshot,
    pub progress: Option<ProgressRecord>,
    pub target_dir: PathBuf,
    pub installed: bool,
    pub port: u16,
    pub port_in_use: bool,
    /// Live PID recorded in the PID file
    pub pid: Option<u32>,
    pub user_removed: bool,
    pub integration_mode: Option<IntegrationMode>,
}

/// Mirrors state transitions into the progress ledger
struct ProgressObserver {
    ledger: Arc<ProgressLedger>,
}

impl StateObserver for ProgressObserver {
    fn on_transition(&self, change: &StateChange) -> anyhow::Result<()> {
        let state = change.current.state;
        if state.is_terminal() {
            return Ok(());
        }
        self.ledger.step(
            state.label(),
            state.to_string(),
            state.percent(),
            change.current.metadata.clone(),
        )?;
        Ok(())
    }
}

/// Builds an `Orchestrator`, defaulting every collaborator to the real one
pub struct OrchestratorBuilder {
    config: BridgeConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    runner: Option<Arc<dyn CommandRunner>>,
    platform: Option<Arc<dyn Platform>>,
    source: Option<Arc<dyn RemoteConfigSource>>,
    paths: Option<RuntimePaths>,
}

impl OrchestratorBuilder {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            store: None,
            runner: None,
            platform: None,
            source: None,
            paths: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn platform(mut self, platform: Arc<dyn Platform>) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn remote_source(mut self, source: Arc<dyn RemoteConfigSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn paths(mut self, paths: RuntimePaths) -> Self {
        self.paths = Some(paths);
        self
    }

    pub fn build(self) -> Result<Orchestrator, BridgeError> {
        let config = self.config;
        let service = config.service.clone();
        let timeouts = config.timeouts.clone();

        let store: Arc<dyn KeyValueStore> = match self.store {
            Some(store) => store,
            None => Arc::new(JsonFileStore::open(config::default_store_path())?),
        };
        let runner: Arc<dyn CommandRunner> = match self.runner {
            Some(runner) => runner,
            None => Arc::new(SystemRunner),
        };
        let platform = self.platform.unwrap_or_else(platform::current);
        let source: Arc<dyn RemoteConfigSource> = match self.source {
            Some(source) => source,
            None => Arc::new(
                HttpConfigSource::new(timeouts.http)
                    .map_err(|e| ConfigError::Invalid(format!("HTTP client: {}", e)))?,
            ),
        };
        let paths = self
            .paths
            .unwrap_or_else(|| RuntimePaths::standard(platform.as_ref(), &service.folder_name));

        let state = Arc::new(StateMachine::new());
        let ledger = Arc::new(ProgressLedger::new(Arc::clone(&store)));
        state.add_observer(Arc::new(ProgressObserver {
            ledger: Arc::clone(&ledger),
        }));

        let ports = Arc::new(PortReconciler::new(
            Arc::clone(&runner),
            Arc::clone(&platform),
            timeouts.command,
        ));
        let ctx = Arc::new(ProvisionContext::new(
            service.clone(),
            timeouts.clone(),
            Arc::clone(&runner),
            Arc::clone(&platform),
        ));
        let supervisor = Arc::new(Supervisor::new());

        let resolver = ConfigResolver::new(
            config.backend.clone(),
            service.clone(),
            timeouts.clone(),
            paths.default_install_dir.clone(),
            Arc::clone(&store),
            source,
        );
        let installer = Installer::new(Arc::clone(&ctx), Arc::clone(&state));
        let updater = Updater::new(Arc::clone(&ctx), Arc::clone(&ports));
        let launcher = ServiceLauncher::new(
            service.clone(),
            timeouts.clone(),
            Arc::clone(&runner),
            Arc::clone(&platform),
            Arc::clone(&supervisor),
            paths.pid_file.clone(),
            paths.service_log.clone(),
        );
        let reset = ResetManager {
            service,
            timeouts,
            platform,
            ports: Arc::clone(&ports),
            tools: Arc::clone(&ctx.tools),
            supervisor: Arc::clone(&supervisor),
            store: Arc::clone(&store),
            state: Arc::clone(&state),
            pid_path: paths.pid_file.clone(),
            default_target: paths.default_install_dir.clone(),
        };

        Ok(Orchestrator {
            inner: Arc::new(Inner {
                config,
                paths,
                store,
                state,
                ledger,
                ports,
                ctx,
                supervisor,
                resolver,
                installer,
                updater,
                launcher,
                reset,
                op_lock: Mutex::new(()),
            }),
            ensure_flight: SingleFlight::new(),
            sync_flight: SingleFlight::new(),
        })
    }
}

/// Lifecycle orchestrator for the managed service
pub struct Orchestrator {
    inner: Arc<Inner>,
    ensure_flight: SingleFlight<OperationOutcome>,
    sync_flight: SingleFlight<OperationOutcome>,
}

impl Orchestrator {
    /// Builder with real collaborators by default
    pub fn builder(config: BridgeConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Make sure the service is installed, current, and running
    ///
    /// Callers arriving while a run is in flight share its outcome, even if
    /// they passed different options.
    pub async fn ensure_ready_and_start(&self, options: EnsureOptions) -> OperationOutcome {
        let inner = Arc::clone(&self.inner);
        self.ensure_flight
            .run(move || async move { inner.ensure(options).await })
            .await
            .unwrap_or_else(|e| OperationOutcome::new(OutcomeStatus::Error, e.to_string(), None))
    }

    /// Force a remote configuration refresh and apply it
    pub async fn refresh_and_sync(&self) -> OperationOutcome {
        let inner = Arc::clone(&self.inner);
        self.sync_flight
            .run(move || async move { inner.refresh().await })
            .await
            .unwrap_or_else(|e| OperationOutcome::new(OutcomeStatus::Error, e.to_string(), None))
    }

    /// Tear everything down; waits for any in-flight operation first
    pub async fn reset(&self, options: ResetOptions) -> OperationOutcome {
        self.inner.reset(options).await
    }

    /// State machine snapshot
    pub fn snapshot(&self) -> StateSnapshot {
        self.inner.state.snapshot()
    }

    /// Progress record, unless it has auto-hidden
    pub fn progress(&self) -> Option<ProgressRecord> {
        self.inner.ledger.visible_at(current_time_millis())
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.inner.state.subscribe()
    }

    /// Full status for displays
    pub fn status(&self) -> StatusReport {
        let inner = &self.inner;
        let target_dir = inner.resolver.target_dir();
        let pid = pidfile::read_pid_file(&inner.paths.pid_file)
            .ok()
            .flatten()
            .filter(|pid| pidfile::is_process_alive(*pid));
        StatusReport {
            state: self.snapshot(),
            progress: self.progress(),
            installed: inner.ctx.is_installed(&target_dir),
            target_dir,
            port: inner.config.service.port,
            port_in_use: is_port_in_use(inner.config.service.port),
            pid,
            user_removed: inner.store.get_bool(StoreKey::UserRemoved),
            integration_mode: inner
                .store
                .get_string(StoreKey::IntegrationMode)
                .and_then(|m| IntegrationMode::parse_keyword(&m)),
        }
    }

    /// Port reconciler for diagnostics
    pub fn ports(&self) -> &PortReconciler {
        &self.inner.ports
    }

    /// Effective configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }
}

/// Shared context behind the facade
struct Inner {
    config: BridgeConfig,
    paths: RuntimePaths,
    store: Arc<dyn KeyValueStore>,
    state: Arc<StateMachine>,
    ledger: Arc<ProgressLedger>,
    ports: Arc<PortReconciler>,
    ctx: Arc<ProvisionContext>,
    supervisor: Arc<Supervisor>,
    resolver: ConfigResolver,
    installer: Installer,
    updater: Updater,
    launcher: ServiceLauncher,
    reset: ResetManager,
    op_lock: Mutex<()>,
}

impl Inner {
    async fn ensure(&self, options: EnsureOptions) -> OperationOutcome {
        let _op = self.op_lock.lock().await;

        if self.store.get_bool(StoreKey::UserRemoved) {
            match options.trigger {
                Trigger::Automatic => {
                    tracing::info!("Installation was removed by the user, skipping automatic start");
                    return OperationOutcome::new(
                        OutcomeStatus::Skipped,
                        "installation was removed by the user; start it manually to reinstall",
                        None,
                    );
                }
                Trigger::User => {
                    if let Err(e) = self.store.remove(StoreKey::UserRemoved) {
                        tracing::warn!("Failed to clear user-removed marker: {}", e);
                    }
                }
            }
        }

        self.begin("Checking configuration");
        let resolved = match self.resolver.prepare_config(false).await {
            Ok(resolved) => resolved,
            Err(e) => return self.fail(e.to_string(), None),
        };
        if resolved.integration_mode == IntegrationMode::Web {
            return self.finish_web(&resolved);
        }

        let target = resolved.target_dir.clone();
        let mut data = Map::new();
        let mut warnings = Vec::new();

        if options.reinstall {
            let cleared = self.clear_for_reinstall(&target, &mut data).await;
            if let Err(message) = cleared {
                return self.fail(message, Some(Value::Object(data)));
            }
        }

        if !options.reinstall && self.ctx.is_installed(&target) {
            let update = UpdateOptions {
                overwrite_database: options.overwrite_database,
            };
            match self.update_installed(&resolved, update).await {
                Ok(report) => {
                    data.insert("update".into(), to_json(&report));
                }
                Err(e) => return self.fail(e.to_string(), Some(Value::Object(data))),
            }
        } else {
            match self.installer.install(&resolved).await {
                Ok(report) => {
                    warnings.extend(report.warnings.iter().cloned());
                    data.insert("install".into(), to_json(&report));
                }
                Err(e) => return self.fail(e.to_string(), Some(Value::Object(data))),
            }
        }

        self.launch_and_finish(&resolved, data, warnings).await
    }

    async fn refresh(&self) -> OperationOutcome {
        let _op = self.op_lock.lock().await;

        if self.store.get_bool(StoreKey::UserRemoved) {
            return OperationOutcome::new(
                OutcomeStatus::Skipped,
                "installation was removed by the user; nothing to sync",
                None,
            );
        }

        self.begin("Refreshing configuration");
        let resolved = match self.resolver.prepare_config(true).await {
            Ok(resolved) => resolved,
            Err(e) => return self.fail(e.to_string(), None),
        };
        if resolved.integration_mode == IntegrationMode::Web {
            return self.finish_web(&resolved);
        }

        let mut warnings = Vec::new();
        if !self.ctx.is_installed(&resolved.target_dir) {
            self.transition(ServiceState::Idle, Metadata::new());
            if let Err(e) = self.sync_secondary(&resolved) {
                warnings.push(format!("secondary settings not saved: {}", e));
            }
            let message = "configuration refreshed; service is not installed";
            self.finish_ledger(message, ServiceState::Idle);
            return OperationOutcome::new(
                status_for(&warnings),
                message,
                Some(json!({ "config": config_summary(&resolved), "warnings": warnings })),
            );
        }

        let mut data = Map::new();
        match self.update_installed(&resolved, UpdateOptions::default()).await {
            Ok(report) => {
                data.insert("update".into(), to_json(&report));
            }
            Err(e) => return self.fail(e.to_string(), Some(Value::Object(data))),
        }

        self.launch_and_finish(&resolved, data, warnings).await
    }

    async fn reset(&self, options: ResetOptions) -> OperationOutcome {
        let _op = self.op_lock.lock().await;
        let report = self.reset.reset(options).await;

        let (status, message) = match report.status {
            ReportStatus::Success => (OutcomeStatus::Success, "installation removed".to_string()),
            ReportStatus::Warning => (
                OutcomeStatus::Warning,
                format!("installation removed with {} warning(s)", report.warnings.len()),
            ),
            ReportStatus::Error => (
                OutcomeStatus::Error,
                format!(
                    "reset failed: {}",
                    report.warnings.last().map(String::as_str).unwrap_or("unknown error")
                ),
            ),
        };
        OperationOutcome::new(status, message, Some(to_json(&report)))
    }

    /// Start a progress run and enter `checking_config`
    fn begin(&self, message: &str) {
        if let Err(e) = self
            .ledger
            .start(message, ServiceState::CheckingConfig.to_string(), Metadata::new())
        {
            tracing::warn!("Failed to record progress: {}", e);
        }
        let outcome = self
            .state
            .transition(ServiceState::CheckingConfig, Metadata::new());
        if !outcome.ok {
            self.state
                .force_transition(ServiceState::CheckingConfig, Metadata::new(), None);
        }
    }

    /// Stop whatever runs from `target` and remove it
    /// Stop the supervised child, then let the updater sync files and free the port
    async fn update_installed(
        &self,
        resolved: &ResolvedConfig,
        options: UpdateOptions,
    ) -> Result<UpdateReport, UpdateError> {
        if let Some(pid) = self.supervisor.stop().await {
            tracing::debug!("Stopped supervised service {} before update", pid);
        }
        self.updater.update(resolved, options).await
    }

    async fn clear_for_reinstall(
        &self,
        target: &Path,
        data: &mut Map<String, Value>,
    ) -> Result<(), String> {
        let folder = &self.config.service.folder_name;
        self.supervisor.stop().await;
        if let Some(pid) = pidfile::take_live_pid(&self.paths.pid_file) {
            self.ports.kill_pid(pid).await;
        }
        let timeouts = &self.config.timeouts;
        self.ports
            .free_port(
                self.config.service.port,
                timeouts.port_recheck_attempts,
                timeouts.port_recheck_interval,
            )
            .await
            .map_err(|e| e.to_string())?;

        let removal = remove_directory(target, folder);
        data.insert("removed".into(), to_json(&removal));
        if removal.reason.as_deref() == Some(UNSAFE_PATH_REASON) {
            return Err(InstallError::UnsafePath(target.to_path_buf()).to_string());
        }
        if removal.is_problem() {
            return Err(format!(
                "could not remove {:?}: {}",
                target,
                removal.reason.unwrap_or_default()
            ));
        }
        Ok(())
    }

    async fn launch_and_finish(
        &self,
        resolved: &ResolvedConfig,
        mut data: Map<String, Value>,
        mut warnings: Vec<String>,
    ) -> OperationOutcome {
        let target = resolved.target_dir.as_path();
        self.transition(
            ServiceState::StartingService,
            object(json!({ "target": target })),
        );

        let launch = match self.launcher.launch(target).await {
            Ok(launch) => launch,
            Err(e) => return self.fail(e.to_string(), Some(Value::Object(data))),
        };

        let port = self.config.service.port;
        let message = match &launch {
            LaunchResult::Started { pid: Some(pid) } => format!("service started (pid {})", pid),
            LaunchResult::Started { pid: None } => "service started".to_string(),
            LaunchResult::AlreadyRunning => format!("service already running on port {}", port),
        };
        self.transition(
            ServiceState::Running,
            object(json!({ "port": port, "launch": launch })),
        );

        if let Err(e) = self.sync_secondary(resolved) {
            tracing::warn!("Secondary settings sync failed: {}", e);
            warnings.push(format!("secondary settings not saved: {}", e));
        }

        self.finish_ledger(&message, ServiceState::Running);
        data.insert("launch".into(), to_json(&launch));
        data.insert("config".into(), config_summary(resolved));
        data.insert("warnings".into(), json!(warnings));
        OperationOutcome::new(status_for(&warnings), message, Some(Value::Object(data)))
    }

    fn finish_web(&self, resolved: &ResolvedConfig) -> OperationOutcome {
        tracing::info!("Integration mode is web, local service is not started");
        self.transition(ServiceState::Idle, object(json!({ "integration_mode": "web" })));

        let mut warnings = Vec::new();
        if let Err(e) = self.sync_secondary(resolved) {
            warnings.push(format!("secondary settings not saved: {}", e));
        }
        let message = "integration mode is web; local service not started";
        self.finish_ledger(message, ServiceState::Idle);
        OperationOutcome::new(
            status_for(&warnings),
            message,
            Some(json!({ "config": config_summary(resolved), "warnings": warnings })),
        )
    }

    /// Persist queue credentials and integration mode
    fn sync_secondary(&self, resolved: &ResolvedConfig) -> Result<(), StoreError> {
        if !resolved.queue.is_empty() {
            self.store
                .set(StoreKey::QueueCredentials, serde_json::to_value(&resolved.queue)?)?;
        }
        self.store.set(
            StoreKey::IntegrationMode,
            json!(resolved.integration_mode.to_string()),
        )?;
        self.store
            .set(StoreKey::SecondarySyncedAt, json!(current_time_millis()))?;
        Ok(())
    }

    fn transition(&self, state: ServiceState, metadata: Metadata) {
        let outcome = self.state.transition(state, metadata);
        if !outcome.ok {
            tracing::warn!("Unexpected transition {} -> {}", outcome.previous, state);
        }
    }

    fn finish_ledger(&self, message: &str, state: ServiceState) {
        if let Err(e) = self
            .ledger
            .finish_success(message, state.to_string(), Metadata::new())
        {
            tracing::warn!("Failed to record progress: {}", e);
        }
    }

    /// Enter `error`, close the progress run, and build the outcome
    fn fail(&self, message: String, data: Option<Value>) -> OperationOutcome {
        let phase = self.state.state();
        tracing::error!("{} failed: {}", phase, message);
        self.state.fail(message.clone());

        let mut metadata = Metadata::new();
        metadata.insert("failed_phase".into(), json!(phase));
        if let Err(e) = self
            .ledger
            .finish_error(message.clone(), phase.to_string(), metadata)
        {
            tracing::warn!("Failed to record progress: {}", e);
        }
        OperationOutcome::new(OutcomeStatus::Error, message, data)
    }
}

fn status_for(warnings: &[String]) -> OutcomeStatus {
    if warnings.is_empty() {
        OutcomeStatus::Success
    } else {
        OutcomeStatus::Warning
    }
}

/// Non-secret view of the resolved configuration
fn config_summary(resolved: &ResolvedConfig) -> Value {
    json!({
        "target_dir": resolved.target_dir,
        "session_key": resolved.session_key,
        "integration_mode": resolved.integration_mode,
        "remote_validated": resolved.remote_validated,
        "attempts": resolved.attempts,
    })
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn object(value: Value) -> Metadata {
    match value {
        Value::Object(map) => map,
        _ => Metadata::new(),
    }
}
