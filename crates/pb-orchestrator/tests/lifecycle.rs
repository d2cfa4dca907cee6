//! Lifecycle integration tests
//!
//! Drives the orchestrator facade end to end with a scripted command
//! runner, an in-memory store and a canned configuration backend.

use std::fs;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;

use pb_core::config::{BackendConfig, BridgeConfig, ServiceConfig, TimeoutConfig};
use pb_core::error::RemoteFetchError;
use pb_core::progress::ProgressState;
use pb_core::store::{MemoryStore, StoreKey};
use pb_core::traits::{CommandOutput, KeyValueStore};
use pb_core::types::ServiceState;
use pb_orchestrator::platform::{UnixPackageManager, UnixPlatform};
use pb_orchestrator::testing::FakeRunner;
use pb_orchestrator::{
    EnsureOptions, OutcomeStatus, Orchestrator, RemoteConfigSource, RemoteResponse, ResetOptions,
    RuntimePaths, Trigger,
};

const FOLDER: &str = "whatsapp-service";
const CONFIG_URL: &str = "http://backend.test/api/companies/7/whatsapp-config";

/// Backend answering the first candidate URL with a fixed body
struct CannedBackend {
    body: Mutex<String>,
    delay: Duration,
    requests: AtomicUsize,
}

impl CannedBackend {
    fn new(body: serde_json::Value) -> Self {
        Self {
            body: Mutex::new(body.to_string()),
            delay: Duration::ZERO,
            requests: AtomicUsize::new(0),
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteConfigSource for CannedBackend {
    async fn fetch(&self, url: &str, _token: &str) -> Result<RemoteResponse, RemoteFetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if url == CONFIG_URL {
            Ok(RemoteResponse {
                status: 200,
                body: self.body.lock().clone(),
            })
        } else {
            Ok(RemoteResponse {
                status: 404,
                body: String::new(),
            })
        }
    }
}

fn local_payload() -> serde_json::Value {
    json!({
        "data": {
            "sessionKey": "loja-7",
            "token": "svc-token",
            "integrationMode": "fila",
            "queueUrl": "amqp://queue.test"
        }
    })
}

fn free_port() -> u16 {
    let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).unwrap();
    listener.local_addr().unwrap().port()
}

/// Runner where every tool is present and cloning writes a manifest
fn happy_runner() -> Arc<FakeRunner> {
    let runner = Arc::new(FakeRunner::new());
    runner
        .on("git --version", CommandOutput::ok("git version 2.43.0"))
        .on("node --version", CommandOutput::ok("v20.11.1"))
        .on("pnpm --version", CommandOutput::ok("9.1.0"))
        .on_with("git clone", |spec| {
            let target = PathBuf::from(spec.args.last().unwrap());
            fs::create_dir_all(&target).unwrap();
            fs::write(target.join("package.json"), "{}").unwrap();
            Ok(CommandOutput::ok(""))
        })
        .on_with("pnpm install", |spec| {
            let cwd = spec.cwd.clone().unwrap();
            fs::create_dir_all(cwd.join("node_modules")).unwrap();
            Ok(CommandOutput::ok(""))
        });
    runner
}

struct Harness {
    _dir: TempDir,
    target: PathBuf,
    port: u16,
    runner: Arc<FakeRunner>,
    store: Arc<MemoryStore>,
    backend: Arc<CannedBackend>,
    orchestrator: Arc<Orchestrator>,
}

impl Harness {
    fn new(backend: CannedBackend) -> Self {
        Self::with(backend, happy_runner(), |_| {})
    }

    fn with(
        backend: CannedBackend,
        runner: Arc<FakeRunner>,
        tweak: impl FnOnce(&mut BridgeConfig),
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("data").join(FOLDER);
        let port = free_port();

        let mut config = BridgeConfig {
            backend: BackendConfig {
                api_base_url: "http://backend.test/api".to_string(),
                api_token: "api-token".to_string(),
                company_id: "7".to_string(),
            },
            service: ServiceConfig {
                port,
                aux_port: free_port(),
                ..Default::default()
            },
            timeouts: TimeoutConfig {
                launch_grace: Duration::from_millis(50),
                port_recheck_attempts: 2,
                port_recheck_interval: Duration::from_millis(10),
                windows_lock_wait: Duration::ZERO,
                ..Default::default()
            },
        };
        tweak(&mut config);

        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(backend);
        let orchestrator = Orchestrator::builder(config)
            .store(store.clone())
            .runner(runner.clone())
            .platform(Arc::new(UnixPlatform::new(UnixPackageManager::Apt)))
            .remote_source(backend.clone())
            .paths(RuntimePaths::under(dir.path(), target.clone()))
            .build()
            .unwrap();

        Self {
            _dir: dir,
            target,
            port,
            runner,
            store,
            backend,
            orchestrator: Arc::new(orchestrator),
        }
    }
}

#[tokio::test]
async fn test_fresh_install_and_start() {
    let h = Harness::new(CannedBackend::new(local_payload()));

    let outcome = h
        .orchestrator
        .ensure_ready_and_start(EnsureOptions::default())
        .await;

    assert_eq!(outcome.status, OutcomeStatus::Success, "{}", outcome.message);
    assert!(outcome.message.contains("service started"));
    assert_eq!(h.orchestrator.snapshot().state, ServiceState::Running);

    assert!(h.target.join("package.json").exists());
    let env = fs::read_to_string(h.target.join(".env")).unwrap();
    assert!(env.contains(&format!("PORT={}", h.port)));
    assert!(env.contains("SESSION_NAME=loja-7"));

    assert_eq!(h.runner.count("git clone"), 1);
    assert_eq!(h.runner.spawned().len(), 1);

    let progress = h.orchestrator.progress().unwrap();
    assert_eq!(progress.state, ProgressState::Success);
    assert_eq!(progress.percent, 100);
    assert!(!progress.active);

    assert_eq!(
        h.store.get_string(StoreKey::IntegrationMode).as_deref(),
        Some("local")
    );
    assert!(h.store.get(StoreKey::QueueCredentials).is_some());
    assert!(h.store.get(StoreKey::SecondarySyncedAt).is_some());
}

#[tokio::test]
async fn test_existing_install_frees_port_and_relaunches() {
    let h = Harness::new(CannedBackend::new(local_payload()));
    let first = h
        .orchestrator
        .ensure_ready_and_start(EnsureOptions::default())
        .await;
    assert_eq!(first.status, OutcomeStatus::Success);

    // Stand-in for the service process still holding the port
    let service = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, h.port)).unwrap();
    let service = Arc::new(Mutex::new(Some(service)));
    h.runner.on("lsof", CommandOutput::ok("31337\n"));
    let slot = Arc::clone(&service);
    h.runner.on_with("kill -9 31337", move |_| {
        slot.lock().take();
        Ok(CommandOutput::ok(""))
    });

    let second = h
        .orchestrator
        .ensure_ready_and_start(EnsureOptions::default())
        .await;

    assert_eq!(second.status, OutcomeStatus::Success, "{}", second.message);
    assert!(second.message.contains("service started"));
    // Existing installation goes through the updater, not a second clone
    assert_eq!(h.runner.count("git clone"), 1);
    assert_eq!(h.runner.count("kill -9 31337"), 1);
    assert_eq!(h.runner.killed_children(), 1);
    assert_eq!(h.runner.spawned().len(), 2);
    assert_eq!(h.orchestrator.snapshot().state, ServiceState::Running);
}

#[tokio::test]
async fn test_existing_install_with_stuck_port_fails() {
    let h = Harness::new(CannedBackend::new(local_payload()));
    let first = h
        .orchestrator
        .ensure_ready_and_start(EnsureOptions::default())
        .await;
    assert_eq!(first.status, OutcomeStatus::Success);

    let _stuck = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, h.port)).unwrap();
    h.runner.on("lsof", CommandOutput::ok("31337\n"));

    let second = h
        .orchestrator
        .ensure_ready_and_start(EnsureOptions::default())
        .await;

    assert_eq!(second.status, OutcomeStatus::Error);
    assert!(second.message.contains(&format!("Port {} still in use", h.port)));
    assert_eq!(h.runner.count("kill -9 31337"), 2);
    assert_eq!(h.runner.spawned().len(), 1);
    assert_eq!(h.orchestrator.snapshot().state, ServiceState::Error);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_run() {
    let h = Harness::new(CannedBackend::new(local_payload()).slow(Duration::from_millis(150)));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let orchestrator = Arc::clone(&h.orchestrator);
        handles.push(tokio::spawn(async move {
            orchestrator
                .ensure_ready_and_start(EnsureOptions::default())
                .await
        }));
    }

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }

    assert!(outcomes.iter().all(|o| *o == outcomes[0]));
    assert_eq!(outcomes[0].status, OutcomeStatus::Success);
    assert_eq!(h.backend.requests(), 1);
    assert_eq!(h.runner.count("git clone"), 1);
    assert_eq!(h.runner.spawned().len(), 1);
}

#[tokio::test]
async fn test_web_mode_skips_local_start() {
    let h = Harness::new(CannedBackend::new(json!({
        "sessionKey": "loja-7",
        "token": "svc-token",
        "integrationMode": "web"
    })));

    let outcome = h
        .orchestrator
        .ensure_ready_and_start(EnsureOptions::default())
        .await;

    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert!(outcome.message.contains("web"));
    assert_eq!(h.orchestrator.snapshot().state, ServiceState::Idle);
    assert_eq!(h.runner.count("git clone"), 0);
    assert!(h.runner.spawned().is_empty());
    assert_eq!(
        h.store.get_string(StoreKey::IntegrationMode).as_deref(),
        Some("web")
    );
}

#[tokio::test]
async fn test_missing_base_credentials_end_in_error() {
    let h = Harness::with(
        CannedBackend::new(local_payload()),
        happy_runner(),
        |config| config.backend.api_token.clear(),
    );

    let outcome = h
        .orchestrator
        .ensure_ready_and_start(EnsureOptions::default())
        .await;

    assert_eq!(outcome.status, OutcomeStatus::Error);
    assert!(outcome.message.contains("api_token"));
    assert_eq!(h.backend.requests(), 0);

    let snapshot = h.orchestrator.snapshot();
    assert_eq!(snapshot.state, ServiceState::Error);
    assert!(snapshot.last_error.unwrap().contains("api_token"));

    let progress = h.orchestrator.progress().unwrap();
    assert_eq!(progress.state, ProgressState::Error);
    assert_eq!(progress.phase, "checking_config");
}

#[tokio::test]
async fn test_clone_failure_records_failed_phase() {
    let runner = happy_runner();
    runner.on("git clone", CommandOutput::failed(128, "repository not found"));
    let h = Harness::with(CannedBackend::new(local_payload()), runner, |_| {});

    let outcome = h
        .orchestrator
        .ensure_ready_and_start(EnsureOptions::default())
        .await;

    assert_eq!(outcome.status, OutcomeStatus::Error);
    assert!(outcome.message.contains("repository not found"));
    assert_eq!(h.orchestrator.snapshot().state, ServiceState::Error);

    let progress = h.orchestrator.progress().unwrap();
    assert_eq!(progress.state, ProgressState::Error);
    assert_eq!(progress.phase, "cloning_repo");
    assert!(h.runner.spawned().is_empty());
}

#[tokio::test]
async fn test_reset_then_automatic_start_is_skipped() {
    let h = Harness::new(CannedBackend::new(local_payload()));
    let started = h
        .orchestrator
        .ensure_ready_and_start(EnsureOptions::default())
        .await;
    assert_eq!(started.status, OutcomeStatus::Success);

    let reset = h.orchestrator.reset(ResetOptions::default()).await;
    assert_eq!(reset.status, OutcomeStatus::Success, "{}", reset.message);
    assert!(!h.target.exists());
    assert_eq!(h.runner.killed_children(), 1);
    assert_eq!(h.orchestrator.snapshot().state, ServiceState::Idle);
    assert!(h.orchestrator.progress().is_none());
    assert!(h.store.get_bool(StoreKey::UserRemoved));
    assert!(h.store.get(StoreKey::SessionKey).is_none());

    let automatic = h
        .orchestrator
        .ensure_ready_and_start(EnsureOptions::default())
        .await;
    assert_eq!(automatic.status, OutcomeStatus::Skipped);
    assert_eq!(h.runner.count("git clone"), 1);

    let manual = h
        .orchestrator
        .ensure_ready_and_start(EnsureOptions {
            trigger: Trigger::User,
            ..Default::default()
        })
        .await;
    assert_eq!(manual.status, OutcomeStatus::Success, "{}", manual.message);
    assert!(!h.store.get_bool(StoreKey::UserRemoved));
    assert_eq!(h.runner.count("git clone"), 2);
}

#[tokio::test]
async fn test_reinstall_replaces_existing_target() {
    let h = Harness::new(CannedBackend::new(local_payload()));
    let first = h
        .orchestrator
        .ensure_ready_and_start(EnsureOptions::default())
        .await;
    assert_eq!(first.status, OutcomeStatus::Success);
    fs::write(h.target.join("stale.txt"), "old").unwrap();

    let outcome = h
        .orchestrator
        .ensure_ready_and_start(EnsureOptions {
            trigger: Trigger::User,
            reinstall: true,
            overwrite_database: false,
        })
        .await;

    assert_eq!(outcome.status, OutcomeStatus::Success, "{}", outcome.message);
    assert!(!h.target.join("stale.txt").exists());
    assert_eq!(h.runner.count("git clone"), 2);
    // The first child was stopped before its directory was removed
    assert_eq!(h.runner.killed_children(), 1);
}

#[tokio::test]
async fn test_refresh_without_installation_stays_idle() {
    let h = Harness::new(CannedBackend::new(local_payload()));

    let outcome = h.orchestrator.refresh_and_sync().await;

    assert_eq!(outcome.status, OutcomeStatus::Success, "{}", outcome.message);
    assert!(outcome.message.contains("not installed"));
    assert_eq!(h.backend.requests(), 1);
    assert_eq!(h.orchestrator.snapshot().state, ServiceState::Idle);
    assert_eq!(h.runner.count("git clone"), 0);
    assert_eq!(
        h.store.get_string(StoreKey::SessionKey).as_deref(),
        Some("loja-7")
    );
}

#[tokio::test]
async fn test_refresh_applies_changed_configuration() {
    let h = Harness::new(CannedBackend::new(local_payload()));
    let first = h
        .orchestrator
        .ensure_ready_and_start(EnsureOptions::default())
        .await;
    assert_eq!(first.status, OutcomeStatus::Success);

    *h.backend.body.lock() = json!({
        "data": {
            "sessionKey": "loja-7b",
            "token": "svc-token-2",
            "integrationMode": "fila"
        }
    })
    .to_string();

    let outcome = h.orchestrator.refresh_and_sync().await;
    assert_eq!(outcome.status, OutcomeStatus::Success, "{}", outcome.message);

    let env = fs::read_to_string(h.target.join(".env")).unwrap();
    assert!(env.contains("SESSION_NAME=loja-7b"));
    assert!(env.contains("SECRET_KEY=svc-token-2"));
    assert_eq!(h.backend.requests(), 2);
    assert_eq!(h.runner.count("git clone"), 1);
    // The old process was stopped so the new environment takes effect
    assert_eq!(h.runner.killed_children(), 1);
    assert_eq!(h.runner.spawned().len(), 2);
}

#[tokio::test]
async fn test_status_reflects_installation() {
    let h = Harness::new(CannedBackend::new(local_payload()));
    let before = h.orchestrator.status();
    assert!(!before.installed);
    assert_eq!(before.port, h.port);
    assert!(!before.user_removed);

    h.orchestrator
        .ensure_ready_and_start(EnsureOptions::default())
        .await;

    let after = h.orchestrator.status();
    assert!(after.installed);
    assert_eq!(after.target_dir, h.target);
    assert_eq!(after.state.state, ServiceState::Running);
    assert!(after.progress.is_some());
}
