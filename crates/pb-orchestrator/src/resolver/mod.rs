//! Config resolver
//!
//! Merges the locally cached service credentials with a freshly fetched
//! remote configuration.
//!
//! # Algorithm
//!
//! 1. The three backend base values must be configured, otherwise nothing
//!    else happens.
//! 2. The remote API is consulted when forced, when the cached session or
//!    token is missing, or when the last successful sync is stale. A stale
//!    cache is not refetched within `remote_retry` of a failed fetch.
//! 3. Candidate endpoints are tried in order until one answers 2xx with a
//!    body holding both a session and a token. Every attempt is recorded.
//! 4. Remote values win over cached ones; a failed fetch falls back to the
//!    cache with `remote_validated = false`.
//! 5. A missing environment file is synthesized from port, session and
//!    token.
//! 6. The merged result is persisted only when it is usable.

mod payload;
mod remote;

pub use payload::{flatten, normalize_key, parse_bool_like, RemotePayload};
pub use remote::{candidate_urls, HttpConfigSource, RemoteConfigSource, RemoteResponse};

use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

use pb_core::config::{BackendConfig, ServiceConfig, TimeoutConfig};
use pb_core::error::{ConfigError, RemoteFetchError};
use pb_core::store::StoreKey;
use pb_core::time::{current_time_millis, is_stale};
use pb_core::traits::KeyValueStore;
use pb_core::types::{FetchAttempt, IntegrationMode, QueueCredentials, ResolvedConfig};

/// Build the default environment file for a session
pub fn default_env_content(port: u16, session_key: &str, service_token: &str) -> String {
    format!(
        "PORT={}\nSESSION_NAME={}\nSECRET_KEY={}\n",
        port, session_key, service_token
    )
}

/// Values read back from the store
#[derive(Debug, Default)]
struct Cached {
    target_dir: Option<PathBuf>,
    session_key: Option<String>,
    service_token: Option<String>,
    env_content: Option<String>,
    integration_mode: Option<IntegrationMode>,
    remote_validated: bool,
    remote_validated_at: Option<u64>,
    last_remote_sync_at: Option<u64>,
    remote_failed_at: Option<u64>,
    queue: QueueCredentials,
}

/// Resolves the service configuration from cache and remote API
pub struct ConfigResolver {
    backend: BackendConfig,
    service: ServiceConfig,
    timeouts: TimeoutConfig,
    default_target: PathBuf,
    store: Arc<dyn KeyValueStore>,
    source: Arc<dyn RemoteConfigSource>,
}

impl ConfigResolver {
    pub fn new(
        backend: BackendConfig,
        service: ServiceConfig,
        timeouts: TimeoutConfig,
        default_target: PathBuf,
        store: Arc<dyn KeyValueStore>,
        source: Arc<dyn RemoteConfigSource>,
    ) -> Self {
        Self {
            backend,
            service,
            timeouts,
            default_target,
            store,
            source,
        }
    }

    /// Target directory: configured override, then cached, then platform default
    pub fn target_dir(&self) -> PathBuf {
        self.service
            .install_dir
            .clone()
            .or_else(|| self.store.get_string(StoreKey::TargetDir).map(PathBuf::from))
            .unwrap_or_else(|| self.default_target.clone())
    }

    /// Produce the merged configuration
    ///
    /// Returns `ConfigError::MissingBase` before any network or store access
    /// when a backend value is blank, and `ConfigError::Unresolved` (with no
    /// side effects) when neither source yields a session and token.
    pub async fn prepare_config(&self, force_remote: bool) -> Result<ResolvedConfig, ConfigError> {
        if let Some(field) = self.backend.missing_field() {
            return Err(ConfigError::MissingBase(field));
        }

        let cached = self.read_cache();
        let now = current_time_millis();
        let backing_off = !is_stale(cached.remote_failed_at, self.timeouts.remote_retry, now);
        let sync_due =
            is_stale(cached.last_remote_sync_at, self.timeouts.remote_refresh, now) && !backing_off;
        let should_fetch = force_remote
            || cached.session_key.is_none()
            || cached.service_token.is_none()
            || sync_due;

        let mut attempts = Vec::new();
        let remote = if should_fetch {
            match self.fetch_remote(&mut attempts).await {
                Ok(payload) => Some(payload),
                Err(e) => {
                    tracing::warn!("Remote configuration unavailable, using cache: {}", e);
                    None
                }
            }
        } else {
            if backing_off {
                tracing::debug!("Remote configuration failed recently, using cache");
            } else {
                tracing::debug!("Cached service configuration is fresh, skipping remote fetch");
            }
            None
        };

        let fetch_failed = should_fetch && remote.is_none();
        let resolved = self.merge(cached, remote, should_fetch, attempts, now)?;
        self.persist(&resolved)?;
        if fetch_failed {
            self.store.set(StoreKey::RemoteFailedAt, json!(now))?;
        } else if should_fetch {
            self.store.remove(StoreKey::RemoteFailedAt)?;
        }
        Ok(resolved)
    }

    fn read_cache(&self) -> Cached {
        let store = &self.store;
        Cached {
            target_dir: store.get_string(StoreKey::TargetDir).map(PathBuf::from),
            session_key: store.get_string(StoreKey::SessionKey),
            service_token: store.get_string(StoreKey::ServiceToken),
            env_content: store.get_string(StoreKey::EnvContent),
            integration_mode: store
                .get_string(StoreKey::IntegrationMode)
                .and_then(|m| IntegrationMode::parse_keyword(&m)),
            remote_validated: store.get_bool(StoreKey::RemoteValidated),
            remote_validated_at: store.get_millis(StoreKey::RemoteValidatedAt),
            last_remote_sync_at: store.get_millis(StoreKey::LastRemoteSyncAt),
            remote_failed_at: store.get_millis(StoreKey::RemoteFailedAt),
            queue: store
                .get(StoreKey::QueueCredentials)
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
        }
    }

    async fn fetch_remote(
        &self,
        attempts: &mut Vec<FetchAttempt>,
    ) -> Result<RemotePayload, RemoteFetchError> {
        let urls = candidate_urls(self.backend.base_url(), &self.backend.company_id);

        for url in urls {
            let mut attempt = FetchAttempt {
                url: url.clone(),
                status: None,
                error: None,
                accepted: false,
            };

            match self.source.fetch(&url, self.backend.api_token.trim()).await {
                Ok(response) => {
                    attempt.status = Some(response.status);
                    if !response.is_success() {
                        attempt.error = Some(format!("HTTP {}", response.status));
                    } else {
                        match RemotePayload::parse(&response.body) {
                            Some(payload) if payload.is_usable() => {
                                attempt.accepted = true;
                                attempts.push(attempt);
                                tracing::info!("Remote configuration loaded from {}", url);
                                return Ok(payload);
                            }
                            Some(_) => {
                                attempt.error = Some("response lacks session or token".to_string())
                            }
                            None => attempt.error = Some("response is not JSON".to_string()),
                        }
                    }
                }
                Err(e) => attempt.error = Some(e.to_string()),
            }

            tracing::debug!("Config endpoint {} rejected: {:?}", url, attempt.error);
            attempts.push(attempt);
        }

        Err(RemoteFetchError::Exhausted {
            attempts: attempts.len(),
        })
    }

    fn merge(
        &self,
        cached: Cached,
        remote: Option<RemotePayload>,
        fetched: bool,
        attempts: Vec<FetchAttempt>,
        now: u64,
    ) -> Result<ResolvedConfig, ConfigError> {
        let target_dir = self
            .service
            .install_dir
            .clone()
            .or(cached.target_dir)
            .unwrap_or_else(|| self.default_target.clone());

        let (session, token, env, mode, queue, validated, validated_at, synced_at) = match remote {
            Some(payload) => {
                // A cached env generated from the previous identity is rebuilt
                let generated = match (&cached.session_key, &cached.service_token) {
                    (Some(s), Some(t)) => Some(default_env_content(self.service.port, s, t)),
                    _ => None,
                };
                let cached_env = cached
                    .env_content
                    .filter(|env| Some(env) != generated.as_ref());
                let mode = match payload.run_locally {
                    Some(true) => IntegrationMode::Local,
                    Some(false) if payload.integration_mode.is_none() => IntegrationMode::Web,
                    _ => IntegrationMode::normalize(
                        payload.integration_mode.as_deref(),
                        cached.integration_mode,
                    ),
                };
                let queue = QueueCredentials {
                    url: payload.queue.url.or(cached.queue.url),
                    username: payload.queue.username.or(cached.queue.username),
                    password: payload.queue.password.or(cached.queue.password),
                };
                (
                    payload.session_key,
                    payload.service_token,
                    payload.env_content.or(cached_env),
                    mode,
                    queue,
                    true,
                    Some(now),
                    Some(now),
                )
            }
            None => (
                cached.session_key,
                cached.service_token,
                cached.env_content,
                cached.integration_mode.unwrap_or_default(),
                cached.queue,
                // A failed fetch invalidates the previous validation
                cached.remote_validated && !fetched,
                cached.remote_validated_at,
                cached.last_remote_sync_at,
            ),
        };

        let (session_key, service_token) = match (session, token) {
            (Some(s), Some(t)) => (s, t),
            _ => return Err(ConfigError::Unresolved(unresolved_reason(&attempts))),
        };

        let env_content = env.unwrap_or_else(|| {
            default_env_content(self.service.port, &session_key, &service_token)
        });

        Ok(ResolvedConfig {
            target_dir,
            session_key,
            service_token,
            env_content,
            integration_mode: mode,
            remote_validated: validated,
            remote_validated_at: validated_at,
            last_remote_sync_at: synced_at,
            queue,
            attempts,
        })
    }

    fn persist(&self, resolved: &ResolvedConfig) -> Result<(), ConfigError> {
        let store = &self.store;
        store.set(
            StoreKey::TargetDir,
            json!(resolved.target_dir.to_string_lossy()),
        )?;
        store.set(StoreKey::SessionKey, json!(resolved.session_key))?;
        store.set(StoreKey::ServiceToken, json!(resolved.service_token))?;
        store.set(StoreKey::EnvContent, json!(resolved.env_content))?;
        store.set(StoreKey::RemoteValidated, json!(resolved.remote_validated))?;
        if let Some(at) = resolved.remote_validated_at {
            store.set(StoreKey::RemoteValidatedAt, json!(at))?;
        }
        if let Some(at) = resolved.last_remote_sync_at {
            store.set(StoreKey::LastRemoteSyncAt, json!(at))?;
        }
        Ok(())
    }
}

fn unresolved_reason(attempts: &[FetchAttempt]) -> String {
    if attempts.is_empty() {
        return "no cached session or token".to_string();
    }
    let tried: Vec<String> = attempts
        .iter()
        .map(|a| match (&a.status, &a.error) {
            (Some(status), _) => format!("{} -> {}", a.url, status),
            (None, Some(err)) => format!("{} -> {}", a.url, err),
            (None, None) => a.url.clone(),
        })
        .collect();
    format!("{} endpoint(s) tried: {}", attempts.len(), tried.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pb_core::store::MemoryStore;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Serves canned responses by URL; unknown URLs answer 404
    #[derive(Default)]
    struct ScriptedSource {
        responses: HashMap<String, RemoteResponse>,
        requests: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedSource {
        fn with(mut self, url: &str, status: u16, body: &str) -> Self {
            self.responses.insert(
                url.to_string(),
                RemoteResponse {
                    status,
                    body: body.to_string(),
                },
            );
            self
        }

        fn request_count(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl RemoteConfigSource for ScriptedSource {
        async fn fetch(&self, url: &str, token: &str) -> Result<RemoteResponse, RemoteFetchError> {
            self.requests.lock().push((url.to_string(), token.to_string()));
            Ok(self.responses.get(url).cloned().unwrap_or(RemoteResponse {
                status: 404,
                body: "not found".to_string(),
            }))
        }
    }

    const BASE: &str = "http://backend.test/api";

    fn backend() -> BackendConfig {
        BackendConfig {
            api_base_url: BASE.to_string(),
            api_token: "api-token".to_string(),
            company_id: "7".to_string(),
        }
    }

    fn resolver(
        source: ScriptedSource,
        store: Arc<MemoryStore>,
        backend: BackendConfig,
    ) -> (ConfigResolver, Arc<ScriptedSource>) {
        let source = Arc::new(source);
        let resolver = ConfigResolver::new(
            backend,
            ServiceConfig::default(),
            TimeoutConfig::default(),
            PathBuf::from("/opt/pdv-bridge/whatsapp-service"),
            store,
            source.clone(),
        );
        (resolver, source)
    }

    #[tokio::test]
    async fn test_missing_base_value_makes_no_requests() {
        let store = Arc::new(MemoryStore::new());
        let mut backend = backend();
        backend.company_id = "  ".to_string();
        let (resolver, source) = resolver(ScriptedSource::default(), store.clone(), backend);

        let err = resolver.prepare_config(true).await.unwrap_err();
        assert!(matches!(err, ConfigError::MissingBase("company_id")));
        assert_eq!(source.request_count(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_all_endpoints_404_with_empty_cache_is_unresolved() {
        let store = Arc::new(MemoryStore::new());
        let (resolver, source) = resolver(ScriptedSource::default(), store.clone(), backend());

        let err = resolver.prepare_config(false).await.unwrap_err();
        assert!(matches!(err, ConfigError::Unresolved(_)));
        assert!(err.to_string().starts_with("nao foi possivel obter"));
        assert_eq!(source.request_count(), 5);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_falls_through_to_query_variant() {
        let store = Arc::new(MemoryStore::new());
        let source = ScriptedSource::default()
            .with(&format!("{}/company/7/whatsapp-config", BASE), 200, r#"{"data":{}}"#)
            .with(
                &format!("{}/whatsapp-config?company_id=7", BASE),
                200,
                r#"{"data":{"sessionKey":"loja-7","token":"svc","integrationMode":"cloud"}}"#,
            );
        let (resolver, source) = resolver(source, store.clone(), backend());

        let resolved = resolver.prepare_config(false).await.unwrap();
        assert_eq!(resolved.session_key, "loja-7");
        assert_eq!(resolved.service_token, "svc");
        assert_eq!(resolved.integration_mode, IntegrationMode::Web);
        assert!(resolved.remote_validated);
        assert_eq!(resolved.env_content, default_env_content(21465, "loja-7", "svc"));

        assert_eq!(resolved.attempts.len(), 3);
        assert_eq!(resolved.attempts[0].status, Some(404));
        assert!(!resolved.attempts[1].accepted);
        assert!(resolved.attempts[2].accepted);
        assert_eq!(source.request_count(), 3);
        assert!(source.requests.lock().iter().all(|(_, t)| t == "api-token"));

        assert_eq!(store.get_string(StoreKey::SessionKey).as_deref(), Some("loja-7"));
        assert!(store.get_bool(StoreKey::RemoteValidated));
        assert!(store.get_millis(StoreKey::LastRemoteSyncAt).is_some());
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_remote() {
        let store = Arc::new(MemoryStore::new());
        store.set(StoreKey::SessionKey, json!("cached")).unwrap();
        store.set(StoreKey::ServiceToken, json!("tok")).unwrap();
        store.set(StoreKey::EnvContent, json!("PORT=1\n")).unwrap();
        store.set(StoreKey::RemoteValidated, json!(true)).unwrap();
        store
            .set(StoreKey::LastRemoteSyncAt, json!(current_time_millis()))
            .unwrap();
        let (resolver, source) = resolver(ScriptedSource::default(), store, backend());

        let resolved = resolver.prepare_config(false).await.unwrap();
        assert_eq!(source.request_count(), 0);
        assert_eq!(resolved.session_key, "cached");
        assert_eq!(resolved.env_content, "PORT=1\n");
        assert!(resolved.remote_validated);
        assert!(resolved.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_failed_fetch_falls_back_to_cache() {
        let store = Arc::new(MemoryStore::new());
        store.set(StoreKey::SessionKey, json!("cached")).unwrap();
        store.set(StoreKey::ServiceToken, json!("tok")).unwrap();
        store.set(StoreKey::RemoteValidated, json!(true)).unwrap();
        store.set(StoreKey::IntegrationMode, json!("web")).unwrap();
        let (resolver, source) = resolver(ScriptedSource::default(), store.clone(), backend());

        let resolved = resolver.prepare_config(true).await.unwrap();
        assert_eq!(source.request_count(), 5);
        assert_eq!(resolved.session_key, "cached");
        assert_eq!(resolved.integration_mode, IntegrationMode::Web);
        assert!(!resolved.remote_validated);
        assert!(!store.get_bool(StoreKey::RemoteValidated));
        assert!(store.get_millis(StoreKey::RemoteFailedAt).is_some());
    }

    #[tokio::test]
    async fn test_recent_failure_defers_stale_refetch() {
        let store = Arc::new(MemoryStore::new());
        store.set(StoreKey::SessionKey, json!("cached")).unwrap();
        store.set(StoreKey::ServiceToken, json!("tok")).unwrap();
        let (resolver, source) = resolver(ScriptedSource::default(), store.clone(), backend());

        // No sync on record, so the cache is stale and the backend is tried
        resolver.prepare_config(false).await.unwrap();
        assert_eq!(source.request_count(), 5);

        let resolved = resolver.prepare_config(false).await.unwrap();
        assert_eq!(source.request_count(), 5);
        assert_eq!(resolved.session_key, "cached");
        assert!(resolved.attempts.is_empty());

        // An explicit refresh ignores the pause
        resolver.prepare_config(true).await.unwrap();
        assert_eq!(source.request_count(), 10);
    }

    #[tokio::test]
    async fn test_stale_cache_refetches_and_remote_wins() {
        let store = Arc::new(MemoryStore::new());
        store.set(StoreKey::SessionKey, json!("old")).unwrap();
        store.set(StoreKey::ServiceToken, json!("old-token")).unwrap();
        store.set(StoreKey::EnvContent, json!("PORT=9\n")).unwrap();
        let stale = current_time_millis() - Duration::from_secs(301).as_millis() as u64;
        store.set(StoreKey::LastRemoteSyncAt, json!(stale)).unwrap();
        store.set(StoreKey::RemoteFailedAt, json!(stale)).unwrap();

        let source = ScriptedSource::default().with(
            &format!("{}/companies/7/whatsapp-config", BASE),
            200,
            r#"{"session":"new","secret_key":"new-token","run_locally":"sim"}"#,
        );
        let (resolver, _) = resolver(source, store.clone(), backend());

        let resolved = resolver.prepare_config(false).await.unwrap();
        assert_eq!(resolved.session_key, "new");
        assert_eq!(resolved.service_token, "new-token");
        // Remote had no env, cached content is kept
        assert_eq!(resolved.env_content, "PORT=9\n");
        assert_eq!(resolved.integration_mode, IntegrationMode::Local);
        assert!(resolved.last_remote_sync_at.unwrap() > stale);
        assert!(store.get(StoreKey::RemoteFailedAt).is_none());
    }

    #[tokio::test]
    async fn test_generated_env_follows_new_identity() {
        let store = Arc::new(MemoryStore::new());
        store.set(StoreKey::SessionKey, json!("old")).unwrap();
        store.set(StoreKey::ServiceToken, json!("old-token")).unwrap();
        store
            .set(
                StoreKey::EnvContent,
                json!(default_env_content(21465, "old", "old-token")),
            )
            .unwrap();

        let source = ScriptedSource::default().with(
            &format!("{}/companies/7/whatsapp-config", BASE),
            200,
            r#"{"sessionKey":"new","token":"new-token"}"#,
        );
        let (resolver, _) = resolver(source, store, backend());

        let resolved = resolver.prepare_config(true).await.unwrap();
        assert_eq!(
            resolved.env_content,
            default_env_content(21465, "new", "new-token")
        );
    }

    #[test]
    fn test_target_dir_precedence() {
        let store = Arc::new(MemoryStore::new());
        let (resolver, _) = resolver(ScriptedSource::default(), store.clone(), backend());
        assert_eq!(
            resolver.target_dir(),
            PathBuf::from("/opt/pdv-bridge/whatsapp-service")
        );

        store
            .set(StoreKey::TargetDir, json!("/srv/whatsapp-service"))
            .unwrap();
        assert_eq!(resolver.target_dir(), PathBuf::from("/srv/whatsapp-service"));
    }
}
