//! Persisted key-value state
//!
//! `JsonFileStore` keeps every key in one JSON document and replaces the
//! file with a rename on each write. `MemoryStore` backs tests.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::traits::KeyValueStore;

/// Keys the orchestrator persists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKey {
    TargetDir,
    SessionKey,
    ServiceToken,
    EnvContent,
    IntegrationMode,
    RemoteValidated,
    RemoteValidatedAt,
    LastRemoteSyncAt,
    RemoteFailedAt,
    Progress,
    UserRemoved,
    QueueCredentials,
    SecondarySyncedAt,
}

impl StoreKey {
    /// Every key owned by the orchestrator (cleared together on reset)
    pub fn orchestrator_keys() -> &'static [StoreKey] {
        &[
            StoreKey::TargetDir,
            StoreKey::SessionKey,
            StoreKey::ServiceToken,
            StoreKey::EnvContent,
            StoreKey::IntegrationMode,
            StoreKey::RemoteValidated,
            StoreKey::RemoteValidatedAt,
            StoreKey::LastRemoteSyncAt,
            StoreKey::RemoteFailedAt,
            StoreKey::Progress,
            StoreKey::UserRemoved,
            StoreKey::QueueCredentials,
            StoreKey::SecondarySyncedAt,
        ]
    }

    /// Name used in the persisted document
    pub fn as_str(self) -> &'static str {
        match self {
            StoreKey::TargetDir => "target_dir",
            StoreKey::SessionKey => "session_key",
            StoreKey::ServiceToken => "service_token",
            StoreKey::EnvContent => "env_content",
            StoreKey::IntegrationMode => "integration_mode",
            StoreKey::RemoteValidated => "remote_validated",
            StoreKey::RemoteValidatedAt => "remote_validated_at",
            StoreKey::LastRemoteSyncAt => "last_remote_sync_at",
            StoreKey::RemoteFailedAt => "remote_failed_at",
            StoreKey::Progress => "progress",
            StoreKey::UserRemoved => "user_removed",
            StoreKey::QueueCredentials => "queue_credentials",
            StoreKey::SecondarySyncedAt => "secondary_synced_at",
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Store backed by a single JSON file
pub struct JsonFileStore {
    path: PathBuf,
    cache: RwLock<Map<String, Value>>,
    /// Serializes writers so concurrent sets don't lose updates
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`
    ///
    /// A document that does not parse is moved aside and the store starts
    /// empty, so a damaged file never locks out recovery commands.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let cache = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Map::new(),
            Ok(content) => match serde_json::from_str::<Value>(&content) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    tracing::warn!("Store {:?} is not a JSON object, starting empty", path);
                    Map::new()
                }
                Err(e) => {
                    let backup = path.with_extension("json.corrupt");
                    tracing::warn!(
                        "Store {:?} is corrupt ({}), starting empty; old copy kept at {:?}",
                        path,
                        e,
                        backup
                    );
                    if let Err(e) = fs::rename(&path, &backup) {
                        tracing::warn!("Failed to keep corrupt store copy: {}", e);
                    }
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        Ok(Self {
            path,
            cache: RwLock::new(cache),
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, map: &Map<String, Value>) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(map)?;
        {
            let mut file = fs::File::create(&tmp).map_err(io_err)?;
            file.write_all(&content).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }

    fn update<F>(&self, apply: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut Map<String, Value>) -> bool,
    {
        let _guard = self.write_lock.lock();
        let mut next = self.cache.read().clone();
        let changed = apply(&mut next);
        if changed {
            self.persist(&next)?;
            *self.cache.write() = next;
        }
        Ok(changed)
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: StoreKey) -> Option<Value> {
        self.cache.read().get(key.as_str()).cloned()
    }

    fn set(&self, key: StoreKey, value: Value) -> Result<(), StoreError> {
        self.update(|map| {
            map.insert(key.as_str().to_string(), value);
            true
        })
        .map(|_| ())
    }

    fn remove(&self, key: StoreKey) -> Result<bool, StoreError> {
        self.update(|map| map.remove(key.as_str()).is_some())
    }

    fn remove_many(&self, keys: &[StoreKey]) -> Result<usize, StoreError> {
        let mut removed = 0;
        self.update(|map| {
            removed = keys
                .iter()
                .filter(|key| map.remove(key.as_str()).is_some())
                .count();
            removed > 0
        })?;
        Ok(removed)
    }
}

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    values: DashMap<StoreKey, Value>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: StoreKey) -> Option<Value> {
        self.values.get(&key).map(|v| v.value().clone())
    }

    fn set(&self, key: StoreKey, value: Value) -> Result<(), StoreError> {
        self.values.insert(key, value);
        Ok(())
    }

    fn remove(&self, key: StoreKey) -> Result<bool, StoreError> {
        Ok(self.values.remove(&key).is_some())
    }

    fn remove_many(&self, keys: &[StoreKey]) -> Result<usize, StoreError> {
        let before = self.values.len();
        self.values.retain(|key, _| !keys.contains(key));
        Ok(before - self.values.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let store = JsonFileStore::open(&path).unwrap();
        store.set(StoreKey::SessionKey, json!("loja-01")).unwrap();
        store.set(StoreKey::UserRemoved, json!(true)).unwrap();
        drop(store);

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get_string(StoreKey::SessionKey).as_deref(), Some("loja-01"));
        assert!(store.get_bool(StoreKey::UserRemoved));
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn test_file_store_remove() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("state.json")).unwrap();
        store.set(StoreKey::ServiceToken, json!("secret")).unwrap();

        assert!(store.remove(StoreKey::ServiceToken).unwrap());
        assert!(!store.remove(StoreKey::ServiceToken).unwrap());
        assert!(store.get(StoreKey::ServiceToken).is_none());
    }

    #[test]
    fn test_file_store_remove_many_is_one_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let store = JsonFileStore::open(&path).unwrap();
        store.set(StoreKey::SessionKey, json!("loja")).unwrap();
        store.set(StoreKey::ServiceToken, json!("secret")).unwrap();
        store.set(StoreKey::UserRemoved, json!(true)).unwrap();

        let removed = store
            .remove_many(&[StoreKey::SessionKey, StoreKey::ServiceToken, StoreKey::EnvContent])
            .unwrap();
        assert_eq!(removed, 2);
        assert!(store.get(StoreKey::SessionKey).is_none());
        assert!(store.get_bool(StoreKey::UserRemoved));

        let reopened = JsonFileStore::open(&path).unwrap();
        assert!(reopened.get(StoreKey::ServiceToken).is_none());
        assert!(reopened.get_bool(StoreKey::UserRemoved));
    }

    #[test]
    fn test_failed_remove_many_keeps_every_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let store = JsonFileStore::open(&path).unwrap();
        store.set(StoreKey::SessionKey, json!("loja")).unwrap();
        store.set(StoreKey::ServiceToken, json!("secret")).unwrap();

        // A directory in place of the temp file makes the write fail
        fs::create_dir_all(path.with_extension("json.tmp")).unwrap();
        assert!(store
            .remove_many(&[StoreKey::SessionKey, StoreKey::ServiceToken])
            .is_err());
        assert_eq!(store.get_string(StoreKey::SessionKey).as_deref(), Some("loja"));
        assert_eq!(store.get_string(StoreKey::ServiceToken).as_deref(), Some("secret"));
    }

    #[test]
    fn test_memory_store_remove_many() {
        let store = MemoryStore::new();
        store.set(StoreKey::SessionKey, json!("loja")).unwrap();
        store.set(StoreKey::Progress, json!({})).unwrap();
        store.set(StoreKey::UserRemoved, json!(true)).unwrap();

        assert_eq!(
            store
                .remove_many(&[StoreKey::SessionKey, StoreKey::Progress, StoreKey::TargetDir])
                .unwrap(),
            2
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_corrupt_document_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert!(store.get(StoreKey::SessionKey).is_none());
        assert_eq!(
            fs::read_to_string(dir.path().join("state.json.corrupt")).unwrap(),
            "{not json"
        );

        store.set(StoreKey::UserRemoved, json!(true)).unwrap();
        let reopened = JsonFileStore::open(&path).unwrap();
        assert!(reopened.get_bool(StoreKey::UserRemoved));
    }

    #[test]
    fn test_blank_strings_read_as_absent() {
        let store = MemoryStore::new();
        store.set(StoreKey::EnvContent, json!("   ")).unwrap();
        assert!(store.get_string(StoreKey::EnvContent).is_none());
        assert!(store.get(StoreKey::EnvContent).is_some());
    }

    #[test]
    fn test_orchestrator_keys_are_unique() {
        let keys = StoreKey::orchestrator_keys();
        let mut names: Vec<_> = keys.iter().map(|k| k.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), keys.len());
    }

    #[test]
    fn test_key_names_match_serde() {
        for key in StoreKey::orchestrator_keys() {
            assert_eq!(serde_json::to_value(key).unwrap(), json!(key.as_str()));
        }
    }
}
