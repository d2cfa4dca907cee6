//! Key-value persistence trait

use serde_json::Value;

use crate::error::StoreError;
use crate::store::StoreKey;

/// Opaque get/set store for orchestrator state
///
/// Implementations must replace values atomically: a reader sees either the
/// previous or the new value, never a partial write.
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    fn get(&self, key: StoreKey) -> Option<Value>;

    /// Write a value
    fn set(&self, key: StoreKey, value: Value) -> Result<(), StoreError>;

    /// Delete a value; returns whether it existed
    fn remove(&self, key: StoreKey) -> Result<bool, StoreError>;

    /// Delete several values in one atomic write; returns how many existed
    ///
    /// Either every key is removed or, on error, none is.
    fn remove_many(&self, keys: &[StoreKey]) -> Result<usize, StoreError>;

    /// Read a string value, treating blanks as absent
    fn get_string(&self, key: StoreKey) -> Option<String> {
        self.get(key)
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.trim().is_empty())
    }

    /// Read a boolean value (missing is false)
    fn get_bool(&self, key: StoreKey) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// Read a millisecond timestamp
    fn get_millis(&self, key: StoreKey) -> Option<u64> {
        self.get(key).and_then(|v| v.as_u64())
    }
}
