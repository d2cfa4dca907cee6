//! Progress ledger
//!
//! A single persisted record describing the current (or last) lifecycle
//! run. Pollers read it through the store, so every update replaces the
//! whole record.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::serde_utils::null_as_default;
use crate::error::StoreError;
use crate::store::StoreKey;
use crate::time::current_time_millis;
use crate::traits::KeyValueStore;
use crate::types::Metadata;

/// How long a finished success record stays visible
pub const SUCCESS_VISIBILITY: Duration = Duration::from_secs(15 * 60);

/// Outcome of a progress run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressState {
    Running,
    Success,
    Error,
}

/// The persisted progress record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Identifies one continuous run
    pub run_id: String,
    /// False once the run has finished
    pub active: bool,
    pub state: ProgressState,
    pub phase: String,
    pub message: String,
    /// Never decreases while `active`
    pub percent: u8,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: Metadata,
    pub started_at: u64,
    pub updated_at: u64,
    pub finished_at: Option<u64>,
}

impl ProgressRecord {
    /// Whether pollers should still display this record at `now`
    pub fn is_visible_at(&self, now: u64) -> bool {
        if self.active || self.state != ProgressState::Success {
            return true;
        }
        let finished = self.finished_at.unwrap_or(self.updated_at);
        now.saturating_sub(finished) <= SUCCESS_VISIBILITY.as_millis() as u64
    }
}

/// Writes the progress record through a `KeyValueStore`
pub struct ProgressLedger {
    store: Arc<dyn KeyValueStore>,
    /// Serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl ProgressLedger {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Begin a new run, superseding any previous record
    pub fn start(
        &self,
        message: impl Into<String>,
        phase: impl Into<String>,
        metadata: Metadata,
    ) -> Result<ProgressRecord, StoreError> {
        let _guard = self.lock.lock();
        let now = current_time_millis();
        let record = ProgressRecord {
            run_id: Uuid::new_v4().to_string(),
            active: true,
            state: ProgressState::Running,
            phase: phase.into(),
            message: message.into(),
            percent: 0,
            metadata,
            started_at: now,
            updated_at: now,
            finished_at: None,
        };
        self.write(&record)?;
        Ok(record)
    }

    /// Record a step of the active run
    ///
    /// Starts a run implicitly when none is active. `percent` is clamped so
    /// it never moves backwards within the run.
    pub fn step(
        &self,
        message: impl Into<String>,
        phase: impl Into<String>,
        percent: u8,
        metadata: Metadata,
    ) -> Result<ProgressRecord, StoreError> {
        let _guard = self.lock.lock();
        let now = current_time_millis();
        let record = match self.read().filter(|r| r.active) {
            Some(mut record) => {
                record.phase = phase.into();
                record.message = message.into();
                record.percent = record.percent.max(percent.min(100));
                record.metadata.extend(metadata);
                record.updated_at = now;
                record
            }
            None => ProgressRecord {
                run_id: Uuid::new_v4().to_string(),
                active: true,
                state: ProgressState::Running,
                phase: phase.into(),
                message: message.into(),
                percent: percent.min(100),
                metadata,
                started_at: now,
                updated_at: now,
                finished_at: None,
            },
        };
        self.write(&record)?;
        Ok(record)
    }

    /// Close the run as successful
    pub fn finish_success(
        &self,
        message: impl Into<String>,
        phase: impl Into<String>,
        metadata: Metadata,
    ) -> Result<ProgressRecord, StoreError> {
        self.finish(ProgressState::Success, message.into(), phase.into(), metadata)
    }

    /// Close the run as failed
    pub fn finish_error(
        &self,
        message: impl Into<String>,
        phase: impl Into<String>,
        metadata: Metadata,
    ) -> Result<ProgressRecord, StoreError> {
        self.finish(ProgressState::Error, message.into(), phase.into(), metadata)
    }

    /// Delete the record
    pub fn clear(&self) -> Result<bool, StoreError> {
        let _guard = self.lock.lock();
        self.store.remove(StoreKey::Progress)
    }

    /// Raw current record, if any
    pub fn current(&self) -> Option<ProgressRecord> {
        self.read()
    }

    /// Current record unless it has auto-hidden by `now`
    pub fn visible_at(&self, now: u64) -> Option<ProgressRecord> {
        self.read().filter(|r| r.is_visible_at(now))
    }

    fn finish(
        &self,
        state: ProgressState,
        message: String,
        phase: String,
        metadata: Metadata,
    ) -> Result<ProgressRecord, StoreError> {
        let _guard = self.lock.lock();
        let now = current_time_millis();
        let mut record = match self.read().filter(|r| r.active) {
            Some(record) => record,
            None => ProgressRecord {
                run_id: Uuid::new_v4().to_string(),
                active: true,
                state: ProgressState::Running,
                phase: String::new(),
                message: String::new(),
                percent: 0,
                metadata: Metadata::new(),
                started_at: now,
                updated_at: now,
                finished_at: None,
            },
        };

        record.active = false;
        record.state = state;
        record.phase = phase;
        record.message = message;
        record.metadata.extend(metadata);
        if state == ProgressState::Success {
            record.percent = 100;
        }
        record.updated_at = now;
        record.finished_at = Some(now);

        self.write(&record)?;
        Ok(record)
    }

    fn read(&self) -> Option<ProgressRecord> {
        let value = self.store.get(StoreKey::Progress)?;
        match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Ignoring unreadable progress record: {}", e);
                None
            }
        }
    }

    fn write(&self, record: &ProgressRecord) -> Result<(), StoreError> {
        let value = serde_json::to_value(record)?;
        self.store.set(StoreKey::Progress, value)
    }
}
