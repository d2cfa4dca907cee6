//! Lifecycle state machine
//!
//! Holds the single `OrchestrationState` value. Transitions are validated
//! against `ServiceState::allowed_targets`; observers are notified
//! synchronously and a copy of every change is broadcast to async
//! subscribers.
//!
//! # Observers
//!
//! An observer that returns an error or panics is logged and skipped. It
//! never aborts the transition or prevents the remaining observers from
//! running.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::time::current_time_millis;
use crate::types::{Metadata, ServiceState};

/// Capacity of the broadcast channel for state changes
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Message used when entering `error` without one
const UNKNOWN_ERROR: &str = "unknown error";

/// The single process-wide orchestration state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub state: ServiceState,
    pub metadata: Metadata,
    pub last_error: Option<String>,
    pub changed_at: u64,
}

impl Default for OrchestrationState {
    fn default() -> Self {
        Self {
            state: ServiceState::Idle,
            metadata: Metadata::new(),
            last_error: None,
            changed_at: current_time_millis(),
        }
    }
}

/// Read-only view for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub state: ServiceState,
    pub label: String,
    pub percent: u8,
    pub metadata: Metadata,
    pub last_error: Option<String>,
    pub changed_at: u64,
}

impl From<&OrchestrationState> for StateSnapshot {
    fn from(current: &OrchestrationState) -> Self {
        Self {
            state: current.state,
            label: current.state.label().to_string(),
            percent: current.state.percent(),
            metadata: current.metadata.clone(),
            last_error: current.last_error.clone(),
            changed_at: current.changed_at,
        }
    }
}

/// Result of a transition request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub ok: bool,
    pub previous: ServiceState,
    pub current: ServiceState,
}

/// A completed transition, as delivered to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub previous: ServiceState,
    pub current: OrchestrationState,
    pub forced: bool,
}

/// Synchronous transition observer
pub trait StateObserver: Send + Sync {
    fn on_transition(&self, change: &StateChange) -> anyhow::Result<()>;
}

impl<F> StateObserver for F
where
    F: Fn(&StateChange) -> anyhow::Result<()> + Send + Sync,
{
    fn on_transition(&self, change: &StateChange) -> anyhow::Result<()> {
        self(change)
    }
}

/// Finite automaton gating lifecycle phase changes
pub struct StateMachine {
    current: RwLock<OrchestrationState>,
    observers: RwLock<Vec<Arc<dyn StateObserver>>>,
    events: broadcast::Sender<StateChange>,
}

impl StateMachine {
    /// Create a machine in `idle`
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            current: RwLock::new(OrchestrationState::default()),
            observers: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Current state
    pub fn state(&self) -> ServiceState {
        self.current.read().state
    }

    /// Copy of the full current value
    pub fn current(&self) -> OrchestrationState {
        self.current.read().clone()
    }

    /// Display snapshot (label and percent included)
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::from(&*self.current.read())
    }

    /// Register a synchronous observer
    pub fn add_observer(&self, observer: Arc<dyn StateObserver>) {
        self.observers.write().push(observer);
    }

    /// Subscribe to the broadcast of state changes
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    /// Validated transition
    ///
    /// Succeeds when `to` is allowed from the current state or equals it.
    /// A self-transition merges `metadata` into the existing map; any other
    /// transition replaces it. Entering `error` takes the message from the
    /// metadata `error` key.
    pub fn transition(&self, to: ServiceState, metadata: Metadata) -> TransitionOutcome {
        let change = {
            let mut current = self.current.write();
            let previous = current.state;

            if !previous.can_transition_to(to) {
                tracing::warn!("Rejected state transition {} -> {}", previous, to);
                return TransitionOutcome {
                    ok: false,
                    previous,
                    current: previous,
                };
            }

            let error = error_from_metadata(&metadata);
            apply(&mut current, to, metadata, error);
            StateChange {
                previous,
                current: current.clone(),
                forced: false,
            }
        };

        self.notify(&change)
    }

    /// Unvalidated transition, reserved for error recovery and reset completion
    ///
    /// `error` is required when entering `error` (a generic message is used if
    /// absent) and ignored otherwise; `last_error` is cleared for every other
    /// destination.
    pub fn force_transition(
        &self,
        to: ServiceState,
        metadata: Metadata,
        error: Option<String>,
    ) -> TransitionOutcome {
        let change = {
            let mut current = self.current.write();
            let previous = current.state;
            apply(&mut current, to, metadata, error);
            StateChange {
                previous,
                current: current.clone(),
                forced: true,
            }
        };

        if change.previous != to {
            tracing::info!("Forced state transition {} -> {}", change.previous, to);
        }
        self.notify(&change)
    }

    /// Enter `error` with a message, forcing when the table forbids it
    pub fn fail(&self, message: impl Into<String>) -> TransitionOutcome {
        let message = message.into();
        let mut metadata = Metadata::new();
        metadata.insert("error".to_string(), message.clone().into());

        let outcome = self.transition(ServiceState::Error, metadata.clone());
        if outcome.ok {
            outcome
        } else {
            self.force_transition(ServiceState::Error, metadata, Some(message))
        }
    }

    fn notify(&self, change: &StateChange) -> TransitionOutcome {
        let observers: Vec<Arc<dyn StateObserver>> = self.observers.read().clone();
        for (index, observer) in observers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| observer.on_transition(change))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!("State observer {} failed: {:#}", index, e);
                }
                Err(_) => {
                    tracing::error!("State observer {} panicked", index);
                }
            }
        }

        // No receivers is fine
        let _ = self.events.send(change.clone());

        TransitionOutcome {
            ok: true,
            previous: change.previous,
            current: change.current.state,
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

fn error_from_metadata(metadata: &Metadata) -> Option<String> {
    metadata
        .get("error")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn apply(
    current: &mut OrchestrationState,
    to: ServiceState,
    metadata: Metadata,
    error: Option<String>,
) {
    let same_state = current.state == to;
    if same_state {
        current.metadata.extend(metadata);
    } else {
        current.metadata = metadata;
    }

    current.last_error = if to == ServiceState::Error {
        let kept = if same_state { current.last_error.take() } else { None };
        Some(
            error
                .filter(|m| !m.trim().is_empty())
                .or(kept)
                .unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
        )
    } else {
        None
    };

    current.state = to;
    current.changed_at = current_time_millis();
}
