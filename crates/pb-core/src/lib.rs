//! pb-core: Core abstractions and configuration for pdv-bridge
//!
//! This crate provides the shared types, error taxonomy, persisted state,
//! lifecycle state machine, and progress ledger used by the orchestrator
//! and the CLI.

pub mod config;
pub mod error;
pub mod pidfile;
pub mod progress;
pub mod state;
pub mod store;
pub mod time;
pub mod traits;
pub mod types;

pub use error::BridgeError;
pub use progress::{ProgressLedger, ProgressRecord, ProgressState};
pub use state::{StateMachine, StateObserver, StateSnapshot, TransitionOutcome};
pub use store::{JsonFileStore, MemoryStore, StoreKey};
pub use types::{IntegrationMode, Metadata, ResolvedConfig, ServiceState};
