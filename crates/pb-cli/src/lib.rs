//! pdv-bridge: command-line host for the service orchestrator
//!
//! Provides the `pdv-bridge` binary that installs, updates, starts and
//! resets the managed messaging service.

pub mod commands;
pub mod output;
