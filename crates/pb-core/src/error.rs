//! Error taxonomy for pdv-bridge
//!
//! Each lifecycle step has its own error type so the facade can translate
//! failures into a structured outcome without losing what went wrong.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the orchestrator
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration could not be resolved
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Managed port could not be freed
    #[error("Port conflict: {0}")]
    PortConflict(#[from] PortConflictError),

    /// Fresh installation failed
    #[error("Install error: {0}")]
    Install(#[from] InstallError),

    /// In-place update failed
    #[error("Update error: {0}")]
    Update(#[from] UpdateError),

    /// The managed service could not be started
    #[error("Launch error: {0}")]
    Spawn(#[from] ProcessSpawnError),

    /// Reset hit an unexpected failure
    #[error("Reset error: {0}")]
    Reset(#[from] ResetError),

    /// Persistence failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// One of the locally configured base values is absent
    #[error("Missing base credential: {0}")]
    MissingBase(&'static str),

    /// Neither the remote API nor the cache produced a usable identity
    #[error("nao foi possivel obter a configuracao do servico: {0}")]
    Unresolved(String),

    /// Persisting the resolved configuration failed
    #[error("Failed to persist configuration: {0}")]
    Store(#[from] StoreError),
}

/// Soft failure while fetching the remote configuration
#[derive(Error, Debug, Clone)]
pub enum RemoteFetchError {
    /// The request could not be sent or timed out
    #[error("Request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// Every candidate endpoint was rejected
    #[error("No endpoint returned a usable configuration ({attempts} attempts)")]
    Exhausted { attempts: usize },
}

/// The managed port stayed occupied after the kill budget
#[derive(Error, Debug, Clone)]
#[error("Port {port} still in use after {attempts} attempts (pids: {pids:?})")]
pub struct PortConflictError {
    pub port: u16,
    pub attempts: u32,
    pub pids: Vec<u32>,
}

/// Fresh installation failures
#[derive(Error, Debug)]
pub enum InstallError {
    /// A bootstrap tool is missing and could not be installed
    #[error("{tool} is not available and could not be installed: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    /// Cloning the upstream repository failed
    #[error("Failed to clone {url}: {reason}")]
    Clone { url: String, reason: String },

    /// The target exists and holds something other than an installation
    #[error("Target directory {0} is not empty and is not an installation")]
    TargetOccupied(PathBuf),

    /// A package-manager step failed
    #[error("Dependency installation failed: {0}")]
    Dependencies(String),

    /// The target path was refused by the path-safety predicate
    #[error("Refusing to modify unsafe path {0}")]
    UnsafePath(PathBuf),

    /// Writing files inside the target failed
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// In-place update failures
#[derive(Error, Debug)]
pub enum UpdateError {
    /// Writing the environment file or database failed
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Dependencies were missing and could not be reinstalled
    #[error("Dependency installation failed: {0}")]
    Dependencies(String),

    /// Managed port could not be freed before restart
    #[error(transparent)]
    PortConflict(#[from] PortConflictError),
}

/// Failures starting the managed service
#[derive(Error, Debug)]
pub enum ProcessSpawnError {
    /// The start command could not be spawned
    #[error("Failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    /// The process exited inside the grace period
    #[error("Service exited during startup (code {code:?})")]
    ExitedEarly { code: Option<i32> },

    /// Port confirmation was requested and the port never opened
    #[error("Service did not open port {0}")]
    NotListening(u16),
}

/// Unexpected failures during reset
#[derive(Error, Debug)]
pub enum ResetError {
    /// Clearing persisted keys failed
    #[error("Failed to clear persisted state: {0}")]
    Store(#[from] StoreError),

    /// Anything else that escaped a step
    #[error("Unexpected failure in {step}: {reason}")]
    Unexpected { step: &'static str, reason: String },
}

/// Key-value persistence errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Reading or writing the backing file failed
    #[error("Store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backing document is not valid JSON
    #[error("Store document is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Command execution errors
#[derive(Error, Debug, Clone)]
pub enum RunnerError {
    /// The program could not be started
    #[error("Failed to start `{program}`: {reason}")]
    NotStarted { program: String, reason: String },

    /// The program did not finish in time
    #[error("`{program}` timed out after {secs}s")]
    TimedOut { program: String, secs: u64 },
}
