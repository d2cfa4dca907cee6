//! Timeouts and retry budgets

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Timeouts for network calls, commands and liveness checks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Remote configuration request timeout
    #[serde(with = "duration_secs")]
    pub http: Duration,

    /// Bootstrap tool version check timeout
    #[serde(with = "duration_secs")]
    pub tool_check: Duration,

    /// Default timeout for short commands (kill, pull, lookups)
    #[serde(with = "duration_secs")]
    pub command: Duration,

    /// Timeout for long install steps (clone, dependency install, tool install)
    #[serde(with = "duration_secs")]
    pub install: Duration,

    /// Grace period after spawning the service
    #[serde(with = "duration_secs")]
    pub launch_grace: Duration,

    /// Re-checks after killing processes on a port
    pub port_recheck_attempts: u32,

    /// Delay between port re-checks
    #[serde(with = "duration_secs")]
    pub port_recheck_interval: Duration,

    /// Age after which cached remote configuration is refetched
    #[serde(with = "duration_secs")]
    pub remote_refresh: Duration,

    /// Pause after a failed remote fetch before a stale cache is refetched
    #[serde(with = "duration_secs")]
    pub remote_retry: Duration,

    /// Pause before touching files on platforms with mandatory file locks
    #[serde(with = "duration_secs")]
    pub windows_lock_wait: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            http: Duration::from_secs(10),
            tool_check: Duration::from_secs(8),
            command: Duration::from_secs(120),
            install: Duration::from_secs(900),
            launch_grace: Duration::from_secs(3),
            port_recheck_attempts: 3,
            port_recheck_interval: Duration::from_secs(1),
            remote_refresh: Duration::from_secs(300),
            remote_retry: Duration::from_secs(60),
            windows_lock_wait: Duration::from_secs(2),
        }
    }
}
