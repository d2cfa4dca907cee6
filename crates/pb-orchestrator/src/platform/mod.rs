//! Platform capability layer
//!
//! Every raw OS command string the orchestrator needs lives behind the
//! `Platform` trait: port-owner discovery, process termination, bootstrap
//! tool installation, and executable naming. There is one implementation
//! per OS family; both are compiled everywhere so their parsers can be
//! tested on any host.

mod unix;
mod windows;

pub use unix::{UnixPackageManager, UnixPlatform};
pub use windows::WindowsPlatform;

use pb_core::config::APP_DIR_NAME;
use pb_core::traits::CommandSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Bootstrap command-line tools the managed service needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    /// Version control client used to clone and pull the service
    Git,
    /// JavaScript runtime the service runs on
    Node,
}

impl Tool {
    /// Both tools, in install order
    pub const ALL: [Tool; 2] = [Tool::Git, Tool::Node];

    /// Executable used for the version check
    pub fn program(self) -> &'static str {
        match self {
            Tool::Git => "git",
            Tool::Node => "node",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tool::Git => write!(f, "Git"),
            Tool::Node => write!(f, "Node.js"),
        }
    }
}

/// OS-specific commands and conventions
pub trait Platform: Send + Sync {
    /// Short platform name for logs
    fn name(&self) -> &'static str;

    /// Command listing the PIDs listening on `port`
    fn port_pid_command(&self, port: u16) -> CommandSpec;

    /// Extract deduplicated PIDs from the output of `port_pid_command`
    fn parse_port_pids(&self, output: &str, port: u16) -> Vec<u32>;

    /// Command forcefully terminating `pid`
    fn kill_command(&self, pid: u32) -> CommandSpec;

    /// Candidate install commands for `tool`, tried in order
    fn tool_install_commands(&self, tool: Tool) -> Vec<CommandSpec>;

    /// Candidate uninstall commands for `tool`, tried in order
    fn tool_uninstall_commands(&self, tool: Tool) -> Vec<CommandSpec>;

    /// Platform spelling of an executable name
    fn executable(&self, name: &str) -> String {
        name.to_string()
    }

    /// Whether file locks may linger briefly after a process is killed
    fn needs_lock_wait(&self) -> bool {
        false
    }

    /// Default installation directory for the managed service
    fn default_install_dir(&self, folder_name: &str) -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME)
            .join(folder_name)
    }
}

/// Platform implementation for the running OS
pub fn current() -> Arc<dyn Platform> {
    #[cfg(windows)]
    {
        Arc::new(WindowsPlatform)
    }

    #[cfg(not(windows))]
    {
        Arc::new(UnixPlatform::detect())
    }
}

/// Keep the first occurrence of each PID
pub(crate) fn dedup_pids(pids: impl IntoIterator<Item = u32>) -> Vec<u32> {
    let mut seen = Vec::new();
    for pid in pids {
        if pid != 0 && !seen.contains(&pid) {
            seen.push(pid);
        }
    }
    seen
}
