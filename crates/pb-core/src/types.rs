//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Free-form metadata attached to states and progress records
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Lifecycle state of the managed service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Idle,
    CheckingConfig,
    InstallingGit,
    InstallingNode,
    CloningRepo,
    InstallingDependencies,
    StartingService,
    Running,
    Error,
    Resetting,
}

impl ServiceState {
    /// Every state, in lifecycle order
    pub const ALL: [ServiceState; 10] = [
        ServiceState::Idle,
        ServiceState::CheckingConfig,
        ServiceState::InstallingGit,
        ServiceState::InstallingNode,
        ServiceState::CloningRepo,
        ServiceState::InstallingDependencies,
        ServiceState::StartingService,
        ServiceState::Running,
        ServiceState::Error,
        ServiceState::Resetting,
    ];

    /// Human-readable label for display
    pub fn label(self) -> &'static str {
        match self {
            ServiceState::Idle => "Idle",
            ServiceState::CheckingConfig => "Checking configuration",
            ServiceState::InstallingGit => "Installing Git",
            ServiceState::InstallingNode => "Installing Node.js",
            ServiceState::CloningRepo => "Downloading service",
            ServiceState::InstallingDependencies => "Installing dependencies",
            ServiceState::StartingService => "Starting service",
            ServiceState::Running => "Running",
            ServiceState::Error => "Error",
            ServiceState::Resetting => "Removing installation",
        }
    }

    /// Estimated completion percent for display
    pub fn percent(self) -> u8 {
        match self {
            ServiceState::Idle => 0,
            ServiceState::CheckingConfig => 5,
            ServiceState::InstallingGit => 15,
            ServiceState::InstallingNode => 25,
            ServiceState::CloningRepo => 40,
            ServiceState::InstallingDependencies => 60,
            ServiceState::StartingService => 85,
            ServiceState::Running => 100,
            ServiceState::Error => 0,
            ServiceState::Resetting => 50,
        }
    }

    /// States reachable from this one through a validated transition
    pub fn allowed_targets(self) -> &'static [ServiceState] {
        use ServiceState::*;
        match self {
            Idle => &[CheckingConfig, Resetting],
            CheckingConfig => &[
                CloningRepo,
                InstallingGit,
                InstallingNode,
                StartingService,
                Running,
                Error,
                Idle,
            ],
            InstallingGit => &[InstallingNode, CloningRepo, CheckingConfig, Error, Resetting],
            InstallingNode => &[CloningRepo, CheckingConfig, Error, Resetting],
            CloningRepo => &[InstallingDependencies, Error, Resetting],
            InstallingDependencies => &[StartingService, Error, Resetting],
            StartingService => &[Running, Error, Resetting],
            Running => &[Error, Resetting, Idle, CheckingConfig],
            Error => &[Idle, Resetting, CheckingConfig],
            Resetting => &[Idle, Error],
        }
    }

    /// Whether `target` is legal from this state (self-transitions always are)
    pub fn can_transition_to(self, target: ServiceState) -> bool {
        self == target || self.allowed_targets().contains(&target)
    }

    /// Whether a lifecycle operation ends in this state
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ServiceState::Idle | ServiceState::Running | ServiceState::Error
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Idle => "idle",
            ServiceState::CheckingConfig => "checking_config",
            ServiceState::InstallingGit => "installing_git",
            ServiceState::InstallingNode => "installing_node",
            ServiceState::CloningRepo => "cloning_repo",
            ServiceState::InstallingDependencies => "installing_dependencies",
            ServiceState::StartingService => "starting_service",
            ServiceState::Running => "running",
            ServiceState::Error => "error",
            ServiceState::Resetting => "resetting",
        };
        write!(f, "{}", name)
    }
}

/// Where the managed service runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationMode {
    /// This machine runs the managed service
    #[default]
    Local,
    /// A hosted instance is authoritative; local start is skipped
    Web,
}

const LOCAL_KEYWORDS: &[&str] = &[
    "fila",
    "local",
    "desktop",
    "cliente",
    "client",
    "on-premise",
    "localhost",
];

const WEB_KEYWORDS: &[&str] = &["web", "online", "cloud", "nuvem", "hosted", "remote"];

impl IntegrationMode {
    /// Map a free-form mode value to a known mode
    ///
    /// Returns `None` for unrecognized values so the caller can keep the
    /// previously cached mode.
    pub fn parse_keyword(raw: &str) -> Option<Self> {
        let value = raw.trim().to_lowercase();
        if value.is_empty() {
            return None;
        }
        let compact: String = value.chars().filter(|c| *c != '_' && *c != ' ').collect();
        if LOCAL_KEYWORDS
            .iter()
            .any(|k| *k == value || *k == compact || k.replace('-', "") == compact)
        {
            Some(IntegrationMode::Local)
        } else if WEB_KEYWORDS.iter().any(|k| *k == value || *k == compact) {
            Some(IntegrationMode::Web)
        } else {
            None
        }
    }

    /// Normalize a mode value, keeping `previous` (or `Local`) when unrecognized
    pub fn normalize(raw: Option<&str>, previous: Option<IntegrationMode>) -> Self {
        raw.and_then(Self::parse_keyword)
            .or(previous)
            .unwrap_or_default()
    }
}

impl fmt::Display for IntegrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrationMode::Local => write!(f, "local"),
            IntegrationMode::Web => write!(f, "web"),
        }
    }
}

/// Company message-queue credentials handed to the service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCredentials {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl QueueCredentials {
    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        self.url.is_none() && self.username.is_none() && self.password.is_none()
    }
}

/// One remote configuration request, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchAttempt {
    pub url: String,
    /// HTTP status, if a response arrived
    pub status: Option<u16>,
    /// Transport or validation failure
    pub error: Option<String>,
    /// Whether this response was used
    pub accepted: bool,
}

/// Merged view of cached and remote service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub target_dir: PathBuf,
    pub session_key: String,
    pub service_token: String,
    pub env_content: String,
    pub integration_mode: IntegrationMode,
    pub remote_validated: bool,
    pub remote_validated_at: Option<u64>,
    pub last_remote_sync_at: Option<u64>,
    #[serde(default)]
    pub queue: QueueCredentials,
    #[serde(default)]
    pub attempts: Vec<FetchAttempt>,
}
