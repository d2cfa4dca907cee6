//! Managed service configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upstream source of the managed service
pub const DEFAULT_REPOSITORY_URL: &str = "https://github.com/pdv-bridge/whatsapp-service.git";

/// Layout and commands of the managed service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Canonical folder name; destructive operations only touch paths that end in it
    pub folder_name: String,

    /// Git URL the installer clones from
    pub repository_url: String,

    /// Upstream branch to clone and pull
    pub branch: String,

    /// Port the managed service binds
    pub port: u16,

    /// Auxiliary port the service may hold (freed on reset)
    pub aux_port: u16,

    /// Explicit install directory (defaults to the platform data dir)
    pub install_dir: Option<PathBuf>,

    /// Environment file written before every start
    pub env_file_name: String,

    /// Manifest whose presence marks an existing installation
    pub manifest_file_name: String,

    /// Directory created by the package manager
    pub dependencies_dir: String,

    /// Local database, relative to the target directory
    pub database_path: PathBuf,

    /// Bundled template used to seed the database
    pub database_template: Option<PathBuf>,

    /// Package manager installed globally and used for dependencies
    pub package_manager: String,

    /// Command that starts the service inside the target directory
    pub start_command: Vec<String>,

    /// Require the port to open before reporting a successful launch
    pub confirm_port_open: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            folder_name: "whatsapp-service".to_string(),
            repository_url: DEFAULT_REPOSITORY_URL.to_string(),
            branch: "main".to_string(),
            port: 21465,
            aux_port: 21466,
            install_dir: None,
            env_file_name: ".env".to_string(),
            manifest_file_name: "package.json".to_string(),
            dependencies_dir: "node_modules".to_string(),
            database_path: PathBuf::from("data").join("database.sqlite"),
            database_template: None,
            package_manager: "pnpm".to_string(),
            start_command: vec!["pnpm".to_string(), "start".to_string()],
            confirm_port_open: false,
        }
    }
}

impl ServiceConfig {
    /// Environment file path inside a target directory
    pub fn env_path(&self, target: &Path) -> PathBuf {
        target.join(&self.env_file_name)
    }

    /// Manifest path inside a target directory
    pub fn manifest_path(&self, target: &Path) -> PathBuf {
        target.join(&self.manifest_file_name)
    }

    /// Database path inside a target directory
    pub fn database_file(&self, target: &Path) -> PathBuf {
        target.join(&self.database_path)
    }

    /// Dependency directory inside a target directory
    pub fn dependencies_path(&self, target: &Path) -> PathBuf {
        target.join(&self.dependencies_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_relative_to_target() {
        let service = ServiceConfig::default();
        let target = Path::new("/opt/whatsapp-service");
        assert_eq!(service.env_path(target), target.join(".env"));
        assert_eq!(service.manifest_path(target), target.join("package.json"));
        assert_eq!(
            service.database_file(target),
            target.join("data").join("database.sqlite")
        );
    }

    #[test]
    fn test_default_start_command_uses_package_manager() {
        let service = ServiceConfig::default();
        assert_eq!(service.start_command.first(), Some(&service.package_manager));
    }
}
