//! macOS and Linux commands

use pb_core::traits::CommandSpec;

use super::{dedup_pids, Platform, Tool};

/// System package manager used for bootstrap tools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnixPackageManager {
    Brew,
    Apt,
}

/// Unix-family platform (lsof + kill)
#[derive(Debug, Clone, Copy)]
pub struct UnixPlatform {
    package_manager: UnixPackageManager,
}

impl UnixPlatform {
    pub fn new(package_manager: UnixPackageManager) -> Self {
        Self { package_manager }
    }

    /// Homebrew on macOS, apt elsewhere
    pub fn detect() -> Self {
        if cfg!(target_os = "macos") {
            Self::new(UnixPackageManager::Brew)
        } else {
            Self::new(UnixPackageManager::Apt)
        }
    }

    fn packages(&self, tool: Tool) -> &'static [&'static str] {
        match (self.package_manager, tool) {
            (UnixPackageManager::Brew, Tool::Git) => &["git"],
            (UnixPackageManager::Brew, Tool::Node) => &["node"],
            (UnixPackageManager::Apt, Tool::Git) => &["git"],
            (UnixPackageManager::Apt, Tool::Node) => &["nodejs", "npm"],
        }
    }
}

impl Platform for UnixPlatform {
    fn name(&self) -> &'static str {
        match self.package_manager {
            UnixPackageManager::Brew => "macos",
            UnixPackageManager::Apt => "linux",
        }
    }

    fn port_pid_command(&self, port: u16) -> CommandSpec {
        CommandSpec::new(
            "lsof",
            [
                "-nP".to_string(),
                format!("-iTCP:{}", port),
                "-sTCP:LISTEN".to_string(),
                "-t".to_string(),
            ],
        )
    }

    fn parse_port_pids(&self, output: &str, _port: u16) -> Vec<u32> {
        dedup_pids(
            output
                .lines()
                .filter_map(|line| line.trim().parse::<u32>().ok()),
        )
    }

    fn kill_command(&self, pid: u32) -> CommandSpec {
        CommandSpec::new("kill", ["-9".to_string(), pid.to_string()])
    }

    fn tool_install_commands(&self, tool: Tool) -> Vec<CommandSpec> {
        let packages = self.packages(tool);
        match self.package_manager {
            UnixPackageManager::Brew => {
                let mut args = vec!["install"];
                args.extend_from_slice(packages);
                vec![CommandSpec::new("brew", args)]
            }
            UnixPackageManager::Apt => {
                let mut args = vec!["-n", "apt-get", "install", "-y"];
                args.extend_from_slice(packages);
                vec![CommandSpec::new("sudo", args)]
            }
        }
    }

    fn tool_uninstall_commands(&self, tool: Tool) -> Vec<CommandSpec> {
        let packages = self.packages(tool);
        match self.package_manager {
            UnixPackageManager::Brew => {
                let mut args = vec!["uninstall"];
                args.extend_from_slice(packages);
                vec![CommandSpec::new("brew", args)]
            }
            UnixPackageManager::Apt => {
                let mut args = vec!["-n", "apt-get", "remove", "-y"];
                args.extend_from_slice(packages);
                vec![CommandSpec::new("sudo", args)]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsof_command_targets_listening_port() {
        let platform = UnixPlatform::new(UnixPackageManager::Apt);
        assert_eq!(
            platform.port_pid_command(21465).command_line(),
            "lsof -nP -iTCP:21465 -sTCP:LISTEN -t"
        );
    }

    #[test]
    fn test_parse_lsof_output() {
        let platform = UnixPlatform::new(UnixPackageManager::Brew);
        let output = "1234\n5678\n1234\n\nnot-a-pid\n";
        assert_eq!(platform.parse_port_pids(output, 21465), vec![1234, 5678]);
        assert!(platform.parse_port_pids("", 21465).is_empty());
    }

    #[test]
    fn test_kill_command() {
        let platform = UnixPlatform::detect();
        assert_eq!(platform.kill_command(99).command_line(), "kill -9 99");
    }

    #[test]
    fn test_package_manager_commands() {
        let brew = UnixPlatform::new(UnixPackageManager::Brew);
        assert_eq!(
            brew.tool_install_commands(Tool::Node)[0].command_line(),
            "brew install node"
        );
        assert_eq!(
            brew.tool_uninstall_commands(Tool::Git)[0].command_line(),
            "brew uninstall git"
        );

        let apt = UnixPlatform::new(UnixPackageManager::Apt);
        assert_eq!(
            apt.tool_install_commands(Tool::Node)[0].command_line(),
            "sudo -n apt-get install -y nodejs npm"
        );
        assert!(!apt.needs_lock_wait());
        assert_eq!(apt.executable("pnpm"), "pnpm");
    }
}
