//! Windows commands (netstat, taskkill, winget)

use pb_core::traits::CommandSpec;

use super::{dedup_pids, Platform, Tool};

/// Package-manager scripts that ship as `.cmd` shims on Windows
const CMD_SHIMS: &[&str] = &["npm", "npx", "pnpm", "yarn"];

/// Windows platform
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsPlatform;

impl WindowsPlatform {
    fn winget_id(tool: Tool) -> &'static str {
        match tool {
            Tool::Git => "Git.Git",
            Tool::Node => "OpenJS.NodeJS.LTS",
        }
    }
}

impl Platform for WindowsPlatform {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn port_pid_command(&self, _port: u16) -> CommandSpec {
        CommandSpec::new("netstat", ["-ano", "-p", "TCP"])
    }

    /// Parses `netstat -ano` rows whose local address ends in `:port`
    ///
    /// ```text
    ///   TCP    0.0.0.0:21465    0.0.0.0:0    LISTENING    4321
    /// ```
    fn parse_port_pids(&self, output: &str, port: u16) -> Vec<u32> {
        let suffix = format!(":{}", port);
        dedup_pids(output.lines().filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 5 || !cols[0].eq_ignore_ascii_case("TCP") {
                return None;
            }
            if !cols[1].ends_with(&suffix) || !cols[3].eq_ignore_ascii_case("LISTENING") {
                return None;
            }
            cols[4].parse::<u32>().ok()
        }))
    }

    fn kill_command(&self, pid: u32) -> CommandSpec {
        CommandSpec::new(
            "taskkill",
            ["/PID".to_string(), pid.to_string(), "/T".to_string(), "/F".to_string()],
        )
    }

    fn tool_install_commands(&self, tool: Tool) -> Vec<CommandSpec> {
        vec![CommandSpec::new(
            "winget",
            [
                "install",
                "--id",
                Self::winget_id(tool),
                "-e",
                "--silent",
                "--accept-package-agreements",
                "--accept-source-agreements",
            ],
        )]
    }

    fn tool_uninstall_commands(&self, tool: Tool) -> Vec<CommandSpec> {
        vec![CommandSpec::new(
            "winget",
            ["uninstall", "--id", Self::winget_id(tool), "-e", "--silent"],
        )]
    }

    fn executable(&self, name: &str) -> String {
        if CMD_SHIMS.contains(&name) {
            format!("{}.cmd", name)
        } else {
            name.to_string()
        }
    }

    fn needs_lock_wait(&self) -> bool {
        true
    }
}
