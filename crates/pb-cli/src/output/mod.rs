//! Output formatting utilities for the CLI
//!
//! Human-readable rendering of operation outcomes, status reports and
//! reset/port reports, plus colored status messages.

use anyhow::Result;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use pb_core::progress::ProgressState;
use pb_core::time::elapsed_millis;
use pb_orchestrator::provision::DirectoryReport;
use pb_orchestrator::{OperationOutcome, OutcomeStatus, PortReport, StatusReport};

/// Print an outcome as a status line plus its warnings, or as JSON
pub fn print_outcome(outcome: &OperationOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    match outcome.status {
        OutcomeStatus::Success => print_success(&outcome.message),
        OutcomeStatus::Warning => print_warning(&outcome.message),
        OutcomeStatus::Error => print_error(&outcome.message),
        OutcomeStatus::Skipped => print_info(&outcome.message),
    }
    for warning in outcome_warnings(outcome) {
        print_warning(&warning);
    }
    Ok(())
}

/// Warnings carried in an outcome's data
pub fn outcome_warnings(outcome: &OperationOutcome) -> Vec<String> {
    outcome
        .data
        .as_ref()
        .and_then(|d| d.get("warnings"))
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Format service status as a human-readable string
pub fn format_status(status: &StatusReport) -> String {
    let mut output = String::new();
    let state = &status.state;

    output.push_str(&format!("Service State: {} ({}%)\n", state.label, state.percent));
    output.push_str(&format!(
        "Install Directory: {} ({})\n",
        status.target_dir.display(),
        if status.installed {
            "installed"
        } else {
            "not installed"
        }
    ));
    output.push_str(&format!(
        "Port: {} ({})\n",
        status.port,
        if status.port_in_use { "in use" } else { "free" }
    ));
    output.push_str(&format!(
        "PID: {}\n",
        status
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string())
    ));
    output.push_str(&format!(
        "Integration Mode: {}\n",
        status
            .integration_mode
            .map(|m| m.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    ));
    if status.user_removed {
        output.push_str("Removed by user: start manually to reinstall\n");
    }
    if let Some(error) = &state.last_error {
        output.push_str(&format!("Last Error: {}\n", error));
    }

    if let Some(progress) = &status.progress {
        let label = match progress.state {
            ProgressState::Running => "running",
            ProgressState::Success => "done",
            ProgressState::Error => "failed",
        };
        let age = elapsed_millis(progress.updated_at) / 1000;
        output.push_str(&format!(
            "Progress: [{}] {} ({}%, {} ago)\n",
            label,
            progress.message,
            progress.percent,
            format_duration(age)
        ));
    }

    output
}

/// Table of directories and ports touched by a reset, if any
pub fn format_reset_details(data: &Value) -> Option<String> {
    #[derive(Tabled)]
    struct ResetRow {
        #[tabled(rename = "ITEM")]
        item: String,
        #[tabled(rename = "RESULT")]
        result: String,
    }

    let mut rows = Vec::new();
    if let Some(dirs) = data.get("directories") {
        let dirs: Vec<DirectoryReport> = serde_json::from_value(dirs.clone()).ok()?;
        for dir in dirs {
            let result = if dir.removed {
                "removed".to_string()
            } else {
                dir.reason.unwrap_or_else(|| "kept".to_string())
            };
            rows.push(ResetRow {
                item: dir.path.display().to_string(),
                result,
            });
        }
    }
    if let Some(ports) = data.get("ports") {
        let ports: Vec<PortReport> = serde_json::from_value(ports.clone()).ok()?;
        for port in ports {
            rows.push(ResetRow {
                item: format!("port {}", port.port),
                result: if port.freed { "free" } else { "still in use" }.to_string(),
            });
        }
    }

    if rows.is_empty() {
        None
    } else {
        Some(Table::new(rows).with(Style::rounded()).to_string())
    }
}

/// Table of PIDs killed while freeing a port
pub fn format_port_report(report: &PortReport) -> String {
    #[derive(Tabled)]
    struct PidRow {
        #[tabled(rename = "PID")]
        pid: u32,
        #[tabled(rename = "RESULT")]
        result: &'static str,
    }

    let rows: Vec<PidRow> = report
        .killed
        .iter()
        .map(|pid| PidRow {
            pid: *pid,
            result: "killed",
        })
        .chain(report.failed.iter().map(|pid| PidRow {
            pid: *pid,
            result: "kill failed",
        }))
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format duration in human-readable form
fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix to stderr
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use pb_core::progress::ProgressRecord;
    use pb_core::state::StateMachine;
    use serde_json::json;
    use std::path::PathBuf;

    fn status() -> StatusReport {
        StatusReport {
            state: StateMachine::new().snapshot(),
            progress: None,
            target_dir: PathBuf::from("/opt/whatsapp-service"),
            installed: false,
            port: 21465,
            port_in_use: false,
            pid: None,
            user_removed: false,
            integration_mode: None,
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(3720), "1h 2m");
        assert_eq!(format_duration(90000), "1d 1h");
    }

    #[test]
    fn test_format_status_idle() {
        let text = format_status(&status());
        assert!(text.contains("Port: 21465 (free)"));
        assert!(text.contains("not installed"));
        assert!(text.contains("PID: -"));
        assert!(text.contains("Integration Mode: unknown"));
        assert!(!text.contains("Last Error"));
        assert!(!text.contains("Progress"));
    }

    #[test]
    fn test_format_status_shows_error_and_removal() {
        let machine = StateMachine::new();
        machine.fail("clone failed");
        let mut report = status();
        report.state = machine.snapshot();
        report.user_removed = true;

        let text = format_status(&report);
        assert!(text.contains("Last Error: clone failed"));
        assert!(text.contains("Removed by user"));
    }

    #[test]
    fn test_format_status_shows_progress_age() {
        let now = pb_core::time::current_time_millis();
        let mut report = status();
        report.progress = Some(ProgressRecord {
            run_id: "r1".to_string(),
            active: true,
            state: ProgressState::Running,
            phase: "cloning_repo".to_string(),
            message: "Cloning repository".to_string(),
            percent: 30,
            metadata: Default::default(),
            started_at: now - 7_200_000,
            updated_at: now - 7_200_000,
            finished_at: None,
        });

        let text = format_status(&report);
        assert!(text.contains("Progress: [running] Cloning repository (30%, 2h 0m ago)"));
    }

    #[test]
    fn test_outcome_warnings() {
        let outcome = OperationOutcome {
            status: OutcomeStatus::Warning,
            message: "done".to_string(),
            data: Some(json!({ "warnings": ["a", "b"] })),
        };
        assert_eq!(outcome_warnings(&outcome), vec!["a", "b"]);

        let bare = OperationOutcome {
            status: OutcomeStatus::Success,
            message: "done".to_string(),
            data: None,
        };
        assert!(outcome_warnings(&bare).is_empty());
    }

    #[test]
    fn test_reset_details_table() {
        let data = json!({
            "directories": [
                { "path": "/opt/whatsapp-service", "removed": true, "skipped": false, "reason": null },
                { "path": "/home", "removed": false, "skipped": true, "reason": "caminho_unsafe" }
            ],
            "ports": [
                { "port": 21465, "freed": true, "attempts": 0, "killed": [], "failed": [], "error": null }
            ]
        });
        let table = format_reset_details(&data).unwrap();
        assert!(table.contains("removed"));
        assert!(table.contains("caminho_unsafe"));
        assert!(table.contains("port 21465"));

        assert!(format_reset_details(&json!({})).is_none());
    }

    #[test]
    fn test_port_report_table() {
        let report = PortReport {
            port: 21465,
            freed: true,
            attempts: 1,
            killed: vec![4242],
            failed: vec![],
            error: None,
        };
        let table = format_port_report(&report);
        assert!(table.contains("4242"));
        assert!(table.contains("killed"));
    }
}
