//! Port diagnostics

use std::process::ExitCode;

use anyhow::Result;
use serde_json::json;

use pb_orchestrator::PortReport;

use super::CliContext;
use crate::output::{format_port_report, print_error, print_success, print_warning};

/// Report whether a port is bound and by which processes
pub async fn port_check(ctx: &CliContext, port: Option<u16>) -> Result<ExitCode> {
    let orchestrator = ctx.orchestrator()?;
    let port = port.unwrap_or(orchestrator.config().service.port);
    let ports = orchestrator.ports();

    let in_use = ports.is_port_in_use(port);
    let pids = if in_use {
        ports.find_pids(port).await
    } else {
        Vec::new()
    };

    if ctx.json {
        let report = json!({ "port": port, "in_use": in_use, "pids": pids });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !in_use {
        print_success(&format!("Port {} is free", port));
    } else if pids.is_empty() {
        print_warning(&format!("Port {} is in use by an unknown process", port));
    } else {
        let pids: Vec<String> = pids.iter().map(u32::to_string).collect();
        print_warning(&format!("Port {} is in use by PID {}", port, pids.join(", ")));
    }

    Ok(ExitCode::SUCCESS)
}

/// Kill whatever holds a port and confirm it is released
pub async fn port_free(ctx: &CliContext, port: Option<u16>) -> Result<ExitCode> {
    let orchestrator = ctx.orchestrator()?;
    let config = orchestrator.config();
    let port = port.unwrap_or(config.service.port);

    let result = orchestrator
        .ports()
        .free_port(
            port,
            config.timeouts.port_recheck_attempts,
            config.timeouts.port_recheck_interval,
        )
        .await;

    match result {
        Ok(report) => {
            if ctx.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_success(&format!("Port {} is free", port));
                if !report.killed.is_empty() || !report.failed.is_empty() {
                    println!("{}", format_port_report(&report));
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(conflict) => {
            if ctx.json {
                let report = PortReport::conflict(&conflict);
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_error(&conflict.to_string());
            }
            Ok(ExitCode::FAILURE)
        }
    }
}
