//! Status command implementation

use std::process::ExitCode;

use anyhow::Result;

use super::CliContext;
use crate::output::format_status;

/// Show state, progress and port usage
pub fn status_command(ctx: &CliContext) -> Result<ExitCode> {
    let orchestrator = ctx.orchestrator()?;
    let status = orchestrator.status();

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("{}", format_status(&status));
    }

    Ok(ExitCode::SUCCESS)
}
