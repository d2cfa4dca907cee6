//! Start, sync and reset commands

use std::process::ExitCode;

use anyhow::Result;

use pb_orchestrator::{EnsureOptions, ResetOptions};

use super::{exit_code, CliContext};
use crate::output::{format_reset_details, print_info, print_outcome};

/// Install or update the service and start it
pub async fn start_command(ctx: &CliContext, options: EnsureOptions) -> Result<ExitCode> {
    let orchestrator = ctx.orchestrator()?;
    if !ctx.json {
        print_info("Preparing the service...");
    }
    let outcome = orchestrator.ensure_ready_and_start(options).await;
    print_outcome(&outcome, ctx.json)?;
    Ok(exit_code(&outcome))
}

/// Refresh remote configuration and apply it
pub async fn sync_command(ctx: &CliContext) -> Result<ExitCode> {
    let orchestrator = ctx.orchestrator()?;
    let outcome = orchestrator.refresh_and_sync().await;
    print_outcome(&outcome, ctx.json)?;
    Ok(exit_code(&outcome))
}

/// Stop the service and remove its installation
pub async fn reset_command(ctx: &CliContext, options: ResetOptions) -> Result<ExitCode> {
    let orchestrator = ctx.orchestrator()?;
    let outcome = orchestrator.reset(options).await;
    print_outcome(&outcome, ctx.json)?;
    if !ctx.json {
        if let Some(details) = outcome.data.as_ref().and_then(format_reset_details) {
            println!("{}", details);
        }
    }
    Ok(exit_code(&outcome))
}
