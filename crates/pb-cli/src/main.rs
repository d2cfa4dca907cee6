//! pdv-bridge CLI
//!
//! Single binary for the managed service lifecycle:
//! - start: install or update the service and launch it
//! - sync: refresh remote configuration and apply it
//! - reset: stop the service and remove its installation
//! - status, port and config diagnostics

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pb_orchestrator::{EnsureOptions, ResetOptions, Trigger};
use pdv_bridge::commands::{self, BackendOverrides, CliContext};

#[derive(Parser)]
#[command(name = "pdv-bridge")]
#[command(author, version, about = "Point-of-sale messaging service manager")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for state, PID file and logs (defaults to the user config dir)
    #[arg(long, global = true, env = "PDV_BRIDGE_HOME")]
    home: Option<PathBuf>,

    /// Backend API base URL (overrides config)
    #[arg(long, global = true, env = "PDV_BRIDGE_API_URL")]
    api_url: Option<String>,

    /// Backend API token (overrides config)
    #[arg(long, global = true, env = "PDV_BRIDGE_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// Company identifier (overrides config)
    #[arg(long, global = true, env = "PDV_BRIDGE_COMPANY_ID")]
    company_id: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install or update the service and start it
    Start {
        /// Remove the installation and install from scratch
        #[arg(long)]
        reinstall: bool,
        /// Replace the local database with the bundled template
        #[arg(long)]
        overwrite_database: bool,
        /// Automatic start (skipped after the user removed the installation)
        #[arg(long)]
        auto: bool,
    },

    /// Refresh configuration from the backend and apply it
    Sync,

    /// Stop the service and remove its installation
    Reset {
        /// Also uninstall git and Node.js
        #[arg(long)]
        remove_tools: bool,
        /// Confirm destructive options
        #[arg(short, long)]
        yes: bool,
    },

    /// Show service state and progress
    Status,

    /// Inspect or free the service port
    Port {
        #[command(subcommand)]
        action: PortAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum PortAction {
    /// Show whether the port is in use and by whom
    Check {
        /// Port to check (defaults to the service port)
        port: Option<u16>,
    },
    /// Kill the processes holding the port
    Free {
        /// Port to free (defaults to the service port)
        port: Option<u16>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show effective configuration
    Show,
    /// Get specific config value
    Get { key: String },
    /// Set config value
    Set { key: String, value: String },
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let ctx = CliContext::new(cli.home, cli.config, cli.json).with_overrides(BackendOverrides {
        api_base_url: cli.api_url,
        api_token: cli.api_token,
        company_id: cli.company_id,
    });

    let code = match cli.command {
        Commands::Start {
            reinstall,
            overwrite_database,
            auto,
        } => {
            let options = EnsureOptions {
                trigger: if auto { Trigger::Automatic } else { Trigger::User },
                reinstall,
                overwrite_database,
            };
            commands::start_command(&ctx, options).await?
        }

        Commands::Sync => commands::sync_command(&ctx).await?,

        Commands::Reset { remove_tools, yes } => {
            let options = ResetOptions {
                remove_tools,
                confirm: yes,
            };
            commands::reset_command(&ctx, options).await?
        }

        Commands::Status => commands::status_command(&ctx)?,

        Commands::Port { action } => match action {
            PortAction::Check { port } => commands::port_check(&ctx, port).await?,
            PortAction::Free { port } => commands::port_free(&ctx, port).await?,
        },

        Commands::Config { action } => {
            match action {
                ConfigAction::Show => commands::config_show(&ctx)?,
                ConfigAction::Get { key } => commands::config_get(&ctx, &key)?,
                ConfigAction::Set { key, value } => commands::config_set(&ctx, &key, &value)?,
                ConfigAction::Init { force } => commands::config_init(&ctx, force)?,
                ConfigAction::Path => commands::config_path(&ctx)?,
            }
            ExitCode::SUCCESS
        }
    };

    Ok(code)
}
