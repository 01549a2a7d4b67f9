//! commu CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use commu_cli::cli::{Cli, Command, ConfigAction, SignalingAction};
use commu_cli::commands;
use commu_cli::config::CommuConfig;
use commu_cli::error::{CliError, CliResult};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    // Load configuration
    let config = if let Some(ref path) = cli.config {
        CommuConfig::load_from(path).map_err(CliError::Config)?
    } else {
        CommuConfig::load().map_err(CliError::Config)?
    };

    commu_core::init_tracing(config.tracing_config(cli.debug)?)?;

    match cli.command {
        Command::Host => commands::session::host(&config).await,
        Command::Join { code } => commands::session::join(&config, &code).await,
        Command::Demo => {
            for line in commands::session::demo(&config).await? {
                println!("{line}");
            }
            Ok(())
        }
        Command::Signaling { action } => match action {
            SignalingAction::Clear { code } => commands::signaling::clear(&config, &code),
        },
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config),
            ConfigAction::Path => commands::config::path(&config),
        },
    }
}
