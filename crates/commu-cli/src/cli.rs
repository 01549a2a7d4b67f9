//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// commu - ask yes/no questions across two devices
#[derive(Debug, Parser)]
#[command(name = "commu")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "COMMU_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Host a session as the questioner and print the connection code
    Host,

    /// Join a session as the answerer
    Join {
        /// Connection code shown by the host
        code: String,
    },

    /// Run a scripted host and guest in one process
    Demo,

    /// Signaling store housekeeping
    Signaling {
        #[command(subcommand)]
        action: SignalingAction,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Signaling subcommands.
#[derive(Debug, Subcommand)]
pub enum SignalingAction {
    /// Remove the offer, answer and address entries for a code
    Clear {
        /// Connection code
        code: String,
    },
}

/// Configuration subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Dump,
    /// Show the configuration file path
    Path,
}
