//! Terminal front-end for commu.
//!
//! This crate provides the `commu` command-line interface: one peer hosts a
//! question session, the other joins it with the connection code.

pub mod chat;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::Cli;
pub use error::{CliError, CliResult};
