//! Configuration commands.

use crate::config::CommuConfig;
use crate::error::{CliError, CliResult};

/// Dump the current configuration to stdout.
pub fn dump(config: &CommuConfig) -> CliResult<()> {
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| CliError::Config(format!("failed to serialize config: {}", e)))?;
    println!("# config.toml ({})", CommuConfig::default_path().display());
    println!("{}", toml_str);
    Ok(())
}

/// Show the configuration file path and the signaling directory.
pub fn path(config: &CommuConfig) -> CliResult<()> {
    println!("config: {}", CommuConfig::default_path().display());
    println!("signaling: {}", config.signaling_dir().display());
    Ok(())
}
