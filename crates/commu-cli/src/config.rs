//! CLI configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/commu/config.toml` by default. Every key is optional.
//!
//! ```toml
//! [session]
//! max_reconnect_attempts = 3
//! reconnect_delay_ms = 2000
//!
//! [transport]
//! kind = "direct"
//! bind = "0.0.0.0:0"
//!
//! [signaling]
//! dir = "/tmp/commu-signaling"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use commu_core::{TracingConfig, TracingOutputFormat, parse_level};
use commu_link::{DirectConfig, TransportKind};
use commu_session::SessionConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliResult};

/// Configuration for the commu CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommuConfig {
    /// Session settings.
    pub session: SessionSettings,

    /// Transport settings.
    pub transport: TransportSettings,

    /// Signaling store settings.
    pub signaling: SignalingSettings,

    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Connection lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub max_reconnect_attempts: u32,
    /// Base reconnect delay; attempt `n` waits `n` times this.
    pub reconnect_delay_ms: u64,
    pub connect_timeout_secs: u64,
    pub host_timeout_secs: u64,
    pub reassembly_timeout_secs: u64,
    /// Send a `connection_established` message when the channel opens.
    pub announce: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 3,
            reconnect_delay_ms: 2000,
            connect_timeout_secs: 15,
            host_timeout_secs: 10,
            reassembly_timeout_secs: 30,
            announce: true,
        }
    }
}

/// Transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub kind: TransportKind,

    /// Listen address when hosting.
    pub bind: String,

    /// Address advertised to guests, if not the bound one.
    pub advertise_ip: Option<String>,

    /// Override the transport MTU.
    pub mtu: Option<usize>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            kind: TransportKind::Direct,
            bind: "0.0.0.0:0".to_string(),
            advertise_ip: None,
            mtu: None,
        }
    }
}

/// Signaling store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingSettings {
    /// Directory shared by host and guest for rendezvous entries.
    pub dir: Option<PathBuf>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    /// `compact`, `pretty` or `json`.
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl CommuConfig {
    /// Loads configuration from the default path.
    pub fn load() -> Result<Self, String> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("failed to read config: {}", e))?;
        toml::from_str(&content).map_err(|e| format!("failed to parse config: {}", e))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("commu")
    }

    /// Directory used for signaling entries.
    pub fn signaling_dir(&self) -> PathBuf {
        self.signaling.dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("commu")
                .join("signaling")
        })
    }

    /// Builds the session controller configuration.
    pub fn session_config(&self) -> SessionConfig {
        let s = &self.session;
        SessionConfig::default()
            .with_reconnect(
                s.max_reconnect_attempts,
                Duration::from_millis(s.reconnect_delay_ms),
            )
            .with_connect_timeout(Duration::from_secs(s.connect_timeout_secs))
            .with_host_timeout(Duration::from_secs(s.host_timeout_secs))
            .with_reassembly_timeout(Duration::from_secs(s.reassembly_timeout_secs))
            .with_announce_on_open(s.announce)
    }

    /// Builds the direct transport configuration.
    pub fn direct_config(&self) -> CliResult<DirectConfig> {
        let t = &self.transport;
        let bind: SocketAddr = t
            .bind
            .parse()
            .map_err(|e| CliError::Config(format!("invalid transport.bind {:?}: {}", t.bind, e)))?;

        let mut config = DirectConfig::default()
            .with_bind_addr(bind)
            .with_connect_timeout(Duration::from_secs(self.session.connect_timeout_secs))
            .with_advertise_timeout(Duration::from_secs(self.session.host_timeout_secs));
        if let Some(ref ip) = t.advertise_ip {
            let ip: IpAddr = ip.parse().map_err(|e| {
                CliError::Config(format!("invalid transport.advertise_ip {:?}: {}", ip, e))
            })?;
            config = config.with_advertise_ip(ip);
        }
        if let Some(mtu) = t.mtu {
            config = config.with_mtu(mtu);
        }
        Ok(config)
    }

    /// Builds the tracing configuration, `debug` overriding the file.
    pub fn tracing_config(&self, debug: bool) -> CliResult<TracingConfig> {
        if debug {
            return Ok(TracingConfig::interactive(true));
        }
        let level = parse_level(&self.logging.level)?;
        let format: TracingOutputFormat = self.logging.format.parse()?;
        Ok(TracingConfig::interactive(false)
            .with_level(level)
            .with_format(format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_session_defaults() {
        let config = CommuConfig::default().session_config();
        let expected = SessionConfig::default();
        assert_eq!(config.max_reconnect_attempts, expected.max_reconnect_attempts);
        assert_eq!(config.reconnect_base_delay, expected.reconnect_base_delay);
        assert_eq!(config.connect_timeout, expected.connect_timeout);
        assert_eq!(config.host_timeout, expected.host_timeout);
    }

    #[test]
    fn partial_toml() {
        let config: CommuConfig = toml::from_str(
            r#"
            [session]
            max_reconnect_attempts = 5

            [transport]
            kind = "radio"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.session.max_reconnect_attempts, 5);
        assert_eq!(config.session.reconnect_delay_ms, 2000);
        assert_eq!(config.transport.kind, TransportKind::Radio);
        assert_eq!(config.transport.bind, "0.0.0.0:0");
        assert_eq!(
            config.tracing_config(false).unwrap().output_format,
            TracingOutputFormat::Json
        );
    }

    #[test]
    fn direct_config_validation() {
        let mut config = CommuConfig::default();
        config.transport.advertise_ip = Some("10.0.0.7".to_string());
        config.transport.mtu = Some(1200);
        let direct = config.direct_config().unwrap();
        assert_eq!(direct.advertise_ip, Some("10.0.0.7".parse().unwrap()));
        assert_eq!(direct.mtu, 1200);

        config.transport.bind = "nowhere".to_string();
        assert!(matches!(config.direct_config(), Err(CliError::Config(_))));
    }

    #[test]
    fn bad_logging_level() {
        let mut config = CommuConfig::default();
        config.logging.level = "chatty".to_string();
        assert!(matches!(config.tracing_config(false), Err(CliError::Logging(_))));
        // --debug wins over the file.
        assert!(config.tracing_config(true).is_ok());
    }

    #[test]
    fn load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[signaling]\ndir = \"/tmp/shared\"\n").unwrap();
        let config = CommuConfig::load_from(&path).unwrap();
        assert_eq!(config.signaling_dir(), PathBuf::from("/tmp/shared"));

        std::fs::write(&path, "[session\n").unwrap();
        assert!(CommuConfig::load_from(&path).is_err());
    }

    #[test]
    fn dump_round_trips() {
        let text = toml::to_string_pretty(&CommuConfig::default()).unwrap();
        let parsed: CommuConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.transport.kind, TransportKind::Direct);
    }
}
