//! Session configuration.

use std::time::Duration;

use commu_protocol::{DEFAULT_MAX_IN_FLIGHT, DEFAULT_REASSEMBLY_TIMEOUT};

/// Session controller configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Reconnect attempts after an unexpected disconnect before giving up.
    pub max_reconnect_attempts: u32,

    /// Delay before reconnect attempt `n` is `n` times this.
    pub reconnect_base_delay: Duration,

    /// Bound on a guest dial, and on a guest returning to a re-listening host.
    pub connect_timeout: Duration,

    /// Bound on a host advertising its identifier.
    pub host_timeout: Duration,

    /// Idle time after which partial messages are dropped.
    pub reassembly_timeout: Duration,

    /// Maximum partial messages held at once.
    pub max_in_flight: usize,

    /// How often partial messages are swept.
    pub sweep_interval: Duration,

    /// Send `connection_established` whenever the channel opens.
    pub announce_on_open: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 3,
            reconnect_base_delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(15),
            host_timeout: Duration::from_secs(10),
            reassembly_timeout: DEFAULT_REASSEMBLY_TIMEOUT,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            sweep_interval: Duration::from_secs(5),
            announce_on_open: true,
        }
    }
}

impl SessionConfig {
    /// Builder: set reconnect policy.
    pub fn with_reconnect(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self.reconnect_base_delay = base_delay;
        self
    }

    /// Builder: set connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder: set host advertise timeout.
    pub fn with_host_timeout(mut self, timeout: Duration) -> Self {
        self.host_timeout = timeout;
        self
    }

    /// Builder: set reassembly timeout.
    pub fn with_reassembly_timeout(mut self, timeout: Duration) -> Self {
        self.reassembly_timeout = timeout;
        self
    }

    /// Builder: set whether to announce on open.
    pub fn with_announce_on_open(mut self, announce: bool) -> Self {
        self.announce_on_open = announce;
        self
    }
}
