//! Per-connection transport settings.
//! Deserialized from the `[transport]` table of the application config,
//! optionally overridden per connection.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Upper bound on every wait inside a worker loop.
    #[serde(default = "default_blocking_timeout")]
    pub blocking_timeout_ms: u64,
    /// Give up connecting after this long. `None` retries forever.
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default = "default_connect_retry_delay")]
    pub connect_retry_delay_ms: u64,
    /// Pause between teardown and rebuild on reconnect.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Liveness probe path for polling transports, joined to the base url.
    /// `None` probes the base url itself.
    #[serde(default)]
    pub heartbeat_path: Option<String>,
    #[serde(default = "default_heartbeat_delay")]
    pub heartbeat_delay_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_blocking_timeout() -> u64 {
    5_000
}
fn default_connect_retry_delay() -> u64 {
    10_000
}
fn default_reconnect_delay() -> u64 {
    3_000
}
fn default_heartbeat_delay() -> u64 {
    30_000
}
fn default_request_timeout() -> u64 {
    30_000
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            blocking_timeout_ms: default_blocking_timeout(),
            connect_timeout_ms: None,
            connect_retry_delay_ms: default_connect_retry_delay(),
            reconnect_delay_ms: default_reconnect_delay(),
            heartbeat_path: None,
            heartbeat_delay_ms: default_heartbeat_delay(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl TransportConfig {
    pub fn blocking_timeout(&self) -> Duration {
        Duration::from_millis(self.blocking_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn heartbeat_delay(&self) -> Duration {
        Duration::from_millis(self.heartbeat_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Short timings for tests and local loopback peers.
    pub fn fast() -> Self {
        Self {
            blocking_timeout_ms: 100,
            connect_timeout_ms: None,
            connect_retry_delay_ms: 50,
            reconnect_delay_ms: 50,
            heartbeat_path: None,
            heartbeat_delay_ms: 200,
            request_timeout_ms: 2_000,
        }
    }
}
