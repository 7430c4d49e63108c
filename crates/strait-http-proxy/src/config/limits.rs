//! Request timeout, buffer, and flush pacing configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Upper bound on a whole request or tunnel session, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// While streaming a response body, flush at most once per this interval.
    /// Zero (the default) copies bytes through with no extra flushing.
    #[serde(default)]
    pub flush_interval_ms: u64,
    /// Buffer size for forwarding-path body copies.
    #[serde(default = "default_http_buffer_size")]
    pub http_buffer_size: usize,
    /// Buffer size for tunnel relay copies.
    #[serde(default = "default_tunnel_buffer_size")]
    pub tunnel_buffer_size: usize,
    /// Refuse CONNECT requests entirely.
    #[serde(default)]
    pub disable_https: bool,
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_http_buffer_size() -> usize {
    32 * 1024
}

fn default_tunnel_buffer_size() -> usize {
    64 * 1024
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            flush_interval_ms: 0,
            http_buffer_size: default_http_buffer_size(),
            tunnel_buffer_size: default_tunnel_buffer_size(),
            disable_https: false,
        }
    }
}

impl LimitsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}
