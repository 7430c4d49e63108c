//! Upstream target, auth, and connection pool configuration.

use serde::{Deserialize, Serialize};

/// Fixed forwarding target for reverse-proxy mode.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Base URL; its path is prepended to inbound paths and its query is
    /// merged with inbound queries.
    pub url: String,
    /// Skip TLS certificate verification for this upstream (development only).
    #[serde(default)]
    pub tls_skip_verify: bool,
}

/// Proxy-level Basic Authentication settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// How long a validation result stays cached.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Period of the background sweep that evicts expired entries.
    #[serde(default = "default_sweep_period_secs")]
    pub sweep_period_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_sweep_period_secs() -> u64 {
    60
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            cache_ttl_secs: default_cache_ttl_secs(),
            sweep_period_secs: default_sweep_period_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionPoolConfig {
    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_keepalive_timeout_secs")]
    pub keepalive_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_max_idle_per_host() -> usize {
    32
}

fn default_idle_timeout_secs() -> u64 {
    90
}

fn default_keepalive_timeout_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    60
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: default_max_idle_per_host(),
            idle_timeout_secs: default_idle_timeout_secs(),
            keepalive_timeout_secs: default_keepalive_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}
