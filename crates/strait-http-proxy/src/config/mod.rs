//! Configuration types for the Strait proxy.

mod limits;
mod listen;
mod upstream;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use limits::LimitsConfig;
pub use listen::ListenConfig;
pub use upstream::{AuthConfig, ConnectionPoolConfig, UpstreamConfig};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,

    /// Fixed forwarding target (reverse-proxy mode). When absent, plain HTTP
    /// requests are forwarded to the host named by the request itself
    /// (forward-proxy mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamConfig>,

    /// Proxy-level Basic Authentication. Auth is enforced only when both
    /// username and password are set.
    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if let Some(ref upstream) = self.upstream {
            if upstream.url.parse::<hyper::Uri>().is_err() {
                anyhow::bail!("invalid upstream URL: '{}'", upstream.url);
            }
        }

        if self.auth.username.is_some() != self.auth.password.is_some() {
            anyhow::bail!(
                "auth.username and auth.password must be set together or not at all"
            );
        }

        if self.limits.timeout_secs == 0 {
            anyhow::bail!("limits.timeout_secs must be greater than zero");
        }

        Ok(())
    }
}
