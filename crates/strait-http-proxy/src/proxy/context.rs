//! Shared per-proxy state handed to the request paths.

use super::client::HttpClient;
use super::director::Target;
use crate::hooks::ProxyHooks;
use std::time::Duration;

/// Context for handling a request. Built once per proxy instance; read-only
/// after startup, so concurrent requests share it without locking.
pub struct ProxyContext {
    pub http_client: HttpClient,
    /// Fixed rewrite target; `None` selects forward-proxy mode where the
    /// request's own host is the target.
    pub target: Option<Target>,
    pub hooks: ProxyHooks,
    pub timeout: Duration,
    pub flush_interval: Duration,
    pub http_buffer_size: usize,
    pub tunnel_buffer_size: usize,
    pub disable_https: bool,
}
