//! Optional callback slots exposed to embedding collaborators.
//!
//! Absence of a hook means "no hook", never an error. Hooks observe request
//! metadata only; they cannot reach into connection state.

use hyper::http::response::Parts;
use hyper::{HeaderMap, Method, Uri};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported through the error hook and in logs.
///
/// Benign connection-teardown conditions are filtered out before reaching
/// this type; see `proxy::errors`.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream round trip failed: {0}")]
    Upstream(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("dial to {authority} failed: {source}")]
    Dial {
        authority: String,
        #[source]
        source: std::io::Error,
    },

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("response modifier rejected response: {0}")]
    Modify(String),

    #[error("tunnel relay failed: {0}")]
    Relay(#[source] std::io::Error),

    /// Reported only while the proxy itself is copying body bytes (the paced
    /// streaming path, `flush_interval > 0`). With pass-through streaming the
    /// server runtime observes the disconnect and drops the body without
    /// routing it through the error hook.
    #[error("client disconnected before round trip completed")]
    ClientGone,

    #[error("tunnel task panicked: {0}")]
    Panic(String),
}

/// Immutable snapshot of the inbound request, handed to hooks.
#[derive(Debug, Clone)]
pub struct RequestSummary {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl fmt::Display for RequestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.uri)
    }
}

pub type OnConnectFn = dyn Fn(&RequestSummary) + Send + Sync;
pub type OnErrorFn = dyn Fn(&RequestSummary, &ProxyError) + Send + Sync;
pub type ModifyResponseFn = dyn Fn(&mut Parts) -> Result<(), String> + Send + Sync;

/// Tagged set of callback slots carried by the proxy.
#[derive(Clone, Default)]
pub struct ProxyHooks {
    pub on_connect: Option<Arc<OnConnectFn>>,
    pub on_error: Option<Arc<OnErrorFn>>,
    pub modify_response: Option<Arc<ModifyResponseFn>>,
}

impl ProxyHooks {
    pub fn connected(&self, req: &RequestSummary) {
        if let Some(hook) = &self.on_connect {
            hook(req);
        }
    }

    pub fn failed(&self, req: &RequestSummary, err: &ProxyError) {
        if let Some(hook) = &self.on_error {
            hook(req, err);
        }
    }
}

impl fmt::Debug for ProxyHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyHooks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("modify_response", &self.modify_response.is_some())
            .finish()
    }
}
