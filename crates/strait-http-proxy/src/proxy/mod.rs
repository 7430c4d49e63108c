//! Proxy server module.
//!
//! - `server` - ProxyServer struct, accept loop, auth gate
//! - `handler` - request dispatch: method routing, timeout, outcome logging
//! - `director` - outbound request rewrite (scheme/host/path/query)
//! - `forwarding` - plain-HTTP path: round trip and response streaming
//! - `tunnel` - CONNECT path: raw bidirectional TCP relay
//! - `flush` - bounded-latency flushing for streamed response bodies
//! - `headers` - hop-by-hop header removal
//! - `errors` - benign connection-teardown classification
//! - `client` - shared upstream HTTP client
//! - `network` - network listener utilities (SO_REUSEPORT)

mod client;
mod context;
mod director;
mod errors;
mod flush;
mod forwarding;
mod handler;
mod headers;
mod network;
mod server;
mod tunnel;


use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;

/// Unified response body type. Streamed bodies surface `io::Error` so that
/// pipe and socket failures flow through without re-wrapping.
pub type ProxyBody = BoxBody<Bytes, std::io::Error>;

pub use context::ProxyContext;
pub use director::{single_joining_slash, Target};
pub use errors::{is_closed_conn_error, is_closed_conn_message};
pub use forwarding::error_response;
pub use headers::remove_hop_headers;
pub use network::create_reusable_listener;
pub use server::ProxyServer;
