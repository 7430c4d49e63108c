//! Request dispatch.
//!
//! Every inbound request lands here after the auth gate: CONNECT goes to
//! the tunnel path, the ordinary methods go to the forwarding path under
//! the configured timeout, anything else is refused.

use super::context::ProxyContext;
use super::forwarding::{self, error_response};
use super::tunnel;
use super::ProxyBody;
use crate::hooks::{ProxyError, RequestSummary};
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Methods served by the forwarding path.
const FORWARD_METHODS: [Method; 7] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::HEAD,
    Method::OPTIONS,
    Method::PATCH,
];

/// Handle one inbound request: route by method, bound by the configured
/// timeout, and log the outcome with its latency.
pub async fn handle_request(
    ctx: &ProxyContext,
    req: Request<Incoming>,
    client_addr: SocketAddr,
) -> Result<Response<ProxyBody>, Infallible> {
    let start = Instant::now();
    let summary = RequestSummary {
        method: req.method().clone(),
        uri: req.uri().clone(),
        headers: req.headers().clone(),
    };

    debug!("Received request: {summary} from {client_addr}");

    let response = if req.method() == Method::CONNECT {
        // The tunnel enforces its own session deadline; wrapping it here
        // would cut the 200 handshake off from the relay.
        tunnel::handle_connect(ctx, &summary, req).await
    } else if FORWARD_METHODS.contains(req.method()) {
        // One budget for the whole transaction: the timeout below bounds the
        // round trip up to the response head, and the same deadline is then
        // carried into the body stream.
        let deadline = tokio::time::Instant::now() + ctx.timeout;
        match tokio::time::timeout(
            ctx.timeout,
            forwarding::handle_forward(ctx, &summary, req, client_addr),
        )
        .await
        {
            Ok(response) => forwarding::with_body_deadline(
                response,
                deadline,
                ctx.timeout,
                ctx.hooks.clone(),
                summary.clone(),
            ),
            Err(_) => {
                warn!("{summary} timed out after {:?}", ctx.timeout);
                ctx.hooks.failed(&summary, &ProxyError::Timeout(ctx.timeout));
                error_response(504, "Gateway Timeout")
            }
        }
    } else {
        warn!("unsupported method: {}", req.method());
        error_response(405, "Method Not Allowed")
    };

    info!(
        "{} {} -> {} ({:?})",
        summary.method,
        summary.uri,
        response.status(),
        start.elapsed()
    );

    Ok(response)
}
