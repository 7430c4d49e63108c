//! CONNECT tunneling.
//!
//! After the CONNECT handshake the client connection carries opaque bytes
//! (usually TLS) that are relayed verbatim to the dialed target. The dial
//! happens before the `200` goes out, so a dial failure still produces a
//! `504` status line on the not-yet-upgraded connection. Once hyper hands
//! over the upgraded connection, the relay owns both sockets and closes
//! them on every exit path.

use super::context::ProxyContext;
use super::errors::is_closed_conn_error;
use super::flush::copy_buffered;
use super::forwarding::{empty_response, error_response};
use super::ProxyBody;
use crate::hooks::{ProxyError, ProxyHooks, RequestSummary};
use hyper::body::Incoming;
use hyper::upgrade::Upgraded;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const KEEPALIVE_TIME: Duration = Duration::from_secs(60);

/// Handle a CONNECT request: dial the target, answer `200`, then relay
/// bytes in both directions until the session ends or the deadline passes.
pub async fn handle_connect(
    ctx: &ProxyContext,
    summary: &RequestSummary,
    req: Request<Incoming>,
) -> Response<ProxyBody> {
    if ctx.disable_https {
        warn!("CONNECT refused: HTTPS tunneling disabled by configuration");
        return error_response(503, "HTTPS Proxy Disabled");
    }

    ctx.hooks.connected(summary);

    let authority = match req.uri().authority() {
        Some(authority) => authority.to_string(),
        None => {
            warn!("CONNECT request without target authority: {}", req.uri());
            return error_response(400, "Bad Request");
        }
    };

    // Dial before answering so a failure can still be reported as a status
    // line. 60s connect timeout, keepalive on the upstream leg.
    let upstream = match dial(&authority).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("CONNECT dial to {authority} failed: {e}");
            ctx.hooks.failed(
                summary,
                &ProxyError::Dial {
                    authority: authority.clone(),
                    source: e,
                },
            );
            return error_response(504, "Gateway Timeout");
        }
    };

    let hooks = ctx.hooks.clone();
    let summary = summary.clone();
    let timeout = ctx.timeout;
    let buf_size = ctx.tunnel_buffer_size;

    // The 200 is written by hyper when this response is returned; the
    // upgrade future below resolves once the response has gone out and the
    // connection is ours.
    tokio::spawn(async move {
        let upgraded = match hyper::upgrade::on(req).await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                error!("CONNECT upgrade failed for {authority}: {e}");
                hooks.failed(&summary, &ProxyError::Upstream(Box::new(e)));
                return;
            }
        };
        run_tunnel(upgraded, upstream, &authority, timeout, buf_size, hooks, summary).await;
    });

    empty_response(200)
}

async fn dial(authority: &str) -> io::Result<TcpStream> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(authority))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connection timed out"))??;

    let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_TIME);
    SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Drive the relay inside its own task so a panic is contained: a panicked
/// join is converted into an error-hook invocation, and aborting the task
/// drops (closes) both connections.
async fn run_tunnel(
    upgraded: Upgraded,
    upstream: TcpStream,
    authority: &str,
    timeout: Duration,
    buf_size: usize,
    hooks: ProxyHooks,
    summary: RequestSummary,
) {
    let relay_task = tokio::spawn(relay(
        upgraded,
        upstream,
        buf_size,
        hooks.clone(),
        summary.clone(),
    ));
    let abort = relay_task.abort_handle();

    match tokio::time::timeout(timeout, relay_task).await {
        Ok(Ok((to_upstream, to_client))) => {
            info!(
                "tunnel to {authority} closed: {to_upstream} bytes out, {to_client} bytes in"
            );
        }
        Ok(Err(join_err)) => {
            if join_err.is_panic() {
                error!("tunnel to {authority} panicked: {join_err}");
                hooks.failed(&summary, &ProxyError::Panic(join_err.to_string()));
            }
        }
        Err(_) => {
            abort.abort();
            warn!("tunnel to {authority} hit the {timeout:?} session deadline");
            hooks.failed(&summary, &ProxyError::Timeout(timeout));
        }
    }
}

/// Concurrent duplex copy. Each direction owns one read half and the
/// opposite write half; on clean EOF it half-closes its destination so the
/// peer sees FIN while the other direction keeps running. Completion is
/// signaled on a channel sized for both directions, so neither blocks even
/// if the collector is slow.
async fn relay(
    upgraded: Upgraded,
    upstream: TcpStream,
    buf_size: usize,
    hooks: ProxyHooks,
    summary: RequestSummary,
) -> (u64, u64) {
    let (mut client_read, mut client_write) = tokio::io::split(TokioIo::new(upgraded));
    let (mut upstream_read, mut upstream_write) = upstream.into_split();

    #[derive(Clone, Copy)]
    enum Leg {
        ToUpstream,
        ToClient,
    }

    let (done_tx, mut done_rx) = mpsc::channel::<(Leg, io::Result<u64>)>(2);

    let tx = done_tx.clone();
    let client_to_upstream = tokio::spawn(async move {
        let result = copy_buffered(&mut client_read, &mut upstream_write, buf_size).await;
        if result.is_ok() {
            let _ = upstream_write.shutdown().await;
        }
        let _ = tx.send((Leg::ToUpstream, result)).await;
    });

    let tx = done_tx;
    let upstream_to_client = tokio::spawn(async move {
        let result = copy_buffered(&mut upstream_read, &mut client_write, buf_size).await;
        if result.is_ok() {
            let _ = client_write.shutdown().await;
        }
        let _ = tx.send((Leg::ToClient, result)).await;
    });

    let mut to_upstream: u64 = 0;
    let mut to_client: u64 = 0;

    for _ in 0..2 {
        match done_rx.recv().await {
            Some((leg, Ok(n))) => match leg {
                Leg::ToUpstream => to_upstream = n,
                Leg::ToClient => to_client = n,
            },
            Some((_, Err(e))) => {
                if !is_closed_conn_error(&e) {
                    error!("tunnel relay error for {summary}: {e}");
                    hooks.failed(&summary, &ProxyError::Relay(e));
                    // Exit early; aborting both directions drops the
                    // connection halves and closes both sockets.
                    client_to_upstream.abort();
                    upstream_to_client.abort();
                    break;
                }
                debug!("tunnel relay for {summary} ended: {e}");
            }
            None => break,
        }
    }

    (to_upstream, to_client)
}
