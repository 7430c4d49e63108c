//! Request forwarding for plain HTTP.
//!
//! Rewrites the inbound request through the director, executes it against
//! the shared upstream client, and streams the response back. With a
//! non-zero flush interval the body is piped through a [`MaxLatencyWriter`]
//! so client-visible latency stays bounded while streaming.

use super::context::ProxyContext;
use super::director::{append_forwarded_for, Target};
use super::errors::{is_closed_conn_error, is_closed_conn_message};
use super::flush::MaxLatencyWriter;
use super::headers::remove_hop_headers;
use super::ProxyBody;
use crate::hooks::{ProxyError, ProxyHooks, RequestSummary};
use futures::{future, stream, StreamExt, TryStreamExt};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Body, Bytes, Frame, Incoming, SizeHint};
use hyper::header::{HeaderValue, HOST, TRAILER, USER_AGENT};
use hyper::{HeaderMap, Request, Response};
use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::sync::oneshot;
use tokio::time::Sleep;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, warn};

const DEFAULT_USER_AGENT: &str = concat!("strait-http-proxy/", env!("CARGO_PKG_VERSION"));

/// Helper function to create an error response.
pub fn error_response(status: u16, message: &str) -> Response<ProxyBody> {
    let body = serde_json::json!({ "error": message }).to_string();
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body)).map_err(io_never).boxed())
        .unwrap()
}

/// An empty-body response with the given status.
pub fn empty_response(status: u16) -> Response<ProxyBody> {
    Response::builder()
        .status(status)
        .body(Empty::<Bytes>::new().map_err(io_never).boxed())
        .unwrap()
}

fn io_never(never: Infallible) -> io::Error {
    match never {}
}

fn io_other<E>(err: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::Other, err)
}

/// Forward a plain HTTP request upstream and stream the response back.
pub async fn handle_forward(
    ctx: &ProxyContext,
    summary: &RequestSummary,
    req: Request<Incoming>,
    client_addr: SocketAddr,
) -> Response<ProxyBody> {
    ctx.hooks.connected(summary);

    let (parts, body) = req.into_parts();

    let target = match ctx.target.clone().or_else(|| Target::from_request(&parts)) {
        Some(target) => target,
        None => {
            warn!("request has no usable target host: {} {}", parts.method, parts.uri);
            return error_response(400, "Bad Request");
        }
    };

    let uri = match target.rewrite_uri(&parts.uri) {
        Ok(uri) => uri,
        Err(e) => {
            warn!("failed to rewrite request URI {}: {e}", parts.uri);
            return error_response(400, "Bad Request");
        }
    };

    // Rebuild headers: strip hop-by-hop, fold in the client IP, force Host
    // to the rewritten host, and make sure a User-Agent goes out.
    let mut headers = parts.headers.clone();
    remove_hop_headers(&mut headers);
    append_forwarded_for(&mut headers, client_addr.ip());
    if let Ok(host) = HeaderValue::from_str(target.authority().as_str()) {
        headers.insert(HOST, host);
    }
    if !headers.contains_key(USER_AGENT) {
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
    }

    debug!("Forwarding to: {}", uri);

    // Body passes through as a stream, never buffered. If the client goes
    // away mid-flight, hyper drops this future and the round trip below is
    // cancelled at its await point.
    let mut outbound = Request::builder()
        .method(parts.method.clone())
        .uri(uri)
        .body(body.map_err(io_other).boxed())
        .unwrap();
    *outbound.headers_mut() = headers;

    let upstream_response = match ctx.http_client.request(outbound).await {
        Ok(response) => response,
        Err(e) => {
            error!("Failed to forward request to upstream: {e}");
            ctx.hooks.failed(summary, &ProxyError::Upstream(Box::new(e)));
            return error_response(502, "Bad Gateway");
        }
    };

    let (mut parts, body) = upstream_response.into_parts();

    // The sanitizer strips `Trailer` along with the rest of the hop-by-hop
    // set; re-advertise the field names the upstream declared, since the
    // trailers themselves still flow through as body frames.
    let advertised_trailers = parts.headers.get(TRAILER).cloned();
    remove_hop_headers(&mut parts.headers);
    if let Some(names) = advertised_trailers {
        parts.headers.insert(TRAILER, names);
    }

    if let Some(modify) = ctx.hooks.modify_response.clone() {
        if let Err(msg) = modify(&mut parts) {
            error!("response modifier rejected response: {msg}");
            ctx.hooks.failed(summary, &ProxyError::Modify(msg));
            return error_response(502, "Bad Gateway");
        }
    }

    let body: ProxyBody = if ctx.flush_interval.is_zero() {
        // Correctness-preserving default: frames (trailers included) pass
        // through untouched.
        body.map_err(io_other).boxed()
    } else {
        paced_body(
            body,
            ctx.flush_interval,
            ctx.http_buffer_size,
            ctx.hooks.clone(),
            summary.clone(),
        )
    };

    Response::from_parts(parts, body)
}

/// Bound the body phase of `response` by an absolute deadline.
///
/// The round-trip timeout in the dispatcher covers only up to the response
/// head; this keeps a slow-dripping upstream from holding the connection past
/// the request budget. When the deadline passes mid-stream the body yields a
/// timed-out error (hyper then aborts the connection) and the timeout hook
/// fires once.
pub fn with_body_deadline(
    response: Response<ProxyBody>,
    deadline: tokio::time::Instant,
    budget: Duration,
    hooks: ProxyHooks,
    summary: RequestSummary,
) -> Response<ProxyBody> {
    let (parts, body) = response.into_parts();
    let body = BoxBody::new(DeadlineBody {
        inner: body,
        sleep: Box::pin(tokio::time::sleep_until(deadline)),
        budget,
        hooks,
        summary,
        expired: false,
    });
    Response::from_parts(parts, body)
}

struct DeadlineBody {
    inner: ProxyBody,
    sleep: Pin<Box<Sleep>>,
    budget: Duration,
    hooks: ProxyHooks,
    summary: RequestSummary,
    expired: bool,
}

impl Body for DeadlineBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        let this = self.as_mut().get_mut();
        if this.expired {
            return Poll::Ready(None);
        }
        if this.sleep.as_mut().poll(cx).is_ready() {
            this.expired = true;
            warn!("{} response body cut off after {:?}", this.summary, this.budget);
            this.hooks
                .failed(&this.summary, &ProxyError::Timeout(this.budget));
            return Poll::Ready(Some(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "response body deadline elapsed",
            ))));
        }
        Pin::new(&mut this.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Pipe a response body through a [`MaxLatencyWriter`] so the client sees
/// data at most one flush interval after the upstream produced it. The
/// trailer frame, if any, is appended after the pipe drains.
fn paced_body<B>(
    body: B,
    interval: Duration,
    buf_size: usize,
    hooks: ProxyHooks,
    summary: RequestSummary,
) -> ProxyBody
where
    B: Body<Data = Bytes> + Unpin + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
{
    let (writer, reader) = tokio::io::duplex(buf_size.max(8 * 1024));
    let (trailer_tx, trailer_rx) = oneshot::channel::<Option<HeaderMap>>();

    tokio::spawn(pump_body(body, writer, interval, trailer_tx, hooks, summary));

    let data = ReaderStream::with_capacity(reader, buf_size.max(1)).map_ok(Frame::data);
    let trailers = stream::once(async move { trailer_rx.await.ok().flatten() })
        .filter_map(|t| future::ready(t.map(|t| Ok(Frame::trailers(t)))));

    BoxBody::new(StreamBody::new(data.chain(trailers)))
}

/// Drain `body` into the paced writer. Copy errors that are not a benign
/// connection-closed condition are logged and reported through the error
/// hook; the response is already partially sent and cannot be rolled back.
async fn pump_body<B>(
    body: B,
    writer: DuplexStream,
    interval: Duration,
    trailer_tx: oneshot::Sender<Option<HeaderMap>>,
    hooks: ProxyHooks,
    summary: RequestSummary,
) where
    B: Body<Data = Bytes> + Unpin + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
{
    let writer = MaxLatencyWriter::new(writer, interval);
    let mut trailers: Option<HeaderMap> = None;

    let mut body = body;
    loop {
        match body.frame().await {
            None => break,
            Some(Ok(frame)) => match frame.into_data() {
                Ok(data) => {
                    if let Err(e) = writer.write_all(&data).await {
                        if is_closed_conn_error(&e) {
                            // Read side dropped: the client went away.
                            hooks.failed(&summary, &ProxyError::ClientGone);
                        } else {
                            error!("error copying response body for {summary}: {e}");
                            hooks.failed(&summary, &ProxyError::Relay(e));
                        }
                        break;
                    }
                }
                Err(frame) => {
                    if let Ok(t) = frame.into_trailers() {
                        trailers = Some(t);
                    }
                }
            },
            Some(Err(e)) => {
                let e = io_other(e);
                if !is_closed_conn_error(&e) && !is_closed_conn_message(&e.to_string()) {
                    error!("upstream body error for {summary}: {e}");
                    hooks.failed(&summary, &ProxyError::Relay(e));
                }
                break;
            }
        }
    }

    if let Err(e) = writer.finish().await {
        if !is_closed_conn_error(&e) {
            error!("error finishing response stream for {summary}: {e}");
        }
    }
    let _ = trailer_tx.send(trailers);
}
