//! ProxyServer struct and main run loop.
//!
//! Accepts connections, serves each on its own task with upgrade support
//! (needed for CONNECT), and applies the Basic-Auth gate before a request
//! reaches the dispatcher. The 401 decision lives here, outside the request
//! paths: the cache and validator only say whether a token decodes.

use super::client::create_http_client;
use super::context::ProxyContext;
use super::director::Target;
use super::errors::is_closed_conn_hyper;
use super::handler::handle_request;
use super::network::create_reusable_listener;
use super::ProxyBody;
use crate::auth::{compare_credentials, AuthCache, SweeperHandle};
use crate::config::Config;
use crate::hooks::ProxyHooks;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::PROXY_AUTHORIZATION;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// The main proxy server struct.
pub struct ProxyServer {
    config: Arc<Config>,
    ctx: Arc<ProxyContext>,
    auth_cache: Arc<AuthCache>,
    credentials: Option<(String, String)>,
    _sweeper: SweeperHandle,
}

impl ProxyServer {
    /// Create a new ProxyServer from configuration.
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        Self::new_with_hooks(config, ProxyHooks::default()).await
    }

    /// Create a new ProxyServer with collaborator hooks installed.
    pub async fn new_with_hooks(
        config: Config,
        hooks: ProxyHooks,
    ) -> Result<Self, anyhow::Error> {
        config.validate()?;

        let target = config
            .upstream
            .as_ref()
            .map(|u| Target::parse(&u.url))
            .transpose()?;

        let http_client = create_http_client(&config);

        let ctx = Arc::new(ProxyContext {
            http_client,
            target,
            hooks,
            timeout: config.limits.timeout(),
            flush_interval: config.limits.flush_interval(),
            http_buffer_size: config.limits.http_buffer_size,
            tunnel_buffer_size: config.limits.tunnel_buffer_size,
            disable_https: config.limits.disable_https,
        });

        let auth_cache = Arc::new(AuthCache::new(Duration::from_secs(
            config.auth.cache_ttl_secs,
        )));
        let sweeper =
            auth_cache.start_sweeper(Some(Duration::from_secs(config.auth.sweep_period_secs)));

        let credentials = match (&config.auth.username, &config.auth.password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        };

        Ok(Self {
            config: Arc::new(config),
            ctx,
            auth_cache,
            credentials,
            _sweeper: sweeper,
        })
    }

    /// Run the proxy server, accepting connections and handling requests.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let addr: SocketAddr = format!("{}:{}", self.config.listen.host, self.config.listen.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid listen address: {e}"))?;
        let listener = create_reusable_listener(addr)?;

        info!("Listening on http://{}", listener.local_addr()?);
        match &self.config.upstream {
            Some(upstream) => info!("Forwarding to {}", upstream.url),
            None => info!("Forward-proxy mode: targets taken from inbound requests"),
        }
        if self.credentials.is_some() {
            info!("Proxy authentication enabled");
        }

        self.serve(listener).await
    }

    /// Accept loop over an already-bound listener. Split out so tests can
    /// bind an ephemeral port and learn the address first.
    pub async fn serve(self, listener: TcpListener) -> Result<(), anyhow::Error> {
        let server = Arc::new(self);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let server = Arc::clone(&server);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move { server.handle(req, remote_addr).await }
                });

                // with_upgrades keeps the connection available for CONNECT.
                if let Err(err) = http1::Builder::new()
                    .preserve_header_case(true)
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await
                {
                    if !is_closed_conn_hyper(&err) {
                        error!("Error serving connection from {}: {}", remote_addr, err);
                    }
                }
            });
        }
    }

    async fn handle(
        &self,
        req: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Result<Response<ProxyBody>, Infallible> {
        if let Some((expected_user, expected_pass)) = &self.credentials {
            let token = req
                .headers()
                .get(PROXY_AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");

            // Reject unless both components match the configured identity.
            let authorized = self
                .auth_cache
                .validate(token)
                .map(|creds| {
                    compare_credentials(
                        &creds.username,
                        &creds.password,
                        expected_user,
                        expected_pass,
                    )
                })
                .unwrap_or(false);

            if !authorized {
                debug!("rejecting unauthenticated request from {remote_addr}");
                return Ok(unauthorized_response());
            }
        }

        handle_request(&self.ctx, req, remote_addr).await
    }
}

fn unauthorized_response() -> Response<ProxyBody> {
    Response::builder()
        .status(401)
        .header(
            "www-authenticate",
            r#"Basic realm="restricted", charset="UTF-8""#,
        )
        .body(
            Full::new(Bytes::from_static(b"Unauthorized"))
                .map_err(|never: Infallible| match never {})
                .boxed(),
        )
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_response_challenge() {
        let response = unauthorized_response();
        assert_eq!(response.status(), 401);
        assert_eq!(
            response.headers().get("www-authenticate").unwrap(),
            r#"Basic realm="restricted", charset="UTF-8""#
        );
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let mut config = Config::default();
        config.auth.username = Some("alice".to_string());
        assert!(ProxyServer::new(config).await.is_err());
    }
}
