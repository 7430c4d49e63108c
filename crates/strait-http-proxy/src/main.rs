use clap::Parser;
use strait_http_proxy::config::Config;
use strait_http_proxy::proxy::ProxyServer;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "strait-http-proxy", version, about)]
struct Args {
    /// Port to listen on.
    #[arg(short, long, default_value = "12828")]
    port: u16,

    /// Host/interface to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// YAML configuration file; flags override its values.
    #[arg(short, long)]
    config: Option<String>,

    /// Fixed upstream URL (reverse-proxy mode). Without it, targets come
    /// from the inbound requests themselves.
    #[arg(short, long)]
    target: Option<String>,

    /// Username for proxy Basic Authentication.
    #[arg(short, long, env = "STRAIT_USERNAME")]
    username: Option<String>,

    /// Password for proxy Basic Authentication.
    #[arg(short = 'P', long, env = "STRAIT_PASSWORD")]
    password: Option<String>,

    /// Refuse CONNECT requests (HTTPS tunneling off).
    #[arg(long)]
    disable_https: bool,

    /// Per-request / per-tunnel deadline in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Response flush interval in milliseconds (0 = unpaced passthrough).
    #[arg(long)]
    flush_interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let config = match build_config(args) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let server = match ProxyServer::new(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start proxy: {e}");
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Proxy server exited with error: {e}");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }
}

fn build_config(args: Args) -> Result<Config, anyhow::Error> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    // Flags beat file values only when given explicitly.
    if args.port != 12828 || args.config.is_none() {
        config.listen.port = args.port;
    }
    if args.host != "0.0.0.0" || args.config.is_none() {
        config.listen.host = args.host;
    }
    if let Some(url) = args.target {
        config.upstream.get_or_insert_with(Default::default).url = url;
    }
    if let Some(username) = args.username {
        config.auth.username = Some(username);
    }
    if let Some(password) = args.password {
        config.auth.password = Some(password);
    }
    if args.disable_https {
        config.limits.disable_https = true;
    }
    if let Some(secs) = args.timeout_secs {
        config.limits.timeout_secs = secs;
    }
    if let Some(ms) = args.flush_interval_ms {
        config.limits.flush_interval_ms = ms;
    }

    config.validate()?;
    Ok(config)
}
