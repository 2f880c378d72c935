//! CORS proxy server binary.

use std::process::ExitCode;

use clap::Parser;
use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use corsproxy_server::{CorsOptions, ProxyConfig, run_with_shutdown};

/// CORS proxy for browser clients
#[derive(Parser)]
#[command(name = "corsproxy")]
#[command(about = "Proxy that adds CORS headers to responses of allowed targets")]
#[command(version)]
struct Args {
    /// Configuration file path (JSON). Other options are ignored when set.
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address
    #[arg(long, env = "CORSPROXY_ADDR", default_value = ":8000")]
    addr: String,

    /// Comma-delimited origins allowed to use the proxy
    #[arg(long, env = "CORSPROXY_ALLOWED_ORIGINS", value_delimiter = ',')]
    allowed_origins: Vec<String>,

    /// Comma-delimited methods allowed for cross-origin requests
    #[arg(
        long,
        env = "CORSPROXY_ALLOWED_METHODS",
        value_delimiter = ',',
        default_value = "GET,HEAD,POST,PUT,PATCH,DELETE"
    )]
    allowed_methods: Vec<String>,

    /// Comma-delimited headers allowed for cross-origin requests
    #[arg(
        long,
        env = "CORSPROXY_ALLOWED_HEADERS",
        value_delimiter = ',',
        default_value = "accept,content-type,x-requested-with,authorization"
    )]
    allowed_headers: Vec<String>,

    /// Comma-delimited headers exposed to the client
    #[arg(long, env = "CORSPROXY_EXPOSED_HEADERS", value_delimiter = ',')]
    exposed_headers: Vec<String>,

    /// Seconds browsers may cache preflight results
    #[arg(long, env = "CORSPROXY_MAX_AGE", default_value_t = 0)]
    max_age: u64,

    /// Allow credentialed cross-origin requests
    #[arg(long, env = "CORSPROXY_ALLOW_CREDENTIALS")]
    allow_credentials: bool,

    /// Answer Private Network Access preflights
    #[arg(long, env = "CORSPROXY_ALLOW_PRIVATE_NETWORK")]
    allow_private_network: bool,

    /// Forward preflight requests to the target
    #[arg(long, env = "CORSPROXY_OPTIONS_PASSTHROUGH")]
    options_passthrough: bool,

    /// Status code for successful preflight responses
    #[arg(long, env = "CORSPROXY_OPTIONS_SUCCESS_STATUS", default_value_t = 204)]
    options_success_status: u16,

    /// Log CORS decisions and the effective configuration
    #[arg(long, env = "CORSPROXY_DEBUG")]
    debug: bool,

    /// Comma-delimited targets the proxy may forward to
    #[arg(long, env = "CORSPROXY_ALLOWED_TARGETS", value_delimiter = ',')]
    allowed_targets: Vec<String>,

    /// Allow targets that are private or loopback IP addresses
    #[arg(long, env = "CORSPROXY_ALLOW_PRIVATE_NETWORK_TARGET")]
    allow_private_network_target: bool,

    /// Do not enable private targets when an allowed target names one
    #[arg(long, env = "CORSPROXY_NO_IMPLICIT_PRIVATE_NETWORK")]
    no_implicit_private_network: bool,

    /// Upstream connect timeout in seconds
    #[arg(long, env = "CORSPROXY_CONNECT_TIMEOUT")]
    connect_timeout: Option<u64>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn into_config(self) -> ProxyConfig {
        let mut config = ProxyConfig {
            listen_addr: self.addr,
            cors: CorsOptions {
                allowed_origins: trimmed(self.allowed_origins),
                allowed_methods: trimmed(self.allowed_methods),
                allowed_headers: trimmed(self.allowed_headers),
                exposed_headers: trimmed(self.exposed_headers),
                max_age: self.max_age,
                allow_credentials: self.allow_credentials,
                allow_private_network: self.allow_private_network,
                options_passthrough: self.options_passthrough,
                options_success_status: self.options_success_status,
                debug: self.debug,
            },
            connect_timeout: self.connect_timeout,
            ..ProxyConfig::default()
        };
        config.targets.allowed_targets = trimmed(self.allowed_targets);
        config.targets.allow_private_network_target = self.allow_private_network_target;
        config.targets.implicit_private_network = !self.no_implicit_private_network;
        config
    }
}

fn trimmed(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

fn setup_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { args.log_level.as_str() };
    setup_logging(level, args.json_logs);

    let config = if let Some(config_path) = &args.config {
        match ProxyConfig::load(config_path) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to load config from {}: {}", config_path, e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        args.into_config()
    };

    debug!(config = ?config, "Effective configuration");
    info!("Press Ctrl+C to stop");

    if let Err(e) = run_with_shutdown(config, shutdown_signal()).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Server stopped");
    ExitCode::SUCCESS
}
