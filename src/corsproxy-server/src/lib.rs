//! CORS proxy server.
//!
//! Lets browser clients reach cross-origin HTTP services by putting the
//! target URL in the request path:
//!
//! ```text
//! GET http://proxy:8000/https://api.example.com/v1/items?page=2
//! ```
//!
//! This crate provides:
//! - A CORS gate answering preflights and decorating responses
//! - Target authorization against an allowlist, with SSRF protection
//! - Streaming forwarding of the request and the upstream response

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod cors;
pub mod error;
pub mod forward;
pub mod handlers;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use config::{CorsOptions, ProxyConfig};
pub use cors::CorsGate;
pub use error::{ProxyError, ProxyResult};
pub use forward::Forwarder;
pub use state::AppState;

/// Run the server with the given configuration.
pub async fn run(config: ProxyConfig) -> anyhow::Result<()> {
    run_with_shutdown(config, std::future::pending()).await
}

/// Run the server with graceful shutdown support.
pub async fn run_with_shutdown<F>(config: ProxyConfig, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    if config.allows_private_targets_without_rules() {
        warn!("Private network targets are allowed and every target is allowed.");
        warn!("Anyone reaching this proxy can use it to access your internal network.");
    }

    let addr = config.socket_addr()?;
    let state = Arc::new(AppState::new(config)?);
    if state.policy.allowlist().is_allow_all() {
        info!("No allowed targets configured, proxying to any public target");
    } else if state.policy.allowlist().rules().is_empty() {
        warn!("Every allowed target entry is blank, all targets will be rejected");
    }
    let app = create_router(state);

    let listener = TcpListener::bind(addr).await?;
    info!("Starting CORS proxy on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}

/// Create the application router.
///
/// Every path is handled by the proxy handler, behind the CORS gate.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = state.cors.clone();
    let router = Router::new()
        .fallback(handlers::proxy)
        .with_state(state);

    cors.wrap(router).layer(TraceLayer::new_for_http())
}
