//! Application state shared across request handlers.

use corsproxy_core::TargetPolicy;

use crate::config::ProxyConfig;
use crate::cors::CorsGate;
use crate::error::ProxyResult;
use crate::forward::Forwarder;

/// Application state shared across request handlers.
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug)]
pub struct AppState {
    /// Server configuration.
    pub config: ProxyConfig,
    /// Target authorization.
    pub policy: TargetPolicy,
    /// Upstream client.
    pub forwarder: Forwarder,
    /// CORS gate applied around the router.
    pub cors: CorsGate,
}

impl AppState {
    /// Create the state, validating the configuration.
    pub fn new(config: ProxyConfig) -> ProxyResult<Self> {
        let policy = TargetPolicy::new(config.targets.clone())?;
        let forwarder = Forwarder::new(config.connect_timeout_duration())?;
        let cors = CorsGate::new(&config.cors)?;

        Ok(Self {
            config,
            policy,
            forwarder,
            cors,
        })
    }
}
