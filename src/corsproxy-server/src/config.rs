//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use corsproxy_core::TargetPolicyConfig;
use serde::{Deserialize, Serialize};

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Listen address (e.g., "0.0.0.0:8000").
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Target authorization (allowed targets, private network access).
    #[serde(default, flatten)]
    pub targets: TargetPolicyConfig,

    /// Cross-origin options for browser clients.
    #[serde(default)]
    pub cors: CorsOptions,

    /// Upstream connect timeout in seconds. No timeout when unset.
    #[serde(default)]
    pub connect_timeout: Option<u64>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8000".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            targets: TargetPolicyConfig::default(),
            cors: CorsOptions::default(),
            connect_timeout: None,
        }
    }
}

impl ProxyConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Parse the listen address. A bare `:port` listens on all interfaces.
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = if self.listen_addr.starts_with(':') {
            format!("0.0.0.0{}", self.listen_addr)
        } else {
            self.listen_addr.clone()
        };
        addr.parse::<SocketAddr>()
            .map_err(|e| anyhow::anyhow!("Invalid listen address {:?}: {e}", self.listen_addr))
    }

    /// Get the connect timeout as Duration.
    pub fn connect_timeout_duration(&self) -> Option<Duration> {
        self.connect_timeout.map(Duration::from_secs)
    }

    /// Private targets are enabled while every target is allowed.
    pub fn allows_private_targets_without_rules(&self) -> bool {
        let targets = &self.targets.allowed_targets;
        let allow_all = targets.is_empty() || targets.iter().any(|t| t == "*");
        allow_all && self.targets.allow_private_network_target
    }
}

/// CORS options, applied by the CORS gate in front of the proxy handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsOptions {
    /// Origins a cross-domain request can be executed from. Empty or `*`
    /// allows every origin; an entry may contain one `*`.
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Methods the client is allowed to use with cross-domain requests.
    #[serde(default = "default_allowed_methods")]
    pub allowed_methods: Vec<String>,

    /// Headers the client is allowed to use with cross-domain requests.
    #[serde(default = "default_allowed_headers")]
    pub allowed_headers: Vec<String>,

    /// Headers that are safe to expose to the client.
    #[serde(default)]
    pub exposed_headers: Vec<String>,

    /// How long (in seconds) browsers may cache preflight results. 0 omits
    /// the header.
    #[serde(default)]
    pub max_age: u64,

    /// Whether the request can include user credentials.
    #[serde(default)]
    pub allow_credentials: bool,

    /// Whether to answer Private Network Access preflights.
    #[serde(default)]
    pub allow_private_network: bool,

    /// Let preflight requests through to the proxy handler after adding
    /// CORS headers.
    #[serde(default)]
    pub options_passthrough: bool,

    /// Status code for successful preflight responses.
    #[serde(default = "default_success_status")]
    pub options_success_status: u16,

    /// Log CORS decisions.
    #[serde(default)]
    pub debug: bool,
}

/// Methods allowed when none are configured.
pub const DEFAULT_ALLOWED_METHODS: &[&str] = &["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE"];

/// Headers allowed when none are configured.
pub const DEFAULT_ALLOWED_HEADERS: &[&str] =
    &["accept", "content-type", "x-requested-with", "authorization"];

fn default_allowed_methods() -> Vec<String> {
    DEFAULT_ALLOWED_METHODS.iter().map(|m| m.to_string()).collect()
}

fn default_allowed_headers() -> Vec<String> {
    DEFAULT_ALLOWED_HEADERS.iter().map(|h| h.to_string()).collect()
}

fn default_success_status() -> u16 {
    204
}

impl Default for CorsOptions {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allowed_methods: default_allowed_methods(),
            allowed_headers: default_allowed_headers(),
            exposed_headers: Vec::new(),
            max_age: 0,
            allow_credentials: false,
            allow_private_network: false,
            options_passthrough: false,
            options_success_status: default_success_status(),
            debug: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ProxyConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:8000");
        assert!(config.targets.allowed_targets.is_empty());
        assert!(!config.targets.allow_private_network_target);
        assert_eq!(config.cors.options_success_status, 204);
        assert_eq!(config.cors.allowed_methods.len(), 6);
        assert!(config.connect_timeout_duration().is_none());
    }

    #[test]
    fn test_config_load_flattens_targets() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "listen_addr": "127.0.0.1:9000",
                "allowed_targets": ["https://api.example.com"],
                "allow_private_network_target": true,
                "cors": {{ "allowed_origins": ["https://app.example.com"], "max_age": 600 }},
                "connect_timeout": 5
            }}"#
        )
        .unwrap();

        let config = ProxyConfig::load(file.path()).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.targets.allowed_targets, vec!["https://api.example.com"]);
        assert!(config.targets.allow_private_network_target);
        assert!(config.targets.implicit_private_network);
        assert_eq!(config.cors.allowed_origins, vec!["https://app.example.com"]);
        assert_eq!(config.cors.max_age, 600);
        assert_eq!(config.cors.allowed_headers.len(), 4);
        assert_eq!(config.connect_timeout_duration(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_socket_addr() {
        let mut config = ProxyConfig::default();
        assert_eq!(config.socket_addr().unwrap().port(), 8000);

        config.listen_addr = ":9090".to_string();
        let addr = config.socket_addr().unwrap();
        assert!(addr.ip().is_unspecified());
        assert_eq!(addr.port(), 9090);

        config.listen_addr = "localhost".to_string();
        assert!(config.socket_addr().is_err());
    }

    #[test]
    fn test_private_targets_without_rules_warning() {
        let mut config = ProxyConfig::default();
        assert!(!config.allows_private_targets_without_rules());

        config.targets.allow_private_network_target = true;
        assert!(config.allows_private_targets_without_rules());

        config.targets.allowed_targets = vec![String::new()];
        assert!(!config.allows_private_targets_without_rules());

        config.targets.allowed_targets = vec!["http://example.com".to_string()];
        assert!(!config.allows_private_targets_without_rules());

        config.targets.allowed_targets.push("*".to_string());
        assert!(config.allows_private_targets_without_rules());
    }
}
