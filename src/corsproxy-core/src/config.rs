//! Target policy configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the target authorization policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetPolicyConfig {
    /// Targets a cross-origin request may reach.
    ///
    /// Empty, or containing `"*"`, allows every target. An entry may contain
    /// one `*` standing for any text (`http://*.example.com`).
    #[serde(default)]
    pub allowed_targets: Vec<String>,

    /// Whether targets that are private or loopback IP literals are allowed.
    #[serde(default)]
    pub allow_private_network_target: bool,

    /// Allow private network targets when an allowlist entry itself names a
    /// private or loopback IP literal.
    #[serde(default = "default_true")]
    pub implicit_private_network: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TargetPolicyConfig {
    fn default() -> Self {
        Self {
            allowed_targets: Vec::new(),
            allow_private_network_target: false,
            implicit_private_network: default_true(),
        }
    }
}

impl TargetPolicyConfig {
    /// Create a new default config (all public targets allowed).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for configuration.
    pub fn builder() -> TargetPolicyConfigBuilder {
        TargetPolicyConfigBuilder::new()
    }
}

/// Builder for TargetPolicyConfig.
#[derive(Debug, Default)]
pub struct TargetPolicyConfigBuilder {
    config: TargetPolicyConfig,
}

impl TargetPolicyConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: TargetPolicyConfig::new(),
        }
    }

    /// Add an allowed target.
    pub fn allow_target(mut self, target: impl Into<String>) -> Self {
        self.config.allowed_targets.push(target.into());
        self
    }

    /// Add multiple allowed targets.
    pub fn allow_targets(mut self, targets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        for target in targets {
            self.config.allowed_targets.push(target.into());
        }
        self
    }

    /// Set whether private network targets are allowed.
    pub fn allow_private_network_target(mut self, allow: bool) -> Self {
        self.config.allow_private_network_target = allow;
        self
    }

    /// Set whether a private allowlist entry enables private network targets.
    pub fn implicit_private_network(mut self, enabled: bool) -> Self {
        self.config.implicit_private_network = enabled;
        self
    }

    /// Build the config.
    pub fn build(self) -> TargetPolicyConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = TargetPolicyConfig::default();
        assert!(config.allowed_targets.is_empty());
        assert!(!config.allow_private_network_target);
        assert!(config.implicit_private_network);
    }

    #[test]
    fn test_config_builder() {
        let config = TargetPolicyConfig::builder()
            .allow_target("http://example.com")
            .allow_targets(["https://*.github.com", "http://10.0.0.1"])
            .allow_private_network_target(true)
            .implicit_private_network(false)
            .build();

        assert_eq!(config.allowed_targets.len(), 3);
        assert!(config.allow_private_network_target);
        assert!(!config.implicit_private_network);
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let config: TargetPolicyConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, TargetPolicyConfig::default());

        let config: TargetPolicyConfig =
            serde_json::from_str(r#"{"allowed_targets": ["http://example.com"]}"#).unwrap();
        assert_eq!(config.allowed_targets, vec!["http://example.com"]);
        assert!(config.implicit_private_network);
    }
}
