//! Target authorization for the CORS proxy.
//!
//! Decides whether an untrusted target URL taken from a request path may be
//! forwarded to:
//! - URL normalization (host lowercased, illegal characters escaped)
//! - Allowlist matching with exact, path-prefix and single-wildcard rules
//! - SSRF protection (blocks private/loopback IP literals)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     TargetPolicy                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌─────────────────┐ │
//! │  │ NormalizedUrl│  │ AddressClass │  │ Allowlist        │ │
//! │  │ (url_norm)   │  │ (ip_valid.)  │  │ (pattern)        │ │
//! │  └──────────────┘  └──────────────┘  └─────────────────┘ │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use corsproxy_core::{TargetDecision, TargetPolicy, TargetPolicyConfig};
//!
//! let config = TargetPolicyConfig::builder()
//!     .allow_target("https://api.example.com")
//!     .allow_target("https://*.github.com")
//!     .build();
//!
//! let policy = TargetPolicy::new(config)?;
//! assert_eq!(policy.authorize("https://api.github.com/repos"), TargetDecision::Allowed);
//! ```

pub mod config;
pub mod ip_validation;
pub mod pattern;
pub mod policy;
pub mod url_norm;

pub use config::{TargetPolicyConfig, TargetPolicyConfigBuilder};
pub use ip_validation::{AddressClass, classify, is_private_or_loopback, parse_ip_literal};
pub use pattern::{AllowRule, Allowlist, Wildcard};
pub use policy::{DecisionStatus, DenyReason, TargetDecision, TargetPolicy};
pub use url_norm::{NormalizedUrl, normalize, strip_query};

use thiserror::Error;

/// Errors for target parsing and policy construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    /// A URL could not be parsed.
    #[error("Invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A configured allowed target could not be parsed.
    #[error("Invalid target {target:?} in allowed targets: {reason}")]
    InvalidTarget { target: String, reason: String },

    /// A configured allowed target has an unsupported pattern.
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

pub type Result<T> = std::result::Result<T, TargetError>;
