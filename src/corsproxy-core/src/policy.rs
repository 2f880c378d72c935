//! Authorization policy for proxy targets.

use tracing::{debug, info};

use super::{
    Result,
    config::TargetPolicyConfig,
    ip_validation::classify,
    pattern::{AllowRule, Allowlist},
    url_norm::{NormalizedUrl, normalize},
};

/// Outcome of authorizing a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetDecision {
    /// Target may be forwarded to.
    Allowed,

    /// Target is rejected.
    Denied(DenyReason),
}

impl TargetDecision {
    /// Check if the decision allows access.
    pub fn is_allowed(&self) -> bool {
        matches!(self, TargetDecision::Allowed)
    }

    /// Check if the decision blocks access.
    pub fn is_denied(&self) -> bool {
        matches!(self, TargetDecision::Denied(_))
    }

    /// Status the caller should answer with.
    pub fn status(&self) -> DecisionStatus {
        match self {
            TargetDecision::Allowed => DecisionStatus::Ok,
            TargetDecision::Denied(reason) => reason.status(),
        }
    }
}

/// Reason for rejecting a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Target could not be parsed.
    Malformed,

    /// Scheme is neither `http` nor `https`.
    UnsupportedScheme,

    /// Target is a private or loopback IP literal.
    PrivateNetwork,

    /// No allow rule matched.
    NotAllowlisted,
}

impl DenyReason {
    /// Status for this rejection. Malformed input is always a client error.
    pub fn status(&self) -> DecisionStatus {
        match self {
            DenyReason::Malformed | DenyReason::UnsupportedScheme => DecisionStatus::BadRequest,
            DenyReason::PrivateNetwork | DenyReason::NotAllowlisted => DecisionStatus::Forbidden,
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::Malformed => write!(f, "malformed target URL"),
            DenyReason::UnsupportedScheme => write!(f, "unsupported scheme"),
            DenyReason::PrivateNetwork => write!(f, "private network target"),
            DenyReason::NotAllowlisted => write!(f, "not in allowlist"),
        }
    }
}

/// HTTP-style status of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionStatus {
    Ok,
    BadRequest,
    Forbidden,
}

impl DecisionStatus {
    /// Numeric HTTP status code.
    pub fn as_u16(&self) -> u16 {
        match self {
            DecisionStatus::Ok => 200,
            DecisionStatus::BadRequest => 400,
            DecisionStatus::Forbidden => 403,
        }
    }
}

/// Decides whether a target may be forwarded to.
///
/// Built once from configuration and never mutated, so it can be shared
/// across request tasks behind an `Arc`.
#[derive(Debug, Clone)]
pub struct TargetPolicy {
    /// Compiled allowlist.
    allowlist: Allowlist,

    /// Whether private/loopback literal targets are allowed.
    allow_private_network: bool,
}

impl TargetPolicy {
    /// Create a new policy from config. Fails on the first invalid target.
    pub fn new(config: TargetPolicyConfig) -> Result<Self> {
        let allowlist = Allowlist::compile(&config.allowed_targets)?;
        let mut allow_private_network = config.allow_private_network_target;

        if !allow_private_network
            && config.implicit_private_network
            && let Some(rule) = allowlist.rules().iter().find(|rule| names_private_host(rule))
        {
            info!(
                rule = %rule,
                "Allowlist names a private address, enabling private network targets"
            );
            allow_private_network = true;
        }

        Ok(Self {
            allowlist,
            allow_private_network,
        })
    }

    /// Policy that allows every public target.
    pub fn public_only() -> Self {
        Self {
            allowlist: Allowlist::allow_all(),
            allow_private_network: false,
        }
    }

    /// The compiled allowlist.
    pub fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }

    /// Whether private/loopback literal targets are allowed.
    pub fn allows_private_network(&self) -> bool {
        self.allow_private_network
    }

    /// Authorize a raw target string.
    ///
    /// Order matters: unparseable input and unsupported schemes are client
    /// errors even when a rule would match, and the private network check
    /// runs before the allowlist so a wildcard cannot admit an internal
    /// address.
    pub fn authorize(&self, target: &str) -> TargetDecision {
        let url = match normalize(target) {
            Ok(url) => url,
            Err(err) => {
                debug!(url = target, error = %err, "Rejecting unparseable target");
                return TargetDecision::Denied(DenyReason::Malformed);
            }
        };

        self.authorize_normalized(&url)
    }

    /// Authorize an already normalized target.
    pub fn authorize_normalized(&self, url: &NormalizedUrl) -> TargetDecision {
        if !matches!(url.scheme(), "http" | "https") {
            return TargetDecision::Denied(DenyReason::UnsupportedScheme);
        }

        if !self.allow_private_network && classify(url.host()).is_private_literal() {
            return TargetDecision::Denied(DenyReason::PrivateNetwork);
        }

        if self.allowlist.is_allowed(&url.to_string()) {
            TargetDecision::Allowed
        } else {
            TargetDecision::Denied(DenyReason::NotAllowlisted)
        }
    }
}

impl Default for TargetPolicy {
    fn default() -> Self {
        Self::public_only()
    }
}

/// Whether a compiled rule's host is a private or loopback literal.
fn names_private_host(rule: &AllowRule) -> bool {
    match rule {
        AllowRule::AllowAll => false,
        AllowRule::Exact(_) | AllowRule::Wildcard(_) => normalize(&rule.to_string())
            .map(|url| classify(url.host()).is_private_literal())
            .unwrap_or(false),
    }
}
