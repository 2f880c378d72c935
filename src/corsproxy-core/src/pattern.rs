//! Allowlist rules and target matching.

use super::{Result, TargetError, url_norm};

/// A single compiled allow rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowRule {
    /// Match any target ("*").
    AllowAll,

    /// Match a target exactly, or any path beneath it.
    /// Stored without a trailing `/`.
    Exact(String),

    /// Match around a single `*`.
    Wildcard(Wildcard),
}

/// A rule containing one `*`, split into the text before and after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wildcard {
    prefix: String,
    suffix: String,
}

impl Wildcard {
    /// Create a wildcard from its literal prefix and suffix.
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    /// Check whether `target` matches.
    ///
    /// The `*` may stand for part of a host or for path segments: after the
    /// prefix, the remainder must end with the suffix or contain the suffix
    /// followed by `/`. The second form also accepts the suffix when it
    /// sits inside a path, so `http://*.example.com` admits
    /// `http://evil.test/x.example.com/`.
    pub fn matches(&self, target: &str) -> bool {
        if target.len() < self.prefix.len() + self.suffix.len() {
            return false;
        }
        match target.strip_prefix(self.prefix.as_str()) {
            Some(rest) => {
                rest.ends_with(self.suffix.as_str()) || rest.contains(&format!("{}/", self.suffix))
            }
            None => false,
        }
    }

    /// Text before the `*`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Text after the `*`.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }
}

impl AllowRule {
    /// Compile one configured target string.
    ///
    /// The target is normalized (host lowercased, query dropped) before it is
    /// split, so rules compare against normalized request targets. A rule may
    /// contain at most one `*`.
    pub fn parse(target: &str) -> Result<Self> {
        if target == "*" {
            return Ok(AllowRule::AllowAll);
        }

        let normalized = url_norm::strip_query(target).map_err(|err| TargetError::InvalidTarget {
            target: target.to_string(),
            reason: err.to_string(),
        })?;

        match normalized.split_once('*') {
            None => Ok(AllowRule::Exact(
                normalized
                    .strip_suffix('/')
                    .unwrap_or(&normalized)
                    .to_string(),
            )),
            Some((prefix, suffix)) if !suffix.contains('*') => {
                Ok(AllowRule::Wildcard(Wildcard::new(prefix, suffix)))
            }
            Some(_) => Err(TargetError::InvalidPattern(format!(
                "{target:?} contains more than one '*'"
            ))),
        }
    }

    /// Check whether this rule admits `target`.
    ///
    /// `target` must already be normalized.
    pub fn matches(&self, target: &str) -> bool {
        match self {
            AllowRule::AllowAll => true,
            AllowRule::Exact(rule) => {
                let stripped = target.strip_suffix('/').unwrap_or(target);
                stripped == rule.as_str()
                    || target
                        .strip_prefix(rule.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            AllowRule::Wildcard(wildcard) => wildcard.matches(target),
        }
    }
}

impl std::fmt::Display for AllowRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllowRule::AllowAll => write!(f, "*"),
            AllowRule::Exact(rule) => write!(f, "{}", rule),
            AllowRule::Wildcard(w) => write!(f, "{}*{}", w.prefix, w.suffix),
        }
    }
}

impl std::str::FromStr for AllowRule {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// The compiled, immutable allowlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allowlist {
    rules: Vec<AllowRule>,
}

impl Allowlist {
    /// Allowlist admitting every target.
    pub fn allow_all() -> Self {
        Self {
            rules: vec![AllowRule::AllowAll],
        }
    }

    /// Compile configured target strings.
    ///
    /// An empty list, or any literal `*` entry, produces an allow-all list
    /// and discards every other rule. Empty entries are skipped, so a list
    /// made only of empty entries admits nothing. The first invalid entry
    /// fails the whole compilation.
    pub fn compile<S: AsRef<str>>(targets: &[S]) -> Result<Self> {
        if targets.is_empty() {
            return Ok(Self::allow_all());
        }

        let mut rules = Vec::with_capacity(targets.len());

        for target in targets {
            let target = target.as_ref();
            if target.is_empty() {
                continue;
            }
            match AllowRule::parse(target)? {
                AllowRule::AllowAll => return Ok(Self::allow_all()),
                rule => rules.push(rule),
            }
        }

        Ok(Self { rules })
    }

    /// Whether every target is admitted.
    pub fn is_allow_all(&self) -> bool {
        matches!(self.rules.as_slice(), [AllowRule::AllowAll])
    }

    /// The compiled rules, in configuration order.
    pub fn rules(&self) -> &[AllowRule] {
        &self.rules
    }

    /// Check whether any rule admits the normalized `target`.
    pub fn is_allowed(&self, target: &str) -> bool {
        self.rules.iter().any(|rule| rule.matches(target))
    }
}

impl Default for Allowlist {
    fn default() -> Self {
        Self::allow_all()
    }
}
