//! Target URL parsing and normalization.
//!
//! Targets arrive as untrusted strings taken straight from a request path, so
//! the parser here accepts any URI reference rather than only absolute URLs.
//! Characters that are not legal in a path or fragment are percent-encoded
//! instead of rejected, which keeps `not a url` parseable (as the relative
//! path `not%20a%20url`). Parsing only fails on input that is structurally
//! broken: bad percent escapes, a non-numeric port, control characters,
//! illegal host or userinfo characters.
//!
//! Normalization lowercases the host and nothing else. Scheme, path, query
//! and fragment keep their case so that allowlist rules can be written
//! against case-sensitive paths.

use std::fmt;

use super::{Result, TargetError};

/// A parsed target URL with its host lowercased.
///
/// `Display` renders the canonical form used for allowlist comparison;
/// rendering and reparsing yields the same value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUrl {
    scheme: String,
    opaque: Option<String>,
    userinfo: Option<String>,
    /// Host and optional port, lowercased and percent-encoded for output.
    host: String,
    /// `scheme:/path` form with no authority at all.
    omit_host: bool,
    /// Escaped path.
    path: String,
    query: Option<String>,
    /// Escaped fragment, empty when absent.
    fragment: String,
}

impl NormalizedUrl {
    /// Parse and normalize a raw target string.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: String| TargetError::InvalidUrl {
            url: raw.to_string(),
            reason,
        };

        if raw.bytes().any(|b| b < 0x20 || b == 0x7f) {
            return Err(invalid("invalid control character in URL".to_string()));
        }

        let (rest, fragment) = match raw.split_once('#') {
            Some((rest, fragment)) => (rest, fragment),
            None => (raw, ""),
        };
        let fragment = escape_component(fragment, Component::Fragment).map_err(invalid)?;

        let mut url = Self {
            scheme: String::new(),
            opaque: None,
            userinfo: None,
            host: String::new(),
            omit_host: false,
            path: String::new(),
            query: None,
            fragment,
        };

        if rest == "*" {
            url.path = "*".to_string();
            return Ok(url);
        }

        let (scheme, rest) = split_scheme(rest).map_err(invalid)?;
        url.scheme = scheme.to_string();

        let rest = if rest.ends_with('?') && rest.matches('?').count() == 1 {
            url.query = Some(String::new());
            &rest[..rest.len() - 1]
        } else if let Some((rest, query)) = rest.split_once('?') {
            url.query = Some(query.to_string());
            rest
        } else {
            rest
        };

        if !rest.starts_with('/') {
            if !url.scheme.is_empty() {
                url.opaque = Some(rest.to_string());
                return Ok(url);
            }
            let first_segment = rest.split('/').next().unwrap_or_default();
            if first_segment.contains(':') {
                return Err(invalid(
                    "first path segment in URL cannot contain colon".to_string(),
                ));
            }
        }

        let mut path = rest;
        if (!url.scheme.is_empty() || !rest.starts_with("///")) && rest.starts_with("//") {
            let authority_and_path = &rest[2..];
            let (authority, remainder) = match authority_and_path.find('/') {
                Some(idx) => authority_and_path.split_at(idx),
                None => (authority_and_path, ""),
            };
            let (userinfo, host) = parse_authority(authority).map_err(invalid)?;
            url.userinfo = userinfo;
            url.host = host;
            path = remainder;
        } else if !url.scheme.is_empty() && rest.starts_with('/') {
            url.omit_host = true;
        }

        url.path = if path == "*" {
            path.to_string()
        } else {
            escape_component(path, Component::Path).map_err(invalid)?
        };

        Ok(url)
    }

    /// The scheme exactly as written (empty for relative references).
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Lowercased host including any `:port` suffix.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Lowercased host without the port. IPv6 literals keep their brackets.
    pub fn hostname(&self) -> &str {
        let host = self.host.as_str();
        if host.starts_with('[') {
            return match host.rfind(']') {
                Some(end) => &host[..=end],
                None => host,
            };
        }
        match host.rfind(':') {
            Some(colon) => &host[..colon],
            None => host,
        }
    }

    /// Escaped path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        if !self.scheme.is_empty() {
            out.push_str(&self.scheme);
            out.push(':');
        }

        if let Some(opaque) = &self.opaque {
            out.push_str(opaque);
        } else {
            let has_authority =
                !self.scheme.is_empty() || !self.host.is_empty() || self.userinfo.is_some();
            let bare_scheme_path =
                self.omit_host && self.host.is_empty() && self.userinfo.is_none();
            if has_authority && !bare_scheme_path {
                if !self.host.is_empty() || !self.path.is_empty() || self.userinfo.is_some() {
                    out.push_str("//");
                }
                if let Some(userinfo) = &self.userinfo {
                    out.push_str(userinfo);
                    out.push('@');
                }
                out.push_str(&self.host);
            }
            if !self.path.is_empty() && !self.path.starts_with('/') && !self.host.is_empty() {
                out.push('/');
            }
            if out.is_empty() {
                let first_segment = self.path.split('/').next().unwrap_or_default();
                if first_segment.contains(':') {
                    out.push_str("./");
                }
            }
            out.push_str(&self.path);
        }

        if let Some(query) = &self.query {
            out.push('?');
            out.push_str(query);
        }
        if !self.fragment.is_empty() {
            out.push('#');
            out.push_str(&self.fragment);
        }

        f.write_str(&out)
    }
}

impl std::str::FromStr for NormalizedUrl {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Parse `raw` and return its canonical string form.
pub fn normalize(raw: &str) -> Result<NormalizedUrl> {
    NormalizedUrl::parse(raw)
}

/// Normalize `raw` and drop everything from the first `?` onwards.
pub fn strip_query(raw: &str) -> Result<String> {
    let normalized = normalize(raw)?.to_string();
    Ok(match normalized.split_once('?') {
        Some((before, _)) => before.to_string(),
        None => normalized,
    })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Component {
    Path,
    Fragment,
}

/// Split a leading `scheme:` off `raw`. Returns an empty scheme when `raw`
/// does not start with one.
fn split_scheme(raw: &str) -> std::result::Result<(&str, &str), String> {
    for (i, c) in raw.bytes().enumerate() {
        match c {
            b'a'..=b'z' | b'A'..=b'Z' => {}
            b'0'..=b'9' | b'+' | b'-' | b'.' => {
                if i == 0 {
                    return Ok(("", raw));
                }
            }
            b':' => {
                if i == 0 {
                    return Err("missing protocol scheme".to_string());
                }
                return Ok((&raw[..i], &raw[i + 1..]));
            }
            _ => return Ok(("", raw)),
        }
    }
    Ok(("", raw))
}

fn parse_authority(authority: &str) -> std::result::Result<(Option<String>, String), String> {
    let (userinfo, host) = match authority.rfind('@') {
        Some(at) => (Some(&authority[..at]), &authority[at + 1..]),
        None => (None, authority),
    };

    if let Some(userinfo) = userinfo {
        if !userinfo.bytes().all(is_userinfo_byte) {
            return Err("invalid userinfo".to_string());
        }
        decode(userinfo)?;
    }

    Ok((userinfo.map(str::to_string), normalize_host(host)?))
}

/// Validate a host (with optional port), lowercase it and re-encode it.
fn normalize_host(host: &str) -> std::result::Result<String, String> {
    let port = if host.starts_with('[') {
        let end = host
            .rfind(']')
            .ok_or_else(|| "missing ']' in host".to_string())?;
        &host[end + 1..]
    } else {
        match host.rfind(':') {
            Some(colon) => &host[colon..],
            None => "",
        }
    };
    if !is_valid_optional_port(port) {
        return Err(format!("invalid port {port:?} after host"));
    }

    let mut decoded = Vec::with_capacity(host.len());
    let bytes = host.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let byte = decode_escape(bytes, i)?;
                // Escapes in a host may only spell non-ASCII bytes or a zone `%`.
                if byte < 0x80 && byte != b'%' {
                    return Err(format!("invalid URL escape {:?}", &host[i..i + 3]));
                }
                decoded.push(byte);
                i += 3;
            }
            b if b < 0x80 && !is_host_byte(b) => {
                return Err(format!("invalid character {:?} in host name", b as char));
            }
            b => {
                decoded.push(b);
                i += 1;
            }
        }
    }

    let lowered = match String::from_utf8(decoded) {
        Ok(text) => text.to_lowercase().into_bytes(),
        Err(err) => err.into_bytes().to_ascii_lowercase(),
    };

    let mut out = String::with_capacity(lowered.len());
    for byte in lowered {
        if byte >= 0x80 || byte == b'%' {
            push_escaped(&mut out, byte);
        } else {
            out.push(byte as char);
        }
    }
    Ok(out)
}

fn is_valid_optional_port(port: &str) -> bool {
    match port.strip_prefix(':') {
        Some(digits) => digits.bytes().all(|b| b.is_ascii_digit()),
        None => port.is_empty(),
    }
}

/// Keep `raw` when it is already a valid encoding of the component,
/// otherwise decode it and escape every byte that may not appear literally.
fn escape_component(raw: &str, component: Component) -> std::result::Result<String, String> {
    let decoded = decode(raw)?;
    if raw.bytes().all(|b| is_valid_encoded_byte(b, component)) {
        return Ok(raw.to_string());
    }

    let mut out = String::with_capacity(raw.len());
    for byte in decoded {
        if is_literal_byte(byte, component) {
            out.push(byte as char);
        } else {
            push_escaped(&mut out, byte);
        }
    }
    Ok(out)
}

fn decode(raw: &str) -> std::result::Result<Vec<u8>, String> {
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            decoded.push(decode_escape(bytes, i)?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    Ok(decoded)
}

fn decode_escape(bytes: &[u8], at: usize) -> std::result::Result<u8, String> {
    let hi = bytes.get(at + 1).copied().and_then(hex_value);
    let lo = bytes.get(at + 2).copied().and_then(hex_value);
    match (hi, lo) {
        (Some(hi), Some(lo)) => Ok(hi << 4 | lo),
        _ => {
            let end = (at + 3).min(bytes.len());
            Err(format!(
                "invalid URL escape {:?}",
                String::from_utf8_lossy(&bytes[at..end])
            ))
        }
    }
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn push_escaped(out: &mut String, byte: u8) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    out.push('%');
    out.push(HEX[(byte >> 4) as usize] as char);
    out.push(HEX[(byte & 0x0f) as usize] as char);
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~')
}

/// Bytes that are emitted unescaped when re-encoding a decoded component.
fn is_literal_byte(b: u8, component: Component) -> bool {
    if is_unreserved(b) || matches!(b, b'$' | b'&' | b'+' | b',' | b'/' | b':' | b';' | b'=' | b'@')
    {
        return true;
    }
    component == Component::Fragment && matches!(b, b'?' | b'!' | b'(' | b')' | b'*')
}

/// Bytes that may appear in an already-encoded component.
fn is_valid_encoded_byte(b: u8, component: Component) -> bool {
    matches!(
        b,
        b'!' | b'$' | b'&' | b'\'' | b'(' | b')' | b'*' | b'+' | b',' | b';' | b'=' | b':'
            | b'@' | b'[' | b']' | b'%'
    ) || is_literal_byte(b, component)
}

fn is_host_byte(b: u8) -> bool {
    is_unreserved(b)
        || matches!(
            b,
            b'!' | b'$' | b'&' | b'\'' | b'(' | b')' | b'*' | b'+' | b',' | b';' | b'=' | b':'
                | b'[' | b']' | b'<' | b'>' | b'"'
        )
}

fn is_userinfo_byte(b: u8) -> bool {
    is_unreserved(b)
        || matches!(
            b,
            b':' | b'!' | b'$' | b'&' | b'\'' | b'(' | b')' | b'*' | b'+' | b',' | b';' | b'='
                | b'%' | b'@'
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lowercases_host_only() {
        let url = normalize("http://EXAMPLE.COM/Path?Q=A#Frag").unwrap();
        assert_eq!(url.to_string(), "http://example.com/Path?Q=A#Frag");
        assert_eq!(url.scheme(), "http");
        assert_eq!(url.host(), "example.com");
        assert_eq!(url.path(), "/Path");
        assert_eq!(url.query(), Some("Q=A"));
    }

    #[test]
    fn test_normalize_keeps_scheme_case() {
        let url = normalize("HTTPS://Example.com").unwrap();
        assert_eq!(url.scheme(), "HTTPS");
        assert_eq!(url.to_string(), "HTTPS://example.com");
    }

    #[test]
    fn test_normalize_does_not_add_trailing_slash() {
        assert_eq!(
            normalize("http://example.com").unwrap().to_string(),
            "http://example.com"
        );
        assert_eq!(
            normalize("http://example.com/").unwrap().to_string(),
            "http://example.com/"
        );
    }

    #[test]
    fn test_normalize_escapes_relative_garbage() {
        let url = normalize("not a url").unwrap();
        assert_eq!(url.to_string(), "not%20a%20url");
        assert_eq!(url.host(), "");
        assert_eq!(url.scheme(), "");
    }

    #[test]
    fn test_normalize_escapes_path_spaces() {
        assert_eq!(
            normalize("http://example.com/a b").unwrap().to_string(),
            "http://example.com/a%20b"
        );
    }

    #[test]
    fn test_normalize_keeps_wildcards() {
        assert_eq!(
            normalize("http://*.Example.com").unwrap().to_string(),
            "http://*.example.com"
        );
        assert_eq!(
            normalize("http://example.com/sub1/*/sub3").unwrap().to_string(),
            "http://example.com/sub1/*/sub3"
        );
    }

    #[test]
    fn test_normalize_ports_and_ipv6() {
        let url = normalize("http://Example.com:8080/x").unwrap();
        assert_eq!(url.host(), "example.com:8080");
        assert_eq!(url.hostname(), "example.com");

        let url = normalize("http://[::1]:9000/").unwrap();
        assert_eq!(url.host(), "[::1]:9000");
        assert_eq!(url.hostname(), "[::1]");
    }

    #[test]
    fn test_normalize_rejects_structural_errors() {
        assert!(normalize("http://example.com:abc/").is_err());
        assert!(normalize("http://example.com/%zz").is_err());
        assert!(normalize("http://example.com/%4").is_err());
        assert!(normalize("http://exa mple.com/").is_err());
        assert!(normalize("http://user\\name@example.com/").is_err());
        assert!(normalize("http://example.com/\u{7f}").is_err());
        assert!(normalize("://example.com").is_err());
        assert!(normalize("a:b/c").is_ok());
        assert!(normalize("1a:b").is_err());
    }

    #[test]
    fn test_normalize_opaque_and_bare_scheme() {
        assert_eq!(normalize("mailto:Someone").unwrap().to_string(), "mailto:Someone");
        assert_eq!(normalize("http://").unwrap().to_string(), "http:");
        assert_eq!(normalize("file:///tmp/x").unwrap().to_string(), "file:///tmp/x");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            "http://EXAMPLE.COM/path?query=1",
            "https://user:pw@Host.Example:443/a%2Fb/c d?x=y#Top Part",
            "not a url",
            "http://b%C3%9Ccher.de/",
            "http://[FE80::1%25en0]/",
            "ftp://Example.com",
            "http:",
            "*",
            "/relative/Path?q",
            "http://example.com/?",
        ];
        for input in inputs {
            let once = normalize(input).unwrap();
            let twice = normalize(&once.to_string()).unwrap();
            assert_eq!(once, twice, "normalize not idempotent for {input:?}");
            assert_eq!(once.to_string(), twice.to_string());
        }
    }

    #[test]
    fn test_normalize_lowercases_encoded_host() {
        assert_eq!(
            normalize("http://b%C3%9Ccher.de/").unwrap().host(),
            "b%C3%BCcher.de"
        );
    }

    #[test]
    fn test_strip_query() {
        let cases = [
            ("http://example.com/path?query=1", "http://example.com/path"),
            ("http://example.com/path", "http://example.com/path"),
            ("http://example.com", "http://example.com"),
            ("http://EXAMPLE.COM/path?query=1", "http://example.com/path"),
            ("not a url", "not%20a%20url"),
        ];
        for (input, expected) in cases {
            assert_eq!(strip_query(input).unwrap(), expected, "input {input:?}");
        }
        assert!(strip_query("http://example.com:x/").is_err());
    }
}
