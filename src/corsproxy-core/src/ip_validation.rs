//! IP literal classification for SSRF protection.
//!
//! Only literal addresses are screened. Host names are never resolved here,
//! so `localhost` or a name pointing at an internal address is treated as a
//! plain name.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Classification of a target host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddressClass {
    /// The host is a private, loopback, link-local or unspecified address.
    pub private_or_loopback: bool,

    /// The host parsed as an IP literal.
    pub literal_ip: bool,
}

impl AddressClass {
    /// Whether the host is a literal that must be treated as internal.
    pub fn is_private_literal(&self) -> bool {
        self.literal_ip && self.private_or_loopback
    }
}

/// Classify `host`, which may carry a `:port` suffix and IPv6 brackets.
pub fn classify(host: &str) -> AddressClass {
    match parse_ip_literal(host) {
        Some(ip) => AddressClass {
            private_or_loopback: is_private_or_loopback(ip),
            literal_ip: true,
        },
        None => AddressClass::default(),
    }
}

/// Parse `host` as an IP literal, stripping brackets, a port and an IPv6
/// zone id.
///
/// IPv4 is parsed with the WHATWG host rules so shorthand and numeric
/// spellings (`127.1`, `0x7f000001`, `2130706433`) resolve to the address the
/// HTTP client would actually dial.
pub fn parse_ip_literal(host: &str) -> Option<IpAddr> {
    let host = host.trim();
    if host.is_empty() {
        return None;
    }

    // Bare IPv6 without brackets, e.g. "::1".
    if let Ok(ip) = strip_zone(host).parse::<Ipv6Addr>() {
        return Some(IpAddr::V6(ip));
    }

    let address = if let Some(bracketed) = host.strip_prefix('[') {
        let end = bracketed.find(']')?;
        let inner = strip_zone(&bracketed[..end]);
        return inner.parse::<Ipv6Addr>().ok().map(IpAddr::V6);
    } else if let Some((address, port)) = host.rsplit_once(':') {
        if !port.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        address
    } else {
        host
    };

    match url::Host::parse(address) {
        Ok(url::Host::Ipv4(ip)) => Some(IpAddr::V4(ip)),
        Ok(url::Host::Ipv6(ip)) => Some(IpAddr::V6(ip)),
        Ok(url::Host::Domain(_)) | Err(_) => None,
    }
}

fn strip_zone(host: &str) -> &str {
    host.split_once('%').map(|(ip, _)| ip).unwrap_or(host)
}

/// Check if an IP address is private-use, loopback, link-local or
/// unspecified.
pub fn is_private_or_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ip) => is_private_or_loopback_ipv4(ip),
        IpAddr::V6(ip) => is_private_or_loopback_ipv6(ip),
    }
}

/// IPv4 private and loopback ranges.
pub fn is_private_or_loopback_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()            // 127.0.0.0/8
        || ip.is_private()      // 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16 (RFC 1918)
        || ip.is_link_local()   // 169.254.0.0/16 (RFC 3927)
        || ip.is_unspecified() // 0.0.0.0
}

/// IPv6 private and loopback ranges, including IPv4-mapped and
/// IPv4-compatible forms.
pub fn is_private_or_loopback_ipv6(ip: Ipv6Addr) -> bool {
    // `::1` converts to 0.0.0.1, so loopback is checked on the IPv6 side too.
    if let Some(v4) = ip.to_ipv4() {
        return is_private_or_loopback_ipv4(v4) || ip.is_loopback();
    }

    ip.is_loopback()                 // ::1
        || ip.is_unspecified()       // ::
        || is_unique_local_ipv6(&ip) // fc00::/7 (RFC 4193)
        || is_link_local_ipv6(&ip) // fe80::/10
}

/// Check if IPv6 is unique local (fc00::/7).
fn is_unique_local_ipv6(ip: &Ipv6Addr) -> bool {
    let octets = ip.octets();
    (octets[0] & 0xfe) == 0xfc
}

/// Check if IPv6 is link-local (fe80::/10).
fn is_link_local_ipv6(ip: &Ipv6Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 0xfe && (octets[1] & 0xc0) == 0x80
}
