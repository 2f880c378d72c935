//! Forwarding of authorized requests to their upstream target.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use axum::body::{Body, HttpBody};
use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::Response;
use corsproxy_core::NormalizedUrl;
use tracing::debug;
use url::Url;

use crate::error::{ProxyError, ProxyResult};

/// Headers that only apply to a single connection.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Sends requests upstream and streams the answers back.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    /// Create a forwarder. Redirects are relayed to the caller, never followed.
    pub fn new(connect_timeout: Option<Duration>) -> ProxyResult<Self> {
        let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|e| ProxyError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Forward `request` to `target`.
    ///
    /// Method, headers and body are relayed as received, minus hop-by-hop
    /// headers and `Host`. Status, headers and body of the upstream answer
    /// are relayed the same way. Dropping the returned future cancels the
    /// upstream request.
    pub async fn forward(&self, request: Request, target: Url) -> ProxyResult<Response> {
        let (parts, body) = request.into_parts();

        let mut headers = parts.headers;
        remove_hop_by_hop_headers(&mut headers);
        headers.remove(header::HOST);
        if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            append_forwarded_for(&mut headers, addr.ip());
        }

        debug!(method = %parts.method, url = %target, "Forwarding request");

        let mut upstream = self
            .client
            .request(parts.method, target)
            .headers(headers);
        if body.size_hint().exact() != Some(0) {
            upstream = upstream.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }
        let upstream = upstream.send().await?;

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        remove_hop_by_hop_headers(&mut response_headers);

        debug!(status = %status, "Upstream responded");

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// Upstream URL for an authorized target.
///
/// The target must resolve to the same host and path it was authorized for.
/// `Url` resolves dot segments (`..`, `%2e%2e`), which would move the request
/// outside a path-prefix rule, so any rewrite is rejected.
pub fn upstream_url(target: &NormalizedUrl) -> ProxyResult<Url> {
    let url = Url::parse(&target.to_string()).map_err(|_| ProxyError::InvalidTargetUrl)?;
    let authorized = url::Host::parse(target.hostname()).map_err(|_| ProxyError::InvalidTargetUrl)?;

    if url.host_str() != Some(authorized.to_string().as_str()) {
        debug!(
            url = %target,
            resolved = ?url.host_str(),
            "Target host changed while building upstream URL"
        );
        return Err(ProxyError::InvalidTargetUrl);
    }

    let authorized_path = match target.path() {
        "" => "/",
        path => path,
    };
    if url.path() != authorized_path {
        debug!(
            url = %target,
            resolved = url.path(),
            "Target path changed while building upstream URL"
        );
        return Err(ProxyError::InvalidTargetUrl);
    }
    Ok(url)
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn remove_hop_by_hop_headers(headers: &mut HeaderMap) {
    let named: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in named {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Append the client address to `X-Forwarded-For`, keeping earlier hops.
fn append_forwarded_for(headers: &mut HeaderMap, client: IpAddr) {
    let prior: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let value = if prior.is_empty() {
        client.to_string()
    } else {
        format!("{}, {client}", prior.join(", "))
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corsproxy_core::normalize;

    #[test]
    fn test_remove_hop_by_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, X-Session"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-session", HeaderValue::from_static("abc"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::PROXY_AUTHORIZATION, HeaderValue::from_static("Basic x"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        remove_hop_by_hop_headers(&mut headers);

        assert_eq!(headers.len(), 2);
        assert_eq!(headers[header::AUTHORIZATION], "Bearer t");
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
    }

    #[test]
    fn test_append_forwarded_for() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, "203.0.113.7".parse().unwrap());
        assert_eq!(headers[X_FORWARDED_FOR], "203.0.113.7");

        append_forwarded_for(&mut headers, "::1".parse().unwrap());
        assert_eq!(headers[X_FORWARDED_FOR], "203.0.113.7, ::1");
    }

    #[test]
    fn test_upstream_url_keeps_path_and_query() {
        let target = normalize("https://API.example.com:8443/v1/items?q=a b").unwrap();
        let url = upstream_url(&target).unwrap();
        assert_eq!(url.host_str(), Some("api.example.com"));
        assert_eq!(url.port(), Some(8443));
        assert_eq!(url.path(), "/v1/items");
        assert_eq!(url.query(), Some("q=a%20b"));
    }

    #[test]
    fn test_upstream_url_ip_literals() {
        let target = normalize("http://[::1]:8080/").unwrap();
        assert_eq!(upstream_url(&target).unwrap().host_str(), Some("[::1]"));

        let target = normalize("http://127.1/").unwrap();
        assert_eq!(upstream_url(&target).unwrap().host_str(), Some("127.0.0.1"));
    }

    #[test]
    fn test_upstream_url_keeps_escaped_path() {
        let target = normalize("http://example.com").unwrap();
        assert_eq!(upstream_url(&target).unwrap().path(), "/");

        let target = normalize("http://example.com/a b/c").unwrap();
        assert_eq!(upstream_url(&target).unwrap().path(), "/a%20b/c");

        let target = normalize("http://example.com/v1/%41[x]").unwrap();
        assert_eq!(upstream_url(&target).unwrap().path(), "/v1/%41[x]");
    }

    #[test]
    fn test_upstream_url_rejects_dot_segments() {
        for raw in [
            "http://example.com/public/../secret",
            "http://example.com/public/%2e%2e/secret",
            "http://example.com/public/%2E./secret",
            "http://example.com/public/./file",
            "http://example.com/public/..",
        ] {
            let target = normalize(raw).unwrap();
            assert!(
                matches!(upstream_url(&target), Err(ProxyError::InvalidTargetUrl)),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_upstream_url_rejects_unusable_targets() {
        let target = normalize("http:///path").unwrap();
        assert!(matches!(
            upstream_url(&target),
            Err(ProxyError::InvalidTargetUrl)
        ));
    }
}
