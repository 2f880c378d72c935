//! CORS gate in front of the proxy handler.
//!
//! Wraps a [`CorsLayer`] built from [`CorsOptions`] and adds what the layer
//! cannot express on its own: a configurable preflight status, preflight
//! passthrough to the proxy handler, and debug logging of CORS decisions.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header, request::Parts};
use axum::middleware::{self, Next};
use axum::response::Response;
use tower::{Layer, ServiceExt, service_fn};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer, ExposeHeaders};
use tracing::debug;

use crate::config::CorsOptions;
use crate::error::{ProxyError, ProxyResult};

/// Methods allowed when the configured list is empty.
const FALLBACK_METHODS: [Method; 3] = [Method::GET, Method::HEAD, Method::POST];

/// Applies CORS options to every request reaching the router.
#[derive(Debug, Clone)]
pub struct CorsGate {
    layer: CorsLayer,
    passthrough: bool,
    success_status: StatusCode,
    debug: bool,
}

impl CorsGate {
    /// Build the gate. Fails on option values that cannot become headers.
    pub fn new(options: &CorsOptions) -> ProxyResult<Self> {
        let success_status = StatusCode::from_u16(options.options_success_status)
            .ok()
            .filter(StatusCode::is_success)
            .ok_or_else(|| {
                ProxyError::Config(format!(
                    "options success status {} is not a 2xx status",
                    options.options_success_status
                ))
            })?;

        let credentials = options.allow_credentials;
        let mut layer = CorsLayer::new()
            .allow_origin(allow_origin(&options.allowed_origins, credentials)?)
            .allow_methods(allow_methods(&options.allowed_methods)?)
            .allow_headers(allow_headers(&options.allowed_headers)?)
            .allow_credentials(credentials)
            .allow_private_network(options.allow_private_network);

        if options.exposed_headers.iter().any(|h| !h.trim().is_empty()) {
            layer = layer.expose_headers(expose_headers(&options.exposed_headers, credentials)?);
        }
        if options.max_age > 0 {
            layer = layer.max_age(Duration::from_secs(options.max_age));
        }

        Ok(Self {
            layer,
            passthrough: options.options_passthrough,
            success_status,
            debug: options.debug,
        })
    }

    /// Wrap a router so every request passes through the gate.
    pub fn wrap(self, router: Router) -> Router {
        let gate = Arc::new(self);
        if gate.passthrough {
            router.layer(middleware::from_fn_with_state(gate, passthrough))
        } else {
            let cors = gate.layer.clone();
            router
                .layer(cors)
                .layer(middleware::from_fn_with_state(gate, preflight_status))
        }
    }

    /// CORS response headers the layer adds for `probe`.
    async fn cors_headers(&self, probe: Request) -> HeaderMap {
        let stub = service_fn(|_: Request| async {
            Ok::<_, Infallible>(Response::new(Body::empty()))
        });
        match self.layer.layer(stub).oneshot(probe).await {
            Ok(response) => response.into_parts().0.headers,
            Err(never) => match never {},
        }
    }

    fn log_request(&self, request: &Request) {
        if !self.debug {
            return;
        }
        let origin = request
            .headers()
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        debug!(
            method = %request.method(),
            uri = %request.uri(),
            origin,
            preflight = is_preflight(request),
            "CORS request"
        );
    }

    fn log_response(&self, response: &Response) {
        if !self.debug {
            return;
        }
        let allowed_origin = response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok());
        debug!(
            status = %response.status(),
            allowed_origin = ?allowed_origin,
            "CORS response"
        );
    }
}

fn bodyless_copy(request: &Request) -> Request {
    let mut copy = Request::new(Body::empty());
    *copy.method_mut() = request.method().clone();
    *copy.uri_mut() = request.uri().clone();
    *copy.headers_mut() = request.headers().clone();
    copy
}

fn is_preflight(request: &Request) -> bool {
    request.method() == Method::OPTIONS
        && request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
}

/// Answers preflights with the configured status. The CORS layer handles
/// every OPTIONS request itself and answers 200.
async fn preflight_status(
    State(gate): State<Arc<CorsGate>>,
    request: Request,
    next: Next,
) -> Response {
    gate.log_request(&request);
    let options = request.method() == Method::OPTIONS;

    let mut response = next.run(request).await;
    if options && response.status() == StatusCode::OK {
        *response.status_mut() = gate.success_status;
    }

    gate.log_response(&response);
    response
}

/// Lets every request, preflights included, reach the proxy handler and
/// adds the CORS headers to whatever it answers.
async fn passthrough(State(gate): State<Arc<CorsGate>>, request: Request, next: Next) -> Response {
    gate.log_request(&request);
    let cors_headers = gate.cors_headers(bodyless_copy(&request)).await;

    let mut response = next.run(request).await;
    merge_cors_headers(response.headers_mut(), &cors_headers);

    gate.log_response(&response);
    response
}

/// Add CORS headers to a handler response. `Vary` values are appended to the
/// response's own, every other CORS header replaces any value already set.
fn merge_cors_headers(headers: &mut HeaderMap, cors_headers: &HeaderMap) {
    for name in cors_headers.keys() {
        if name != header::VARY {
            headers.remove(name);
        }
        for value in cors_headers.get_all(name) {
            headers.append(name.clone(), value.clone());
        }
    }
}

/// Origin entry, matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OriginRule {
    Exact(String),
    Wildcard { prefix: String, suffix: String },
}

impl OriginRule {
    fn parse(origin: &str) -> ProxyResult<Self> {
        let origin = origin.to_ascii_lowercase();
        let Some((prefix, suffix)) = origin.split_once('*') else {
            return Ok(Self::Exact(origin));
        };
        if suffix.contains('*') {
            return Err(ProxyError::Config(format!(
                "allowed origin {origin:?} has more than one wildcard"
            )));
        }
        Ok(Self::Wildcard {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        })
    }

    fn matches(&self, origin: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == origin,
            Self::Wildcard { prefix, suffix } => {
                origin.len() >= prefix.len() + suffix.len()
                    && origin.starts_with(prefix.as_str())
                    && origin.ends_with(suffix.as_str())
            }
        }
    }
}

fn non_empty(values: &[String]) -> impl Iterator<Item = &str> {
    values.iter().map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn allow_origin(origins: &[String], credentials: bool) -> ProxyResult<AllowOrigin> {
    let origins: Vec<&str> = non_empty(origins).collect();
    if origins.is_empty() || origins.contains(&"*") {
        // A literal "*" is not honored by browsers for credentialed requests.
        return Ok(if credentials {
            AllowOrigin::mirror_request()
        } else {
            AllowOrigin::any()
        });
    }

    let rules = origins
        .into_iter()
        .map(OriginRule::parse)
        .collect::<ProxyResult<Vec<_>>>()?;

    Ok(AllowOrigin::predicate(
        move |origin: &HeaderValue, _parts: &Parts| {
            origin
                .to_str()
                .map(|origin| {
                    let origin = origin.to_ascii_lowercase();
                    rules.iter().any(|rule| rule.matches(&origin))
                })
                .unwrap_or(false)
        },
    ))
}

fn allow_methods(methods: &[String]) -> ProxyResult<AllowMethods> {
    let methods: Vec<&str> = non_empty(methods).collect();
    if methods.contains(&"*") {
        return Ok(AllowMethods::mirror_request());
    }
    if methods.is_empty() {
        return Ok(AllowMethods::list(FALLBACK_METHODS));
    }

    let methods = methods
        .into_iter()
        .map(|m| {
            Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                .map_err(|_| ProxyError::Config(format!("invalid allowed method {m:?}")))
        })
        .collect::<ProxyResult<Vec<_>>>()?;
    Ok(AllowMethods::list(methods))
}

fn allow_headers(headers: &[String]) -> ProxyResult<AllowHeaders> {
    let headers: Vec<&str> = non_empty(headers).collect();
    if headers.contains(&"*") {
        return Ok(AllowHeaders::mirror_request());
    }
    Ok(AllowHeaders::list(header_names(headers, "allowed")?))
}

fn expose_headers(headers: &[String], credentials: bool) -> ProxyResult<ExposeHeaders> {
    let headers: Vec<&str> = non_empty(headers).collect();
    if headers.contains(&"*") {
        if credentials {
            return Err(ProxyError::Config(
                "exposed headers cannot be \"*\" when credentials are allowed".to_string(),
            ));
        }
        return Ok(ExposeHeaders::any());
    }
    Ok(ExposeHeaders::list(header_names(headers, "exposed")?))
}

fn header_names(headers: Vec<&str>, kind: &str) -> ProxyResult<Vec<HeaderName>> {
    headers
        .into_iter()
        .map(|h| {
            HeaderName::from_bytes(h.to_ascii_lowercase().as_bytes())
                .map_err(|_| ProxyError::Config(format!("invalid {kind} header {h:?}")))
        })
        .collect()
}
