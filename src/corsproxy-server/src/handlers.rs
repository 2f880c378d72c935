//! Proxy request handler.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use corsproxy_core::{TargetDecision, normalize};
use tracing::{debug, warn};

use crate::error::{ProxyError, ProxyResult};
use crate::forward::upstream_url;
use crate::state::AppState;

/// Forward a request whose path, minus the leading `/`, is the target URL.
///
/// Authorization looks at the path only; the query is appended when
/// building the upstream URL.
pub async fn proxy(State(state): State<Arc<AppState>>, request: Request) -> ProxyResult<Response> {
    let path = request.uri().path();
    let target = path.strip_prefix('/').unwrap_or(path);

    if target.is_empty() || target == "favicon.ico" {
        return Ok(StatusCode::OK.into_response());
    }

    if let TargetDecision::Denied(reason) = state.policy.authorize(target) {
        warn!(
            method = %request.method(),
            url = target,
            reason = %reason,
            "Rejected proxy target"
        );
        return Err(reason.into());
    }

    let full_target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(path);
    let full_target = full_target.strip_prefix('/').unwrap_or(full_target);

    let remote = normalize(full_target).map_err(|err| {
        debug!(url = full_target, error = %err, "Unparseable target with query");
        ProxyError::InvalidTargetUrl
    })?;
    let upstream = upstream_url(&remote)?;

    state.forwarder.forward(request, upstream).await
}
