//! Error types for the proxy server.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use corsproxy_core::{DenyReason, TargetError};
use thiserror::Error;
use tracing::warn;

/// Proxy error type.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Target is malformed or uses an unsupported scheme.
    #[error("Invalid URL")]
    InvalidUrl,

    /// Target is private or not in the allowlist.
    #[error("Forbidden")]
    Forbidden,

    /// Target passed authorization but cannot be turned into an upstream URL.
    #[error("Invalid target URL")]
    InvalidTargetUrl,

    /// Upstream request failed before a response arrived.
    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// Invalid allowed targets.
    #[error(transparent)]
    Target(#[from] TargetError),

    /// Invalid server configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ProxyError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidUrl | Self::InvalidTargetUrl => StatusCode::BAD_REQUEST,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Target(_) | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DenyReason> for ProxyError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::Malformed | DenyReason::UnsupportedScheme => Self::InvalidUrl,
            DenyReason::PrivateNetwork | DenyReason::NotAllowlisted => Self::Forbidden,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Upstream failures carry no body; the cause only goes to the log.
        if let Self::Upstream(ref err) = self {
            warn!(error = %err, "Upstream request failed");
            return status.into_response();
        }

        let mut response = (status, format!("{self}\n")).into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        headers.insert(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        );
        response
    }
}

/// Result type for the proxy server.
pub type ProxyResult<T> = Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_deny_reason_mapping() {
        assert!(matches!(
            ProxyError::from(DenyReason::Malformed),
            ProxyError::InvalidUrl
        ));
        assert!(matches!(
            ProxyError::from(DenyReason::UnsupportedScheme),
            ProxyError::InvalidUrl
        ));
        assert!(matches!(
            ProxyError::from(DenyReason::PrivateNetwork),
            ProxyError::Forbidden
        ));
        assert!(matches!(
            ProxyError::from(DenyReason::NotAllowlisted),
            ProxyError::Forbidden
        ));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ProxyError::InvalidUrl.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ProxyError::InvalidTargetUrl.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ProxyError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ProxyError::Config("bad".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_forbidden_response_body() {
        let response = ProxyError::Forbidden.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(body_text(response).await, "Forbidden\n");
    }

    #[tokio::test]
    async fn test_invalid_url_response_body() {
        let response = ProxyError::InvalidUrl.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "Invalid URL\n");

        let response = ProxyError::InvalidTargetUrl.into_response();
        assert_eq!(body_text(response).await, "Invalid target URL\n");
    }
}
