//! Gateway error types.
//!
//! One [`GatewayError`] enum covers every failure surfaced by the routing
//! engine, the edge pipeline and the reverse proxy. Each variant maps to a
//! fixed HTTP status so the outer axum layer never has to re-derive one.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Configuration validation failures (see [`crate::config::GatewayConfig::validate`]).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("base_path must start with '/' and must not end with '/': {0:?}")]
    InvalidBasePath(String),

    #[error("default_locale {0:?} is not present in locales {1:?}")]
    DefaultLocaleNotConfigured(String, Vec<String>),

    #[error("duplicate route name: {0}")]
    DuplicateRoute(String),

    #[error("duplicate edge function page: {0}")]
    DuplicateEdgeFunction(String),

    #[error("max_edge_calls must be >= 1, got {0}")]
    InvalidMaxEdgeCalls(u32),

    #[error("proxy_timeout_secs must be >= 1, got {0}")]
    InvalidProxyTimeout(u64),
}

/// Top-level gateway error, covering the taxonomy of §7.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed percent-encoding in the URL or a captured parameter.
    #[error("failed to decode URL: {0}")]
    DecodeError(String),

    /// No manifest entry for the requested page, and no fallback configured.
    #[error("page not found: {0}")]
    PageNotFoundError(String),

    /// A dynamic page has no fallback; recovered locally when `bubble_no_fallback`
    /// is set, otherwise surfaced as 404.
    #[error("no fallback configured for page: {0}")]
    NoFallbackError(String),

    /// A build-time error that must reach the error page without being logged
    /// as a server error.
    #[error("build error: {0}")]
    WrappedBuildError(String),

    /// An edge function mutated its response after it had already finished.
    #[error("headers already sent for edge function {0}")]
    HeadersAlreadySent(String),

    /// The edge pipeline's rewrite-recursion cap was exceeded.
    #[error("too many edge function invocations: attempted {attempted}, cap {cap}")]
    TooManyEdgeCalls { attempted: u32, cap: u32 },

    /// The reverse proxy failed to reach, or received a failure from, the upstream.
    #[error("proxy error forwarding to {target}: {source}")]
    ProxyError {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    /// A `GatewayConfig` failed validation.
    #[error("invalid configuration: {0}")]
    ConfigError(#[from] ConfigError),

    /// Anything else: logged once and surfaced as 500.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    fn code(&self) -> &'static str {
        match self {
            GatewayError::DecodeError(_) => "DECODE_ERROR",
            GatewayError::PageNotFoundError(_) => "PAGE_NOT_FOUND",
            GatewayError::NoFallbackError(_) => "NO_FALLBACK",
            GatewayError::WrappedBuildError(_) => "BUILD_ERROR",
            GatewayError::HeadersAlreadySent(_) => "HEADERS_ALREADY_SENT",
            GatewayError::TooManyEdgeCalls { .. } => "TOO_MANY_EDGE_CALLS",
            GatewayError::ProxyError { .. } => "PROXY_ERROR",
            GatewayError::ConfigError(_) => "CONFIG_ERROR",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            GatewayError::DecodeError(_) => StatusCode::BAD_REQUEST,
            GatewayError::PageNotFoundError(_) => StatusCode::NOT_FOUND,
            GatewayError::NoFallbackError(_) => StatusCode::NOT_FOUND,
            GatewayError::WrappedBuildError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::HeadersAlreadySent(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::TooManyEdgeCalls { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::ProxyError { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR || status == StatusCode::BAD_GATEWAY {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
