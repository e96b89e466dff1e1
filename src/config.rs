//! Gateway configuration: programmatic builder, manifest-derived loading,
//! and environment-variable tuning (§6a).

use std::time::Duration;

use crate::error::ConfigError;
use crate::route::HasPredicate;

/// One entry of the routes/headers/redirects/rewrites manifests (§6),
/// before compilation into a runtime [`crate::route::Route`].
#[derive(Debug, Clone)]
pub struct RouteConfig {
    pub kind: RouteKind,
    pub name: String,
    pub source: String,
    pub destination: Option<String>,
    pub status_code: Option<u16>,
    pub require_base_path: bool,
    pub internal: bool,
    pub check: bool,
    pub has: Vec<HasPredicate>,
    pub response_headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Header,
    Redirect,
    RewriteBeforeFiles,
    RewriteAfterFiles,
    RewriteFallback,
}

impl RouteConfig {
    pub fn new(kind: RouteKind, name: impl Into<String>, source: impl Into<String>) -> Self {
        RouteConfig {
            kind,
            name: name.into(),
            source: source.into(),
            destination: None,
            status_code: None,
            require_base_path: true,
            internal: false,
            check: false,
            has: Vec::new(),
            response_headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response_headers.push((name.into(), value.into()));
        self
    }

    pub fn destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    pub fn require_base_path(mut self, require: bool) -> Self {
        self.require_base_path = require;
        self
    }

    pub fn internal(mut self, internal: bool) -> Self {
        self.internal = internal;
        self
    }

    pub fn check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }

    pub fn has(mut self, predicate: HasPredicate) -> Self {
        self.has.push(predicate);
        self
    }
}

/// One entry of the edge manifest (§6): a page path and the handler
/// registered for it under §4.5a.
#[derive(Debug, Clone)]
pub struct EdgeFunctionConfig {
    pub page: String,
    pub file: String,
}

impl EdgeFunctionConfig {
    pub fn new(page: impl Into<String>, file: impl Into<String>) -> Self {
        EdgeFunctionConfig {
            page: page.into(),
            file: file.into(),
        }
    }
}

/// Complete gateway configuration: manifests plus process tuning knobs.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub name: String,
    pub port: u16,
    pub base_path: String,
    pub locales: Vec<String>,
    pub default_locale: Option<String>,
    pub max_edge_calls: u32,
    pub proxy_timeout_secs: u64,
    pub minimal_mode: bool,
    pub routes: Vec<RouteConfig>,
    pub edge_functions: Vec<EdgeFunctionConfig>,
}

impl GatewayConfig {
    pub fn new(name: impl Into<String>) -> Self {
        GatewayConfig {
            name: name.into(),
            port: 3000,
            base_path: String::new(),
            locales: Vec::new(),
            default_locale: None,
            max_edge_calls: 5,
            proxy_timeout_secs: 30,
            minimal_mode: false,
            routes: Vec::new(),
            edge_functions: Vec::new(),
        }
    }

    pub fn with_route(mut self, route: RouteConfig) -> Self {
        self.routes.push(route);
        self
    }

    pub fn with_edge_function(mut self, edge_function: EdgeFunctionConfig) -> Self {
        self.edge_functions.push(edge_function);
        self
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn with_locales(mut self, locales: Vec<String>) -> Self {
        self.locales = locales;
        self
    }

    pub fn with_default_locale(mut self, locale: impl Into<String>) -> Self {
        self.default_locale = Some(locale.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_minimal_mode(mut self, minimal_mode: bool) -> Self {
        self.minimal_mode = minimal_mode;
        self
    }

    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy_timeout_secs)
    }

    /// Read process tuning knobs and an otherwise-empty manifest set from
    /// the environment (§6a). Route and edge-function manifests still need
    /// to be attached with `with_route`/`with_edge_function`.
    pub fn from_env() -> Self {
        let port = std::env::var("EDGE_GATEWAY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000);
        let base_path = std::env::var("EDGE_GATEWAY_BASE_PATH").unwrap_or_default();
        let locales: Vec<String> = std::env::var("EDGE_GATEWAY_LOCALES")
            .ok()
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let default_locale = std::env::var("EDGE_GATEWAY_DEFAULT_LOCALE").ok();
        let max_edge_calls = std::env::var("EDGE_GATEWAY_MAX_EDGE_CALLS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        let proxy_timeout_secs = std::env::var("EDGE_GATEWAY_PROXY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        let minimal_mode = std::env::var("EDGE_GATEWAY_MINIMAL_MODE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false);

        if minimal_mode {
            tracing::warn!("minimal mode enabled: locale negotiation and rewrite evaluation are skipped, trusting x-matched-path from the upstream proxy");
        }

        GatewayConfig {
            name: "edge-gateway".to_string(),
            port,
            base_path,
            locales,
            default_locale,
            max_edge_calls,
            proxy_timeout_secs,
            minimal_mode,
            routes: Vec::new(),
            edge_functions: Vec::new(),
        }
    }

    /// Ordered validation checks (§6a); returns the first failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_path.is_empty() {
            if !self.base_path.starts_with('/') || self.base_path.ends_with('/') {
                return Err(ConfigError::InvalidBasePath(self.base_path.clone()));
            }
        }

        if let Some(default_locale) = &self.default_locale {
            if !self.locales.iter().any(|l| l == default_locale) {
                return Err(ConfigError::DefaultLocaleNotConfigured(
                    default_locale.clone(),
                    self.locales.clone(),
                ));
            }
        }

        let mut seen_routes = std::collections::HashSet::new();
        for route in &self.routes {
            if !seen_routes.insert(&route.name) {
                return Err(ConfigError::DuplicateRoute(route.name.clone()));
            }
        }

        let mut seen_pages = std::collections::HashSet::new();
        for edge_function in &self.edge_functions {
            if !seen_pages.insert(&edge_function.page) {
                return Err(ConfigError::DuplicateEdgeFunction(edge_function.page.clone()));
            }
        }

        if self.max_edge_calls < 1 {
            return Err(ConfigError::InvalidMaxEdgeCalls(self.max_edge_calls));
        }

        if self.proxy_timeout_secs < 1 {
            return Err(ConfigError::InvalidProxyTimeout(self.proxy_timeout_secs));
        }

        Ok(())
    }
}
