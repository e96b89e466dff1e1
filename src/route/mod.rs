//! Route table types (§3): the compiled, runtime form of the manifests in
//! §6, dispatched on by the routing engine (§4.3).

pub mod matcher;

use std::collections::HashMap;

use crate::config::{EdgeFunctionConfig, GatewayConfig, RouteConfig, RouteKind as ConfigRouteKind};
use crate::error::GatewayError;

pub use matcher::{CaptureValue, HasContext, HasPredicate, PathMatcher};

/// The runtime tag of a compiled route (§3): `kind ∈ {header, redirect,
/// rewrite, filesystem, pageChecker, catchAllEdge, catchAllPage,
/// publicFile}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Header,
    Redirect,
    RewriteBeforeFiles,
    RewriteAfterFiles,
    RewriteFallback,
}

impl From<ConfigRouteKind> for RouteKind {
    fn from(kind: ConfigRouteKind) -> Self {
        match kind {
            ConfigRouteKind::Header => RouteKind::Header,
            ConfigRouteKind::Redirect => RouteKind::Redirect,
            ConfigRouteKind::RewriteBeforeFiles => RouteKind::RewriteBeforeFiles,
            ConfigRouteKind::RewriteAfterFiles => RouteKind::RewriteAfterFiles,
            ConfigRouteKind::RewriteFallback => RouteKind::RewriteFallback,
        }
    }
}

/// A compiled route: immutable after construction, built once from the
/// manifest at server start (§3).
#[derive(Debug, Clone)]
pub struct Route {
    pub kind: RouteKind,
    pub name: String,
    pub matcher: PathMatcher,
    pub has: Vec<HasPredicate>,
    pub require_base_path: bool,
    pub internal: bool,
    pub check: bool,
    pub destination: Option<String>,
    pub status_code: Option<u16>,
    pub response_headers: Vec<(String, String)>,
}

impl Route {
    fn compile(config: &RouteConfig) -> Result<Route, GatewayError> {
        Ok(Route {
            kind: config.kind.into(),
            name: config.name.clone(),
            matcher: PathMatcher::compile(&config.source)?,
            has: config.has.clone(),
            require_base_path: config.require_base_path,
            internal: config.internal,
            check: config.check,
            destination: config.destination.clone(),
            status_code: config.status_code,
            response_headers: config.response_headers.clone(),
        })
    }

    /// Attempt to match `path` (with base-path handling already applied by
    /// the caller per §4.3) and evaluate any `has` predicates.
    pub fn try_match(
        &self,
        path: &str,
        ctx: &HasContext<'_>,
    ) -> Option<HashMap<String, CaptureValue>> {
        let mut params = self.matcher.matches(path)?;
        for predicate in &self.has {
            let captured = predicate.evaluate(ctx)?;
            params.extend(captured);
        }
        Some(params)
    }
}

/// A compiled edge-function descriptor (§3): `{ page, matcher, modulePath }`.
#[derive(Debug, Clone)]
pub struct EdgeFunctionDescriptor {
    pub page: String,
    pub matcher: PathMatcher,
    pub module_path: String,
}

impl EdgeFunctionDescriptor {
    fn compile(config: &EdgeFunctionConfig) -> Result<EdgeFunctionDescriptor, GatewayError> {
        Ok(EdgeFunctionDescriptor {
            page: config.page.clone(),
            matcher: PathMatcher::compile(&config.page)?,
            module_path: config.file.clone(),
        })
    }
}

/// The compiled route table, grouped the way the engine iterates them
/// (§4.3). Built once at startup from a validated [`GatewayConfig`].
#[derive(Debug, Clone)]
pub struct RouteTable {
    pub headers: Vec<Route>,
    pub redirects: Vec<Route>,
    pub rewrites_before_files: Vec<Route>,
    pub rewrites_after_files: Vec<Route>,
    pub rewrites_fallback: Vec<Route>,
    pub edge_functions: Vec<EdgeFunctionDescriptor>,
}

impl RouteTable {
    pub fn compile(config: &GatewayConfig) -> Result<RouteTable, GatewayError> {
        config.validate()?;

        let mut table = RouteTable {
            headers: Vec::new(),
            redirects: Vec::new(),
            rewrites_before_files: Vec::new(),
            rewrites_after_files: Vec::new(),
            rewrites_fallback: Vec::new(),
            edge_functions: Vec::new(),
        };

        for route_config in &config.routes {
            let route = Route::compile(route_config)?;
            match route.kind {
                RouteKind::Header => table.headers.push(route),
                RouteKind::Redirect => table.redirects.push(route),
                RouteKind::RewriteBeforeFiles => table.rewrites_before_files.push(route),
                RouteKind::RewriteAfterFiles => table.rewrites_after_files.push(route),
                RouteKind::RewriteFallback => table.rewrites_fallback.push(route),
            }
        }

        for edge_config in &config.edge_functions {
            table.edge_functions.push(EdgeFunctionDescriptor::compile(edge_config)?);
        }

        Ok(table)
    }
}

/// `{ finished, pathname?, query? }` (§3): returned by every route handler.
#[derive(Debug, Clone, Default)]
pub struct RouteResult {
    pub finished: bool,
    pub pathname: Option<String>,
    pub query: Option<crate::url::QueryMap>,
}

impl RouteResult {
    pub fn unfinished() -> Self {
        RouteResult::default()
    }

    pub fn finished() -> Self {
        RouteResult {
            finished: true,
            ..Default::default()
        }
    }

    pub fn rewrite_to(pathname: impl Into<String>, query: crate::url::QueryMap) -> Self {
        RouteResult {
            finished: false,
            pathname: Some(pathname.into()),
            query: Some(query),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EdgeFunctionConfig, RouteConfig};

    fn empty_context() -> HasContext<'static> {
        static HEADERS: std::sync::OnceLock<HashMap<String, String>> = std::sync::OnceLock::new();
        static COOKIES: std::sync::OnceLock<HashMap<String, String>> = std::sync::OnceLock::new();
        static QUERY: std::sync::OnceLock<crate::url::QueryMap> = std::sync::OnceLock::new();
        HasContext {
            headers: HEADERS.get_or_init(HashMap::new),
            cookies: COOKIES.get_or_init(HashMap::new),
            host: None,
            query: QUERY.get_or_init(crate::url::QueryMap::new),
        }
    }

    #[test]
    fn route_table_groups_by_kind() {
        let config = GatewayConfig::new("test")
            .with_route(RouteConfig::new(ConfigRouteKind::Header, "h", "/a"))
            .with_route(RouteConfig::new(ConfigRouteKind::Redirect, "r", "/b"))
            .with_edge_function(EdgeFunctionConfig::new("/mid", "mid.js"));
        let table = RouteTable::compile(&config).unwrap();
        assert_eq!(table.headers.len(), 1);
        assert_eq!(table.redirects.len(), 1);
        assert_eq!(table.edge_functions.len(), 1);
    }

    #[test]
    fn route_table_rejects_invalid_config() {
        let config = GatewayConfig::new("test").with_base_path("bad");
        assert!(RouteTable::compile(&config).is_err());
    }

    #[test]
    fn route_matches_without_has_clause() {
        let route = Route::compile(&RouteConfig::new(ConfigRouteKind::Redirect, "r", "/about")).unwrap();
        let ctx = empty_context();
        assert!(route.try_match("/about", &ctx).is_some());
        assert!(route.try_match("/other", &ctx).is_none());
    }
}
