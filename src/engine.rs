//! Routing engine (§4.3): executes the ordered pipeline of route groups on
//! each request, guaranteeing at most one terminal response.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::cache::{CacheKey, CachedEntry, ResponseCache};
use crate::config::GatewayConfig;
use crate::edge::host::SandboxHost;
use crate::edge::request::EdgeRequest;
use crate::edge::{pipeline, HeaderMultiMap};
use crate::error::GatewayError;
use crate::proxy::ProxyClient;
use crate::route::{HasContext, Route, RouteKind, RouteResult, RouteTable};
use crate::url::{detect_locale, strip_base_path, ParsedURL, QueryMap};

/// Internal effect headers (§4.4/§4.6): never forwarded to the client.
const SENTINEL_HEADERS: &[&str] = &["x-nextjs-redirect", "x-nextjs-rewrite", "x-nextjs-next", "x-nextjs-preflight"];

fn strip_sentinel_headers(headers: &mut HeaderMultiMap) {
    for name in SENTINEL_HEADERS {
        headers.remove(name);
    }
}

/// What the page renderer and static-asset collaborators (out of scope per
/// §1) hand back to the engine.
#[derive(Debug, Clone)]
pub enum RenderOutcome {
    Html(Bytes),
    Json(Bytes),
    Redirect { status: u16, location: String },
    NotFound,
}

/// `render(path, query) → (html|json|redirect|notFound)` (§1).
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, path: &str, query: &QueryMap) -> RenderOutcome;
    async fn page_exists(&self, path: &str) -> bool;
}

/// `serveStatic(path)` (§1).
#[async_trait]
pub trait StaticServer: Send + Sync {
    async fn serve_static(&self, path: &str) -> Option<EngineResponse>;
}

/// An [`EngineResponse`] body: either fully buffered, or a live channel
/// forwarding chunks an edge function wrote via `write()` (§4.4).
pub enum EngineBody {
    Buffered(Bytes),
    Streaming(mpsc::UnboundedReceiver<Bytes>),
}

impl EngineBody {
    pub fn as_buffered(&self) -> Option<&Bytes> {
        match self {
            EngineBody::Buffered(b) => Some(b),
            EngineBody::Streaming(_) => None,
        }
    }
}

/// The engine's final answer for one request: status, headers, body.
pub struct EngineResponse {
    pub status: u16,
    pub headers: HeaderMultiMap,
    pub body: EngineBody,
}

impl EngineResponse {
    fn new(status: u16, body: impl Into<Bytes>) -> Self {
        EngineResponse {
            status,
            headers: HeaderMultiMap::new(),
            body: EngineBody::Buffered(body.into()),
        }
    }

    fn streaming(status: u16, rx: mpsc::UnboundedReceiver<Bytes>) -> Self {
        EngineResponse {
            status,
            headers: HeaderMultiMap::new(),
            body: EngineBody::Streaming(rx),
        }
    }

    fn not_found() -> Self {
        EngineResponse::new(404, "Not Found")
    }

    fn internal_error() -> Self {
        EngineResponse::new(500, "Internal Server Error")
    }
}

/// Everything the engine needs to serve requests: the compiled route
/// table, the sandbox host, the reverse-proxy client, and the page/static
/// collaborators.
pub struct EngineState {
    pub config: GatewayConfig,
    pub routes: RouteTable,
    pub sandbox: SandboxHost,
    pub proxy: ProxyClient,
    pub renderer: Box<dyn PageRenderer>,
    pub static_server: Box<dyn StaticServer>,
    pub cache: ResponseCache,
}

impl EngineState {
    pub fn new(
        config: GatewayConfig,
        routes: RouteTable,
        sandbox: SandboxHost,
        proxy: ProxyClient,
        renderer: Box<dyn PageRenderer>,
        static_server: Box<dyn StaticServer>,
    ) -> Self {
        EngineState {
            config,
            routes,
            sandbox,
            proxy,
            renderer,
            static_server,
            cache: ResponseCache::new(),
        }
    }
}

fn header_lookup(headers: &HeaderMultiMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (k, v) in headers.iter() {
        map.entry(k.to_string()).or_insert_with(|| v.to_string());
    }
    map
}

fn cookie_lookup(headers: &HeaderMultiMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Some(raw) = headers.get("cookie") {
        for pair in raw.split(';') {
            let pair = pair.trim();
            if let Some((k, v)) = pair.split_once('=') {
                map.insert(k.trim().to_string(), v.trim().to_string());
            }
        }
    }
    map
}

/// The per-request entry point (§4.3, §2a).
#[tracing::instrument(skip(state, headers), fields(method = %method, path = %raw_url))]
pub async fn handle_request(
    state: &EngineState,
    method: &str,
    raw_url: &str,
    headers: HeaderMultiMap,
) -> EngineResponse {
    match run(state, method, raw_url, headers).await {
        Ok(response) => response,
        Err(GatewayError::DecodeError(msg)) => {
            tracing::warn!(error = %msg, "rejecting malformed url");
            EngineResponse::new(400, "Bad Request")
        }
        Err(GatewayError::NoFallbackError(path)) => {
            tracing::debug!(page = %path, "no fallback configured, rendering 404");
            EngineResponse::not_found()
        }
        Err(err) => {
            // `IntoResponse for GatewayError` already logs 5xx/502 once
            // via `tracing::error!`, consistent with §7's "logged once,
            // suppressed under quiet" propagation policy.
            use axum::response::IntoResponse;
            let status = err.into_response().status().as_u16();
            EngineResponse::new(status, "Internal Server Error")
        }
    }
}

async fn run(
    state: &EngineState,
    method: &str,
    raw_url: &str,
    raw_headers: HeaderMultiMap,
) -> Result<EngineResponse, GatewayError> {
    let mut url = ParsedURL::parse(raw_url, None)?;
    let config = &state.config;

    if !config.base_path.is_empty() {
        url.base_path = Some(config.base_path.clone());
    }
    url.default_locale = config.default_locale.clone();

    // Minimal mode (§9): an upstream proxy has already resolved locale and
    // rewrites, and hands us the final page path via `x-matched-path`.
    if config.minimal_mode {
        if let Some(matched_path) = raw_headers.get("x-matched-path") {
            let matched_path = matched_path.to_string();
            return render_page(state, &matched_path, &url.query, url.locale.clone(), HeaderMultiMap::new(), false).await;
        }
    }

    let (stripped, had_base_path) = strip_base_path(&url.pathname, &config.base_path);
    let is_api = stripped.starts_with("/api");
    let (normalized, locale) = if !config.locales.is_empty() && !is_api {
        detect_locale(&stripped, &config.locales)
    } else {
        (stripped.clone(), None)
    };
    if locale.is_some() {
        url.locale = locale.clone();
    } else if !config.locales.is_empty() && !is_api {
        url.locale = config.default_locale.clone();
    }
    if !config.locales.is_empty() {
        url.query.set(
            "__nextLocale",
            url.locale.clone().unwrap_or_default(),
        );
    }

    let header_map = header_lookup(&raw_headers);
    let cookie_map = cookie_lookup(&raw_headers);
    let has_ctx = HasContext {
        headers: &header_map,
        cookies: &cookie_map,
        host: url.host.as_deref(),
        query: &url.query,
    };

    let mut response_headers = HeaderMultiMap::new();
    let mut bubble_no_fallback = false;

    // 1. Header routes: set headers, never finish.
    for route in &state.routes.headers {
        let current = if route.require_base_path { &url.pathname } else { &normalized };
        if route.try_match(current, &has_ctx).is_some() {
            for (name, value) in &route.response_headers {
                response_headers.append(name.clone(), value.clone());
            }
        }
    }

    // 2. Redirect routes: emit 3xx and finish.
    for route in &state.routes.redirects {
        if !had_base_path && route.require_base_path {
            continue;
        }
        let current = if route.require_base_path { &url.pathname } else { &normalized };
        if let Some(params) = route.try_match(current, &has_ctx) {
            let location = resolve_destination(route, &params);
            let status = route.status_code.unwrap_or(307);
            let mut response = EngineResponse::new(status, "");
            response.headers = response_headers;
            response.headers.set("location", location.clone());
            if status == 308 {
                response.headers.set("refresh", format!("0;url={}", location));
            }
            return Ok(response);
        }
    }

    // 3. Rewrites-before-files.
    if let Some(result) = run_rewrite_group(&state.routes.rewrites_before_files, &url, &normalized, had_base_path, &has_ctx) {
        apply_route_result(&mut url, &result);
    }

    let (stripped_again, _) = strip_base_path(&url.pathname, &config.base_path);
    let mut current_path = stripped_again;

    // 4. Filesystem routes: `_next/*` guard and static assets.
    if current_path.starts_with("/_next/") && url.build_id.is_none() {
        if !current_path.starts_with("/_next/static")
            && !current_path.starts_with("/_next/data")
            && !current_path.starts_with("/_next/image")
        {
            let mut response = EngineResponse::not_found();
            response.headers = response_headers;
            return Ok(response);
        }
    }
    if let Some(mut response) = state.static_server.serve_static(&current_path).await {
        for (k, v) in response_headers.iter() {
            response.headers.append(k, v);
        }
        return Ok(response);
    }

    // 5. Edge-function catch-all.
    if !state.routes.edge_functions.is_empty() {
        let edge_request = EdgeRequest::new(method, url.clone(), raw_headers.clone());
        let mut outcome = pipeline::run_pipeline(
            &state.sandbox,
            &state.routes.edge_functions,
            edge_request,
            &config.base_path,
            &config.locales,
            config.max_edge_calls,
        )
        .await?;

        if let Some(target) = outcome.response.sentinel_redirect() {
            let status = outcome.response.status_code;
            let mut response = EngineResponse::new(status, "");
            response.headers = outcome.response.headers.clone();
            response.headers.set("location", target.to_string());
            strip_sentinel_headers(&mut response.headers);
            return Ok(response);
        }

        if let Some(target) = outcome.response.sentinel_rewrite() {
            if target.starts_with('/') {
                // An internal rewrite the pipeline couldn't resolve into another
                // edge function: mutate the parsed URL and keep routing with it
                // (spec.md:148), rather than treating it as an external target.
                let target = target.to_string();
                let (stripped, _) = strip_base_path(&target, &config.base_path);
                let (normalized, locale) = if !config.locales.is_empty() && !is_api {
                    detect_locale(&stripped, &config.locales)
                } else {
                    (stripped.clone(), None)
                };
                url.pathname = target;
                if locale.is_some() {
                    url.locale = locale;
                }
                current_path = normalized;
            } else {
                // External rewrite (absolute URL): proxy upstream (§4.7/§4.7a).
                return state.proxy.forward(method, target, &raw_headers, Bytes::new()).await;
            }
        } else if outcome.response.is_streaming() {
            let rx = outcome.response.take_stream().expect("is_streaming implies a stream receiver");
            let mut response = EngineResponse::streaming(outcome.response.status_code, rx);
            response.headers = outcome.response.headers.clone();
            strip_sentinel_headers(&mut response.headers);
            return Ok(response);
        } else if outcome.response.buffered_body().is_some() {
            let mut response = EngineResponse::new(
                outcome.response.status_code,
                outcome.response.buffered_body().cloned().unwrap_or_default(),
            );
            response.headers = outcome.response.headers.clone();
            strip_sentinel_headers(&mut response.headers);
            return Ok(response);
        }
        // No sentinels and no body: fall through past the edge catch-all.
    }

    // 6. Page checker.
    if state.renderer.page_exists(&current_path).await {
        return render_page(state, &current_path, &url.query, url.locale.clone(), response_headers, bubble_no_fallback).await;
    }

    // 7. Rewrites-after-files.
    if let Some(result) = run_rewrite_group(&state.routes.rewrites_after_files, &url, &current_path, had_base_path, &has_ctx) {
        apply_route_result(&mut url, &result);
        let (next_path, _) = strip_base_path(&url.pathname, &config.base_path);
        if state.renderer.page_exists(&next_path).await {
            return render_page(state, &next_path, &url.query, url.locale.clone(), response_headers, bubble_no_fallback).await;
        }
    }

    // 8. Rewrites-fallback, preceded by a dynamic-route/page re-check
    //    (`applyCheckTrue`, §4.3).
    if apply_check_true(state, &current_path, &mut bubble_no_fallback).await {
        return render_page(state, &current_path, &url.query, url.locale.clone(), response_headers, bubble_no_fallback).await;
    }
    if let Some(result) = run_rewrite_group(&state.routes.rewrites_fallback, &url, &current_path, had_base_path, &has_ctx) {
        apply_route_result(&mut url, &result);
        let (next_path, _) = strip_base_path(&url.pathname, &config.base_path);
        return render_page(state, &next_path, &url.query, url.locale.clone(), response_headers, bubble_no_fallback).await;
    }

    // 9. Page catch-all.
    render_page(state, &current_path, &url.query, url.locale.clone(), response_headers, bubble_no_fallback).await
}

fn resolve_destination(route: &Route, params: &HashMap<String, crate::route::CaptureValue>) -> String {
    let mut destination = route.destination.clone().unwrap_or_default();
    for (name, value) in params {
        let single = match value {
            crate::route::CaptureValue::Single(s) => s.clone(),
            crate::route::CaptureValue::Multi(parts) => parts.join("/"),
        };
        destination = destination.replace(&format!(":{}", name), &single);
    }
    destination
}

fn run_rewrite_group(
    routes: &[Route],
    url: &ParsedURL,
    current_path: &str,
    had_base_path: bool,
    has_ctx: &HasContext<'_>,
) -> Option<RouteResult> {
    for route in routes {
        if !had_base_path && route.require_base_path {
            continue;
        }
        let current = if route.require_base_path { &url.pathname } else { current_path };
        if let Some(params) = route.try_match(current, has_ctx) {
            let destination = resolve_destination(route, &params);
            let mut query = url.query.clone();
            for (name, value) in &params {
                let single = match value {
                    crate::route::CaptureValue::Single(s) => s.clone(),
                    crate::route::CaptureValue::Multi(parts) => parts.join("/"),
                };
                query.set(name.clone(), single);
            }
            return Some(RouteResult::rewrite_to(destination, query));
        }
    }
    None
}

fn apply_route_result(url: &mut ParsedURL, result: &RouteResult) {
    if let Some(pathname) = &result.pathname {
        url.pathname = pathname.clone();
    }
    if let Some(query) = &result.query {
        url.query = query.clone();
    }
}

/// `applyCheckTrue` (§4.3): filesystem re-check, then page-existence,
/// with `bubbleNoFallback` set on a hit so the eventual catch-all does not
/// recurse back into the dynamic-route fallback.
async fn apply_check_true(state: &EngineState, path: &str, bubble_no_fallback: &mut bool) -> bool {
    if state.static_server.serve_static(path).await.is_some() {
        *bubble_no_fallback = true;
        return true;
    }
    if state.renderer.page_exists(path).await {
        *bubble_no_fallback = true;
        return true;
    }
    false
}

/// Renders `path` through the single-flight response cache (§5): concurrent
/// requests for the same `{locale, pathname, amp}` key share one render.
async fn render_page(
    state: &EngineState,
    path: &str,
    query: &QueryMap,
    locale: Option<String>,
    response_headers: HeaderMultiMap,
    bubble_no_fallback: bool,
) -> Result<EngineResponse, GatewayError> {
    let key = CacheKey::new(locale, path, query);
    let path_owned = path.to_string();
    let query_owned = query.clone();
    let renderer = &state.renderer;

    let entry = state
        .cache
        .get_or_render(key, || async move {
            match renderer.render(&path_owned, &query_owned).await {
                RenderOutcome::Html(body) => CachedEntry {
                    status: 200,
                    body,
                    headers: vec![("content-type".to_string(), "text/html; charset=utf-8".to_string())],
                },
                RenderOutcome::Json(body) => CachedEntry {
                    status: 200,
                    body,
                    headers: vec![("content-type".to_string(), "application/json; charset=utf-8".to_string())],
                },
                RenderOutcome::Redirect { status, location } => {
                    let mut headers = vec![("location".to_string(), location.clone())];
                    if status == 308 {
                        headers.push(("refresh".to_string(), format!("0;url={}", location)));
                    }
                    CachedEntry { status, body: Bytes::new(), headers }
                }
                RenderOutcome::NotFound => CachedEntry {
                    status: 404,
                    body: Bytes::from_static(b"Not Found"),
                    headers: Vec::new(),
                },
            }
        })
        .await;

    if entry.status == 404 && bubble_no_fallback {
        return Err(GatewayError::NoFallbackError(path.to_string()));
    }

    let mut response = EngineResponse::new(entry.status, entry.body);
    for (name, value) in &entry.headers {
        response.headers.set(name.clone(), value.clone());
    }
    for (k, v) in response_headers.iter() {
        response.headers.append(k, v);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EdgeFunctionConfig, GatewayConfig, RouteConfig, RouteKind as ConfigRouteKind};
    use crate::proxy::ProxyClient;

    struct StubRenderer;

    #[async_trait]
    impl PageRenderer for StubRenderer {
        async fn render(&self, path: &str, _query: &QueryMap) -> RenderOutcome {
            if path == "/about" {
                RenderOutcome::Html(Bytes::from_static(b"<h1>about</h1>"))
            } else {
                RenderOutcome::NotFound
            }
        }

        async fn page_exists(&self, path: &str) -> bool {
            path == "/about"
        }
    }

    struct StubStatic;

    #[async_trait]
    impl StaticServer for StubStatic {
        async fn serve_static(&self, _path: &str) -> Option<EngineResponse> {
            None
        }
    }

    fn build_state(config: GatewayConfig) -> EngineState {
        let routes = RouteTable::compile(&config).unwrap();
        EngineState::new(
            config,
            routes,
            SandboxHost::new(),
            ProxyClient::new(std::time::Duration::from_secs(30)),
            Box::new(StubRenderer),
            Box::new(StubStatic),
        )
    }

    #[tokio::test]
    async fn page_checker_serves_known_page() {
        let state = build_state(GatewayConfig::new("test"));
        let response = handle_request(&state, "GET", "/about", HeaderMultiMap::new()).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body.as_buffered(), Some(&Bytes::from_static(b"<h1>about</h1>")));
    }

    #[tokio::test]
    async fn unknown_page_is_404() {
        let state = build_state(GatewayConfig::new("test"));
        let response = handle_request(&state, "GET", "/missing", HeaderMultiMap::new()).await;
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn redirect_route_emits_3xx() {
        let config = GatewayConfig::new("test").with_route(
            RouteConfig::new(ConfigRouteKind::Redirect, "r1", "/old")
                .destination("/about")
                .status_code(308),
        );
        let state = build_state(config);
        let response = handle_request(&state, "GET", "/old", HeaderMultiMap::new()).await;
        assert_eq!(response.status, 308);
        assert_eq!(response.headers.get("location"), Some("/about"));
    }

    #[tokio::test]
    async fn next_guard_404s_unknown_next_paths() {
        let state = build_state(GatewayConfig::new("test"));
        let response = handle_request(&state, "GET", "/_next/unknown", HeaderMultiMap::new()).await;
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn edge_function_body_short_circuits_page_checker() {
        let mut config = GatewayConfig::new("test");
        config = config.with_edge_function(EdgeFunctionConfig::new("/about", "about.js"));
        let mut state = build_state(config);
        state.sandbox.register("about.js", |_req, res| {
            res.send(crate::edge::response::SendBody::Text("from edge".to_string()), false)?;
            Ok(crate::edge::host::EdgeOutcome::Continue)
        });
        let response = handle_request(&state, "GET", "/about", HeaderMultiMap::new()).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body.as_buffered(), Some(&Bytes::from_static(b"from edge")));
    }

    #[tokio::test]
    async fn edge_function_stream_is_forwarded() {
        let mut config = GatewayConfig::new("test");
        config = config.with_edge_function(EdgeFunctionConfig::new("/about", "about.js"));
        let mut state = build_state(config);
        state.sandbox.register("about.js", |_req, res| {
            res.write(Bytes::from_static(b"chunk-one"))?;
            res.write(Bytes::from_static(b"chunk-two"))?;
            res.end(None)?;
            Ok(crate::edge::host::EdgeOutcome::Continue)
        });
        let response = handle_request(&state, "GET", "/about", HeaderMultiMap::new()).await;
        assert_eq!(response.status, 200);
        match response.body {
            EngineBody::Streaming(mut rx) => {
                assert_eq!(rx.recv().await, Some(Bytes::from_static(b"chunk-one")));
                assert_eq!(rx.recv().await, Some(Bytes::from_static(b"chunk-two")));
            }
            EngineBody::Buffered(_) => panic!("expected a streaming body"),
        }
    }

    #[tokio::test]
    async fn unresolved_internal_rewrite_keeps_routing_with_rewritten_path() {
        let mut config = GatewayConfig::new("test");
        config = config.with_edge_function(EdgeFunctionConfig::new("/old", "old.js"));
        let mut state = build_state(config);
        state.sandbox.register("old.js", |_req, res| {
            res.rewrite("/about")?;
            Ok(crate::edge::host::EdgeOutcome::Continue)
        });
        let response = handle_request(&state, "GET", "/old", HeaderMultiMap::new()).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body.as_buffered(), Some(&Bytes::from_static(b"<h1>about</h1>")));
        assert!(response.headers.get("x-nextjs-rewrite").is_none());
    }

    #[tokio::test]
    async fn edge_redirect_sentinel_headers_are_stripped() {
        let mut config = GatewayConfig::new("test");
        config = config.with_edge_function(EdgeFunctionConfig::new("/about", "about.js"));
        let mut state = build_state(config);
        state.sandbox.register("about.js", |_req, res| {
            res.redirect(Some(308), "/elsewhere")?;
            Ok(crate::edge::host::EdgeOutcome::Continue)
        });
        let response = handle_request(&state, "GET", "/about", HeaderMultiMap::new()).await;
        assert_eq!(response.status, 308);
        assert_eq!(response.headers.get("location"), Some("/elsewhere"));
        assert!(response.headers.get("x-nextjs-redirect").is_none());
    }

    #[tokio::test]
    async fn minimal_mode_routes_directly_from_matched_path_header() {
        let config = GatewayConfig::new("test").with_minimal_mode(true);
        let state = build_state(config);
        let mut headers = HeaderMultiMap::new();
        headers.set("x-matched-path", "/about");
        let response = handle_request(&state, "GET", "/whatever?x=1", headers).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body.as_buffered(), Some(&Bytes::from_static(b"<h1>about</h1>")));
    }
}
