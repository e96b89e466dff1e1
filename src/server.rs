//! axum wiring (§2a): one fallback route defers every method/path to the
//! routing engine, which owns dispatch order — route groups (§4.3) must be
//! tried in a fixed cross-cutting order axum's per-route matching can't
//! express.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;
use axum::Router;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::edge::HeaderMultiMap;
use crate::engine::{self, EngineBody, EngineState};

pub type AppState = Arc<EngineState>;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn to_header_multi_map(headers: &HeaderMap) -> HeaderMultiMap {
    let mut map = HeaderMultiMap::new();
    for (name, value) in headers.iter() {
        if let Ok(value) = value.to_str() {
            map.append(name.as_str(), value);
        }
    }
    map
}

#[tracing::instrument(skip(state, headers), fields(method = %method, path = %uri.path()))]
async fn dispatch(State(state): State<AppState>, method: Method, uri: Uri, headers: HeaderMap) -> Response {
    let raw_url = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());

    let engine_response = engine::handle_request(&state, method.as_str(), &raw_url, to_header_multi_map(&headers)).await;

    let mut builder = Response::builder().status(engine_response.status);
    for (name, value) in engine_response.headers.iter() {
        builder = builder.header(name, value);
    }
    let body = match engine_response.body {
        EngineBody::Buffered(bytes) => Body::from(bytes),
        EngineBody::Streaming(rx) => {
            Body::from_stream(UnboundedReceiverStream::new(rx).map(Ok::<_, std::io::Error>))
        }
    };
    builder
        .body(body)
        .expect("status and headers were validated while building the response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::edge::host::SandboxHost;
    use crate::engine::{PageRenderer, RenderOutcome, StaticServer};
    use crate::proxy::ProxyClient;
    use crate::route::RouteTable;
    use crate::url::QueryMap;
    use async_trait::async_trait;
    use tower::ServiceExt;

    struct StubRenderer;

    #[async_trait]
    impl PageRenderer for StubRenderer {
        async fn render(&self, path: &str, _query: &QueryMap) -> RenderOutcome {
            if path == "/" {
                RenderOutcome::Html(bytes::Bytes::from_static(b"home"))
            } else {
                RenderOutcome::NotFound
            }
        }

        async fn page_exists(&self, path: &str) -> bool {
            path == "/"
        }
    }

    struct StubStatic;

    #[async_trait]
    impl StaticServer for StubStatic {
        async fn serve_static(&self, _path: &str) -> Option<crate::engine::EngineResponse> {
            None
        }
    }

    #[tokio::test]
    async fn fallback_route_serves_known_page() {
        let config = GatewayConfig::new("test");
        let routes = RouteTable::compile(&config).unwrap();
        let state: AppState = Arc::new(EngineState::new(
            config,
            routes,
            SandboxHost::new(),
            ProxyClient::new(std::time::Duration::from_secs(30)),
            Box::new(StubRenderer),
            Box::new(StubStatic),
        ));
        let app = build_router(state);

        let request = axum::http::Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
