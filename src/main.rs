//! Edge gateway — entry point.
//!
//! Reads configuration from environment variables (§6a) and starts the
//! axum-based HTTP service.
//!
//! # Environment variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `EDGE_GATEWAY_PORT` | `3000` | TCP port to listen on. |
//! | `EDGE_GATEWAY_BASE_PATH` | *(empty)* | URL prefix the whole app is mounted under. |
//! | `EDGE_GATEWAY_LOCALES` | *(empty)* | Comma-separated list of configured locales. |
//! | `EDGE_GATEWAY_DEFAULT_LOCALE` | *(none)* | Default locale; must be a member of the locales list. |
//! | `EDGE_GATEWAY_MAX_EDGE_CALLS` | `5` | Edge pipeline recursion cap. |
//! | `EDGE_GATEWAY_PROXY_TIMEOUT_SECS` | `30` | External-rewrite reverse-proxy timeout. |
//! | `EDGE_GATEWAY_MINIMAL_MODE` | `false` | Trust `x-matched-path` and skip locale/rewrite resolution. |

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use edge_gateway::build_router;
use edge_gateway::config::GatewayConfig;
use edge_gateway::edge::host::SandboxHost;
use edge_gateway::engine::{EngineResponse, EngineState, PageRenderer, RenderOutcome, StaticServer};
use edge_gateway::proxy::ProxyClient;
use edge_gateway::route::RouteTable;
use edge_gateway::url::QueryMap;

/// Placeholder page renderer: reports every page as missing. A real
/// deployment wires this to the build's actual render collaborator (§1).
struct NotFoundRenderer;

#[async_trait]
impl PageRenderer for NotFoundRenderer {
    async fn render(&self, _path: &str, _query: &QueryMap) -> RenderOutcome {
        RenderOutcome::NotFound
    }

    async fn page_exists(&self, _path: &str) -> bool {
        false
    }
}

/// Placeholder static-asset server: never serves anything. A real
/// deployment wires this to the build output directory (§1).
struct NoopStaticServer;

#[async_trait]
impl StaticServer for NoopStaticServer {
    async fn serve_static(&self, _path: &str) -> Option<EngineResponse> {
        None
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("edge_gateway=info".parse().unwrap()))
        .init();

    let config = GatewayConfig::from_env();
    if let Err(err) = config.validate() {
        tracing::error!(error = %err, "invalid gateway configuration");
        std::process::exit(1);
    }

    tracing::info!(
        port = config.port,
        base_path = %config.base_path,
        locales = ?config.locales,
        minimal_mode = config.minimal_mode,
        "edge gateway configuration loaded"
    );

    let port = config.port;
    let proxy_timeout = config.proxy_timeout();
    let routes = RouteTable::compile(&config).expect("config already validated above");

    let state = std::sync::Arc::new(EngineState::new(
        config,
        routes,
        SandboxHost::new(),
        ProxyClient::new(proxy_timeout),
        Box::new(NotFoundRenderer),
        Box::new(NoopStaticServer),
    ));

    let app = build_router(state);
    let addr = format!("0.0.0.0:{}", port);
    tracing::info!(addr = %addr, "edge gateway starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.expect("failed to bind listener");
    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!(error = %err, "edge gateway server error");
        std::process::exit(1);
    }
}

