//! Request routing and edge-function pipeline for a page-serving framework
//! server.
//!
//! Three subsystems compose the core: a multi-stage [`engine`] that matches
//! an incoming URL against an ordered set of route groups, an [`edge`]
//! runtime adapter that runs user-supplied edge functions inside a sandboxed
//! [`edge::host`] and composes their effects, and a [`url`] model shared by
//! both. Page rendering and static-asset serving are external collaborators,
//! named in [`engine::PageRenderer`]/[`engine::StaticServer`] but
//! implemented by the embedding application.

pub mod cache;
pub mod config;
pub mod edge;
pub mod engine;
pub mod error;
pub mod proxy;
pub mod route;
pub mod server;
pub mod url;

pub use config::GatewayConfig;
pub use engine::EngineState;
pub use error::{ConfigError, GatewayError, GatewayResult};
pub use server::{build_router, AppState};
