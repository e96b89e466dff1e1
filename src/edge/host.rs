//! Sandbox host (§4.5, §4.5a): a process-wide registry of handler
//! closures, loaded and memoized by module path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::edge::{EdgeRequest, EdgeResponse};
use crate::error::GatewayError;

/// What an edge handler reports back to the pipeline after running: either
/// it finished mutating `response` and handed back control (`Continue`), or
/// it failed outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOutcome {
    Continue,
}

/// A registered handler: `Fn(&mut EdgeRequest, &mut EdgeResponse) -> EdgeOutcome`
/// (§4.5a), boxed so heterogeneous closures share one table.
pub type EdgeHandler = dyn Fn(&mut EdgeRequest, &mut EdgeResponse) -> Result<EdgeOutcome, GatewayError>
    + Send
    + Sync;

struct LoadedModule {
    hash: [u8; 32],
    handler: Arc<EdgeHandler>,
}

/// The compartment's module cache: `Arc<Mutex<HashMap<PathBuf, LoadedModule>>>`
/// per §4.5a, plus the boot-time registrations that populate it.
pub struct SandboxHost {
    registrations: HashMap<PathBuf, Arc<EdgeHandler>>,
    cache: Mutex<HashMap<PathBuf, LoadedModule>>,
}

impl std::fmt::Debug for SandboxHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxHost")
            .field("registered_modules", &self.registrations.len())
            .finish()
    }
}

impl SandboxHost {
    pub fn new() -> Self {
        SandboxHost {
            registrations: HashMap::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Register a handler under `module_path` at boot. The host never
    /// executes code outside this table (§4.5).
    pub fn register(
        &mut self,
        module_path: impl Into<PathBuf>,
        handler: impl Fn(&mut EdgeRequest, &mut EdgeResponse) -> Result<EdgeOutcome, GatewayError>
            + Send
            + Sync
            + 'static,
    ) {
        self.registrations.insert(module_path.into(), Arc::new(handler));
    }

    /// `run({name, modulePath, request})`: load (or reuse) the module, then
    /// invoke its entry point with `{request, response}` (§4.5).
    pub async fn run(
        &self,
        module_path: &Path,
        request: &mut EdgeRequest,
        response: &mut EdgeResponse,
    ) -> Result<EdgeOutcome, GatewayError> {
        let handler = self.load(module_path).await?;
        handler(request, response)
    }

    async fn load(&self, module_path: &Path) -> Result<Arc<EdgeHandler>, GatewayError> {
        let mut cache = self.cache.lock().await;
        if let Some(loaded) = cache.get(module_path) {
            return Ok(loaded.handler.clone());
        }

        let handler = self
            .registrations
            .get(module_path)
            .ok_or_else(|| {
                GatewayError::PageNotFoundError(format!("no sandbox module registered at {:?}", module_path))
            })?
            .clone();

        let hash = content_hash(module_path.to_string_lossy().as_bytes());
        cache.insert(
            module_path.to_path_buf(),
            LoadedModule {
                hash,
                handler: handler.clone(),
            },
        );
        Ok(handler)
    }

    /// `clearSandboxCache(path)`: invalidate one module so the next `run()`
    /// reloads it. `None` drains the whole cache (dev-mode full reload, §9).
    pub async fn clear_cache(&self, path: Option<&Path>) {
        let mut cache = self.cache.lock().await;
        match path {
            Some(path) => {
                cache.remove(path);
            }
            None => cache.clear(),
        }
    }

    pub async fn cached_hash(&self, module_path: &Path) -> Option<[u8; 32]> {
        self.cache.lock().await.get(module_path).map(|m| m.hash)
    }
}

impl Default for SandboxHost {
    fn default() -> Self {
        Self::new()
    }
}

fn content_hash(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::ParsedURL;

    fn request() -> EdgeRequest {
        EdgeRequest::new("GET", ParsedURL::parse("/home", None).unwrap(), Default::default())
    }

    #[tokio::test]
    async fn run_invokes_registered_handler() {
        let mut host = SandboxHost::new();
        host.register("home.js", |_req, res| {
            res.status(200)?;
            Ok(EdgeOutcome::Continue)
        });

        let mut req = request();
        let mut res = EdgeResponse::new();
        let outcome = host.run(Path::new("home.js"), &mut req, &mut res).await.unwrap();
        assert_eq!(outcome, EdgeOutcome::Continue);
        assert_eq!(res.status_code, 200);
    }

    #[tokio::test]
    async fn run_memoizes_across_invocations() {
        let mut host = SandboxHost::new();
        host.register("home.js", |_req, _res| Ok(EdgeOutcome::Continue));

        let mut req = request();
        let mut res = EdgeResponse::new();
        host.run(Path::new("home.js"), &mut req, &mut res).await.unwrap();
        assert!(host.cached_hash(Path::new("home.js")).await.is_some());
    }

    #[tokio::test]
    async fn run_unregistered_module_is_page_not_found() {
        let host = SandboxHost::new();
        let mut req = request();
        let mut res = EdgeResponse::new();
        let err = host.run(Path::new("missing.js"), &mut req, &mut res).await;
        assert!(matches!(err, Err(GatewayError::PageNotFoundError(_))));
    }

    #[tokio::test]
    async fn clear_cache_drops_single_entry() {
        let mut host = SandboxHost::new();
        host.register("home.js", |_req, _res| Ok(EdgeOutcome::Continue));
        let mut req = request();
        let mut res = EdgeResponse::new();
        host.run(Path::new("home.js"), &mut req, &mut res).await.unwrap();

        host.clear_cache(Some(Path::new("home.js"))).await;
        assert!(host.cached_hash(Path::new("home.js")).await.is_none());
    }

    #[tokio::test]
    async fn clear_cache_none_drains_everything() {
        let mut host = SandboxHost::new();
        host.register("a.js", |_req, _res| Ok(EdgeOutcome::Continue));
        host.register("b.js", |_req, _res| Ok(EdgeOutcome::Continue));
        let mut req = request();
        let mut res = EdgeResponse::new();
        host.run(Path::new("a.js"), &mut req, &mut res).await.unwrap();
        host.run(Path::new("b.js"), &mut req, &mut res).await.unwrap();

        host.clear_cache(None).await;
        assert!(host.cached_hash(Path::new("a.js")).await.is_none());
        assert!(host.cached_hash(Path::new("b.js")).await.is_none());
    }
}
