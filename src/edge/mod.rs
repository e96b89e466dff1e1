//! Edge-function runtime adapter (§4.4–§4.6): request/response surface,
//! sandbox host, and the pipeline that chains function invocations.

pub mod host;
pub mod pipeline;
pub mod request;
pub mod response;

pub use host::{EdgeOutcome, SandboxHost};
pub use pipeline::{run_pipeline, PipelineError};
pub use request::EdgeRequest;
pub use response::{BodyMode, EdgeResponse};

/// Case-insensitive header multimap shared by [`EdgeRequest`] and
/// [`EdgeResponse`] (§4.4): keys are stored lowercased, `Set-Cookie`-style
/// repeated headers are preserved via [`HeaderMultiMap::append`].
#[derive(Debug, Clone, Default)]
pub struct HeaderMultiMap(Vec<(String, String)>);

impl HeaderMultiMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(name: &str) -> String {
        name.to_ascii_lowercase()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let name = Self::normalize(name);
        self.0.iter().find(|(k, _)| *k == name).map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        let name = Self::normalize(name);
        self.0
            .iter()
            .filter(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replace every existing value for `name` with `value`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = Self::normalize(&name.into());
        self.0.retain(|(k, _)| *k != name);
        self.0.push((name, value.into()));
    }

    /// Append `value` for `name` without removing existing values (used for
    /// `Set-Cookie`, which must always accumulate, never replace).
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = Self::normalize(&name.into());
        self.0.push((name, value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        let name = Self::normalize(name);
        self.0.retain(|(k, _)| *k != name);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
