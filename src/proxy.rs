//! Middleware Adapter reverse proxy (§4.7, §4.7a): forwards an external
//! rewrite target to its upstream and relays the response verbatim.

use std::time::Duration;

use bytes::Bytes;

use crate::edge::HeaderMultiMap;
use crate::engine::{EngineBody, EngineResponse};
use crate::error::GatewayError;

/// One `reqwest::Client`, built once, shared across every external
/// rewrite for the lifetime of the process (§4.7a).
#[derive(Debug, Clone)]
pub struct ProxyClient {
    client: reqwest::Client,
}

impl ProxyClient {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client configuration is static and always valid");
        ProxyClient { client }
    }

    /// Forward `method`/`body` to `target` (an absolute URL). Copies
    /// headers except `host`/`content-length`; `changeOrigin=true` means
    /// the outgoing `Host` is derived from `target`, not the inbound
    /// request. Only network-level failures become `ProxyError`; upstream
    /// 4xx/5xx status codes are relayed verbatim (§4.7a).
    #[tracing::instrument(skip(self, headers, body), fields(target = %target))]
    pub async fn forward(
        &self,
        method: &str,
        target: &str,
        headers: &HeaderMultiMap,
        body: Bytes,
    ) -> Result<EngineResponse, GatewayError> {
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| GatewayError::Internal(format!("invalid HTTP method: {}", method)))?;

        let mut request = self.client.request(method, target);
        for (name, value) in headers.iter() {
            if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            request = request.header(name, value);
        }
        if let Some(host) = extract_host(target) {
            request = request.header("host", host);
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request.send().await.map_err(|source| GatewayError::ProxyError {
            target: target.to_string(),
            source,
        })?;

        let status = response.status().as_u16();
        let mut out_headers = HeaderMultiMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                out_headers.append(name.as_str(), value);
            }
        }

        let body = response.bytes().await.map_err(|source| GatewayError::ProxyError {
            target: target.to_string(),
            source,
        })?;

        Ok(EngineResponse {
            status,
            headers: out_headers,
            body: EngineBody::Buffered(body),
        })
    }
}

fn extract_host(url: &str) -> Option<String> {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let authority = without_scheme.split(['/', '?', '#']).next().unwrap_or(without_scheme);
    if authority.is_empty() {
        None
    } else {
        Some(authority.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_host_strips_scheme_and_path() {
        assert_eq!(extract_host("https://vercel.com/path?x=1"), Some("vercel.com".to_string()));
        assert_eq!(extract_host("https://example.com:8080"), Some("example.com:8080".to_string()));
    }

    #[tokio::test]
    async fn forward_reports_proxy_error_for_unreachable_host() {
        let client = ProxyClient::new(Duration::from_millis(50));
        let result = client
            .forward("GET", "http://127.0.0.1:1/unreachable", &HeaderMultiMap::new(), Bytes::new())
            .await;
        assert!(matches!(result, Err(GatewayError::ProxyError { .. })));
    }
}
