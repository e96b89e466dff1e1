//! URL model: parsing, base-path stripping, locale detection, and
//! canonical re-formatting (§3, §4.1).
//!
//! Shared by the routing engine and the edge request/response surface so
//! that both see the same normalized view of an incoming request.

use std::collections::HashMap;

use axum::http::Uri;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};

use crate::error::GatewayError;

/// A single query parameter value: either one string or an ordered sequence
/// (repeated `?a=1&a=2` keys).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Single(String),
    Multi(Vec<String>),
}

impl QueryValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            QueryValue::Single(s) => Some(s),
            QueryValue::Multi(v) => v.first().map(String::as_str),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            QueryValue::Single(existing) => {
                *self = QueryValue::Multi(vec![existing.clone(), value]);
            }
            QueryValue::Multi(values) => values.push(value),
        }
    }
}

/// Query string as an ordered multimap. Insertion order is preserved so
/// `format` round-trips deterministically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryMap(Vec<(String, QueryValue)>);

impl QueryMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&QueryValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(existing) = self.0.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = QueryValue::Single(value);
        } else {
            self.0.push((key, QueryValue::Single(value)));
        }
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(existing) = self.0.iter_mut().find(|(k, _)| *k == key) {
            existing.1.push(value);
        } else {
            self.0.push((key, QueryValue::Single(value)));
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.0.retain(|(k, _)| k != key);
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, QueryValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn parse(raw: &str) -> Result<Self, GatewayError> {
        let mut map = QueryMap::new();
        for pair in raw.split('&').filter(|p| !p.is_empty()) {
            let (k, v) = match pair.split_once('=') {
                Some((k, v)) => (k, v),
                None => (pair, ""),
            };
            let key = decode_component(k)?;
            let value = decode_component(v)?;
            map.append(key, value);
        }
        Ok(map)
    }

    fn format(&self) -> String {
        let mut parts = Vec::new();
        for (key, value) in &self.0 {
            match value {
                QueryValue::Single(v) => parts.push(format!("{}={}", encode_component(key), encode_component(v))),
                QueryValue::Multi(vs) => {
                    for v in vs {
                        parts.push(format!("{}={}", encode_component(key), encode_component(v)));
                    }
                }
            }
        }
        parts.join("&")
    }
}

fn decode_component(raw: &str) -> Result<String, GatewayError> {
    // application/x-www-form-urlencoded uses '+' for space.
    let replaced = raw.replace('+', " ");
    percent_decode_str(&replaced)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .map_err(|e| GatewayError::DecodeError(e.to_string()))
}

fn encode_component(raw: &str) -> String {
    utf8_percent_encode(raw, NON_ALPHANUMERIC).to_string()
}

/// The shared, mutable-by-handlers URL value object (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedURL {
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub pathname: String,
    pub query: QueryMap,
    pub hash: Option<String>,

    pub base_path: Option<String>,
    pub locale: Option<String>,
    pub default_locale: Option<String>,
    pub build_id: Option<String>,
    pub page: Option<String>,
    pub params: HashMap<String, String>,
    pub preflight: bool,
}

impl ParsedURL {
    fn empty() -> Self {
        ParsedURL {
            protocol: None,
            host: None,
            port: None,
            pathname: "/".to_string(),
            query: QueryMap::new(),
            hash: None,
            base_path: None,
            locale: None,
            default_locale: None,
            build_id: None,
            page: None,
            params: HashMap::new(),
            preflight: false,
        }
    }

    /// Parse a raw URL (absolute or path-relative) into a [`ParsedURL`].
    ///
    /// `base_hint` supplies scheme/host/port when `raw` is a bare
    /// path-and-query string, the common case for an inbound HTTP request
    /// line.
    pub fn parse(raw: &str, base_hint: Option<&str>) -> Result<ParsedURL, GatewayError> {
        let (without_hash, hash) = match raw.split_once('#') {
            Some((p, h)) => (p, Some(h.to_string())),
            None => (raw, None),
        };

        let uri: Uri = without_hash
            .parse()
            .map_err(|e| GatewayError::DecodeError(format!("{}: {:?}", without_hash, e)))?;

        let mut result = ParsedURL::empty();
        result.hash = hash.filter(|h| !h.is_empty());

        if let Some(scheme) = uri.scheme_str() {
            result.protocol = Some(scheme.to_lowercase());
        }

        if let Some(authority) = uri.authority() {
            result.host = Some(canonicalize_host(authority.host()));
            result.port = authority.port_u16();
        } else if let Some(hint) = base_hint {
            if let Ok(hint_uri) = hint.parse::<Uri>() {
                if let Some(scheme) = hint_uri.scheme_str() {
                    result.protocol.get_or_insert(scheme.to_lowercase());
                }
                if let Some(authority) = hint_uri.authority() {
                    result.host.get_or_insert(canonicalize_host(authority.host()));
                    result.port = result.port.or(authority.port_u16());
                }
            }
        }

        let path = uri.path();
        let decoded_path = decode_path(path)?;
        result.pathname = if decoded_path.is_empty() {
            "/".to_string()
        } else {
            decoded_path
        };

        if let Some(query) = uri.query() {
            result.query = QueryMap::parse(query)?;
        }

        decompose_data_request(&mut result);

        Ok(result)
    }

    /// Rebuild the canonical URL string for this value.
    ///
    /// For data requests, reinserts `/_next/data/<buildId>/…json`
    /// (`index.json` for the root page); locale is prefixed when it differs
    /// from the default locale; base path is prepended last.
    pub fn format(&self) -> String {
        let mut pathname = self.pathname.clone();

        if let Some(build_id) = &self.build_id {
            let cleaned = pathname.trim_start_matches('/');
            let json_path = if cleaned.is_empty() {
                "index.json".to_string()
            } else {
                format!("{}.json", cleaned)
            };
            pathname = format!("/_next/data/{}/{}", build_id, json_path);
        } else if let Some(locale) = &self.locale {
            if Some(locale) != self.default_locale.as_ref() {
                pathname = add_path_prefix(&pathname, &format!("/{}", locale));
            }
        }

        if let Some(base_path) = &self.base_path {
            if !base_path.is_empty() {
                pathname = if pathname == "/" {
                    base_path.clone()
                } else {
                    format!("{}{}", base_path, pathname)
                };
            }
        }

        let mut out = String::new();
        if let (Some(protocol), Some(host)) = (&self.protocol, &self.host) {
            out.push_str(protocol);
            out.push_str("://");
            out.push_str(host);
            if let Some(port) = self.port {
                out.push(':');
                out.push_str(&port.to_string());
            }
        }
        out.push_str(&pathname);
        if !self.query.is_empty() {
            out.push('?');
            out.push_str(&self.query.format());
        }
        if let Some(hash) = &self.hash {
            out.push('#');
            out.push_str(hash);
        }
        out
    }
}

/// Normalize IPv4 loopback, IPv6 `::1`, and the literal `localhost` (any
/// case) to the lowercase literal `"localhost"` before parsing continues.
fn canonicalize_host(host: &str) -> String {
    let trimmed = host.trim_start_matches('[').trim_end_matches(']');
    if trimmed == "127.0.0.1" || trimmed == "::1" || trimmed.eq_ignore_ascii_case("localhost") {
        "localhost".to_string()
    } else {
        host.to_string()
    }
}

fn decode_path(path: &str) -> Result<String, GatewayError> {
    if path.is_empty() {
        return Ok(String::new());
    }
    percent_decode_str(path)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .map_err(|e| GatewayError::DecodeError(e.to_string()))
}

/// `addPathPrefix`: inputs missing the leading `/` are passed through
/// unchanged.
pub fn add_path_prefix(path: &str, prefix: &str) -> String {
    if !path.starts_with('/') {
        return path.to_string();
    }
    if path == "/" {
        return prefix.to_string();
    }
    format!("{}{}", prefix, path)
}

/// `stripBasePath`: if `path` starts with `base_path + "/"` or equals
/// `base_path`, remove the prefix (returning `"/"` for an empty remainder).
/// Otherwise return the path unchanged and report no base path was present.
pub fn strip_base_path(path: &str, base_path: &str) -> (String, bool) {
    if base_path.is_empty() {
        return (path.to_string(), true);
    }
    if path == base_path {
        return ("/".to_string(), true);
    }
    if let Some(rest) = path.strip_prefix(base_path) {
        if let Some(rest) = rest.strip_prefix('/') {
            let stripped = if rest.is_empty() {
                "/".to_string()
            } else {
                format!("/{}", rest)
            };
            return (stripped, true);
        }
    }
    (path.to_string(), false)
}

/// `detectLocale`: if the first path segment matches a configured locale
/// case-insensitively, strip it and report the canonical configured form.
pub fn detect_locale(pathname: &str, locales: &[String]) -> (String, Option<String>) {
    if locales.is_empty() {
        return (pathname.to_string(), None);
    }
    let trimmed = pathname.trim_start_matches('/');
    let (first_segment, rest) = match trimmed.split_once('/') {
        Some((seg, rest)) => (seg, rest),
        None => (trimmed, ""),
    };
    if first_segment.is_empty() {
        return (pathname.to_string(), None);
    }
    for locale in locales {
        if locale.eq_ignore_ascii_case(first_segment) {
            let remainder = if rest.is_empty() {
                "/".to_string()
            } else {
                format!("/{}", rest)
            };
            return (remainder, Some(locale.clone()));
        }
    }
    (pathname.to_string(), None)
}

/// Decompose a `_next/data/<buildId>/<path>.json` request into `build_id`
/// and a cleaned `pathname`, mutating `result` in place.
fn decompose_data_request(result: &mut ParsedURL) {
    const PREFIX: &str = "/_next/data/";
    if !result.pathname.starts_with(PREFIX) {
        return;
    }
    let rest = &result.pathname[PREFIX.len()..];
    let Some((build_id, tail)) = rest.split_once('/') else {
        return;
    };
    let Some(stripped) = tail.strip_suffix(".json") else {
        return;
    };
    result.build_id = Some(build_id.to_string());
    result.pathname = if stripped == "index" {
        "/".to_string()
    } else {
        format!("/{}", stripped)
    };
}
