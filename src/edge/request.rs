//! The request object exposed to edge functions (§4.4).

use std::collections::HashMap;

use crate::edge::HeaderMultiMap;
use crate::url::ParsedURL;

/// `req` as seen by an edge function: `method`, `url` (with `params` and
/// `page` populated), lazily-parsed `cookies`, and case-insensitive
/// `headers`.
#[derive(Debug, Clone)]
pub struct EdgeRequest {
    pub method: String,
    pub url: ParsedURL,
    pub headers: HeaderMultiMap,
    cookies: Option<HashMap<String, String>>,
}

impl EdgeRequest {
    pub fn new(method: impl Into<String>, url: ParsedURL, headers: HeaderMultiMap) -> Self {
        EdgeRequest {
            method: method.into(),
            url,
            headers,
            cookies: None,
        }
    }

    /// Parse `Cookie` on first access and memoize the result for the
    /// lifetime of this request (§4.4, §9 "Lazy parsing").
    pub fn cookies(&mut self) -> &HashMap<String, String> {
        if self.cookies.is_none() {
            let raw = self.headers.get("cookie").unwrap_or("").to_string();
            self.cookies = Some(parse_cookie_header(&raw));
        }
        self.cookies.as_ref().expect("cookies just initialized")
    }

    pub fn is_preflight(&self) -> bool {
        self.method.eq_ignore_ascii_case("OPTIONS") && self.headers.contains("x-nextjs-preflight")
    }
}

fn parse_cookie_header(raw: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for pair in raw.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        if let Some((k, v)) = pair.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_cookie(raw: &str) -> EdgeRequest {
        let mut headers = HeaderMultiMap::new();
        headers.set("cookie", raw);
        EdgeRequest::new("GET", ParsedURL::parse("/", None).unwrap(), headers)
    }

    #[test]
    fn cookies_parse_multiple_pairs() {
        let mut req = request_with_cookie("a=1; b=2");
        let cookies = req.cookies();
        assert_eq!(cookies.get("a"), Some(&"1".to_string()));
        assert_eq!(cookies.get("b"), Some(&"2".to_string()));
    }

    #[test]
    fn cookies_memoize_across_calls() {
        let mut req = request_with_cookie("a=1");
        let _ = req.cookies();
        let cookies = req.cookies();
        assert_eq!(cookies.len(), 1);
    }

    #[test]
    fn preflight_requires_method_and_sentinel() {
        let mut headers = HeaderMultiMap::new();
        headers.set("x-nextjs-preflight", "1");
        let req = EdgeRequest::new("OPTIONS", ParsedURL::parse("/", None).unwrap(), headers);
        assert!(req.is_preflight());

        let req_get = EdgeRequest::new("GET", ParsedURL::parse("/", None).unwrap(), HeaderMultiMap::new());
        assert!(!req_get.is_preflight());
    }
}
