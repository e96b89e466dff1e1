//! Path pattern compiler (§4.2): `:name`, `:name*`, `:name?` segments
//! compiled into a regex matcher, plus the `has`-clause predicate matcher
//! used by custom routes.

use std::collections::HashMap;

use regex::Regex;

use crate::error::GatewayError;
use crate::url::QueryMap;

/// A captured route parameter: one segment, or an ordered sequence for a
/// `:name*`/`:name+` wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureValue {
    Single(String),
    Multi(Vec<String>),
}

impl CaptureValue {
    pub fn as_single(&self) -> Option<&str> {
        match self {
            CaptureValue::Single(s) => Some(s),
            CaptureValue::Multi(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentKind {
    Literal,
    Param,
    ParamOptional,
    ParamWildcard,
}

#[derive(Debug, Clone)]
struct Segment {
    kind: SegmentKind,
    text: String,
}

/// A compiled path pattern. Construct with [`PathMatcher::compile`].
#[derive(Debug, Clone)]
pub struct PathMatcher {
    pattern: String,
    regex: Regex,
    param_order: Vec<(String, SegmentKind)>,
    dynamic_segment_count: usize,
    catch_all_depth: usize,
}

impl PathMatcher {
    /// Compile `pattern` (e.g. `/blog/:slug`, `/files/:path*`,
    /// `/shop/:category?`) into a matcher.
    pub fn compile(pattern: &str) -> Result<PathMatcher, GatewayError> {
        let segments = parse_segments(pattern)?;

        let mut param_order = Vec::new();
        let mut dynamic_segment_count = 0;
        let mut catch_all_depth = 0;
        for segment in &segments {
            match segment.kind {
                SegmentKind::Literal => {}
                SegmentKind::Param | SegmentKind::ParamOptional => {
                    param_order.push((segment.text.clone(), segment.kind));
                    dynamic_segment_count += 1;
                }
                SegmentKind::ParamWildcard => {
                    param_order.push((segment.text.clone(), segment.kind));
                    dynamic_segment_count += 1;
                    catch_all_depth += 1;
                }
            }
        }

        let regex_src = build_regex_source(&segments);
        let regex = Regex::new(&regex_src)
            .map_err(|e| GatewayError::Internal(format!("invalid route pattern {:?}: {}", pattern, e)))?;

        Ok(PathMatcher {
            pattern: pattern.to_string(),
            regex,
            param_order,
            dynamic_segment_count,
            catch_all_depth,
        })
    }

    /// Match `path` and return captured parameters, or `None`.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, CaptureValue>> {
        let captures = self.regex.captures(path)?;
        let mut params = HashMap::new();
        for (i, (name, kind)) in self.param_order.iter().enumerate() {
            let Some(value) = captures.get(i + 1) else {
                continue;
            };
            let value = value.as_str();
            match kind {
                SegmentKind::ParamWildcard => {
                    let parts = value.split('/').map(str::to_string).collect();
                    params.insert(name.clone(), CaptureValue::Multi(parts));
                }
                _ => {
                    params.insert(name.clone(), CaptureValue::Single(value.to_string()));
                }
            }
        }
        Some(params)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Total order for tie-breaking between candidate dynamic routes
    /// (§4.2): fewer dynamic segments first, then shallower catch-all,
    /// then lexicographic on the source pattern.
    pub fn specificity_key(&self) -> (usize, usize, &str) {
        (self.dynamic_segment_count, self.catch_all_depth, self.pattern.as_str())
    }
}

fn parse_segments(pattern: &str) -> Result<Vec<Segment>, GatewayError> {
    if !pattern.starts_with('/') {
        return Err(GatewayError::Internal(format!(
            "route pattern must start with '/': {:?}",
            pattern
        )));
    }
    let mut segments = Vec::new();
    for raw in pattern.trim_start_matches('/').split('/') {
        if raw.is_empty() {
            continue;
        }
        if let Some(name) = raw.strip_prefix(':') {
            if let Some(name) = name.strip_suffix('*') {
                segments.push(Segment {
                    kind: SegmentKind::ParamWildcard,
                    text: name.to_string(),
                });
            } else if let Some(name) = name.strip_suffix('?') {
                segments.push(Segment {
                    kind: SegmentKind::ParamOptional,
                    text: name.to_string(),
                });
            } else {
                segments.push(Segment {
                    kind: SegmentKind::Param,
                    text: name.to_string(),
                });
            }
        } else {
            segments.push(Segment {
                kind: SegmentKind::Literal,
                text: raw.to_string(),
            });
        }
    }
    Ok(segments)
}

fn build_regex_source(segments: &[Segment]) -> String {
    let mut regex_src = String::from("^");
    for segment in segments {
        match segment.kind {
            SegmentKind::Literal => {
                regex_src.push('/');
                regex_src.push_str(&regex::escape(&segment.text));
            }
            SegmentKind::Param => {
                regex_src.push_str("/([^/]+)");
            }
            SegmentKind::ParamOptional => {
                regex_src.push_str("(?:/([^/]+))?");
            }
            SegmentKind::ParamWildcard => {
                regex_src.push_str("(?:/(.+))?");
            }
        }
    }
    if segments.is_empty() {
        regex_src.push('/');
    }
    regex_src.push('$');
    regex_src
}

/// A predicate over headers, cookies, host, or query used by a custom
/// route's `has` clause (§4.2).
#[derive(Debug, Clone)]
pub struct HasPredicate {
    source: HasSource,
    key: String,
    value: Option<Regex>,
    capture: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HasSource {
    Header,
    Cookie,
    Host,
    Query,
}

/// Request-derived context a `has` clause is evaluated against.
pub struct HasContext<'a> {
    pub headers: &'a HashMap<String, String>,
    pub cookies: &'a HashMap<String, String>,
    pub host: Option<&'a str>,
    pub query: &'a QueryMap,
}

impl HasPredicate {
    pub fn header(key: impl Into<String>, value: Option<&str>) -> Result<Self, GatewayError> {
        Self::new(HasSource::Header, key, value, None)
    }

    pub fn cookie(key: impl Into<String>, value: Option<&str>) -> Result<Self, GatewayError> {
        Self::new(HasSource::Cookie, key, value, None)
    }

    pub fn host(value: &str) -> Result<Self, GatewayError> {
        Self::new(HasSource::Host, String::new(), Some(value), None)
    }

    pub fn query(key: impl Into<String>, value: Option<&str>) -> Result<Self, GatewayError> {
        Self::new(HasSource::Query, key, value, None)
    }

    pub fn with_capture(mut self, name: impl Into<String>) -> Self {
        self.capture = Some(name.into());
        self
    }

    fn new(
        source: HasSource,
        key: impl Into<String>,
        value: Option<&str>,
        capture: Option<String>,
    ) -> Result<Self, GatewayError> {
        let value = value
            .map(|v| Regex::new(v))
            .transpose()
            .map_err(|e| GatewayError::Internal(format!("invalid has-clause value regex: {}", e)))?;
        Ok(HasPredicate {
            source,
            key: key.into(),
            value,
            capture,
        })
    }

    /// Evaluate against `ctx`; on success return captures to merge into the
    /// route's `params` (empty map if the predicate has no capture name).
    pub fn evaluate(&self, ctx: &HasContext<'_>) -> Option<HashMap<String, CaptureValue>> {
        let subject = match self.source {
            HasSource::Header => ctx.headers.get(&self.key.to_lowercase()).cloned(),
            HasSource::Cookie => ctx.cookies.get(&self.key).cloned(),
            HasSource::Host => ctx.host.map(str::to_string),
            HasSource::Query => ctx.query.get(&self.key).and_then(|v| v.as_str()).map(str::to_string),
        };

        let subject = subject?;

        let captured = match &self.value {
            Some(regex) => {
                let caps = regex.captures(&subject)?;
                caps.get(1).map(|m| m.as_str().to_string())
            }
            None => Some(subject),
        };

        let mut params = HashMap::new();
        if let (Some(name), Some(value)) = (&self.capture, captured) {
            params.insert(name.clone(), CaptureValue::Single(value));
        }
        Some(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pattern_matches_exact_path() {
        let matcher = PathMatcher::compile("/about").unwrap();
        assert!(matcher.matches("/about").is_some());
        assert!(matcher.matches("/about/us").is_none());
    }

    #[test]
    fn single_param_captures_segment() {
        let matcher = PathMatcher::compile("/blog/:slug").unwrap();
        let params = matcher.matches("/blog/hello-world").unwrap();
        assert_eq!(
            params.get("slug"),
            Some(&CaptureValue::Single("hello-world".to_string()))
        );
        assert!(matcher.matches("/blog/hello/world").is_none());
    }

    #[test]
    fn wildcard_param_captures_multiple_segments() {
        let matcher = PathMatcher::compile("/files/:path*").unwrap();
        let params = matcher.matches("/files/a/b/c").unwrap();
        assert_eq!(
            params.get("path"),
            Some(&CaptureValue::Multi(vec!["a".into(), "b".into(), "c".into()]))
        );
    }

    #[test]
    fn optional_param_matches_with_and_without_segment() {
        let matcher = PathMatcher::compile("/shop/:category?").unwrap();
        assert!(matcher.matches("/shop").is_some());
        let params = matcher.matches("/shop/shoes").unwrap();
        assert_eq!(
            params.get("category"),
            Some(&CaptureValue::Single("shoes".to_string()))
        );
    }

    #[test]
    fn dynamic_route_path_is_case_sensitive() {
        let matcher = PathMatcher::compile("/About").unwrap();
        assert!(matcher.matches("/about").is_none());
    }

    #[test]
    fn specificity_orders_fewer_dynamic_segments_first() {
        let simple = PathMatcher::compile("/blog/:slug").unwrap();
        let nested = PathMatcher::compile("/blog/:category/:slug").unwrap();
        assert!(simple.specificity_key() < nested.specificity_key());
    }

    #[test]
    fn specificity_orders_shallower_catch_all_before_deeper() {
        let shallow = PathMatcher::compile("/files/:path*").unwrap();
        let deep = PathMatcher::compile("/files/:a/:rest*").unwrap();
        assert!(shallow.specificity_key() < deep.specificity_key());
    }

    #[test]
    fn has_header_predicate_matches_case_insensitive_key() {
        let predicate = HasPredicate::header("x-feature", Some("on")).unwrap();
        let headers = HashMap::from([("x-feature".to_string(), "on".to_string())]);
        let cookies = HashMap::new();
        let query = QueryMap::new();
        let ctx = HasContext {
            headers: &headers,
            cookies: &cookies,
            host: None,
            query: &query,
        };
        assert!(predicate.evaluate(&ctx).is_some());
    }

    #[test]
    fn has_predicate_with_capture_extracts_group() {
        let predicate = HasPredicate::header("x-version", Some(r"^v(\d+)$"))
            .unwrap()
            .with_capture("version");
        let headers = HashMap::from([("x-version".to_string(), "v2".to_string())]);
        let cookies = HashMap::new();
        let query = QueryMap::new();
        let ctx = HasContext {
            headers: &headers,
            cookies: &cookies,
            host: None,
            query: &query,
        };
        let params = predicate.evaluate(&ctx).unwrap();
        assert_eq!(params.get("version"), Some(&CaptureValue::Single("2".to_string())));
    }

    #[test]
    fn has_predicate_missing_subject_fails() {
        let predicate = HasPredicate::cookie("session", None).unwrap();
        let headers = HashMap::new();
        let cookies = HashMap::new();
        let query = QueryMap::new();
        let ctx = HasContext {
            headers: &headers,
            cookies: &cookies,
            host: None,
            query: &query,
        };
        assert!(predicate.evaluate(&ctx).is_none());
    }
}
