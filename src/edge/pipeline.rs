//! Edge pipeline (§4.6): match functions against the request path, chain
//! them via the `next`/`rewrite` sentinels, enforce the recursion cap.

use crate::edge::host::SandboxHost;
use crate::edge::request::EdgeRequest;
use crate::edge::response::EdgeResponse;
use crate::error::GatewayError;
use crate::route::{CaptureValue, EdgeFunctionDescriptor};
use crate::url::{detect_locale, strip_base_path};

pub type PipelineError = GatewayError;

/// The outcome of running the chain to completion: the accumulated
/// response plus the total invocation count (also set on the
/// `x-nextjs-functions` diagnostic header).
#[derive(Debug)]
pub struct PipelineOutcome {
    pub response: EdgeResponse,
    pub invocation_count: u32,
}

/// Run every edge function matching `path`, chaining through `next()` and
/// internal rewrites, up to `max_calls` total invocations (§4.6, §5).
pub async fn run_pipeline(
    host: &SandboxHost,
    descriptors: &[EdgeFunctionDescriptor],
    mut request: EdgeRequest,
    base_path: &str,
    locales: &[String],
    max_calls: u32,
) -> Result<PipelineOutcome, PipelineError> {
    let mut response = EdgeResponse::new();
    let mut current_path = request.url.pathname.clone();
    let mut total_calls: u32 = 0;

    'outer: loop {
        let matches: Vec<&EdgeFunctionDescriptor> = descriptors
            .iter()
            .filter(|d| d.matcher.matches(&current_path).is_some())
            .collect();

        if matches.is_empty() {
            break 'outer;
        }

        let mut advance_to: Option<String> = None;

        for descriptor in matches {
            total_calls += 1;
            if total_calls > max_calls {
                return Err(GatewayError::TooManyEdgeCalls {
                    attempted: total_calls,
                    cap: max_calls,
                });
            }

            if let Some(params) = descriptor.matcher.matches(&current_path) {
                for (name, value) in params {
                    let flattened = match value {
                        CaptureValue::Single(s) => s,
                        CaptureValue::Multi(parts) => parts.join("/"),
                    };
                    request.url.params.insert(name, flattened);
                }
            }
            request.url.pathname = current_path.clone();
            request.url.page = Some(descriptor.page.clone());

            host.run(std::path::Path::new(&descriptor.module_path), &mut request, &mut response)
                .await?;

            if response.sentinel_next() {
                response.headers.remove("x-nextjs-next");
                response.reset_for_internal_rewrite();
                continue;
            }

            if let Some(target) = response.sentinel_rewrite() {
                if target.starts_with('/') {
                    let target = target.to_string();
                    let (stripped, _) = strip_base_path(&target, base_path);
                    let (normalized, _locale) = detect_locale(&stripped, locales);
                    // Only consume the sentinel if the rewritten path recurses into
                    // another edge function. Otherwise leave it for the routing engine,
                    // which will mutate the parsed URL and keep routing (spec.md:148).
                    if descriptors.iter().any(|d| d.matcher.matches(&normalized).is_some()) {
                        response.headers.remove("x-nextjs-rewrite");
                        response.reset_for_internal_rewrite();
                        advance_to = Some(normalized);
                    }
                }
            }
            break;
        }

        match advance_to {
            Some(new_path) => {
                current_path = new_path;
                continue 'outer;
            }
            None => break 'outer,
        }
    }

    if request.is_preflight() {
        response.apply_preflight();
    }

    response.set_functions_count(total_calls);
    Ok(PipelineOutcome {
        response,
        invocation_count: total_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EdgeFunctionConfig;
    use crate::edge::host::EdgeOutcome;
    use crate::edge::HeaderMultiMap;
    use crate::url::ParsedURL;

    fn descriptor(page: &str, file: &str) -> EdgeFunctionDescriptor {
        let config = EdgeFunctionConfig::new(page, file);
        crate::route::matcher::PathMatcher::compile(&config.page)
            .map(|matcher| EdgeFunctionDescriptor {
                page: config.page.clone(),
                matcher,
                module_path: config.file.clone(),
            })
            .unwrap()
    }

    fn request(path: &str) -> EdgeRequest {
        EdgeRequest::new("GET", ParsedURL::parse(path, None).unwrap(), HeaderMultiMap::new())
    }

    #[tokio::test]
    async fn chained_rewrite_then_write_reports_two_invocations() {
        let mut host = SandboxHost::new();
        host.register("first.js", |_req, res| {
            res.rewrite("/about-with-chained-sequence")?;
            Ok(EdgeOutcome::Continue)
        });
        host.register("second.js", |_req, res| {
            res.write(bytes::Bytes::from_static(b"this is a chained response"))?;
            res.end(None)?;
            Ok(EdgeOutcome::Continue)
        });

        let descriptors = vec![
            descriptor("/rewrite-me-to-about-with-chained-sequence", "first.js"),
            descriptor("/about-with-chained-sequence", "second.js"),
        ];

        let outcome = run_pipeline(
            &host,
            &descriptors,
            request("/rewrite-me-to-about-with-chained-sequence"),
            "",
            &[],
            5,
        )
        .await
        .unwrap();

        assert_eq!(outcome.invocation_count, 2);
        assert_eq!(
            outcome.response.get_header("x-nextjs-functions"),
            Some("2")
        );
    }

    #[tokio::test]
    async fn infinite_loop_trips_too_many_edge_calls() {
        let mut host = SandboxHost::new();
        host.register("loop.js", |_req, res| {
            res.rewrite("/loop-b")?;
            Ok(EdgeOutcome::Continue)
        });
        host.register("loop_b.js", |_req, res| {
            res.rewrite("/loop")?;
            Ok(EdgeOutcome::Continue)
        });

        let descriptors = vec![descriptor("/loop", "loop.js"), descriptor("/loop-b", "loop_b.js")];

        let err = run_pipeline(&host, &descriptors, request("/loop"), "", &[], 5)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::TooManyEdgeCalls { cap: 5, .. }));
    }

    #[tokio::test]
    async fn no_matching_function_returns_empty_unfinished_outcome() {
        let host = SandboxHost::new();
        let outcome = run_pipeline(&host, &[], request("/anything"), "", &[], 5).await.unwrap();
        assert_eq!(outcome.invocation_count, 0);
        assert!(!outcome.response.finished);
    }

    #[tokio::test]
    async fn next_sentinel_advances_to_next_matching_function_same_path() {
        let mut host = SandboxHost::new();
        host.register("a.js", |_req, res| {
            res.next()?;
            Ok(EdgeOutcome::Continue)
        });
        host.register("b.js", |_req, res| {
            res.send(crate::edge::response::SendBody::Text("done".to_string()), false)?;
            Ok(EdgeOutcome::Continue)
        });

        let descriptors = vec![descriptor("/home", "a.js"), descriptor("/home", "b.js")];
        let outcome = run_pipeline(&host, &descriptors, request("/home"), "", &[], 5)
            .await
            .unwrap();
        assert_eq!(outcome.invocation_count, 2);
    }

    #[tokio::test]
    async fn rewrite_to_unmatched_path_survives_as_sentinel() {
        let mut host = SandboxHost::new();
        host.register("old.js", |_req, res| {
            res.rewrite("/not-an-edge-function")?;
            Ok(EdgeOutcome::Continue)
        });

        let descriptors = vec![descriptor("/old", "old.js")];
        let outcome = run_pipeline(&host, &descriptors, request("/old"), "", &[], 5)
            .await
            .unwrap();

        assert_eq!(outcome.invocation_count, 1);
        assert_eq!(outcome.response.sentinel_rewrite(), Some("/not-an-edge-function"));
    }
}
