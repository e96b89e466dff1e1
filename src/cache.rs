//! Response cache / render bridge (§4.3 component table, §5): single-flight
//! deduplication of concurrent renders sharing the same cache key.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, Notify};

use crate::url::QueryMap;

/// `{ locale, pathname, amp }` (§5: "Keys include locale, resolved
/// pathname, and an `.amp` suffix where applicable").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub locale: Option<String>,
    pub pathname: String,
    pub amp: bool,
}

impl CacheKey {
    pub fn new(locale: Option<String>, pathname: impl Into<String>, query: &QueryMap) -> Self {
        let amp = query.get("amp").and_then(|v| v.as_str()).map(|v| v == "1").unwrap_or(false);
        CacheKey {
            locale,
            pathname: pathname.into(),
            amp,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub status: u16,
    pub body: Bytes,
    pub headers: Vec<(String, String)>,
}

enum Slot {
    InFlight(Arc<Notify>),
    Ready(CachedEntry),
}

/// Process-wide, single-flight response cache (§5). Preview-mode requests
/// should bypass it entirely at the call site rather than going through
/// `get_or_render`.
#[derive(Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<CacheKey, Slot>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached entry for `key`, rendering via `render` on a miss.
    /// Concurrent callers for the same key share one render: the first
    /// caller renders, the rest wait on its completion.
    pub async fn get_or_render<F, Fut>(&self, key: CacheKey, render: F) -> CachedEntry
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = CachedEntry>,
    {
        loop {
            let notify = {
                let mut entries = self.entries.lock().await;
                match entries.get(&key) {
                    Some(Slot::Ready(entry)) => return entry.clone(),
                    Some(Slot::InFlight(notify)) => Some(notify.clone()),
                    None => {
                        entries.insert(key.clone(), Slot::InFlight(Arc::new(Notify::new())));
                        None
                    }
                }
            };

            if let Some(notify) = notify {
                notify.notified().await;
                continue;
            }

            let entry = render().await;

            let mut entries = self.entries.lock().await;
            if let Some(Slot::InFlight(notify)) = entries.insert(key.clone(), Slot::Ready(entry.clone())) {
                notify.notify_waiters();
            }
            return entry;
        }
    }

    pub async fn invalidate(&self, key: &CacheKey) {
        self.entries.lock().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn cache_hit_returns_identical_body_to_miss() {
        let cache = ResponseCache::new();
        let key = CacheKey::new(None, "/about", &QueryMap::new());
        let render_count = Arc::new(AtomicU32::new(0));

        let first = cache
            .get_or_render(key.clone(), {
                let count = render_count.clone();
                || async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    CachedEntry {
                        status: 200,
                        body: Bytes::from_static(b"hello"),
                        headers: vec![("content-type".to_string(), "text/html".to_string())],
                    }
                }
            })
            .await;

        let second = cache
            .get_or_render(key, {
                let count = render_count.clone();
                || async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    CachedEntry {
                        status: 200,
                        body: Bytes::from_static(b"different"),
                        headers: vec![("content-type".to_string(), "text/html".to_string())],
                    }
                }
            })
            .await;

        assert_eq!(first.body, second.body);
        assert_eq!(render_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_requests_single_flight_one_render() {
        let cache = Arc::new(ResponseCache::new());
        let key = CacheKey::new(Some("en".to_string()), "/home", &QueryMap::new());
        let render_count = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let key = key.clone();
            let render_count = render_count.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_render(key, || async move {
                        render_count.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        CachedEntry {
                            status: 200,
                            body: Bytes::from_static(b"rendered"),
                            headers: vec![("content-type".to_string(), "text/html".to_string())],
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            let entry = handle.await.unwrap();
            assert_eq!(entry.body, Bytes::from_static(b"rendered"));
        }
        assert_eq!(render_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_rerender() {
        let cache = ResponseCache::new();
        let key = CacheKey::new(None, "/about", &QueryMap::new());
        let render_count = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            cache.invalidate(&key).await;
            let count = render_count.clone();
            cache
                .get_or_render(key.clone(), || async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    CachedEntry {
                        status: 200,
                        body: Bytes::from_static(b"hello"),
                        headers: vec![("content-type".to_string(), "text/html".to_string())],
                    }
                })
                .await;
        }
        assert_eq!(render_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cache_key_detects_amp_suffix() {
        let mut query = QueryMap::new();
        query.set("amp", "1");
        let key = CacheKey::new(None, "/about", &query);
        assert!(key.amp);
    }
}
