//! Response cache keyed by `(url, mode)` (spec §4.1).
//!
//! Entries expire after a session-scoped TTL. Concurrent requests for the
//! same key coalesce onto a single in-flight fetch: every waiter receives
//! the same result, and the cache-hit counter is incremented for all but
//! the first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tokio::time::Instant;

use super::error::DownloadError;

/// Whether a direct download fetches the raw page body or hands the URL to
/// the translation service first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownloadMode {
    Raw,
    Translated,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    url: String,
    mode: DownloadMode,
}

/// A cached response body plus the HTTP status it was fetched with.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub body: String,
    pub status: u16,
}

struct Entry {
    cell: OnceCell<Result<CachedResponse, DownloadError>>,
    inserted_at: Instant,
}

/// Default session-scoped TTL for cached responses.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Default)]
pub struct ResponseCacheStats {
    pub hits: u64,
    pub misses: u64,
}

pub struct ResponseCache {
    ttl: Duration,
    entries: DashMap<CacheKey, Arc<Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the cached value for `(url, mode)`, calling `fetch` at most
    /// once even when many callers race on the same key. `fetch` is only
    /// invoked by whichever caller wins the race to create the entry.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        url: &str,
        mode: DownloadMode,
        fetch: F,
    ) -> Result<CachedResponse, DownloadError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<CachedResponse, DownloadError>>,
    {
        let key = CacheKey {
            url: url.to_string(),
            mode,
        };

        let is_fresh = |entry: &Entry| entry.inserted_at.elapsed() < self.ttl;

        let entry = match self.entries.get(&key) {
            Some(existing) if is_fresh(&existing) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Arc::clone(existing.value())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let fresh = Arc::new(Entry {
                    cell: OnceCell::new(),
                    inserted_at: Instant::now(),
                });
                self.entries.insert(key, Arc::clone(&fresh));
                fresh
            }
        };

        // Every caller that reaches here races on the same OnceCell; only
        // the first actually invokes `fetch`, the rest observe its result.
        let already_initialized = entry.cell.initialized();
        if already_initialized {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        entry.cell.get_or_init(fetch).await.clone()
    }

    pub fn stats(&self) -> ResponseCacheStats {
        ResponseCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn concurrent_requests_for_same_key_coalesce() {
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(60)));
        let call_count = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let call_count = Arc::clone(&call_count);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("https://example.com/a", DownloadMode::Raw, || async {
                        call_count.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(CachedResponse {
                            body: "hello".to_string(),
                            status: 200,
                        })
                    })
                    .await
            }));
        }
        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result.body, "hello");
        }
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_modes_are_separate_cache_entries() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        let call_count = Arc::new(AtomicU32::new(0));

        for mode in [DownloadMode::Raw, DownloadMode::Translated] {
            let call_count = Arc::clone(&call_count);
            cache
                .get_or_fetch("https://example.com/a", mode, || async move {
                    call_count.fetch_add(1, Ordering::SeqCst);
                    Ok(CachedResponse {
                        body: "x".to_string(),
                        status: 200,
                    })
                })
                .await
                .unwrap();
        }
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_entry_triggers_a_refetch() {
        let cache = ResponseCache::new(Duration::from_millis(10));
        let call_count = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let call_count = Arc::clone(&call_count);
            cache
                .get_or_fetch("https://example.com/a", DownloadMode::Raw, || async move {
                    call_count.fetch_add(1, Ordering::SeqCst);
                    Ok(CachedResponse {
                        body: "x".to_string(),
                        status: 200,
                    })
                })
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }
}
