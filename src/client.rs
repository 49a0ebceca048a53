//! Soft-failing query entry point
//!
//! [`CodeSearchClient`] is what navigation features call. It consults the
//! result cache, bounds the remote round trip with the caller's timeout, and
//! turns every remote failure into an empty list. Navigation is
//! supplementary, so a slow or broken index must never break the host.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{CachedResults, ResultCache};
use crate::models::{QueryRequest, QueryType};
use crate::remote::RemoteSearch;

pub struct CodeSearchClient {
    backend: Arc<dyn RemoteSearch>,
    cache: ResultCache,
}

fn empty() -> CachedResults {
    Arc::from(Vec::new())
}

impl CodeSearchClient {
    pub fn new(backend: Arc<dyn RemoteSearch>, cache: ResultCache) -> Self {
        Self { backend, cache }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Run one navigation query
    ///
    /// `max_results` is capped at 200. On timeout the in-flight call is
    /// dropped, which cancels it, and an empty list is returned. Empty
    /// results are cached like any other successful outcome; failures are
    /// never cached.
    pub async fn query(
        &self,
        filter: &str,
        max_results: usize,
        timeout: Duration,
        exact_match: bool,
        query_type: QueryType,
    ) -> CachedResults {
        let request = QueryRequest::new(filter, max_results, timeout, exact_match, query_type);
        self.query_request(&request).await
    }

    pub async fn query_request(&self, request: &QueryRequest) -> CachedResults {
        let key = request.cache_key();
        if let Some(cached) = self.cache.get(&key) {
            log::debug!("Cache hit for '{}' ({} result(s))", key, cached.len());
            return cached;
        }

        let start = Instant::now();
        let outcome = tokio::time::timeout(request.timeout, self.backend.search(request)).await;

        match outcome {
            Ok(Ok(symbols)) => {
                log::info!(
                    "Found {} symbol(s) for '{}' in {:.2} seconds",
                    symbols.len(),
                    key,
                    start.elapsed().as_secs_f64()
                );
                let results: CachedResults = symbols.into();
                self.cache.set(key, Arc::clone(&results), self.cache.ttl());
                results
            }
            Ok(Err(e)) => {
                log::error!("Code search for '{}' failed: {:#}", key, e);
                empty()
            }
            Err(_) => {
                log::error!(
                    "Code search for '{}' timed out after {} ms",
                    key,
                    request.timeout.as_millis()
                );
                empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ManualClock, DEFAULT_TTL};
    use crate::models::LocatedSymbol;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    enum Behavior {
        Succeed,
        Fail,
        Hang,
    }

    struct FakeSearch {
        behavior: Behavior,
        calls: AtomicUsize,
        seen: Mutex<Vec<QueryRequest>>,
    }

    impl FakeSearch {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RemoteSearch for FakeSearch {
        async fn search(&self, request: &QueryRequest) -> Result<Vec<LocatedSymbol>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request.clone());
            match self.behavior {
                Behavior::Succeed => Ok(vec![LocatedSymbol::new("/repo/a.cs", 3, 6, 12, &request.filter_text)]),
                Behavior::Fail => anyhow::bail!("index unavailable"),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Vec::new())
                }
            }
        }

        async fn warm_up(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_second_query_served_from_cache() {
        let backend = FakeSearch::new(Behavior::Succeed);
        let client = CodeSearchClient::new(backend.clone(), ResultCache::default());

        let first = client.query("Widget", 1, Duration::from_secs(5), true, QueryType::FindDefinitions).await;
        let second = client.query("Widget", 1, Duration::from_secs(5), true, QueryType::FindDefinitions).await;

        assert_eq!(first.len(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_returns_empty_and_is_not_cached() {
        let backend = FakeSearch::new(Behavior::Fail);
        let client = CodeSearchClient::new(backend.clone(), ResultCache::default());

        let results = client.query("Widget", 10, Duration::from_secs(5), true, QueryType::FindReferences).await;
        assert!(results.is_empty());
        assert!(client.cache().is_empty());

        client.query("Widget", 10, Duration::from_secs(5), true, QueryType::FindReferences).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_returns_empty() {
        let backend = FakeSearch::new(Behavior::Hang);
        let client = CodeSearchClient::new(backend, ResultCache::default());

        let results = client.query("Widget", 10, Duration::from_millis(100), false, QueryType::FindDefinitions).await;
        assert!(results.is_empty());
        assert!(client.cache().is_empty());
    }

    #[tokio::test]
    async fn test_max_results_capped_before_backend() {
        let backend = FakeSearch::new(Behavior::Succeed);
        let client = CodeSearchClient::new(backend.clone(), ResultCache::default());

        client.query("Widget", 1000, Duration::from_secs(5), false, QueryType::FindReferences).await;
        assert_eq!(backend.seen.lock().unwrap()[0].max_results, 200);
    }

    #[tokio::test]
    async fn test_expired_entry_requeried() {
        let backend = FakeSearch::new(Behavior::Succeed);
        let clock = Arc::new(ManualClock::default());
        let client = CodeSearchClient::new(backend.clone(), ResultCache::with_clock(DEFAULT_TTL, clock.clone()));

        client.query("Widget", 1, Duration::from_secs(5), true, QueryType::FindDefinitions).await;
        clock.advance(DEFAULT_TTL + Duration::from_secs(1));
        client.query("Widget", 1, Duration::from_secs(5), true, QueryType::FindDefinitions).await;

        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exact_and_prefix_cached_separately() {
        let backend = FakeSearch::new(Behavior::Succeed);
        let client = CodeSearchClient::new(backend.clone(), ResultCache::default());

        client.query("Widget", 1, Duration::from_secs(5), true, QueryType::FindDefinitions).await;
        client.query("Widget", 1, Duration::from_secs(5), false, QueryType::FindDefinitions).await;
        client.query("Widget", 1, Duration::from_secs(5), true, QueryType::FindReferences).await;

        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert_eq!(client.cache().len(), 3);
    }
}
