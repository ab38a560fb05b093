use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use tracing::{debug, warn};

use crate::api::ApiError;

use super::queue::{RequestQueue, SharedResult};

/// How long prefetched data is served before it is requested again.
pub const PREFETCH_TTL: Duration = Duration::from_secs(5 * 60);

/// Keyed cache in front of a [`RequestQueue`], used to load data a screen is
/// likely to need before the user navigates to it.
pub struct Prefetcher<T>
where
    T: Clone + Send + Sync + 'static,
{
    name: &'static str,
    cache: Cache<String, T>,
    queue: RequestQueue<T>,
    // Bumped by clear_cache so a response started before the clear is not stored.
    generation: AtomicU64,
}

impl<T> Prefetcher<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self::with_ttl(name, PREFETCH_TTL)
    }

    pub fn with_ttl(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            cache: Cache::builder().time_to_live(ttl).build(),
            queue: RequestQueue::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Cached value for `key`, or the result of `producer` shared with any
    /// caller already loading the same key.
    pub async fn prefetch<F, Fut>(&self, key: &str, producer: F) -> SharedResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        if let Some(hit) = self.cache.get(key) {
            debug!(cache = self.name, key = key, "Prefetch hit");
            return Ok(hit);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let value = self.queue.enqueue(key, producer).await?;
        if self.generation.load(Ordering::SeqCst) == generation {
            self.cache.insert(key.to_string(), value.clone());
        } else {
            debug!(cache = self.name, key = key, "Cache cleared during load, not storing");
        }
        Ok(value)
    }

    /// Load `key` in the background. Failures are logged and otherwise ignored.
    pub fn warm<F, Fut>(self: &Arc<Self>, key: &str, producer: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let this = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            if let Err(e) = this.prefetch(&key, producer).await {
                warn!(cache = this.name, key = %key, error = %e, "Prefetch failed");
            }
        });
    }

    /// Cached value for `key`, `None` when absent or expired.
    pub fn get_cached_data(&self, key: &str) -> Option<T> {
        self.cache.get(key)
    }

    pub fn is_loading(&self, key: &str) -> bool {
        self.queue.is_in_flight(key)
    }

    pub fn invalidate(&self, key: &str) {
        self.cache.invalidate(key);
    }

    pub fn clear_cache(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(calls: &Arc<AtomicUsize>, value: &str) -> impl Future<Output = Result<String, ApiError>> {
        let calls = Arc::clone(calls);
        let value = value.to_string();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        }
    }

    #[tokio::test]
    async fn test_prefetch_serves_cached_value() {
        let prefetcher = Prefetcher::new("details");
        let calls = Arc::new(AtomicUsize::new(0));

        let first = prefetcher.prefetch("g1", || counting(&calls, "one")).await;
        let second = prefetcher.prefetch("g1", || counting(&calls, "two")).await;
        assert_eq!(first.unwrap(), "one");
        assert_eq!(second.unwrap(), "one");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(prefetcher.get_cached_data("g1").as_deref(), Some("one"));
        assert!(prefetcher.get_cached_data("g2").is_none());
    }

    #[tokio::test]
    async fn test_failed_prefetch_is_not_cached() {
        let prefetcher: Prefetcher<String> = Prefetcher::new("details");
        let failed = prefetcher
            .prefetch("g1", || async { Err(ApiError::NotFound("g1".to_string())) })
            .await;
        assert!(matches!(*failed.unwrap_err(), ApiError::NotFound(_)));
        assert!(prefetcher.get_cached_data("g1").is_none());
    }

    #[tokio::test]
    async fn test_clear_cache_forces_reload() {
        let prefetcher = Prefetcher::new("details");
        let calls = Arc::new(AtomicUsize::new(0));
        prefetcher.prefetch("g1", || counting(&calls, "one")).await.unwrap();

        prefetcher.clear_cache();
        assert!(prefetcher.get_cached_data("g1").is_none());
        let reloaded = prefetcher.prefetch("g1", || counting(&calls, "two")).await;
        assert_eq!(reloaded.unwrap(), "two");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let prefetcher = Prefetcher::with_ttl("details", Duration::from_millis(50));
        let calls = Arc::new(AtomicUsize::new(0));
        prefetcher.prefetch("g1", || counting(&calls, "one")).await.unwrap();

        std::thread::sleep(Duration::from_millis(120));
        assert!(prefetcher.get_cached_data("g1").is_none());
        prefetcher.prefetch("g1", || counting(&calls, "two")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_during_load_skips_store() {
        let prefetcher = Arc::new(Prefetcher::new("details"));
        let gate = Arc::new(tokio::sync::Notify::new());

        let pending = {
            let prefetcher = Arc::clone(&prefetcher);
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                prefetcher
                    .prefetch("g1", || async move {
                        gate.notified().await;
                        Ok("stale".to_string())
                    })
                    .await
            })
        };
        while !prefetcher.is_loading("g1") {
            tokio::task::yield_now().await;
        }

        prefetcher.clear_cache();
        gate.notify_one();
        assert_eq!(pending.await.unwrap().unwrap(), "stale");
        assert!(prefetcher.get_cached_data("g1").is_none());
    }

    #[tokio::test]
    async fn test_warm_populates_in_background() {
        let prefetcher = Arc::new(Prefetcher::new("expenses"));
        let calls = Arc::new(AtomicUsize::new(0));
        let producer_calls = Arc::clone(&calls);
        prefetcher.warm("g1", move || counting(&producer_calls, "warm"));

        while prefetcher.get_cached_data("g1").is_none() {
            tokio::task::yield_now().await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prefetch_joins_warm_in_flight() {
        let prefetcher = Arc::new(Prefetcher::new("details"));
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(tokio::sync::Notify::new());
        {
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            prefetcher.warm("g1", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
                Ok("warm".to_string())
            });
        }
        while !prefetcher.is_loading("g1") {
            tokio::task::yield_now().await;
        }

        let direct = {
            let prefetcher = Arc::clone(&prefetcher);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move { prefetcher.prefetch("g1", || counting(&calls, "direct")).await })
        };
        tokio::task::yield_now().await;
        gate.notify_one();

        assert_eq!(direct.await.unwrap().unwrap(), "warm");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(prefetcher.get_cached_data("g1").as_deref(), Some("warm"));
    }
}
