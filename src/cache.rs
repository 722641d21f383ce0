//! TTL-bounded read-through caches over the DVR Client.
//!
//! Each cache wraps one `tokio::sync::Mutex<Option<CacheEntry<T>>>`. Holding
//! the lock across the refresh call is what gives "at most one refresh in
//! flight" for free: a second caller arriving during a refresh blocks on the
//! same lock and observes the freshly-stored value instead of triggering its
//! own fetch.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

use crate::model::CacheEntry;

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub struct TtlCache<T: Clone> {
    entry: Mutex<Option<CacheEntry<T>>>,
    ttl_secs: AtomicU64,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entry: Mutex::new(None),
            ttl_secs: AtomicU64::new(ttl_secs),
        }
    }

    pub fn set_ttl(&self, ttl_secs: u64) {
        self.ttl_secs.store(ttl_secs, Ordering::Relaxed);
    }

    /// Returns the cached value if fresh, otherwise awaits `refresh` and
    /// stores its result. `refresh` errors are propagated without poisoning
    /// the cache — a stale-but-present value remains available next call.
    pub async fn get_or_refresh<F, Fut, E>(&self, refresh: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut guard = self.entry.lock().await;
        let ttl = self.ttl_secs.load(Ordering::Relaxed);
        let now = now();

        if let Some(existing) = guard.as_ref() {
            if existing.is_fresh(now, ttl) {
                return Ok(existing.value.clone());
            }
        }

        match refresh().await {
            Ok(value) => {
                *guard = Some(CacheEntry::new(value.clone(), now));
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }

    /// Forces eviction, e.g. after an SSE reconnect where the upstream state
    /// may have drifted.
    pub async fn invalidate(&self) {
        *self.entry.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test]
    async fn refreshes_once_then_serves_cached_value() {
        let cache = TtlCache::<u32>::new(3600);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let result: Result<u32, ()> = cache
                .get_or_refresh(|| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await;
            assert_eq!(result, Ok(42));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refetches_after_ttl_expiry() {
        let cache = TtlCache::<u32>::new(0);
        let first: Result<u32, ()> = cache.get_or_refresh(|| async { Ok(1) }).await;
        assert_eq!(first, Ok(1));

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let second: Result<u32, ()> = cache.get_or_refresh(|| async { Ok(2) }).await;
        assert_eq!(second, Ok(2));
    }

    #[tokio::test]
    async fn error_does_not_poison_prior_value() {
        let cache = TtlCache::<u32>::new(0);
        let _: Result<u32, ()> = cache.get_or_refresh(|| async { Ok(7) }).await;

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let err: Result<u32, &str> = cache.get_or_refresh(|| async { Err("boom") }).await;
        assert_eq!(err, Err("boom"));
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let cache = TtlCache::<u32>::new(3600);
        let _: Result<u32, ()> = cache.get_or_refresh(|| async { Ok(1) }).await;
        cache.invalidate().await;

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let result: Result<u32, ()> = cache
            .get_or_refresh(|| async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
