//! Small TTL memoization cache for scan results.
//!
//! Invalidation is by expiry only, never by writes; readers within the
//! freshness window may observe a stale listing. That staleness window is
//! deliberate: it keeps the read path off the filesystem without a
//! write-tracking protocol.

use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct TtlCache<T> {
    inner: Mutex<Option<(Instant, T)>>,
    ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(None),
            ttl,
        }
    }

    /// Returns the cached value if it was computed within the TTL.
    pub fn get(&self) -> Option<T> {
        let guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match &*guard {
            Some((at, value)) if at.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub fn set(&self, value: T) {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        *guard = Some((Instant::now(), value));
    }

    /// Drops the cached value. Used by tests and explicit refresh paths.
    pub fn clear(&self) {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hit_within_ttl() {
        let cache = TtlCache::new(Duration::from_secs(60));
        assert!(cache.get().is_none());
        cache.set(42u32);
        assert_eq!(cache.get(), Some(42));
    }

    #[test]
    fn test_cache_expires() {
        let cache = TtlCache::new(Duration::from_millis(0));
        cache.set("stale".to_string());
        assert!(cache.get().is_none());
    }

    #[test]
    fn test_clear() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set(1u8);
        cache.clear();
        assert!(cache.get().is_none());
    }
}
