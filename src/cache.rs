//! Memoization interceptor.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::context::ExecutionContext;
use crate::interceptor::Interceptor;
use crate::key::{CacheKey, QueryKey};
use crate::query::Value;
use crate::EngineError;

/// Interceptor that stores computed values and serves later fetches of the
/// same key from the store.
///
/// Entries never expire on their own. Evict them with
/// [`clear_key`](Self::clear_key), typically for every key returned by
/// [`ReverseDepsInterceptor::invalidate`](crate::ReverseDepsInterceptor::invalidate).
#[derive(Default)]
pub struct CacheInterceptor {
    entries: Mutex<ahash::HashMap<QueryKey, Value>>,
}

impl CacheInterceptor {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a value is stored for `key`.
    pub fn is_cached(&self, key: &QueryKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Returns true if a value is stored for `query`.
    pub fn is_query_cached<Q: CacheKey + Clone>(&self, query: &Q) -> bool {
        self.is_cached(&QueryKey::of(query))
    }

    /// Evict the entry for `key`. Returns whether an entry was removed.
    pub fn clear_key(&self, key: &QueryKey) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Evict the entry for `query`. Returns whether an entry was removed.
    pub fn clear_query<Q: CacheKey + Clone>(&self, query: &Q) -> bool {
        self.clear_key(&QueryKey::of(query))
    }

    /// Evict every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl Interceptor for CacheInterceptor {
    async fn will_fetch(
        &self,
        key: &QueryKey,
        _context: &ExecutionContext,
    ) -> Result<Option<Value>, EngineError> {
        let cached = self.entries.lock().get(key).cloned();
        if cached.is_some() {
            debug!(key = %key, "cache hit");
        }
        Ok(cached)
    }

    fn did_compute(&self, key: &QueryKey, value: &Value, _context: &ExecutionContext) {
        trace!(key = %key, "cache store");
        self.entries.lock().insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Cell(&'static str);

    fn value(n: i64) -> Value {
        Arc::new(n)
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache = CacheInterceptor::new();
        let key = QueryKey::new(Cell("A1"));
        let root = ExecutionContext::root();

        assert!(cache.will_fetch(&key, &root).await.unwrap().is_none());

        cache.did_compute(&key, &value(10), &root.child(key.clone()));

        let hit = cache.will_fetch(&key, &root).await.unwrap().unwrap();
        assert_eq!(hit.downcast_ref::<i64>(), Some(&10));
        assert!(cache.is_cached(&key));
        assert!(cache.is_query_cached(&Cell("A1")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear_single_and_all() {
        let cache = CacheInterceptor::new();
        let root = ExecutionContext::root();
        let a = QueryKey::new(Cell("A1"));
        let b = QueryKey::new(Cell("B1"));
        cache.did_compute(&a, &value(1), &root);
        cache.did_compute(&b, &value(2), &root);

        assert!(cache.clear_key(&a));
        assert!(!cache.clear_key(&a));
        assert!(!cache.is_cached(&a));
        assert!(cache.is_cached(&b));

        assert!(cache.clear_query(&Cell("B1")));
        assert!(cache.is_empty());

        cache.did_compute(&a, &value(1), &root);
        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
