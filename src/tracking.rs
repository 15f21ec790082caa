//! Records which keys were fetched.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use crate::context::ExecutionContext;
use crate::interceptor::Interceptor;
use crate::key::{CacheKey, QueryKey};
use crate::query::Value;
use crate::reverse_deps::KeySet;
use crate::EngineError;

/// Interceptor remembering every key whose pre-hooks reached it.
///
/// Placed after a [`CacheInterceptor`](crate::CacheInterceptor), it records
/// only the keys that missed the cache; placed first, it records every fetch.
/// Useful in tests to assert what a change caused to be recomputed.
#[derive(Default)]
pub struct TrackingInterceptor {
    fetched: Mutex<KeySet>,
}

impl TrackingInterceptor {
    /// Create a tracker with nothing recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `key` was fetched since the last reset.
    pub fn was_fetched(&self, key: &QueryKey) -> bool {
        self.fetched.lock().contains(key)
    }

    /// Returns true if `query` was fetched since the last reset.
    pub fn was_query_fetched<Q: CacheKey + Clone>(&self, query: &Q) -> bool {
        self.was_fetched(&QueryKey::of(query))
    }

    /// Number of distinct keys fetched.
    pub fn len(&self) -> usize {
        self.fetched.lock().len()
    }

    /// Returns true if nothing was fetched.
    pub fn is_empty(&self) -> bool {
        self.fetched.lock().is_empty()
    }

    /// Snapshot of the fetched keys.
    pub fn fetched_keys(&self) -> KeySet {
        self.fetched.lock().clone()
    }

    /// Forget everything recorded so far.
    pub fn reset(&self) {
        self.fetched.lock().clear();
    }
}

#[async_trait]
impl Interceptor for TrackingInterceptor {
    async fn will_fetch(
        &self,
        key: &QueryKey,
        _context: &ExecutionContext,
    ) -> Result<Option<Value>, EngineError> {
        if self.fetched.lock().insert(key.clone()) {
            trace!(key = %key, "tracked");
        }
        Ok(None)
    }
}
