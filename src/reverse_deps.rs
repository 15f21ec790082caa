//! Reverse-dependency tracking and invalidation.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::context::ExecutionContext;
use crate::interceptor::Interceptor;
use crate::key::{CacheKey, QueryKey};
use crate::query::Value;
use crate::EngineError;

/// Set of query keys.
pub type KeySet = ahash::HashSet<QueryKey>;

/// Interceptor recording which queries fetched which.
///
/// When `A` fetches `B`, the edge "`B` has dependent `A`" is recorded, `A`
/// being the immediate parent on the call chain at the time of the fetch.
/// Edges accumulate across fetches until [`clear`](Self::clear) or
/// [`invalidate`](Self::invalidate) removes them.
///
/// # Invalidation handshake
///
/// This interceptor never touches a cache. After an input changes, evict
/// everything it reports:
///
/// ```ignore
/// for key in reverse_deps.invalidate(&QueryKey::of(&changed)) {
///     cache.clear_key(&key);
/// }
/// ```
#[derive(Default)]
pub struct ReverseDepsInterceptor {
    /// dependency -> dependents
    reverse_deps: Mutex<ahash::HashMap<QueryKey, KeySet>>,
}

impl ReverseDepsInterceptor {
    /// Create an interceptor with an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// All keys that depend on `key`, directly or transitively.
    ///
    /// `key` itself is only included if the recorded graph contains a cycle
    /// through it.
    pub fn dependents(&self, key: &QueryKey) -> KeySet {
        let reverse_deps = self.reverse_deps.lock();
        let mut result = KeySet::default();
        let mut visited = KeySet::default();
        let mut stack = vec![key.clone()];

        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(dependents) = reverse_deps.get(&current) {
                for dependent in dependents {
                    result.insert(dependent.clone());
                    stack.push(dependent.clone());
                }
            }
        }

        result
    }

    /// [`dependents`](Self::dependents) for a query value.
    pub fn dependents_of_query<Q: CacheKey + Clone>(&self, query: &Q) -> KeySet {
        self.dependents(&QueryKey::of(query))
    }

    /// Keys that fetched `key` directly.
    pub fn direct_dependents(&self, key: &QueryKey) -> KeySet {
        self.reverse_deps
            .lock()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// [`direct_dependents`](Self::direct_dependents) for a query value.
    pub fn direct_dependents_of_query<Q: CacheKey + Clone>(&self, query: &Q) -> KeySet {
        self.direct_dependents(&QueryKey::of(query))
    }

    /// Remove `key` and everything depending on it from the graph.
    ///
    /// Returns `key` together with all of its transitive dependents; the
    /// caller is expected to evict each of them from its cache and re-fetch.
    /// Afterwards the graph holds no edge set for any returned key.
    pub fn invalidate(&self, key: &QueryKey) -> KeySet {
        let mut reverse_deps = self.reverse_deps.lock();
        let mut invalidated = KeySet::default();
        let mut stack = vec![key.clone()];

        while let Some(current) = stack.pop() {
            if invalidated.contains(&current) {
                continue;
            }
            if let Some(dependents) = reverse_deps.remove(&current) {
                stack.extend(dependents);
            }
            invalidated.insert(current);
        }

        debug!(key = %key, invalidated = invalidated.len(), "invalidated");
        invalidated
    }

    /// [`invalidate`](Self::invalidate) for a query value.
    pub fn invalidate_query<Q: CacheKey + Clone>(&self, query: &Q) -> KeySet {
        self.invalidate(&QueryKey::of(query))
    }

    /// Snapshot of the whole graph, dependency to dependents.
    pub fn all_reverse_dependencies(&self) -> ahash::HashMap<QueryKey, KeySet> {
        self.reverse_deps.lock().clone()
    }

    /// Number of keys with at least one recorded dependent.
    pub fn len(&self) -> usize {
        self.reverse_deps.lock().len()
    }

    /// Returns true if no edge is recorded.
    pub fn is_empty(&self) -> bool {
        self.reverse_deps.lock().is_empty()
    }

    /// Drop the entire graph.
    pub fn clear(&self) {
        self.reverse_deps.lock().clear();
    }
}

#[async_trait]
impl Interceptor for ReverseDepsInterceptor {
    async fn will_fetch(
        &self,
        key: &QueryKey,
        context: &ExecutionContext,
    ) -> Result<Option<Value>, EngineError> {
        if let Some(parent) = context.immediate_parent_key() {
            trace!(key = %key, dependent = %parent, "recording dependent");
            self.reverse_deps
                .lock()
                .entry(key.clone())
                .or_default()
                .insert(parent.clone());
        }
        Ok(None)
    }
}
