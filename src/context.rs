//! Execution context threaded through nested fetches.

use crate::key::QueryKey;

/// The call chain from the root fetch down to the current query.
///
/// Contexts are immutable. [`child`](Self::child) returns a new context and
/// leaves `self` untouched, so one parent can be shared by any number of
/// concurrent child fetches without them observing each other.
///
/// Clone is cheap: the key set is a persistent hash set whose clones share
/// structure, and `child` only allocates the path to the inserted key.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    active_keys: im::HashSet<QueryKey>,
    immediate_parent_key: Option<QueryKey>,
    depth: usize,
}

impl ExecutionContext {
    /// The empty context used for top-level fetches.
    pub fn root() -> Self {
        Self::default()
    }

    /// Create the context for a nested fetch of `key`.
    #[must_use]
    pub fn child(&self, key: QueryKey) -> Self {
        Self {
            active_keys: self.active_keys.update(key.clone()),
            immediate_parent_key: Some(key),
            depth: self.depth + 1,
        }
    }

    /// Returns true if `key` is anywhere on this chain, including the query
    /// this context belongs to.
    pub fn contains(&self, key: &QueryKey) -> bool {
        self.active_keys.contains(key)
    }

    /// The key whose computation issued the current fetch, or `None` at the root.
    pub fn immediate_parent_key(&self) -> Option<&QueryKey> {
        self.immediate_parent_key.as_ref()
    }

    /// Keys on the chain, in no particular order.
    pub fn active_keys(&self) -> impl Iterator<Item = &QueryKey> + '_ {
        self.active_keys.iter()
    }

    /// Number of fetches between the root and this context.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Returns true for the root context.
    pub fn is_root(&self) -> bool {
        self.depth == 0
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("immediate_parent_key", &self.immediate_parent_key)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}
