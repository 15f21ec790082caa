//! Interceptor trait plugged into the engine's pipeline.

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::key::QueryKey;
use crate::query::Value;
use crate::EngineError;

/// A cross-cutting behavior observing every fetch.
///
/// For a single fetch the engine calls [`will_fetch`](Self::will_fetch) on
/// each interceptor in pipeline order, then, after a fresh computation,
/// [`did_compute`](Self::did_compute) in reverse order. Calls belonging to
/// different concurrent fetches are not serialized against each other, so
/// implementations guard their own state.
///
/// All methods have empty default implementations.
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    /// Called before `key` is computed, with the *parent* context (the chain
    /// does not contain `key` yet).
    ///
    /// Returning `Ok(Some(value))` short-circuits the fetch: no later
    /// interceptor, no computation and no post-hook runs; earlier
    /// interceptors get [`did_short_circuit`](Self::did_short_circuit).
    /// Returning an error fails the fetch.
    async fn will_fetch(
        &self,
        _key: &QueryKey,
        _context: &ExecutionContext,
    ) -> Result<Option<Value>, EngineError> {
        Ok(None)
    }

    /// Called after `key` was freshly computed, with the context of `key`
    /// itself.
    fn did_compute(&self, _key: &QueryKey, _value: &Value, _context: &ExecutionContext) {}

    /// Called when a fetch this interceptor let through (its `will_fetch`
    /// returned `Ok(None)`) ends without a fresh value: the computation
    /// failed, a later interceptor failed, or the fetch was dropped, in which
    /// case `error` is [`EngineError::Cancelled`].
    ///
    /// Runs in reverse pipeline order, exactly once per such fetch. This is
    /// not a post-hook: it exists so that state opened in `will_fetch` is
    /// released on every exit path.
    fn did_fail(&self, _key: &QueryKey, _error: &EngineError) {}

    /// Called when a later interceptor answered a fetch this interceptor let
    /// through, with the value it answered.
    ///
    /// Runs in reverse pipeline order. Like [`did_fail`](Self::did_fail) this
    /// is not a post-hook: it releases state opened in `will_fetch` when no
    /// computation follows.
    fn did_short_circuit(&self, _key: &QueryKey, _value: &Value) {}
}
