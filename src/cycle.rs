//! Cycle detection interceptor.

use async_trait::async_trait;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::interceptor::Interceptor;
use crate::key::QueryKey;
use crate::query::Value;
use crate::EngineError;

/// Interceptor failing any fetch whose key is already on its own call chain.
///
/// Holds no state: chain membership lives in the [`ExecutionContext`] of each
/// fetch, so two unrelated concurrent fetches of the same key never see each
/// other as a cycle.
///
/// Place it before [`InFlightInterceptor`](crate::InFlightInterceptor).
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleInterceptor;

impl CycleInterceptor {
    /// Create a cycle detector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Interceptor for CycleInterceptor {
    async fn will_fetch(
        &self,
        key: &QueryKey,
        context: &ExecutionContext,
    ) -> Result<Option<Value>, EngineError> {
        // `context` is the parent's: `key` is only present if an ancestor is `key`.
        if context.contains(key) {
            debug!(key = %key, depth = context.depth(), "cycle detected");
            return Err(EngineError::Cycle {
                key: key.debug_repr(),
                depth: context.depth(),
            });
        }
        Ok(None)
    }
}
