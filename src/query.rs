//! Query and engine trait definitions.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::key::CacheKey;
use crate::EngineError;

/// Type-erased query output as stored by interceptors.
///
/// The engine restores the concrete `Arc<Q::Output>` at fetch time from the
/// caller's static type; interceptors never inspect the value.
pub type Value = Arc<dyn Any + Send + Sync>;

/// A unit of computation fetched through a [`QueryEngine`].
///
/// Each query:
/// - Is itself the key (implements `Hash + Eq`), so two equal query values
///   denote the same computation
/// - Produces exactly one output type
/// - Can depend on other queries via `engine.fetch(other, context)`
///
/// # Purity
///
/// `compute` must be deterministic for a fixed key. Memoization, in-flight
/// deduplication and invalidation all rely on it; the engine cannot check it.
///
/// # Example
///
/// ```ignore
/// use query_pipeline::{async_trait, EngineError, ExecutionContext, Query, QueryEngine};
///
/// #[derive(Clone, Debug, Hash, PartialEq, Eq)]
/// struct Total { cells: Vec<Cell> }
///
/// #[async_trait]
/// impl Query for Total {
///     type Output = i64;
///
///     async fn compute<E: QueryEngine>(
///         &self,
///         engine: &E,
///         context: &ExecutionContext,
///     ) -> Result<i64, EngineError> {
///         let mut sum = 0;
///         for cell in &self.cells {
///             sum += *engine.fetch(cell.clone(), context).await?;
///         }
///         Ok(sum)
///     }
/// }
/// ```
#[async_trait]
pub trait Query: CacheKey + Clone + Send + Sync + 'static {
    /// The output type of this query.
    type Output: Send + Sync + 'static;

    /// Compute the output, fetching dependencies through `engine`.
    ///
    /// `context` is the context of this very query: pass it unchanged to
    /// every nested `fetch`, including concurrent ones.
    async fn compute<E: QueryEngine>(
        &self,
        engine: &E,
        context: &ExecutionContext,
    ) -> Result<Self::Output, EngineError>;
}

/// Something that can fetch query values.
///
/// Implemented by [`ComposedEngine`](crate::ComposedEngine); queries are
/// written against this trait so they do not depend on a concrete engine.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Fetch the value of `query` as a child of `context`.
    async fn fetch<Q: Query>(
        &self,
        query: Q,
        context: &ExecutionContext,
    ) -> Result<Arc<Q::Output>, EngineError>;
}
