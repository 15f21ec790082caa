//! The composed engine and its builder.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::context::ExecutionContext;
use crate::interceptor::Interceptor;
use crate::key::QueryKey;
use crate::query::{Query, QueryEngine, Value};
use crate::EngineError;

/// Engine that fetches queries through an ordered pipeline of interceptors.
///
/// The pipeline is the only configuration. An empty pipeline recomputes every
/// fetch; the stock interceptors add memoization ([`CacheInterceptor`]),
/// cycle detection ([`CycleInterceptor`]), deduplication of concurrent
/// fetches ([`InFlightInterceptor`]) and dependency tracking
/// ([`ReverseDepsInterceptor`]).
///
/// This is cheap to clone - the pipeline is behind `Arc`.
///
/// # Ordering
///
/// [`CycleInterceptor`] must come before [`InFlightInterceptor`], otherwise a
/// self-dependent query waits on its own ancestor forever. Interceptors that
/// short-circuit with a value, such as [`CacheInterceptor`], are best placed
/// before [`InFlightInterceptor`]; placed after it, a hit still releases the
/// in-flight record and its waiters with the answered value.
///
/// # Example
///
/// ```ignore
/// let cache = Arc::new(CacheInterceptor::new());
/// let engine = ComposedEngine::builder()
///     .interceptor(Arc::new(CycleInterceptor::new()))
///     .interceptor(cache.clone())
///     .interceptor(Arc::new(InFlightInterceptor::new()))
///     .build();
///
/// let total = engine.fetch_root(Total::new()).await?;
/// ```
///
/// [`CacheInterceptor`]: crate::CacheInterceptor
/// [`CycleInterceptor`]: crate::CycleInterceptor
/// [`InFlightInterceptor`]: crate::InFlightInterceptor
/// [`ReverseDepsInterceptor`]: crate::ReverseDepsInterceptor
#[derive(Clone)]
pub struct ComposedEngine {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
}

impl Default for ComposedEngine {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ComposedEngine {
    /// Create an engine running `interceptors` in the given order.
    pub fn new(interceptors: impl IntoIterator<Item = Arc<dyn Interceptor>>) -> Self {
        Self {
            interceptors: interceptors.into_iter().collect(),
        }
    }

    /// Create a builder for assembling the pipeline.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// The configured pipeline, in pre-hook order.
    pub fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.interceptors
    }

    /// Fetch the value of `query` as a child of `context`.
    ///
    /// Runs every pre-hook in order with `context`; the first one returning a
    /// value ends the fetch. Otherwise computes the query with the child
    /// context and runs the post-hooks in reverse order.
    ///
    /// # Errors
    ///
    /// - `EngineError::Cycle` - `query` is already on the call chain
    /// - `EngineError::Computation` - the query (or one of its dependencies) failed
    /// - `EngineError::Cancelled` - an in-flight computation this fetch was
    ///   waiting on was cancelled
    pub async fn fetch<Q: Query>(
        &self,
        query: Q,
        context: &ExecutionContext,
    ) -> Result<Arc<Q::Output>, EngineError> {
        let key = QueryKey::of(&query);
        let child_context = context.child(key.clone());
        let mut guard = ReleaseGuard::new(&self.interceptors, &key);

        trace!(key = %key, depth = context.depth(), "fetch");

        for (index, interceptor) in self.interceptors.iter().enumerate() {
            match interceptor.will_fetch(&key, context).await {
                Ok(Some(value)) => {
                    trace!(key = %key, interceptor = index, "short-circuited");
                    guard.short_circuit(&value);
                    return restore::<Q>(&key, value);
                }
                Ok(None) => guard.entered += 1,
                Err(err) => {
                    guard.release(&err);
                    return Err(err);
                }
            }
        }

        match query.compute(self, &child_context).await {
            Ok(output) => {
                let output = Arc::new(output);
                let value: Value = output.clone();
                guard.disarm();
                for interceptor in self.interceptors.iter().rev() {
                    interceptor.did_compute(&key, &value, &child_context);
                }
                trace!(key = %key, "computed");
                Ok(output)
            }
            Err(err) => {
                debug!(key = %key, error = %err, "computation failed");
                guard.release(&err);
                Err(err)
            }
        }
    }

    /// Fetch `query` from the root context.
    pub async fn fetch_root<Q: Query>(&self, query: Q) -> Result<Arc<Q::Output>, EngineError> {
        self.fetch(query, &ExecutionContext::root()).await
    }

    /// Fetch `query` from the root context on a new Tokio task.
    ///
    /// The returned handle can cancel the fetch; awaiting it yields the
    /// outcome, with cancellation reported as `EngineError::Cancelled`.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn spawn_fetch<Q: Query>(&self, query: Q) -> FetchHandle<Q::Output> {
        let engine = self.clone();
        let handle =
            tokio::spawn(async move { engine.fetch(query, &ExecutionContext::root()).await });
        FetchHandle { handle }
    }
}

#[async_trait]
impl QueryEngine for ComposedEngine {
    async fn fetch<Q: Query>(
        &self,
        query: Q,
        context: &ExecutionContext,
    ) -> Result<Arc<Q::Output>, EngineError> {
        ComposedEngine::fetch(self, query, context).await
    }
}

impl std::fmt::Debug for ComposedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposedEngine")
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

/// Recover the caller's output type from an erased value.
fn restore<Q: Query>(key: &QueryKey, value: Value) -> Result<Arc<Q::Output>, EngineError> {
    value
        .downcast::<Q::Output>()
        .map_err(|_| EngineError::TypeMismatch {
            key: key.debug_repr(),
            expected: std::any::type_name::<Q::Output>(),
        })
}

/// Runs `did_fail` or `did_short_circuit` on the interceptors a fetch already
/// passed through, unless the fetch computes a value.
///
/// Dropping an armed guard means the fetch future was dropped mid-way
/// (cancellation) or is unwinding from a panic.
struct ReleaseGuard<'a> {
    interceptors: &'a [Arc<dyn Interceptor>],
    key: &'a QueryKey,
    entered: usize,
    armed: bool,
}

impl<'a> ReleaseGuard<'a> {
    fn new(interceptors: &'a [Arc<dyn Interceptor>], key: &'a QueryKey) -> Self {
        Self {
            interceptors,
            key,
            entered: 0,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    fn short_circuit(&mut self, value: &Value) {
        self.armed = false;
        for interceptor in self.interceptors[..self.entered].iter().rev() {
            interceptor.did_short_circuit(self.key, value);
        }
    }

    fn release(&mut self, error: &EngineError) {
        self.armed = false;
        for interceptor in self.interceptors[..self.entered].iter().rev() {
            interceptor.did_fail(self.key, error);
        }
    }
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let error = if std::thread::panicking() {
            EngineError::computation(anyhow::anyhow!(
                "computation of {} panicked",
                self.key.debug_repr()
            ))
        } else {
            EngineError::Cancelled
        };
        debug!(key = %self.key, error = %error, "fetch abandoned");
        self.release(&error);
    }
}

/// Handle to a fetch running on its own task.
///
/// Await it for the result, or call [`cancel`](Self::cancel) to abort the
/// fetch at its next suspension point.
pub struct FetchHandle<T> {
    handle: JoinHandle<Result<Arc<T>, EngineError>>,
}

impl<T> FetchHandle<T> {
    /// Cancel the fetch.
    ///
    /// The computation stops at its next `.await`; computations other fetches
    /// were waiting on release those waiters with `EngineError::Cancelled`.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Returns true once the fetch has completed or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> Future for FetchHandle<T> {
    type Output = Result<Arc<T>, EngineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Err(EngineError::Cancelled),
            Err(err) => Err(EngineError::computation(anyhow::anyhow!(
                "fetch task failed: {err}"
            ))),
        })
    }
}

impl<T> std::fmt::Debug for FetchHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchHandle")
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

/// Builder for [`ComposedEngine`].
///
/// Interceptors run in the order they are added.
#[derive(Default)]
pub struct EngineBuilder {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl EngineBuilder {
    /// Create a builder with an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor to the pipeline.
    ///
    /// Keep a clone of the `Arc` to query the interceptor's state later.
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Append several interceptors, preserving their order.
    pub fn interceptors(
        mut self,
        interceptors: impl IntoIterator<Item = Arc<dyn Interceptor>>,
    ) -> Self {
        self.interceptors.extend(interceptors);
        self
    }

    /// Build the engine.
    pub fn build(self) -> ComposedEngine {
        ComposedEngine::new(self.interceptors)
    }
}
