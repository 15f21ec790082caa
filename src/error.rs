//! Error types for query execution.

use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced by [`fetch`](crate::ComposedEngine::fetch).
///
/// The error is cheap to clone so that every caller coalesced onto one
/// in-flight computation receives the very same failure.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Dependency cycle detected.
    ///
    /// Raised by [`CycleInterceptor`](crate::CycleInterceptor) when the key
    /// being fetched is already on the current call chain. Fatal to the
    /// triggering fetch and to every ancestor above it; never retried.
    #[error(
        "cyclic dependency detected: a query depends on itself, directly or transitively ({key} at depth {depth})"
    )]
    Cycle {
        /// Debug representation of the key that closed the cycle.
        key: String,
        /// Length of the call chain at the point of detection.
        depth: usize,
    },

    /// The fetch was cancelled before it produced a value.
    #[error("query cancelled")]
    Cancelled,

    /// Error raised by a query's own computation, including failures of the
    /// queries it fetched.
    #[error("{0}")]
    Computation(Arc<anyhow::Error>),

    /// A stored value did not have the output type the caller expected.
    ///
    /// Only reachable when two query types share a key, which
    /// [`QueryKey`](crate::QueryKey) rules out by construction.
    #[error("value for {key} is not of type {expected}")]
    TypeMismatch {
        /// Debug representation of the offending key.
        key: String,
        /// Type name the caller asked for.
        expected: &'static str,
    },
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Computation(Arc::new(err))
    }
}

impl EngineError {
    /// Wrap any error as a computation failure.
    pub fn computation(err: impl Into<anyhow::Error>) -> Self {
        EngineError::Computation(Arc::new(err.into()))
    }

    /// Returns `true` for [`EngineError::Cancelled`].
    ///
    /// Callers typically do not report cancellation as a real failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }

    /// Returns `true` for [`EngineError::Cycle`].
    pub fn is_cycle(&self) -> bool {
        matches!(self, EngineError::Cycle { .. })
    }

    /// Returns a reference to the inner computation error, if any.
    pub fn computation_error(&self) -> Option<&Arc<anyhow::Error>> {
        match self {
            EngineError::Computation(e) => Some(e),
            _ => None,
        }
    }

    /// Attempts to downcast a computation error to a specific type.
    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.computation_error().and_then(|e| e.downcast_ref::<E>())
    }
}
