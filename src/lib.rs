//! Query-Pipeline: an async incremental query engine built from interceptors.
//!
//! A [`Query`] is a value that is also its own key. Fetching it through a
//! [`ComposedEngine`] runs an ordered pipeline of [`Interceptor`]s around the
//! computation; everything beyond "compute the value" lives in interceptors.
//!
//! # Stock interceptors
//!
//! - [`CacheInterceptor`] - memoizes computed values, evicted explicitly
//! - [`CycleInterceptor`] - fails a fetch whose key is already on its own call chain
//! - [`InFlightInterceptor`] - coalesces overlapping fetches of one key
//! - [`ReverseDepsInterceptor`] - records who fetched what, for invalidation
//! - [`TrackingInterceptor`] - records which keys reached it
//!
//! The recommended order is cycle, reverse dependencies, cache, in-flight.
//! A cache hit ends the fetch before later interceptors run, so a
//! [`ReverseDepsInterceptor`] placed after the cache records no edge for
//! fetches the cache answered.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use query_pipeline::{
//!     async_trait, CacheInterceptor, ComposedEngine, CycleInterceptor, EngineError,
//!     ExecutionContext, Query, QueryEngine,
//! };
//!
//! #[derive(Clone, Debug, Hash, PartialEq, Eq)]
//! struct Add(i64, i64);
//!
//! #[async_trait]
//! impl Query for Add {
//!     type Output = i64;
//!
//!     async fn compute<E: QueryEngine>(
//!         &self,
//!         _engine: &E,
//!         _context: &ExecutionContext,
//!     ) -> Result<i64, EngineError> {
//!         Ok(self.0 + self.1)
//!     }
//! }
//!
//! let cache = Arc::new(CacheInterceptor::new());
//! let engine = ComposedEngine::builder()
//!     .interceptor(Arc::new(CycleInterceptor::new()))
//!     .interceptor(cache.clone())
//!     .build();
//!
//! assert_eq!(*engine.fetch_root(Add(1, 2)).await?, 3);
//! assert!(cache.is_query_cached(&Add(1, 2)));
//! ```
//!
//! # Invalidation
//!
//! Nothing expires by itself. When an input changes, ask
//! [`ReverseDepsInterceptor::invalidate`] for the affected keys and evict each
//! of them with [`CacheInterceptor::clear_key`]; the next fetch recomputes.
#![deny(missing_docs)]

mod cache;
mod context;
mod cycle;
mod engine;
mod error;
mod in_flight;
mod interceptor;
mod key;
mod query;
mod reverse_deps;
mod tracking;

pub use async_trait::async_trait;
pub use cache::CacheInterceptor;
pub use context::ExecutionContext;
pub use cycle::CycleInterceptor;
pub use engine::{ComposedEngine, EngineBuilder, FetchHandle};
pub use error::EngineError;
pub use in_flight::InFlightInterceptor;
pub use interceptor::Interceptor;
pub use key::{CacheKey, DynEq, QueryKey};
pub use query::{Query, QueryEngine, Value};
pub use reverse_deps::{KeySet, ReverseDepsInterceptor};
pub use tracking::TrackingInterceptor;
