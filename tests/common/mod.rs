//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use query_pipeline::{async_trait, EngineError, ExecutionContext, Query, QueryEngine, QueryKey};

/// Install a test-friendly subscriber once; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Shared computation counter that can live inside a query key.
///
/// Two counters are equal only if they are the same counter, so queries
/// created by different tests never share cache entries.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the new count.
    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl PartialEq for Counter {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Counter {}

impl Hash for Counter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Counter({:p})", Arc::as_ptr(&self.0))
    }
}

// ============================================================================
// Diamond spreadsheet: D = B + C, B = A + 20, C = A + 30, A = 10
// ============================================================================

/// Per-cell evaluation counts shared by every cell of one sheet.
#[derive(Clone, Default)]
pub struct Evals(Arc<Mutex<HashMap<&'static str, usize>>>);

impl Evals {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, name: &'static str) {
        *self.0.lock().entry(name).or_default() += 1;
    }

    /// How many times cell `name` was computed.
    pub fn of(&self, name: &str) -> usize {
        self.0.lock().get(name).copied().unwrap_or(0)
    }
}

impl PartialEq for Evals {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Evals {}

impl Hash for Evals {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl std::fmt::Debug for Evals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Evals({:p})", Arc::as_ptr(&self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cell {
    pub name: &'static str,
    pub evals: Evals,
}

impl Cell {
    pub fn new(name: &'static str, evals: &Evals) -> Self {
        Self {
            name,
            evals: evals.clone(),
        }
    }

    pub fn key(name: &'static str, evals: &Evals) -> QueryKey {
        QueryKey::new(Self::new(name, evals))
    }
}

#[async_trait]
impl Query for Cell {
    type Output = i64;

    async fn compute<E: QueryEngine>(
        &self,
        engine: &E,
        context: &ExecutionContext,
    ) -> Result<i64, EngineError> {
        self.evals.record(self.name);
        let cell = |name: &'static str| Cell::new(name, &self.evals);
        match self.name {
            "A" => Ok(10),
            "B" => Ok(*engine.fetch(cell("A"), context).await? + 20),
            "C" => Ok(*engine.fetch(cell("A"), context).await? + 30),
            "D" => {
                let b = engine.fetch(cell("B"), context).await?;
                let c = engine.fetch(cell("C"), context).await?;
                Ok(*b + *c)
            }
            other => Err(anyhow::anyhow!("unknown cell {other}").into()),
        }
    }
}
