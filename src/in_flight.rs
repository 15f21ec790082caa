//! Deduplication of concurrent fetches of the same key.

use std::collections::hash_map::Entry;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::context::ExecutionContext;
use crate::interceptor::Interceptor;
use crate::key::{CacheKey, QueryKey};
use crate::query::Value;
use crate::EngineError;

type Outcome = Result<Value, EngineError>;

/// Callers waiting for the computation currently running for one key, in
/// arrival order.
type Waiters = Vec<oneshot::Sender<Outcome>>;

/// Interceptor coalescing overlapping fetches of one key into a single
/// computation.
///
/// The first fetch of a key opens a record and computes; fetches arriving
/// while the record exists wait and receive the same value or the same
/// failure. The record is closed when that computation ends, so a later,
/// non-overlapping fetch computes again unless an earlier interceptor (such
/// as a cache) answers it.
///
/// A waiting fetch that is itself dropped only stops listening; the
/// computation carries on for the remaining waiters.
///
/// Place it after [`CycleInterceptor`](crate::CycleInterceptor). If a later
/// interceptor answers the fetch instead of a computation, the record is
/// closed with that answer.
#[derive(Default)]
pub struct InFlightInterceptor {
    in_flight: Mutex<ahash::HashMap<QueryKey, Waiters>>,
}

impl InFlightInterceptor {
    /// Create an interceptor with no computation in flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while a computation for `key` is running.
    pub fn is_in_flight(&self, key: &QueryKey) -> bool {
        self.in_flight.lock().contains_key(key)
    }

    /// Returns true while a computation for `query` is running.
    pub fn is_query_in_flight<Q: CacheKey + Clone>(&self, query: &Q) -> bool {
        self.is_in_flight(&QueryKey::of(query))
    }

    /// Number of keys with a running computation.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Number of fetches waiting on the computation for `key`.
    pub fn waiter_count(&self, key: &QueryKey) -> usize {
        self.in_flight.lock().get(key).map_or(0, Vec::len)
    }

    /// Close the record for `key` and hand `outcome` to every waiter, oldest
    /// first.
    fn release(&self, key: &QueryKey, outcome: Outcome) {
        let Some(waiters) = self.in_flight.lock().remove(key) else {
            return;
        };
        if !waiters.is_empty() {
            debug!(key = %key, waiters = waiters.len(), ok = outcome.is_ok(), "releasing waiters");
        }
        for waiter in waiters {
            // A closed receiver belongs to a waiter that was cancelled.
            let _ = waiter.send(outcome.clone());
        }
    }
}

#[async_trait]
impl Interceptor for InFlightInterceptor {
    async fn will_fetch(
        &self,
        key: &QueryKey,
        _context: &ExecutionContext,
    ) -> Result<Option<Value>, EngineError> {
        let receiver = {
            let mut in_flight = self.in_flight.lock();
            let receiver = match in_flight.entry(key.clone()) {
                Entry::Occupied(mut entry) => {
                    let (sender, receiver) = oneshot::channel();
                    entry.get_mut().push(sender);
                    receiver
                }
                Entry::Vacant(entry) => {
                    entry.insert(Vec::new());
                    trace!(key = %key, "in-flight record opened");
                    return Ok(None);
                }
            };
            receiver
        };

        debug!(key = %key, "joining in-flight computation");
        match receiver.await {
            Ok(outcome) => outcome.map(Some),
            // The owner drops senders only through `release`, which sends first.
            Err(_) => Err(EngineError::Cancelled),
        }
    }

    fn did_compute(&self, key: &QueryKey, value: &Value, _context: &ExecutionContext) {
        self.release(key, Ok(value.clone()));
    }

    fn did_fail(&self, key: &QueryKey, error: &EngineError) {
        self.release(key, Err(error.clone()));
    }

    fn did_short_circuit(&self, key: &QueryKey, value: &Value) {
        self.release(key, Ok(value.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Slow(u32);

    #[tokio::test]
    async fn test_first_fetch_opens_record() {
        let in_flight = InFlightInterceptor::new();
        let key = QueryKey::new(Slow(1));
        let root = ExecutionContext::root();

        assert!(in_flight.will_fetch(&key, &root).await.unwrap().is_none());
        assert!(in_flight.is_in_flight(&key));
        assert_eq!(in_flight.in_flight_count(), 1);

        in_flight.did_compute(&key, &(Arc::new(5u32) as Value), &root);
        assert!(!in_flight.is_query_in_flight(&Slow(1)));
    }

    #[tokio::test]
    async fn test_waiters_receive_value() {
        let in_flight = Arc::new(InFlightInterceptor::new());
        let key = QueryKey::new(Slow(1));
        let root = ExecutionContext::root();
        assert!(in_flight.will_fetch(&key, &root).await.unwrap().is_none());

        let waiter = {
            let in_flight = in_flight.clone();
            let key = key.clone();
            tokio::spawn(async move {
                in_flight
                    .will_fetch(&key, &ExecutionContext::root())
                    .await
            })
        };
        while in_flight.waiter_count(&key) == 0 {
            tokio::task::yield_now().await;
        }

        in_flight.did_compute(&key, &(Arc::new(5u32) as Value), &root);

        let value = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(value.downcast_ref::<u32>(), Some(&5));
    }

    #[tokio::test]
    async fn test_waiters_receive_failure() {
        let in_flight = Arc::new(InFlightInterceptor::new());
        let key = QueryKey::new(Slow(2));
        let root = ExecutionContext::root();
        assert!(in_flight.will_fetch(&key, &root).await.unwrap().is_none());

        let waiter = {
            let in_flight = in_flight.clone();
            let key = key.clone();
            tokio::spawn(async move {
                in_flight
                    .will_fetch(&key, &ExecutionContext::root())
                    .await
            })
        };
        while in_flight.waiter_count(&key) == 0 {
            tokio::task::yield_now().await;
        }

        in_flight.did_fail(&key, &anyhow::anyhow!("disk on fire").into());

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "disk on fire");
        assert_eq!(in_flight.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_block_release() {
        let in_flight = Arc::new(InFlightInterceptor::new());
        let key = QueryKey::new(Slow(3));
        let root = ExecutionContext::root();
        assert!(in_flight.will_fetch(&key, &root).await.unwrap().is_none());

        let waiter = {
            let in_flight = in_flight.clone();
            let key = key.clone();
            tokio::spawn(async move {
                in_flight
                    .will_fetch(&key, &ExecutionContext::root())
                    .await
            })
        };
        while in_flight.waiter_count(&key) == 0 {
            tokio::task::yield_now().await;
        }
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());

        in_flight.did_compute(&key, &(Arc::new(1u32) as Value), &root);
        assert!(!in_flight.is_in_flight(&key));
    }

    #[tokio::test]
    async fn test_waiters_released_in_arrival_order() {
        let in_flight = Arc::new(InFlightInterceptor::new());
        let key = QueryKey::new(Slow(4));
        let root = ExecutionContext::root();
        assert!(in_flight.will_fetch(&key, &root).await.unwrap().is_none());

        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut waiters = Vec::new();
        for i in 0..5 {
            let task_in_flight = in_flight.clone();
            let task_key = key.clone();
            let order = order.clone();
            waiters.push(tokio::spawn(async move {
                let value = task_in_flight
                    .will_fetch(&task_key, &ExecutionContext::root())
                    .await
                    .unwrap()
                    .unwrap();
                order.lock().push(i);
                value
            }));
            while in_flight.waiter_count(&key) < i + 1 {
                tokio::task::yield_now().await;
            }
        }

        in_flight.did_compute(&key, &(Arc::new(9u32) as Value), &root);

        for waiter in waiters {
            let value = waiter.await.unwrap();
            assert_eq!(value.downcast_ref::<u32>(), Some(&9));
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_short_circuit_closes_record() {
        let in_flight = InFlightInterceptor::new();
        let key = QueryKey::new(Slow(5));
        in_flight.in_flight.lock().insert(key.clone(), Vec::new());

        in_flight.did_short_circuit(&key, &(Arc::new(3u32) as Value));

        assert!(!in_flight.is_in_flight(&key));
    }
}
