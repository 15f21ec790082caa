//! Key types identifying queries.

use std::any::{Any, TypeId};
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dyn_hash::DynHash;

/// Object-safe equality comparison.
///
/// This trait enables comparing two trait objects for equality
/// by downcasting and comparing the concrete types.
pub trait DynEq: Any {
    /// Compare self with another value for equality.
    ///
    /// Returns `true` if `other` is the same concrete type and equal to `self`.
    fn dyn_eq(&self, other: &dyn Any) -> bool;
}

impl<T: Eq + 'static> DynEq for T {
    fn dyn_eq(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<T>().is_some_and(|o| self == o)
    }
}

/// Trait for values that can serve as query identities.
///
/// Automatically implemented for all types that implement
/// `Hash + Eq + Debug + Send + Sync + 'static`, and object-safe so that
/// `Arc<dyn CacheKey>` can live in hash maps.
pub trait CacheKey: DynHash + DynEq + Debug + Send + Sync {
    /// Get the key as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Get the type name for this key.
    fn type_name(&self) -> &'static str;
}

impl<T: Hash + Eq + Debug + Send + Sync + 'static> CacheKey for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

dyn_hash::hash_trait_object!(CacheKey);

/// Identity of a single computation.
///
/// Combines the concrete query type with the query value itself, so two
/// queries of different types never collide even when their fields are equal.
/// Cloning is cheap: the query value is shared behind an `Arc`.
#[derive(Clone)]
pub struct QueryKey {
    query_type: TypeId,
    key: Arc<dyn CacheKey>,
}

impl QueryKey {
    /// Create a key from a query value.
    pub fn new<Q: CacheKey + 'static>(query: Q) -> Self {
        Self {
            query_type: TypeId::of::<Q>(),
            key: Arc::new(query),
        }
    }

    /// Create a key from a borrowed query, cloning it.
    pub fn of<Q: CacheKey + Clone + 'static>(query: &Q) -> Self {
        Self::new(query.clone())
    }

    /// Get the debug representation of this key.
    pub fn debug_repr(&self) -> String {
        format!("{:?}", self.key)
    }

    /// Downcast the key to its concrete query type.
    pub fn downcast<Q: 'static>(&self) -> Option<&Q> {
        self.key.as_any().downcast_ref()
    }

    /// Returns `true` if this key was built from a query of type `Q`.
    pub fn is<Q: 'static>(&self) -> bool {
        self.query_type == TypeId::of::<Q>()
    }

    /// Get the query type ID.
    pub fn query_type(&self) -> TypeId {
        self.query_type
    }

    /// Get the type name of the query this key was built from.
    pub fn type_name(&self) -> &'static str {
        self.key.type_name()
    }
}

impl Debug for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.key)
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.key)
    }
}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.query_type.hash(state);
        self.key.hash(state);
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.query_type == other.query_type && self.key.dyn_eq(other.key.as_any())
    }
}

impl Eq for QueryKey {}
