//! Suggested repositories, cached per audience

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::model::Repository;
use crate::store::{Store, StoreError};

/// Audience a cached suggestion list was computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Anonymous visitors
    Global,
    ForUser(u64),
}

impl CacheKey {
    pub fn for_user(user_id: Option<u64>) -> Self {
        user_id.map_or(CacheKey::Global, CacheKey::ForUser)
    }

    pub fn user_id(&self) -> Option<u64> {
        match self {
            CacheKey::Global => None,
            CacheKey::ForUser(id) => Some(*id),
        }
    }
}

/// In-process cache with a single TTL applied to every entry
pub struct TypedCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K, V> TypedCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The cached value, unless it has expired
    pub fn get(&self, key: &K) -> Option<V> {
        // A poisoned map still holds whole entries
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|(stored_at, _)| stored_at.elapsed() < self.ttl)
            .map(|(_, value)| value.clone())
    }

    /// Store `value`, dropping every expired entry on the way
    pub fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, (stored_at, _)| stored_at.elapsed() < self.ttl);
        entries.insert(key, (Instant::now(), value));
    }

    /// Number of stored entries, expired ones included until the next insert
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn invalidate(&self, key: &K) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
    }

    /// Return the cached value or compute, store and return a fresh one.
    /// Failed computations are not cached.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: K,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let value = compute()?;
        self.insert(key, value.clone());
        Ok(value)
    }
}

/// Most followed repositories, read through a [`TypedCache`]
pub struct Suggester {
    store: Arc<dyn Store>,
    cache: TypedCache<CacheKey, Vec<Repository>>,
    count: usize,
}

impl Suggester {
    pub fn new(store: Arc<dyn Store>, ttl: Duration, count: usize) -> Self {
        Self {
            store,
            cache: TypedCache::new(ttl),
            count,
        }
    }

    pub fn suggest(&self, key: CacheKey) -> Result<Vec<Repository>, StoreError> {
        self.cache.get_or_try_insert_with(key, || {
            debug!("Computing suggestions for {:?}", key);
            self.store.suggest_repositories(key.user_id(), self.count)
        })
    }

    /// Drop the cached list, e.g. after the user follows something new
    pub fn invalidate(&self, key: CacheKey) {
        self.cache.invalidate(&key);
    }
}
