use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A per-kind local store keyed by `namespace/name`. Written exclusively by
/// the informer task for its kind; safe for concurrent reads from the
/// reconciliation worker (spec.md §4.4, §5 "single-writer per kind").
///
/// Deliberately its own type per kind rather than a single generic store
/// shared across kinds, per spec.md §9 ("never share the same store type
/// across kinds").
pub struct Store<K> {
    inner: RwLock<HashMap<String, Arc<K>>>,
}

impl<K> Default for Store<K> {
    fn default() -> Self {
        Store {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K> Store<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_by_key(&self, key: &str) -> Option<Arc<K>> {
        self.inner.read().expect("store lock poisoned").get(key).cloned()
    }

    pub fn list(&self) -> Vec<Arc<K>> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Returns the previous value, if any, so callers can classify an
    /// `Applied` watch event as Add vs. Update.
    pub fn insert(&self, key: String, value: Arc<K>) -> Option<Arc<K>> {
        self.inner.write().expect("store lock poisoned").insert(key, value)
    }

    pub fn remove(&self, key: &str) -> Option<Arc<K>> {
        self.inner.write().expect("store lock poisoned").remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.read().expect("store lock poisoned").keys().cloned().collect()
    }
}
