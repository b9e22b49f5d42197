//! Concurrent key-value store for a single resource kind

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// Current wall-clock time in milliseconds since epoch
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Key-value store with a last-modified marker
///
/// Each instance has its own lock, so writers of one resource kind never
/// block readers of another. The last-modified marker lives outside the
/// lock and can be polled without contending with the map.
#[derive(Debug)]
pub struct TypedStore<T> {
    items: RwLock<HashMap<String, T>>,
    last_updated_ms: AtomicI64,
}

impl<T> Default for TypedStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TypedStore<T> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            last_updated_ms: AtomicI64::new(0),
        }
    }

    /// Insert or replace a record
    pub fn set(&self, key: impl Into<String>, value: T) {
        self.items.write().insert(key.into(), value);
        self.touch();
    }

    /// Remove a record; a missing key still counts as activity
    pub fn delete(&self, key: &str) {
        self.items.write().remove(key);
        self.touch();
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Drop every record, e.g. before a full resync
    pub fn clear(&self) {
        *self.items.write() = HashMap::new();
        self.touch();
    }

    /// Last insert/delete time in milliseconds since epoch, 0 if never written
    pub fn last_updated(&self) -> i64 {
        self.last_updated_ms.load(Ordering::Acquire)
    }

    fn touch(&self) {
        // Never move the marker backwards if the wall clock steps back
        self.last_updated_ms.fetch_max(now_millis(), Ordering::AcqRel);
    }
}

impl<T: Clone> TypedStore<T> {
    /// Get a copy of a record
    pub fn get(&self, key: &str) -> Option<T> {
        self.items.read().get(key).cloned()
    }

    /// Copy of the whole map, taken under the read lock
    pub fn snapshot(&self) -> HashMap<String, T> {
        self.items.read().clone()
    }

    /// Copy of all records, in no particular order
    pub fn values(&self) -> Vec<T> {
        self.items.read().values().cloned().collect()
    }
}
