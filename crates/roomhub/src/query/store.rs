use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;

use super::key::QueryKey;
use crate::api::ApiError;

/// Type-erased cached value; readers downcast back to the type they asked for.
pub type CachedValue = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    Ready,
    Error,
}

/// One row of the cache table. `value` is only present while `Ready` and
/// `error` only while `Error`.
#[derive(Clone)]
pub struct CacheEntry {
    key: QueryKey,
    status: EntryStatus,
    value: Option<CachedValue>,
    error: Option<ApiError>,
    fetch_started_at: Instant,
    fetch_id: u64,
}

impl CacheEntry {
    pub(crate) fn pending(key: QueryKey, fetch_id: u64, fetch_started_at: Instant) -> Self {
        Self {
            key,
            status: EntryStatus::Pending,
            value: None,
            error: None,
            fetch_started_at,
            fetch_id,
        }
    }

    pub(crate) fn settle(&mut self, outcome: &Result<CachedValue, ApiError>) {
        match outcome {
            Ok(value) => {
                self.status = EntryStatus::Ready;
                self.value = Some(value.clone());
                self.error = None;
            }
            Err(err) => {
                self.status = EntryStatus::Error;
                self.value = None;
                self.error = Some(err.clone());
            }
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn status(&self) -> EntryStatus {
        self.status
    }

    pub fn value(&self) -> Option<&CachedValue> {
        self.value.as_ref()
    }

    pub fn error(&self) -> Option<&ApiError> {
        self.error.as_ref()
    }

    pub fn fetch_started_at(&self) -> Instant {
        self.fetch_started_at
    }

    pub(crate) fn fetch_id(&self) -> u64 {
        self.fetch_id
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("status", &self.status)
            .field("has_value", &self.value.is_some())
            .field("error", &self.error)
            .field("fetch_id", &self.fetch_id)
            .finish()
    }
}

/// Backing table for [`super::QueryCache`]. Swappable so embedders can
/// observe or bound what the cache holds.
pub trait CacheStore: Send {
    fn get(&self, key: &QueryKey) -> Option<&CacheEntry>;
    fn get_mut(&mut self, key: &QueryKey) -> Option<&mut CacheEntry>;
    fn insert(&mut self, entry: CacheEntry);
    fn remove(&mut self, key: &QueryKey) -> Option<CacheEntry>;
    fn keys(&self) -> Vec<QueryKey>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Default process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<QueryKey, CacheEntry>,
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &QueryKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    fn get_mut(&mut self, key: &QueryKey) -> Option<&mut CacheEntry> {
        self.entries.get_mut(key)
    }

    fn insert(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.key.clone(), entry);
    }

    fn remove(&mut self, key: &QueryKey) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    fn keys(&self) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
