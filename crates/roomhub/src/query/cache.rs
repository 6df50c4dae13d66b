use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tracing::{debug, info};

use super::key::{KeyPattern, QueryKey};
use super::store::{CacheEntry, CacheStore, CachedValue, EntryStatus, MemoryStore};
use crate::api::ApiError;

type SharedFetch = Shared<BoxFuture<'static, Result<CachedValue, ApiError>>>;

/// Per-read knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// `false` suppresses fetching entirely; the read reports `Idle`.
    pub enabled: bool,
    /// Settled entries older than this are refetched. `None` never expires.
    pub stale_after: Option<Duration>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_after: None,
        }
    }
}

impl ReadOptions {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn stale_after(mut self, stale_after: Option<Duration>) -> Self {
        self.stale_after = stale_after;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Idle,
    Pending,
    Ready,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("cached value for {key} is not a {expected}")]
    TypeMismatch { key: QueryKey, expected: &'static str },
}

/// What a caller observes for one key.
#[derive(Debug)]
pub enum QueryState<T> {
    Idle,
    Pending,
    Ready(Arc<T>),
    Error(QueryError),
}

impl<T> Clone for QueryState<T> {
    fn clone(&self) -> Self {
        match self {
            QueryState::Idle => QueryState::Idle,
            QueryState::Pending => QueryState::Pending,
            QueryState::Ready(value) => QueryState::Ready(Arc::clone(value)),
            QueryState::Error(err) => QueryState::Error(err.clone()),
        }
    }
}

impl<T> QueryState<T> {
    pub fn status(&self) -> QueryStatus {
        match self {
            QueryState::Idle => QueryStatus::Idle,
            QueryState::Pending => QueryStatus::Pending,
            QueryState::Ready(_) => QueryStatus::Ready,
            QueryState::Error(_) => QueryStatus::Error,
        }
    }

    pub fn value(&self) -> Option<&Arc<T>> {
        match self {
            QueryState::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&QueryError> {
        match self {
            QueryState::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn into_result(self) -> Option<Result<Arc<T>, QueryError>> {
        match self {
            QueryState::Ready(value) => Some(Ok(value)),
            QueryState::Error(err) => Some(Err(err)),
            QueryState::Idle | QueryState::Pending => None,
        }
    }
}

struct InFlight {
    fetch_id: u64,
    future: SharedFetch,
}

struct CacheTable {
    store: Box<dyn CacheStore>,
    in_flight: HashMap<QueryKey, InFlight>,
    next_fetch_id: u64,
}

enum Lookup {
    Settled(CacheEntry),
    InFlight(SharedFetch),
    Missing,
}

impl CacheTable {
    fn lookup(&self, key: &QueryKey, stale_after: Option<Duration>, now: Instant) -> Lookup {
        let Some(entry) = self.store.get(key) else {
            return Lookup::Missing;
        };

        match entry.status() {
            EntryStatus::Pending => match self.in_flight.get(key) {
                Some(flight) if flight.fetch_id == entry.fetch_id() => {
                    Lookup::InFlight(flight.future.clone())
                }
                _ => Lookup::Missing,
            },
            EntryStatus::Ready | EntryStatus::Error => {
                let stale = stale_after
                    .map(|limit| now.saturating_duration_since(entry.fetch_started_at()) >= limit)
                    .unwrap_or(false);
                if stale {
                    Lookup::Missing
                } else {
                    Lookup::Settled(entry.clone())
                }
            }
        }
    }
}

/// Keyed cache for idempotent reads with request coalescing.
///
/// Cloning is cheap and every clone shares one table. The table lock is never
/// held across an await, and the pending entry is recorded before the first
/// suspension, so callers racing on one key always meet the same fetch.
#[derive(Clone)]
pub struct QueryCache {
    table: Arc<Mutex<CacheTable>>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        Self::with_store(Box::<MemoryStore>::default())
    }

    pub fn with_store(store: Box<dyn CacheStore>) -> Self {
        Self {
            table: Arc::new(Mutex::new(CacheTable {
                store,
                in_flight: HashMap::new(),
                next_fetch_id: 1,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheTable> {
        self.table.lock().expect("query cache mutex poisoned")
    }

    /// Serve `key` from the table, attach to its in-flight fetch, or start a
    /// new one with `fetcher`.
    pub async fn read<T, F, Fut>(
        &self,
        key: QueryKey,
        options: ReadOptions,
        fetcher: F,
    ) -> QueryState<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        if !options.enabled {
            return QueryState::Idle;
        }

        let fetch = {
            let mut table = self.lock();
            match table.lookup(&key, options.stale_after, Instant::now()) {
                Lookup::Settled(entry) => return entry_state(&entry),
                Lookup::InFlight(fetch) => {
                    debug!(%key, "attached to in-flight fetch");
                    fetch
                }
                Lookup::Missing => self.start_fetch(&mut table, key.clone(), fetcher),
            }
        };

        outcome_state(&key, fetch.await)
    }

    /// Start a new fetch cycle for `key` unless one is already in flight.
    pub async fn refetch<T, F, Fut>(&self, key: QueryKey, fetcher: F) -> QueryState<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let fetch = {
            let mut table = self.lock();
            match table.lookup(&key, Some(Duration::ZERO), Instant::now()) {
                Lookup::InFlight(fetch) => fetch,
                Lookup::Settled(_) | Lookup::Missing => {
                    self.start_fetch(&mut table, key.clone(), fetcher)
                }
            }
        };

        outcome_state(&key, fetch.await)
    }

    fn start_fetch<T, F, Fut>(
        &self,
        table: &mut CacheTable,
        key: QueryKey,
        fetcher: F,
    ) -> SharedFetch
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let fetch_id = table.next_fetch_id;
        table.next_fetch_id += 1;

        let weak = Arc::downgrade(&self.table);
        let settle_key = key.clone();
        let future = async move {
            let outcome = fetcher()
                .await
                .map(|value| Arc::new(value) as CachedValue);
            settle(&weak, &settle_key, fetch_id, &outcome);
            outcome
        }
        .boxed()
        .shared();

        debug!(%key, fetch_id, "starting fetch");
        table
            .store
            .insert(CacheEntry::pending(key.clone(), fetch_id, Instant::now()));
        table.in_flight.insert(
            key,
            InFlight {
                fetch_id,
                future: future.clone(),
            },
        );
        future
    }

    /// Current state without fetching.
    pub fn peek<T: Send + Sync + 'static>(&self, key: &QueryKey) -> QueryState<T> {
        let table = self.lock();
        match table.store.get(key) {
            None => QueryState::Idle,
            Some(entry) => entry_state(entry),
        }
    }

    pub fn status(&self, key: &QueryKey) -> Option<EntryStatus> {
        self.lock().store.get(key).map(CacheEntry::status)
    }

    /// Drop every entry selected by `pattern`; the next read refetches.
    pub fn invalidate(&self, pattern: &KeyPattern) -> usize {
        let removed = self.invalidate_where(|key| pattern.matches(key));
        info!(%pattern, removed, "invalidated cache entries");
        removed
    }

    pub fn invalidate_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&QueryKey) -> bool,
    {
        let mut table = self.lock();
        let doomed: Vec<QueryKey> = table
            .store
            .keys()
            .into_iter()
            .filter(|key| predicate(key))
            .collect();
        for key in &doomed {
            table.store.remove(key);
        }
        table.in_flight.retain(|key, _| !predicate(key));
        doomed.len()
    }

    pub fn len(&self) -> usize {
        self.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        self.lock().store.keys()
    }
}

fn settle(
    table: &Weak<Mutex<CacheTable>>,
    key: &QueryKey,
    fetch_id: u64,
    outcome: &Result<CachedValue, ApiError>,
) {
    let Some(table) = table.upgrade() else {
        return;
    };
    let mut table = table.lock().expect("query cache mutex poisoned");

    if table
        .in_flight
        .get(key)
        .is_some_and(|flight| flight.fetch_id == fetch_id)
    {
        table.in_flight.remove(key);
    }

    match table.store.get_mut(key) {
        Some(entry) if entry.fetch_id() == fetch_id => {
            entry.settle(outcome);
            debug!(%key, fetch_id, ok = outcome.is_ok(), "fetch settled");
        }
        _ => debug!(%key, fetch_id, "fetch settled after invalidation; result not cached"),
    }
}

fn entry_state<T: Send + Sync + 'static>(entry: &CacheEntry) -> QueryState<T> {
    match entry.status() {
        EntryStatus::Pending => QueryState::Pending,
        EntryStatus::Ready => match entry.value() {
            Some(value) => downcast(entry.key(), value.clone()),
            None => QueryState::Pending,
        },
        EntryStatus::Error => match entry.error() {
            Some(err) => QueryState::Error(QueryError::Api(err.clone())),
            None => QueryState::Pending,
        },
    }
}

fn outcome_state<T: Send + Sync + 'static>(
    key: &QueryKey,
    outcome: Result<CachedValue, ApiError>,
) -> QueryState<T> {
    match outcome {
        Ok(value) => downcast(key, value),
        Err(err) => QueryState::Error(QueryError::Api(err)),
    }
}

fn downcast<T: Send + Sync + 'static>(key: &QueryKey, value: CachedValue) -> QueryState<T> {
    match value.downcast::<T>() {
        Ok(value) => QueryState::Ready(value),
        Err(_) => QueryState::Error(QueryError::TypeMismatch {
            key: key.clone(),
            expected: std::any::type_name::<T>(),
        }),
    }
}
