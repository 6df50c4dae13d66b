//! Keyed query cache: deduplicated, invalidation-driven reads.

mod cache;
mod key;
mod store;

pub use cache::{QueryCache, QueryError, QueryState, QueryStatus, ReadOptions};
pub use key::{KeyPattern, Qualifier, QueryKey, ResourceKind};
pub use store::{CacheEntry, CacheStore, CachedValue, EntryStatus, MemoryStore};
