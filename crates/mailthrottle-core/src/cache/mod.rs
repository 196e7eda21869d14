//! Local result cache.
//!
//! Responses are persisted as one JSON file per entry under
//! `<root>/<identity>/<category>/<key>.json`. Freshness is decided by the
//! reader: every [`ResultCache::get`] supplies the TTL it is willing to
//! accept, and entries older than that are deleted on the spot. There is no
//! background sweeper.
//!
//! Writes replace entries atomically (temp file + rename) under one
//! process-wide lock, so reads never take the lock and never observe a
//! partially written entry.

mod config;
mod model;
mod namespace;
mod store;
mod typed;

pub use config::{CACHE_DIR_ENV, CacheConfig};
pub use model::{CacheEntry, CacheStats, CachedList, IdentityStats, MessageView};
pub use namespace::{Category, InvalidationScope, Namespace, list_cache_key};
pub use store::ResultCache;
