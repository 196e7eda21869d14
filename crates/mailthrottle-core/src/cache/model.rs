//! Cache data models.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted cache entry.
///
/// The TTL is not stored: each reader decides how old an entry may be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// When the entry was written.
    pub cached_at: DateTime<Utc>,
    /// Cached value.
    pub payload: T,
}

/// Which representation of a message an item entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageView {
    /// The complete message. Uses the message TTL.
    #[default]
    Full,
    /// Headers and labels only. Uses the metadata TTL.
    Metadata,
}

/// A cached list-query result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedList<T> {
    /// Query string the list was produced from.
    pub query: String,
    /// Label filters, sorted.
    pub label_ids: Vec<String>,
    /// Listed messages.
    pub messages: Vec<T>,
}

/// Entry counts and disk usage for one identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IdentityStats {
    /// Cached items.
    pub items: usize,
    /// Cached list queries.
    pub lists: usize,
    /// Cached label sets.
    pub label_sets: usize,
    /// Bytes on disk.
    pub size_bytes: u64,
}

impl IdentityStats {
    /// Total entries across all categories.
    #[must_use]
    pub const fn entries(&self) -> usize {
        self.items + self.lists + self.label_sets
    }
}

/// Snapshot of cache contents.
///
/// Best effort: entries deleted while the walk is running are skipped, and
/// stale entries are counted until a read evicts them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Cache root directory.
    pub cache_dir: PathBuf,
    /// Per-identity figures.
    pub identities: BTreeMap<String, IdentityStats>,
    /// Bytes on disk across all identities.
    pub total_size_bytes: u64,
    /// Cached items across all identities.
    pub total_items: usize,
}
