//! Cache configuration.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the cache directory.
pub const CACHE_DIR_ENV: &str = "MAILTHROTTLE_CACHE_DIR";

const CACHE_DIR_NAME: &str = "mailthrottle";

/// Configuration for [`super::ResultCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Explicit cache directory. Takes precedence over everything else.
    pub dir: Option<PathBuf>,
    /// Maximum age of a cached full message.
    pub message_ttl: Duration,
    /// Maximum age of cached message metadata.
    pub metadata_ttl: Duration,
    /// Maximum age of a cached list query.
    pub list_ttl: Duration,
    /// Maximum age of a cached label set.
    pub labels_ttl: Duration,
    /// Entries retained per identity and category before the oldest are evicted.
    pub max_entries_per_category: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            message_ttl: Duration::from_secs(24 * 60 * 60),
            metadata_ttl: Duration::from_secs(60 * 60),
            list_ttl: Duration::from_secs(5 * 60),
            labels_ttl: Duration::from_secs(60 * 60),
            max_entries_per_category: 1000,
        }
    }
}

impl CacheConfig {
    /// Creates a configuration rooted at `dir`.
    #[must_use]
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// Sets the full-message TTL.
    #[must_use]
    pub const fn message_ttl(mut self, ttl: Duration) -> Self {
        self.message_ttl = ttl;
        self
    }

    /// Sets the metadata TTL.
    #[must_use]
    pub const fn metadata_ttl(mut self, ttl: Duration) -> Self {
        self.metadata_ttl = ttl;
        self
    }

    /// Sets the list-query TTL.
    #[must_use]
    pub const fn list_ttl(mut self, ttl: Duration) -> Self {
        self.list_ttl = ttl;
        self
    }

    /// Sets the label-set TTL.
    #[must_use]
    pub const fn labels_ttl(mut self, ttl: Duration) -> Self {
        self.labels_ttl = ttl;
        self
    }

    /// Sets the per-category entry ceiling.
    ///
    /// Must be at least 1; [`super::ResultCache::open`] rejects 0.
    #[must_use]
    pub const fn max_entries_per_category(mut self, max: usize) -> Self {
        self.max_entries_per_category = max;
        self
    }

    /// Resolves the cache directory.
    ///
    /// Order: explicit `dir`, then [`CACHE_DIR_ENV`], then the platform
    /// cache directory joined with `mailthrottle`, then `.cache/mailthrottle`
    /// relative to the working directory.
    #[must_use]
    pub fn resolve_dir(&self) -> PathBuf {
        self.resolve_dir_with(|key| std::env::var_os(key))
    }

    /// Resolves the cache directory reading environment variables via `env`.
    pub fn resolve_dir_with<F>(&self, env: F) -> PathBuf
    where
        F: Fn(&str) -> Option<OsString>,
    {
        if let Some(dir) = &self.dir {
            return dir.clone();
        }

        if let Some(dir) = env(CACHE_DIR_ENV).filter(|value| !value.is_empty()) {
            return PathBuf::from(dir);
        }

        dirs::cache_dir().map_or_else(
            || PathBuf::from(".cache").join(CACHE_DIR_NAME),
            |base| base.join(CACHE_DIR_NAME),
        )
    }
}
