//! File-backed result cache.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local, TimeDelta, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::config::CacheConfig;
use super::model::{CacheEntry, CacheStats, IdentityStats};
use super::namespace::{Category, InvalidationScope, Namespace, validate_segment};
use crate::{Error, Result};
use crate::clock::{Clock, SystemClock};

const ENTRY_EXTENSION: &str = "json";

/// Persistent, TTL-checked cache of remote results.
///
/// Share one instance per process behind an [`Arc`]; the write lock only
/// serializes tasks within this process.
#[derive(Debug)]
pub struct ResultCache {
    root: PathBuf,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
    tmp_seq: AtomicU64,
}

impl ResultCache {
    /// Opens the cache, creating its directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the directory
    /// cannot be created or written to.
    pub async fn open(config: CacheConfig) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock)).await
    }

    /// Opens the cache, reading entry ages from `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if the per-category ceiling is zero,
    /// or an error if the directory cannot be created or written to.
    pub async fn open_with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        if config.max_entries_per_category == 0 {
            return Err(Error::Config(
                "max_entries_per_category must be at least 1".into(),
            ));
        }

        let root = config.resolve_dir();
        fs::create_dir_all(&root).await?;

        // Fail at startup rather than on the first write.
        let probe = root.join(format!(".probe-{}", std::process::id()));
        fs::write(&probe, b"").await?;
        fs::remove_file(&probe).await?;

        info!(dir = %root.display(), "Opened result cache");

        Ok(Self {
            root,
            config,
            clock,
            write_lock: Mutex::new(()),
            tmp_seq: AtomicU64::new(0),
        })
    }

    /// Returns the cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the cache configuration.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Reads an entry no older than `ttl`.
    ///
    /// Stale and corrupt entries are deleted and reported as absent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidKey`] for unsafe identities or keys,
    /// [`crate::Error::Serde`] if a well-formed entry does not decode as `T`,
    /// or an I/O error if the entry exists but cannot be read.
    pub async fn get<T: DeserializeOwned>(
        &self,
        namespace: &Namespace,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<T>> {
        let path = namespace.entry_path(&self.root, key)?;

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // Only a malformed envelope is corruption. A payload that does not
        // fit `T` is the reader's mistake and leaves the entry in place.
        let entry: CacheEntry<Value> = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(error) => {
                warn!(path = %path.display(), %error, "Discarding corrupt cache entry");
                self.evict_if_unchanged(&path, &bytes).await;
                return Ok(None);
            }
        };

        let age = self.now_utc() - entry.cached_at;
        if is_stale(age, ttl) {
            debug!(path = %path.display(), age_secs = age.num_seconds(), "Evicting stale cache entry");
            self.evict_if_unchanged(&path, &bytes).await;
            return Ok(None);
        }

        Ok(Some(serde_json::from_value(entry.payload)?))
    }

    /// Writes an entry, replacing any previous one.
    ///
    /// After the write, the namespace is trimmed to the configured ceiling by
    /// deleting its oldest entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unsafe, the payload cannot be
    /// serialized, or the entry cannot be written.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        namespace: &Namespace,
        key: &str,
        payload: &T,
    ) -> Result<()> {
        let path = namespace.entry_path(&self.root, key)?;
        let dir = namespace.dir(&self.root)?;

        let now = self.clock.now();
        let entry = CacheEntry {
            cached_at: now.with_timezone(&Utc),
            payload,
        };
        let bytes = serde_json::to_vec(&entry)?;

        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&dir).await?;

        let tmp = dir.join(format!(
            ".{key}.tmp-{}-{}",
            std::process::id(),
            self.tmp_seq.fetch_add(1, Ordering::Relaxed)
        ));

        if let Err(e) = write_entry(&tmp, &bytes, now).await {
            remove_file_quietly(&tmp).await.ok();
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            remove_file_quietly(&tmp).await.ok();
            return Err(e.into());
        }

        self.enforce_ceiling(&dir).await?;
        Ok(())
    }

    /// Deletes everything under `scope`.
    ///
    /// Invalidating something that is not cached is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the scope names an unsafe identity or key, or
    /// if deletion fails.
    pub async fn invalidate(&self, scope: &InvalidationScope) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        match scope {
            InvalidationScope::Key { namespace, key } => {
                remove_file_quietly(&namespace.entry_path(&self.root, key)?).await?;
            }
            InvalidationScope::Category(namespace) => {
                remove_dir_quietly(&namespace.dir(&self.root)?).await?;
            }
            InvalidationScope::Identity(identity) => {
                validate_segment(identity)?;
                remove_dir_quietly(&self.root.join(identity)).await?;
            }
            InvalidationScope::All => {
                let mut entries = match fs::read_dir(&self.root).await {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        fs::create_dir_all(&self.root).await?;
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                };
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    if entry.file_type().await?.is_dir() {
                        remove_dir_quietly(&path).await?;
                    } else {
                        remove_file_quietly(&path).await?;
                    }
                }
                info!(dir = %self.root.display(), "Cleared result cache");
            }
        }

        debug!(?scope, "Invalidated cache scope");
        Ok(())
    }

    /// Aggregates entry counts and disk usage.
    ///
    /// Pass `Some(identity)` to restrict the walk to one identity. Runs
    /// without the write lock, so figures are best effort while writers are
    /// active.
    ///
    /// # Errors
    ///
    /// Returns an error if `identity` is unsafe or the cache root cannot be listed.
    pub async fn stats(&self, identity: Option<&str>) -> Result<CacheStats> {
        let identities = match identity {
            Some(identity) => {
                validate_segment(identity)?;
                vec![identity.to_owned()]
            }
            None => list_identities(&self.root).await?,
        };

        let mut stats = CacheStats {
            cache_dir: self.root.clone(),
            ..CacheStats::default()
        };

        for identity in identities {
            let identity_dir = self.root.join(&identity);
            if !fs::try_exists(&identity_dir).await.unwrap_or(false) {
                continue;
            }

            let mut figures = IdentityStats::default();
            for category in Category::ALL {
                let entries = list_entries(&identity_dir.join(category.dir_name())).await?;
                let count = entries.len();
                figures.size_bytes += entries.iter().map(|e| e.size).sum::<u64>();
                match category {
                    Category::Item => figures.items = count,
                    Category::ListQuery => figures.lists = count,
                    Category::LabelSet => figures.label_sets = count,
                }
            }

            stats.total_size_bytes += figures.size_bytes;
            stats.total_items += figures.items;
            stats.identities.insert(identity, figures);
        }

        Ok(stats)
    }

    fn now_utc(&self) -> DateTime<Utc> {
        self.clock.now().with_timezone(&Utc)
    }

    /// Deletes `path` if it still holds `expected`.
    ///
    /// A writer may have replaced the entry between our read and the
    /// eviction; a fresh replacement must survive.
    async fn evict_if_unchanged(&self, path: &Path, expected: &[u8]) {
        let _guard = self.write_lock.lock().await;

        match fs::read(path).await {
            Ok(current) if current == expected => {
                if let Err(error) = remove_file_quietly(path).await {
                    warn!(path = %path.display(), %error, "Failed to evict cache entry");
                }
            }
            _ => {}
        }
    }

    /// Deletes the oldest entries of `dir` beyond the configured ceiling.
    /// Caller holds the write lock.
    async fn enforce_ceiling(&self, dir: &Path) -> Result<()> {
        let max = self.config.max_entries_per_category;
        let mut entries = list_entries(dir).await?;
        if entries.len() <= max {
            return Ok(());
        }

        entries.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
        let excess = entries.len() - max;

        for entry in entries.into_iter().take(excess) {
            remove_file_quietly(&entry.path).await?;
        }

        debug!(dir = %dir.display(), evicted = excess, "Enforced cache ceiling");
        Ok(())
    }
}

/// A committed entry file found on disk.
#[derive(Debug)]
struct EntryFile {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

fn is_stale(age: TimeDelta, ttl: Duration) -> bool {
    // A TTL too large for TimeDelta never expires.
    TimeDelta::from_std(ttl).is_ok_and(|ttl| age >= ttl)
}

/// Writes `bytes` to `path` and stamps it with `cached_at` as mtime, so the
/// ceiling evicts in the same order the entries were written.
async fn write_entry(path: &Path, bytes: &[u8], cached_at: DateTime<Local>) -> io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;

    let file = file.into_std().await;
    file.set_modified(SystemTime::from(cached_at))?;
    Ok(())
}

/// Lists committed entries of one namespace directory. Temp files and
/// entries deleted mid-walk are skipped.
async fn list_entries(dir: &Path) -> io::Result<Vec<EntryFile>> {
    let mut read_dir = match fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut entries = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        let is_entry = !entry.file_name().to_string_lossy().starts_with('.')
            && path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION);
        if !is_entry {
            continue;
        }

        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        if !metadata.is_file() {
            continue;
        }

        entries.push(EntryFile {
            path,
            modified: metadata.modified()?,
            size: metadata.len(),
        });
    }

    Ok(entries)
}

async fn list_identities(root: &Path) -> io::Result<Vec<String>> {
    let mut read_dir = match fs::read_dir(root).await {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut identities = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        match entry.file_type().await {
            Ok(file_type) if file_type.is_dir() => identities.push(name),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    identities.sort();
    Ok(identities)
}

async fn remove_file_quietly(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

async fn remove_dir_quietly(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    async fn open(dir: &TempDir) -> (ResultCache, ManualClock) {
        open_with(CacheConfig::with_dir(dir.path())).await
    }

    async fn open_with(config: CacheConfig) -> (ResultCache, ManualClock) {
        let clock = ManualClock::default();
        let cache = ResultCache::open_with_clock(config, Arc::new(clock.clone()))
            .await
            .unwrap();
        (cache, clock)
    }

    fn items(identity: &str) -> Namespace {
        Namespace::new(identity, Category::Item)
    }

    #[tokio::test]
    async fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = open(&dir).await;
        let payload = json!({"id": "m1", "snippet": "héllo wörld"});

        cache.set(&items("work"), "m1", &payload).await.unwrap();
        let read: Option<Value> = cache.get(&items("work"), "m1", HOUR).await.unwrap();

        assert_eq!(read, Some(payload));
    }

    #[tokio::test]
    async fn test_non_ascii_preserved_on_disk() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = open(&dir).await;
        cache.set(&items("work"), "m1", "안녕하세요").await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("work/items/m1.json")).unwrap();
        assert!(raw.contains("안녕하세요"));
    }

    #[tokio::test]
    async fn test_missing_entry_is_absent() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = open(&dir).await;
        let read: Option<Value> = cache.get(&items("work"), "nope", HOUR).await.unwrap();
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn test_stale_entry_evicted() {
        let dir = TempDir::new().unwrap();
        let (cache, clock) = open(&dir).await;
        cache.set(&items("work"), "m1", &json!(1)).await.unwrap();

        clock.advance(TimeDelta::minutes(59));
        let fresh: Option<Value> = cache.get(&items("work"), "m1", HOUR).await.unwrap();
        assert!(fresh.is_some());

        clock.advance(TimeDelta::minutes(1));
        let stale: Option<Value> = cache.get(&items("work"), "m1", HOUR).await.unwrap();
        assert!(stale.is_none());
        assert!(!dir.path().join("work/items/m1.json").exists());
    }

    #[tokio::test]
    async fn test_ttl_is_chosen_by_reader() {
        let dir = TempDir::new().unwrap();
        let (cache, clock) = open(&dir).await;
        cache.set(&items("work"), "m1", &json!(1)).await.unwrap();
        clock.advance(TimeDelta::minutes(30));

        let long: Option<Value> = cache.get(&items("work"), "m1", HOUR).await.unwrap();
        assert!(long.is_some());

        let short: Option<Value> = cache
            .get(&items("work"), "m1", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(short.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_miss_and_removed() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = open(&dir).await;
        let path = dir.path().join("work/items/m1.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{not json").unwrap();

        let read: Option<Value> = cache.get(&items("work"), "m1", HOUR).await.unwrap();
        assert!(read.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_mismatched_type_keeps_entry() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = open(&dir).await;
        let payload = json!({"id": "m1", "labelIds": ["INBOX"]});
        cache.set(&items("work"), "m1", &payload).await.unwrap();

        let err = cache
            .get::<u32>(&items("work"), "m1", HOUR)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Serde(_)));

        let read: Option<Value> = cache.get(&items("work"), "m1", HOUR).await.unwrap();
        assert_eq!(read, Some(payload));
    }

    #[tokio::test]
    async fn test_zero_ceiling_rejected() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig::with_dir(dir.path()).max_entries_per_category(0);

        let err = ResultCache::open(config).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_overwrite_replaces_entry() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = open(&dir).await;
        cache.set(&items("work"), "m1", &json!("old")).await.unwrap();
        cache.set(&items("work"), "m1", &json!("new")).await.unwrap();

        let read: Option<Value> = cache.get(&items("work"), "m1", HOUR).await.unwrap();
        assert_eq!(read, Some(json!("new")));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("work/items"))
            .unwrap()
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn test_ceiling_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig::with_dir(dir.path()).max_entries_per_category(3);
        let (cache, clock) = open_with(config).await;

        for id in ["m1", "m2", "m3", "m4"] {
            cache.set(&items("work"), id, &json!(id)).await.unwrap();
            clock.advance(TimeDelta::seconds(1));
        }

        let m1: Option<Value> = cache.get(&items("work"), "m1", HOUR).await.unwrap();
        assert!(m1.is_none());
        for id in ["m2", "m3", "m4"] {
            let read: Option<Value> = cache.get(&items("work"), id, HOUR).await.unwrap();
            assert_eq!(read, Some(json!(id)));
        }
    }

    #[tokio::test]
    async fn test_ceiling_is_per_category() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig::with_dir(dir.path()).max_entries_per_category(1);
        let (cache, _) = open_with(config).await;

        cache.set(&items("work"), "m1", &json!(1)).await.unwrap();
        cache
            .set(&Namespace::new("work", Category::LabelSet), "labels", &json!([]))
            .await
            .unwrap();
        cache.set(&items("personal"), "m1", &json!(1)).await.unwrap();

        let stats = cache.stats(None).await.unwrap();
        assert_eq!(stats.identities["work"].items, 1);
        assert_eq!(stats.identities["work"].label_sets, 1);
        assert_eq!(stats.identities["personal"].items, 1);
    }

    #[tokio::test]
    async fn test_invalidate_key_twice_is_noop() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = open(&dir).await;
        let scope = InvalidationScope::Key {
            namespace: items("work"),
            key: "m1".into(),
        };

        cache.set(&items("work"), "m1", &json!(1)).await.unwrap();
        cache.set(&items("work"), "m2", &json!(2)).await.unwrap();

        cache.invalidate(&scope).await.unwrap();
        let once = cache.stats(None).await.unwrap();
        cache.invalidate(&scope).await.unwrap();
        let twice = cache.stats(None).await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice.identities["work"].items, 1);
        let m2: Option<Value> = cache.get(&items("work"), "m2", HOUR).await.unwrap();
        assert_eq!(m2, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_invalidate_levels() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = open(&dir).await;
        let lists = Namespace::new("work", Category::ListQuery);
        cache.set(&items("work"), "m1", &json!(1)).await.unwrap();
        cache.set(&items("work"), "m2", &json!(2)).await.unwrap();
        cache.set(&lists, "q1", &json!([])).await.unwrap();
        cache.set(&items("personal"), "m1", &json!(1)).await.unwrap();

        cache
            .invalidate(&InvalidationScope::Key {
                namespace: items("work"),
                key: "m1".into(),
            })
            .await
            .unwrap();
        assert_eq!(cache.stats(Some("work")).await.unwrap().total_items, 1);

        cache
            .invalidate(&InvalidationScope::Category(lists.clone()))
            .await
            .unwrap();
        let read: Option<Value> = cache.get(&lists, "q1", HOUR).await.unwrap();
        assert!(read.is_none());
        let m2: Option<Value> = cache.get(&items("work"), "m2", HOUR).await.unwrap();
        assert!(m2.is_some());

        cache
            .invalidate(&InvalidationScope::Identity("work".into()))
            .await
            .unwrap();
        assert!(!dir.path().join("work").exists());
        assert!(dir.path().join("personal").exists());

        cache.invalidate(&InvalidationScope::All).await.unwrap();
        assert!(dir.path().exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = open(&dir).await;
        cache.set(&items("work"), "m1", &json!(1)).await.unwrap();
        cache.set(&items("work"), "m2", &json!(2)).await.unwrap();
        cache
            .set(&Namespace::new("work", Category::ListQuery), "q", &json!([]))
            .await
            .unwrap();
        cache.set(&items("personal"), "m9", &json!(9)).await.unwrap();

        let all = cache.stats(None).await.unwrap();
        assert_eq!(all.cache_dir, dir.path());
        assert_eq!(all.identities.len(), 2);
        assert_eq!(all.total_items, 3);
        assert_eq!(all.identities["work"].lists, 1);
        assert!(all.total_size_bytes > 0);

        let one = cache.stats(Some("personal")).await.unwrap();
        assert_eq!(one.identities.len(), 1);
        assert_eq!(one.total_items, 1);

        let none = cache.stats(Some("nobody")).await.unwrap();
        assert!(none.identities.is_empty());
    }

    #[tokio::test]
    async fn test_unsafe_key_rejected() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = open(&dir).await;

        let err = cache.set(&items("work"), "../escape", &json!(1)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidKey(_)));

        let err = cache
            .invalidate(&InvalidationScope::Identity("..".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidKey(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_leave_valid_entry() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = open(&dir).await;
        let cache = Arc::new(cache);

        let mut handles = Vec::new();
        for n in 0..16 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.set(&items("work"), "shared", &json!(n)).await.unwrap();
                let read: Option<Value> = cache.get(&items("work"), "shared", HOUR).await.unwrap();
                assert!(read.is_some());
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let read: Option<Value> = cache.get(&items("work"), "shared", HOUR).await.unwrap();
        assert!(read.unwrap().is_number());
    }
}
