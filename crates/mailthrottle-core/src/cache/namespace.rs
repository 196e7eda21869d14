//! Cache key space.

use std::fmt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Length of list-query cache keys, in hex characters.
const LIST_KEY_LEN: usize = 16;

/// Kind of data stored under an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    /// Single messages and threads, keyed by id.
    Item,
    /// List-query results, keyed by [`list_cache_key`].
    ListQuery,
    /// The identity's label set.
    LabelSet,
}

impl Category {
    /// All categories, in directory order.
    pub const ALL: [Self; 3] = [Self::Item, Self::ListQuery, Self::LabelSet];

    /// Returns the directory name used for this category.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Item => "items",
            Self::ListQuery => "lists",
            Self::LabelSet => "labels",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// An identity/category pair addressing one directory of entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    identity: String,
    category: Category,
}

impl Namespace {
    /// Creates a namespace.
    #[must_use]
    pub fn new(identity: impl Into<String>, category: Category) -> Self {
        Self {
            identity: identity.into(),
            category,
        }
    }

    /// Returns the identity.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Returns the category.
    #[must_use]
    pub const fn category(&self) -> Category {
        self.category
    }

    /// Returns the namespace directory under `root`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if the identity is not a safe path segment.
    pub(crate) fn dir(&self, root: &Path) -> Result<PathBuf> {
        validate_segment(&self.identity)?;
        Ok(root.join(&self.identity).join(self.category.dir_name()))
    }

    /// Returns the entry file for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if the identity or key is not a safe path segment.
    pub(crate) fn entry_path(&self, root: &Path, key: &str) -> Result<PathBuf> {
        validate_segment(key)?;
        Ok(self.dir(root)?.join(format!("{key}.json")))
    }
}

/// What an invalidation removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationScope {
    /// One entry.
    Key {
        /// Namespace holding the entry.
        namespace: Namespace,
        /// Entry key.
        key: String,
    },
    /// Every entry of one category for one identity.
    Category(Namespace),
    /// Everything cached for one identity.
    Identity(String),
    /// The whole cache.
    All,
}

/// Builds the cache key of a list query.
///
/// Label filters are sorted before hashing, so `["B", "A"]` and
/// `["A", "B"]` address the same entry.
#[must_use]
pub fn list_cache_key<S: AsRef<str>>(query: &str, label_ids: &[S]) -> String {
    let mut labels: Vec<&str> = label_ids.iter().map(AsRef::as_ref).collect();
    labels.sort_unstable();

    let canonical = serde_json::json!({
        "labels": labels,
        "query": query,
    })
    .to_string();

    let digest = Sha256::digest(canonical.as_bytes());
    let mut key = format!("{digest:x}");
    key.truncate(LIST_KEY_LEN);
    key
}

/// Rejects values that would escape or alias the cache directory layout.
pub(crate) fn validate_segment(value: &str) -> Result<()> {
    if value.is_empty() || value.starts_with('.') || value.contains(['/', '\\', '\0']) {
        return Err(Error::InvalidKey(value.to_owned()));
    }
    Ok(())
}
