//! Typed accessors for messages, list queries and label sets.

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::model::{CachedList, MessageView};
use super::namespace::{Category, InvalidationScope, Namespace, list_cache_key};
use super::store::ResultCache;
use crate::Result;

const LABELS_KEY: &str = "labels";

impl ResultCache {
    /// Reads a cached message.
    ///
    /// Full and metadata reads share one entry; `view` only selects which
    /// TTL the entry must satisfy.
    ///
    /// # Errors
    ///
    /// See [`ResultCache::get`].
    pub async fn get_message<T: DeserializeOwned>(
        &self,
        identity: &str,
        message_id: &str,
        view: MessageView,
    ) -> Result<Option<T>> {
        let ttl = match view {
            MessageView::Full => self.config().message_ttl,
            MessageView::Metadata => self.config().metadata_ttl,
        };
        self.get(&Namespace::new(identity, Category::Item), message_id, ttl)
            .await
    }

    /// Caches a message.
    ///
    /// # Errors
    ///
    /// See [`ResultCache::set`].
    pub async fn set_message<T: Serialize + ?Sized>(
        &self,
        identity: &str,
        message_id: &str,
        message: &T,
    ) -> Result<()> {
        self.set(&Namespace::new(identity, Category::Item), message_id, message)
            .await
    }

    /// Reads a cached list query.
    ///
    /// # Errors
    ///
    /// See [`ResultCache::get`].
    pub async fn get_list<T: DeserializeOwned, S: AsRef<str>>(
        &self,
        identity: &str,
        query: &str,
        label_ids: &[S],
    ) -> Result<Option<Vec<T>>> {
        let key = list_cache_key(query, label_ids);
        let cached: Option<CachedList<T>> = self
            .get(
                &Namespace::new(identity, Category::ListQuery),
                &key,
                self.config().list_ttl,
            )
            .await?;
        Ok(cached.map(|list| list.messages))
    }

    /// Caches the result of a list query.
    ///
    /// # Errors
    ///
    /// See [`ResultCache::set`].
    pub async fn set_list<T: Serialize + Clone, S: AsRef<str>>(
        &self,
        identity: &str,
        query: &str,
        label_ids: &[S],
        messages: &[T],
    ) -> Result<()> {
        let mut sorted: Vec<String> = label_ids.iter().map(|l| l.as_ref().to_owned()).collect();
        sorted.sort_unstable();

        let entry = CachedList {
            query: query.to_owned(),
            label_ids: sorted,
            messages: messages.to_vec(),
        };
        self.set(
            &Namespace::new(identity, Category::ListQuery),
            &list_cache_key(query, label_ids),
            &entry,
        )
        .await
    }

    /// Reads the cached label set.
    ///
    /// # Errors
    ///
    /// See [`ResultCache::get`].
    pub async fn get_labels<T: DeserializeOwned>(&self, identity: &str) -> Result<Option<T>> {
        self.get(
            &Namespace::new(identity, Category::LabelSet),
            LABELS_KEY,
            self.config().labels_ttl,
        )
        .await
    }

    /// Caches the label set.
    ///
    /// # Errors
    ///
    /// See [`ResultCache::set`].
    pub async fn set_labels<T: Serialize + ?Sized>(&self, identity: &str, labels: &T) -> Result<()> {
        self.set(
            &Namespace::new(identity, Category::LabelSet),
            LABELS_KEY,
            labels,
        )
        .await
    }

    /// Drops one cached message.
    ///
    /// # Errors
    ///
    /// See [`ResultCache::invalidate`].
    pub async fn invalidate_message(&self, identity: &str, message_id: &str) -> Result<()> {
        self.invalidate(&InvalidationScope::Key {
            namespace: Namespace::new(identity, Category::Item),
            key: message_id.to_owned(),
        })
        .await
    }

    /// Drops every cached list query of `identity`.
    ///
    /// # Errors
    ///
    /// See [`ResultCache::invalidate`].
    pub async fn invalidate_lists(&self, identity: &str) -> Result<()> {
        self.invalidate(&InvalidationScope::Category(Namespace::new(
            identity,
            Category::ListQuery,
        )))
        .await
    }

    /// Drops the cached label set of `identity`.
    ///
    /// # Errors
    ///
    /// See [`ResultCache::invalidate`].
    pub async fn invalidate_labels(&self, identity: &str) -> Result<()> {
        self.invalidate(&InvalidationScope::Category(Namespace::new(
            identity,
            Category::LabelSet,
        )))
        .await
    }

    /// Drops everything cached for `identity`.
    ///
    /// # Errors
    ///
    /// See [`ResultCache::invalidate`].
    pub async fn invalidate_identity(&self, identity: &str) -> Result<()> {
        self.invalidate(&InvalidationScope::Identity(identity.to_owned()))
            .await
    }

    /// Empties the cache.
    ///
    /// # Errors
    ///
    /// See [`ResultCache::invalidate`].
    pub async fn invalidate_all(&self) -> Result<()> {
        self.invalidate(&InvalidationScope::All).await
    }
}
