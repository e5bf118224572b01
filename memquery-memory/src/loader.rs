//! Reference loader keeping named collections in memory.
//!
//! [`MemoryLoader`] is what the tests and simple hosts use. Every clone shares the same
//! collections, and an async-aware write lock ensures only one operation touches
//! the collections at a time.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use mea::rwlock::RwLock;

use memquery_core::{
    context::RequestContext,
    document::{Collection, Document},
    error::{DocumentStoreError, DocumentStoreResult},
    loader::{CollectionLoader, LoaderBuilder},
};

type CollectionMap = HashMap<String, Collection>;

/// Thread-safe in-memory collection loader.
///
/// # Example
///
/// ```ignore
/// use bson::doc;
/// use memquery_memory::MemoryLoader;
/// use memquery_core::loader::LoaderBuilder;
///
/// let loader = MemoryLoader::builder()
///     .collection("users", vec![doc! { "_id": "a1", "name": "Alice" }])
///     .build()
///     .await?;
///
/// assert_eq!(loader.snapshot("users").await.map(|users| users.len()), Some(1));
/// ```
#[derive(Clone, Debug)]
pub struct MemoryLoader {
    collections: Arc<RwLock<CollectionMap>>,
    create_missing: bool,
}

impl Default for MemoryLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLoader {
    /// Creates an empty loader that creates collections on first use.
    pub fn new() -> Self {
        Self {
            collections: Arc::new(RwLock::new(CollectionMap::new())),
            create_missing: true,
        }
    }

    /// Creates a builder for seeding collections and choosing how unknown names behave.
    pub fn builder() -> MemoryLoaderBuilder {
        MemoryLoaderBuilder::default()
    }

    /// Returns a copy of the named collection, or `None` if it does not exist.
    pub async fn snapshot(&self, name: &str) -> Option<Collection> {
        self.collections.read().await.get(name).cloned()
    }

    /// Replaces the named collection.
    pub async fn set_collection(&self, name: impl Into<String>, documents: Collection) {
        self.collections.write().await.insert(name.into(), documents);
    }

    /// Lists the names of all collections, sorted.
    pub async fn list_collections(&self) -> Vec<String> {
        let mut names = self.collections.read().await.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Drops the named collection, returning its documents.
    pub async fn drop_collection(&self, name: &str) -> Option<Collection> {
        self.collections.write().await.remove(name)
    }
}

#[async_trait]
impl CollectionLoader for MemoryLoader {
    async fn with_collection<F, R>(
        &self,
        name: &str,
        _context: &RequestContext,
        f: F,
    ) -> DocumentStoreResult<R>
    where
        F: FnOnce(&mut Collection) -> R + Send,
        R: Send,
    {
        let mut collections = self.collections.write().await;

        if self.create_missing && !collections.contains_key(name) {
            collections.insert(name.to_string(), Collection::new());
        }

        match collections.get_mut(name) {
            Some(collection) => Ok(f(collection)),
            None => Err(DocumentStoreError::CollectionNotFound(name.to_string())),
        }
    }
}

/// Builder for [`MemoryLoader`].
#[derive(Debug)]
pub struct MemoryLoaderBuilder {
    collections: CollectionMap,
    create_missing: bool,
}

impl Default for MemoryLoaderBuilder {
    fn default() -> Self {
        Self {
            collections: CollectionMap::new(),
            create_missing: true,
        }
    }
}

impl MemoryLoaderBuilder {
    /// Whether unknown collection names are created empty (the default) or fail with
    /// [`DocumentStoreError::CollectionNotFound`].
    pub fn create_missing(mut self, create_missing: bool) -> Self {
        self.create_missing = create_missing;
        self
    }

    /// Seeds a collection with documents, in the given order.
    pub fn collection(mut self, name: impl Into<String>, documents: impl IntoIterator<Item = Document>) -> Self {
        self.collections.insert(name.into(), documents.into_iter().collect());
        self
    }
}

#[async_trait]
impl LoaderBuilder for MemoryLoaderBuilder {
    type Loader = MemoryLoader;

    async fn build(self) -> DocumentStoreResult<Self::Loader> {
        Ok(MemoryLoader {
            collections: Arc::new(RwLock::new(self.collections)),
            create_missing: self.create_missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[tokio::test]
    async fn changes_are_shared_between_clones() {
        let loader = MemoryLoader::new();
        let clone = loader.clone();

        loader
            .with_collection("items", &RequestContext::new(), |items| items.push(doc! { "_id": "a" }))
            .await
            .unwrap();

        assert_eq!(clone.snapshot("items").await, Some(vec![doc! { "_id": "a" }]));
        assert_eq!(clone.list_collections().await, vec!["items".to_string()]);
    }

    #[tokio::test]
    async fn unknown_collections_can_be_refused() {
        let loader = MemoryLoader::builder()
            .create_missing(false)
            .collection("known", vec![doc! { "_id": 1 }])
            .build()
            .await
            .unwrap();

        let len = loader
            .with_collection("known", &RequestContext::new(), |items| items.len())
            .await
            .unwrap();
        assert_eq!(len, 1);

        let err = loader
            .with_collection("unknown", &RequestContext::new(), |items| items.len())
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::CollectionNotFound(ref name) if name == "unknown"));
        assert!(loader.snapshot("unknown").await.is_none());
    }

    #[tokio::test]
    async fn drop_and_replace_collections() {
        let loader = MemoryLoader::new();

        loader.set_collection("b", vec![doc! { "_id": 2 }]).await;
        loader.set_collection("a", Vec::new()).await;
        assert_eq!(loader.list_collections().await, vec!["a".to_string(), "b".to_string()]);

        assert_eq!(loader.drop_collection("b").await, Some(vec![doc! { "_id": 2 }]));
        assert_eq!(loader.drop_collection("b").await, None);
    }
}
