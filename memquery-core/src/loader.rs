//! The boundary through which operations reach a collection.
//!
//! Operations never own collections. They ask a [`CollectionLoader`] for the named
//! collection and run a closure against it while the loader holds it. Whatever the
//! loader does to produce the collection (reading a file, querying a cache, checking
//! permissions from the request context) stays behind this trait.
//!
//! # Concurrency
//!
//! A loader must not run two closures against the same collection at once. With that
//! guarantee a read-modify-write operation such as an update observes and writes one
//! consistent state, even when several requests target the collection concurrently.
//!
//! # Example
//!
//! ```ignore
//! use memquery_core::{context::RequestContext, loader::CollectionLoader};
//!
//! let len = loader
//!     .with_collection("users", &RequestContext::new(), |users| users.len())
//!     .await?;
//! ```

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;

use crate::{context::RequestContext, document::Collection, error::DocumentStoreResult};

/// Provides scoped, exclusive access to named collections.
#[async_trait]
pub trait CollectionLoader: Send + Sync + Debug {
    /// Runs `f` against the collection called `name` and returns its result.
    ///
    /// Changes made by `f` are the new state of the collection. `context` is the
    /// caller's request context, passed through untouched.
    ///
    /// # Errors
    ///
    /// Returns whatever error the loader produces when the collection cannot be
    /// obtained, typically [`DocumentStoreError::Loader`](crate::error::DocumentStoreError::Loader)
    /// or [`DocumentStoreError::CollectionNotFound`](crate::error::DocumentStoreError::CollectionNotFound).
    /// `f` is not called in that case.
    async fn with_collection<F, R>(
        &self,
        name: &str,
        context: &RequestContext,
        f: F,
    ) -> DocumentStoreResult<R>
    where
        F: FnOnce(&mut Collection) -> R + Send,
        R: Send;
}

#[async_trait]
impl<'a, L> CollectionLoader for &'a L
where
    L: CollectionLoader,
{
    async fn with_collection<F, R>(
        &self,
        name: &str,
        context: &RequestContext,
        f: F,
    ) -> DocumentStoreResult<R>
    where
        F: FnOnce(&mut Collection) -> R + Send,
        R: Send,
    {
        (**self).with_collection(name, context, f).await
    }
}

#[async_trait]
impl<L> CollectionLoader for Arc<L>
where
    L: CollectionLoader,
{
    async fn with_collection<F, R>(
        &self,
        name: &str,
        context: &RequestContext,
        f: F,
    ) -> DocumentStoreResult<R>
    where
        F: FnOnce(&mut Collection) -> R + Send,
        R: Send,
    {
        (**self).with_collection(name, context, f).await
    }
}

/// Factory trait for loaders that need asynchronous setup.
#[async_trait]
pub trait LoaderBuilder {
    type Loader: CollectionLoader;

    async fn build(self) -> DocumentStoreResult<Self::Loader>;
}
