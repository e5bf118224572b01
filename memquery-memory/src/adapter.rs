//! The four protocol operations: query, insert, update and remove.
//!
//! [`QueryAdapter`] is what a protocol server calls. Every operation follows the same
//! protocol:
//!
//! 1. Descriptors are validated, so a malformed request never reaches the loader.
//! 2. The collection is requested from the [`CollectionLoader`]; a loader error is
//!    returned unchanged and nothing else happens.
//! 3. Matching, mutation and projection run synchronously against the borrowed collection.
//!
//! # Example
//!
//! ```ignore
//! use bson::{bson, doc};
//! use memquery_core::context::RequestContext;
//! use memquery_memory::{MemoryLoader, QueryAdapter};
//!
//! let adapter = QueryAdapter::new(MemoryLoader::new());
//! let context = RequestContext::new();
//!
//! adapter.insert("greetings", doc! { "foo": "Hello" }, &context).await?;
//! let updated = adapter
//!     .update("greetings", &doc! { "foo": "Hello" }, &bson!({ "$set": { "foo": "Hi" } }), &context)
//!     .await?;
//! assert_eq!(updated, 1);
//! ```

use bson::{Bson, Document};
use tracing::{debug, trace, warn};

use memquery_core::{
    context::RequestContext,
    document::{Collection, IdentityOptions},
    error::DocumentStoreResult,
    filter::parse_filter,
    loader::CollectionLoader,
    page::QueryOutcome,
    query::{Expr, QueryOptions},
    update::Pipeline,
};

use crate::{cursor, mutator};

/// Runs protocol requests against collections supplied by a loader.
///
/// # Type Parameters
///
/// * `L` - The loader supplying collections; references and `Arc`s of loaders work too.
#[derive(Debug, Clone)]
pub struct QueryAdapter<L> {
    loader: L,
    identity: IdentityOptions,
}

impl<L> QueryAdapter<L>
where
    L: CollectionLoader,
{
    /// Creates an adapter using `_id` and 21-character generated identifiers.
    pub fn new(loader: L) -> Self {
        Self { loader, identity: IdentityOptions::default() }
    }

    /// Creates a builder for an adapter with custom identity settings.
    pub fn builder(loader: L) -> QueryAdapterBuilder<L> {
        QueryAdapterBuilder::new(loader)
    }

    /// Returns the loader.
    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Returns the identity settings.
    pub fn identity(&self) -> &IdentityOptions {
        &self.identity
    }

    /// Runs a query descriptor (`$filter`, `$select`, `$sort`, `$skip`, `$limit`,
    /// `$count`, `$inlinecount`) against a collection.
    ///
    /// # Arguments
    ///
    /// * `collection` - The collection name passed to the loader
    /// * `descriptor` - The query descriptor
    /// * `context` - The request context, passed through to the loader
    ///
    /// # Errors
    ///
    /// Returns `InvalidFilter`/`InvalidQuery` for a malformed descriptor and any loader error unchanged.
    pub async fn query(
        &self,
        collection: &str,
        descriptor: &Document,
        context: &RequestContext,
    ) -> DocumentStoreResult<QueryOutcome> {
        let options = QueryOptions::from_descriptor(descriptor, &self.identity.field)?;
        self.query_with(collection, options, context).await
    }

    /// Runs a pre-built query against a collection.
    pub async fn query_with(
        &self,
        collection: &str,
        options: QueryOptions,
        context: &RequestContext,
    ) -> DocumentStoreResult<QueryOutcome> {
        trace!("Querying collection {} with {:?}", collection, options);

        let field = &self.identity.field;
        let outcome = self
            .load(collection, context, |documents| cursor::execute(documents, &options, field))
            .await?;

        match &outcome {
            QueryOutcome::Count(count) => debug!("Counted {} documents in {}", count, collection),
            other => debug!(
                "Query on {} returned {} documents{}",
                collection,
                other.values().len(),
                other.count().map(|count| format!(" of {count} matched")).unwrap_or_default()
            ),
        }

        Ok(outcome)
    }

    /// Inserts a document at the front of a collection and returns it with its identity.
    ///
    /// # Errors
    ///
    /// Returns `DocumentAlreadyExists` if the identity is taken; the collection is unchanged.
    pub async fn insert(
        &self,
        collection: &str,
        document: Document,
        context: &RequestContext,
    ) -> DocumentStoreResult<Document> {
        trace!("Inserting document into {}", collection);

        let identity = &self.identity;
        let result = self
            .load(collection, context, |documents| mutator::insert(documents, document, identity, collection))
            .await;

        match &result {
            Ok(inserted) => debug!(
                "Inserted document {:?} into {}",
                self.identity.identity(inserted),
                collection
            ),
            Err(err) if err.is_duplicate() => warn!("Rejected insert into {}: {}", collection, err),
            Err(_) => {}
        }

        result
    }

    /// Applies an update pipeline to every document matching a filter document.
    ///
    /// Returns the number of documents replaced; matching nothing is not an error.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFilter` or `InvalidUpdate` for malformed descriptors, `InvalidUpdate`
    /// when a transform fails or would change an identity, and `InvalidDocument` when a
    /// matched document has no identity. The collection is unchanged on error.
    pub async fn update(
        &self,
        collection: &str,
        filter: &Document,
        pipeline: &Bson,
        context: &RequestContext,
    ) -> DocumentStoreResult<usize> {
        let filter = parse_optional_filter(filter)?;
        let pipeline = Pipeline::parse(pipeline, &self.identity.field)?;

        self.update_with(collection, filter, pipeline, context).await
    }

    /// Applies a pre-built pipeline to every document matching `filter` (`None` matches all).
    pub async fn update_with(
        &self,
        collection: &str,
        filter: Option<Expr>,
        pipeline: Pipeline,
        context: &RequestContext,
    ) -> DocumentStoreResult<usize> {
        trace!("Updating {} with {} stages", collection, pipeline.stages().len());

        let identity = &self.identity;
        let updated = self
            .load(collection, context, |documents| {
                mutator::update(documents, filter.as_ref(), &pipeline, identity)
            })
            .await?;

        debug!("Updated {} documents in {}", updated, collection);
        Ok(updated)
    }

    /// Removes every document matching a filter document.
    pub async fn remove(
        &self,
        collection: &str,
        filter: &Document,
        context: &RequestContext,
    ) -> DocumentStoreResult<()> {
        let filter = parse_optional_filter(filter)?;
        self.remove_with(collection, filter, context).await.map(|_| ())
    }

    /// Removes every document matching `filter` (`None` matches all) and returns how
    /// many were removed.
    pub async fn remove_with(
        &self,
        collection: &str,
        filter: Option<Expr>,
        context: &RequestContext,
    ) -> DocumentStoreResult<usize> {
        trace!("Removing from {}", collection);

        let identity = &self.identity;
        let removed = self
            .load(collection, context, |documents| mutator::remove(documents, filter.as_ref(), identity))
            .await?;

        debug!("Removed {} documents from {}", removed, collection);
        Ok(removed)
    }

    async fn load<F, R>(&self, collection: &str, context: &RequestContext, f: F) -> DocumentStoreResult<R>
    where
        F: FnOnce(&mut Collection) -> DocumentStoreResult<R> + Send,
        R: Send,
    {
        match self.loader.with_collection(collection, context, f).await {
            Ok(result) => result,
            Err(err) => {
                warn!("Loading collection {} failed: {}", collection, err);
                Err(err)
            }
        }
    }
}

fn parse_optional_filter(filter: &Document) -> DocumentStoreResult<Option<Expr>> {
    if filter.is_empty() {
        Ok(None)
    } else {
        parse_filter(filter).map(Some)
    }
}

/// Builder for [`QueryAdapter`].
#[derive(Debug)]
pub struct QueryAdapterBuilder<L> {
    loader: L,
    identity: IdentityOptions,
}

impl<L> QueryAdapterBuilder<L>
where
    L: CollectionLoader,
{
    /// Creates a builder with the default identity settings.
    pub fn new(loader: L) -> Self {
        Self { loader, identity: IdentityOptions::default() }
    }

    /// Sets the identity field name (default `_id`).
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.identity.field = field.into();
        self
    }

    /// Sets the length of generated identifiers (default 21, at least 1).
    pub fn id_length(mut self, length: usize) -> Self {
        self.identity.length = length.max(1);
        self
    }

    pub fn build(self) -> QueryAdapter<L> {
        QueryAdapter { loader: self.loader, identity: self.identity }
    }
}
