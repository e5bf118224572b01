//! Query, insert, update and remove over in-memory document collections.
//!
//! This crate is the entry point for protocol servers that keep their data in memory.
//! It re-exports the core types and the in-memory engine: a server parses an incoming
//! request into a descriptor document, hands it to a [`QueryAdapter`](engine::QueryAdapter)
//! together with a collection name, and writes the outcome back.
//!
//! # Features
//!
//! - **Document-store filters** - `$eq`, `$in`, `$regex`, `$elemMatch`, `$and`/`$or`/`$nor` and friends over dot paths
//! - **Query descriptors** - Projection, multi-key sorting, skip/limit, count and inline-count modes
//! - **Update pipelines** - `$set`, `$unset`, `$project`, `$replaceWith` and `$inc` stages
//! - **Pluggable loaders** - Collections come from any [`CollectionLoader`](loader::CollectionLoader)
//!
//! # Quick Start
//!
//! ```ignore
//! use memquery::{prelude::*, bson::{bson, doc}};
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let adapter = QueryAdapter::new(MemoryLoader::new());
//!     let context = RequestContext::new();
//!
//!     let inserted = adapter.insert("users", doc! { "name": "Alice", "age": 31 }, &context).await?;
//!     println!("Assigned id: {}", inserted.get_str("_id").unwrap());
//!
//!     adapter
//!         .update("users", &doc! { "name": "Alice" }, &bson!({ "$inc": { "age": 1 } }), &context)
//!         .await?;
//!
//!     let page = adapter
//!         .query(
//!             "users",
//!             &doc! {
//!                 "$filter": { "age": { "$gte": 18 } },
//!                 "$select": { "name": 1 },
//!                 "$sort": { "name": 1 },
//!                 "$limit": 10,
//!                 "$inlinecount": "allpages",
//!             },
//!             &context,
//!         )
//!         .await?;
//!
//!     println!("{}", serde_json::to_string(&page).unwrap());
//!     Ok(())
//! }
//! ```
//!
//! # Custom Loaders
//!
//! Implement [`CollectionLoader`](loader::CollectionLoader) to serve collections from
//! elsewhere. The loader must run one closure per collection at a time:
//!
//! ```ignore
//! use memquery::prelude::*;
//!
//! #[derive(Debug)]
//! struct TenantLoader { inner: MemoryLoader }
//!
//! #[async_trait::async_trait]
//! impl CollectionLoader for TenantLoader {
//!     async fn with_collection<F, R>(&self, name: &str, context: &RequestContext, f: F) -> DocumentStoreResult<R>
//!     where
//!         F: FnOnce(&mut Collection) -> R + Send,
//!         R: Send,
//!     {
//!         let tenant = context
//!             .attribute("tenant")
//!             .and_then(|tenant| tenant.as_str())
//!             .ok_or_else(|| DocumentStoreError::loader("missing tenant"))?;
//!
//!         self.inner.with_collection(&format!("{tenant}.{name}"), context, f).await
//!     }
//! }
//! ```

pub mod prelude;

pub use memquery_core::{context, document, error, filter, loader, page, query, update};

// Re-export BSON types for convenience
pub use bson;

/// The in-memory execution engine and reference loader.
pub mod engine {
    pub use memquery_memory::{MemoryLoader, MemoryLoaderBuilder, QueryAdapter, QueryAdapterBuilder, cursor, evaluator};
}
