//! In-memory execution engine for memquery.
//!
//! This crate evaluates protocol requests against collections borrowed from a
//! [`CollectionLoader`](memquery_core::loader::CollectionLoader):
//!
//! - **Matching** ([`evaluator`]) - Filter evaluation with dot paths and array semantics
//! - **Query execution** ([`cursor`]) - Sorting, pagination, projection and counts
//! - **Dispatch** ([`QueryAdapter`]) - The query/insert/update/remove entry points
//! - **Reference loader** ([`MemoryLoader`]) - Named collections behind an async-aware lock
//!
//! # Quick Start
//!
//! ```ignore
//! use bson::doc;
//! use memquery_core::{context::RequestContext, loader::LoaderBuilder, page::QueryOutcome};
//! use memquery_memory::{MemoryLoader, QueryAdapter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let loader = MemoryLoader::builder()
//!         .collection("greetings", vec![doc! { "_id": "g1", "foo": "Hello" }])
//!         .build()
//!         .await?;
//!     let adapter = QueryAdapter::new(loader);
//!
//!     let outcome = adapter
//!         .query("greetings", &doc! { "$filter": { "foo": "Hello" }, "$count": true }, &RequestContext::new())
//!         .await?;
//!     assert_eq!(outcome, QueryOutcome::Count(1));
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as memquery_memory;

pub mod adapter;
pub mod cursor;
pub mod evaluator;
pub mod loader;
mod mutator;
mod projection;

pub use adapter::{QueryAdapter, QueryAdapterBuilder};
pub use loader::{MemoryLoader, MemoryLoaderBuilder};
