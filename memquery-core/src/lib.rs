//! Core types for running protocol-level CRUD requests against in-memory document collections.
//!
//! This crate defines everything the execution engine and its callers share:
//!
//! - **Documents and identity** ([`document`]) - The schemaless document model and identifier generation
//! - **Errors** ([`error`]) - The single error enum surfaced by every operation
//! - **Filter expressions** ([`query`], [`filter`]) - The expression tree and its parser
//! - **Query descriptors** ([`query`]) - Projection, sorting, pagination and result modes
//! - **Transform pipelines** ([`update`]) - Stages applied by update operations
//! - **Results** ([`page`]) - Count, inline-count and value-list outcomes
//! - **Loader boundary** ([`loader`]) - The trait through which collections are borrowed
//! - **Request context** ([`context`]) - Opaque per-request data passed through by callers
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//! use memquery_core::query::QueryOptions;
//!
//! let options = QueryOptions::from_descriptor(
//!     &doc! {
//!         "$filter": { "age": { "$gte": 18 } },
//!         "$sort": { "name": 1 },
//!         "$limit": 10,
//!     },
//!     "_id",
//! )?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as memquery_core;

pub mod context;
pub mod document;
pub mod error;
pub mod filter;
pub mod loader;
pub mod page;
pub mod query;
pub mod update;
