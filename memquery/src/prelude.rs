//! Convenient re-exports of commonly used types from memquery.
//!
//! ```ignore
//! use memquery::prelude::*;
//! ```

pub use memquery_core::{
    context::RequestContext,
    document::{Collection, Document, IdentityOptions, from_json, to_json},
    error::{DocumentStoreError, DocumentStoreResult},
    filter::parse_filter,
    loader::{CollectionLoader, LoaderBuilder},
    page::{Page, QueryOutcome},
    query::{Expr, FieldOp, Filter, Projection, QueryBuilder, QueryOptions, QueryVisitor, ResultMode, Sort, SortDirection},
    update::{Pipeline, Stage},
};
pub use memquery_memory::{MemoryLoader, MemoryLoaderBuilder, QueryAdapter, QueryAdapterBuilder};
