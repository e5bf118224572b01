//! Result shapes returned by queries.
//!
//! A query produces one of three outcomes depending on its [`ResultMode`](crate::query::ResultMode):
//! a bare count, a page of documents with the total number of matches, or the page alone.
//! The outcome serializes untagged, so protocol servers can write it out directly:
//!
//! ```ignore
//! use memquery_core::page::QueryOutcome;
//!
//! assert_eq!(serde_json::to_value(QueryOutcome::Count(3))?, serde_json::json!(3));
//! ```

use bson::Document;
use serde::{Deserialize, Serialize};

/// A page of results together with the number of documents matched before pagination.
///
/// # Type Parameters
///
/// * `T` - The type of items contained in this page
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// The documents on this page, after sorting, skipping, limiting and projection.
    pub value: Vec<T>,
    /// Number of documents matching the filter, ignoring skip and limit.
    pub count: usize,
}

impl<T> Page<T> {
    /// Creates a page.
    pub fn new(value: Vec<T>, count: usize) -> Self {
        Self { value, count }
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self { value: Vec::new(), count: 0 }
    }
}

/// The result of a query.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum QueryOutcome {
    /// Count mode: the number of matched documents.
    Count(usize),
    /// Inline-count mode: the page and the number of matched documents.
    InlineCount(Page<Document>),
    /// Default mode: the page.
    Values(Vec<Document>),
}

impl QueryOutcome {
    /// Returns the matched-document count, if this outcome carries one.
    pub fn count(&self) -> Option<usize> {
        match self {
            QueryOutcome::Count(count) => Some(*count),
            QueryOutcome::InlineCount(page) => Some(page.count),
            QueryOutcome::Values(_) => None,
        }
    }

    /// Returns the returned documents; empty in count mode.
    pub fn values(&self) -> &[Document] {
        match self {
            QueryOutcome::Count(_) => &[],
            QueryOutcome::InlineCount(page) => &page.value,
            QueryOutcome::Values(values) => values,
        }
    }

    /// Consumes the outcome, returning its documents.
    pub fn into_values(self) -> Vec<Document> {
        match self {
            QueryOutcome::Count(_) => Vec::new(),
            QueryOutcome::InlineCount(page) => page.value,
            QueryOutcome::Values(values) => values,
        }
    }
}
