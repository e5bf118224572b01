//! Error types and result types for collection operations.
//!
//! Every operation reports failure through [`DocumentStoreError`]. Use
//! [`DocumentStoreResult<T>`] as the return type for fallible operations.

use std::fmt::Display;

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur while serving a request against a collection.
///
/// Requests that match nothing are not errors; they succeed with empty or zero results.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The collection loader failed. Operations return this error unchanged.
    #[error("Loader error: {0}")]
    Loader(String),
    /// The requested collection does not exist and the loader does not create collections.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// A document with the given identity already exists in the collection.
    /// The first argument is the document identity, the second is the collection name.
    /// The collection was not modified.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// A document cannot be used by the operation, for example a matched document without identity.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// The filter expression is malformed.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
    /// The query descriptor (projection, sort, skip, limit or flags) is malformed.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// The update pipeline is malformed or would change a document identity.
    #[error("Invalid update: {0}")]
    InvalidUpdate(String),
}

impl DocumentStoreError {
    /// Wraps any displayable loader failure.
    ///
    /// Loader implementations use this to surface their own errors through the operations.
    pub fn loader(err: impl Display) -> Self {
        DocumentStoreError::Loader(err.to_string())
    }

    /// Returns `true` if this error reports a rejected insert of an existing identity.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DocumentStoreError::DocumentAlreadyExists(..))
    }
}

/// A specialized `Result` type for collection operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}
