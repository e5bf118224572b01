//! Document model, identity handling, and conversions between JSON and BSON.
//!
//! Documents are schemaless [`bson::Document`] values. The only structural rule the
//! crate enforces is identity: every stored document carries an identifier field
//! (`_id` unless configured otherwise) whose value is unique within its collection.

use bson::{Bson, de::deserialize_from_bson, ser::serialize_to_bson};
use rand::Rng;
use serde_json::Value;

use crate::error::{DocumentStoreError, DocumentStoreResult};

pub use bson::Document;

/// An ordered, mutable sequence of documents. New documents are inserted at the front.
pub type Collection = Vec<Document>;

/// The identity field used unless configured otherwise.
pub const DEFAULT_ID_FIELD: &str = "_id";

/// Length of generated identifiers unless configured otherwise.
pub const DEFAULT_ID_LENGTH: usize = 21;

/// URL-safe alphabet for generated identifiers (64 symbols, 6 bits each).
const ID_ALPHABET: &[u8; 64] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz_-";

/// Identity settings shared by every operation of an adapter.
///
/// # Example
///
/// ```ignore
/// use memquery_core::document::IdentityOptions;
/// use bson::doc;
///
/// let identity = IdentityOptions::default();
/// assert!(identity.identity(&doc! { "foo": 1 }).is_none());
/// assert_eq!(identity.generate().as_str().unwrap().len(), 21);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityOptions {
    /// Name of the identity field.
    pub field: String,
    /// Number of characters in generated identifiers.
    pub length: usize,
}

impl Default for IdentityOptions {
    fn default() -> Self {
        Self {
            field: DEFAULT_ID_FIELD.to_string(),
            length: DEFAULT_ID_LENGTH,
        }
    }
}

impl IdentityOptions {
    /// Returns the identity carried by `document`.
    ///
    /// A missing field, `null` or the empty string all count as "no identity".
    pub fn identity<'a>(&self, document: &'a Document) -> Option<&'a Bson> {
        match document.get(&self.field) {
            None | Some(Bson::Null) => None,
            Some(Bson::String(value)) if value.is_empty() => None,
            Some(value) => Some(value),
        }
    }

    /// Generates a fresh random identifier.
    ///
    /// Collisions are not checked here; with the default length the probability is negligible.
    pub fn generate(&self) -> Bson {
        Bson::String(generate_id(self.length))
    }
}

/// Generates a random token of `length` characters from a URL-safe alphabet.
pub fn generate_id(length: usize) -> String {
    let mut rng = rand::thread_rng();

    (0..length.max(1))
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Renders an identity value for messages, without the quotes BSON adds around strings.
pub fn display_identity(id: &Bson) -> String {
    match id {
        Bson::String(value) => value.clone(),
        other => other.to_string(),
    }
}

/// Converts a JSON object into a document.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidDocument`] if the value is not a JSON object.
pub fn from_json(value: Value) -> DocumentStoreResult<Document> {
    match serialize_to_bson(&value)? {
        Bson::Document(document) => Ok(document),
        other => Err(DocumentStoreError::InvalidDocument(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

/// Converts a document into a JSON value.
pub fn to_json(document: &Document) -> DocumentStoreResult<Value> {
    Ok(deserialize_from_bson(Bson::Document(document.clone()))?)
}
