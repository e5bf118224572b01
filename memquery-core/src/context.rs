//! Per-request data carried alongside every operation.
//!
//! The engine never reads the context. It exists so that protocol servers can hand
//! request-scoped values (the authenticated user, a tenant, a correlation id) through
//! to custom [`CollectionLoader`](crate::loader::CollectionLoader) implementations.

use bson::{Bson, Document};

/// Opaque request attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    attributes: Document,
}

impl RequestContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        RequestContext::default()
    }

    /// Returns the context with `key` set to `value`.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&Bson> {
        self.attributes.get(key)
    }

    pub fn attributes(&self) -> &Document {
        &self.attributes
    }
}

impl From<Document> for RequestContext {
    fn from(attributes: Document) -> Self {
        RequestContext { attributes }
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[test]
    fn attributes_round_through() {
        let context = RequestContext::new().with_attribute("user", "alice");

        assert_eq!(context.attribute("user").and_then(Bson::as_str), Some("alice"));
        assert!(context.attribute("tenant").is_none());
        assert_eq!(RequestContext::from(doc! { "user": "alice" }), context);
    }
}
