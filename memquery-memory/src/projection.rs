//! Field projection over documents.
//!
//! Inclusion keeps only the selected paths and exclusion drops them; both walk
//! embedded documents and arrays of embedded documents, and both keep the source
//! field order.

use bson::{Bson, Document};

use memquery_core::query::Projection;

/// Applies `projection` to a copy of `document`.
pub(crate) fn project(document: &Document, projection: &Projection, id_field: &str) -> Document {
    match projection {
        Projection::Include { fields, keep_id } => {
            let mut paths = fields.iter().map(|field| split(field)).collect::<Vec<_>>();

            if *keep_id {
                paths.push(vec![id_field]);
            }

            include(document, &paths)
        }
        Projection::Exclude { fields } => {
            let mut projected = document.clone();

            for field in fields {
                remove_path(&mut projected, &split(field));
            }

            projected
        }
    }
}

fn split(path: &str) -> Vec<&str> {
    path.split('.').collect()
}

fn include(document: &Document, paths: &[Vec<&str>]) -> Document {
    let mut projected = Document::new();

    for (key, value) in document {
        let selected = paths
            .iter()
            .filter(|path| path.first() == Some(&key.as_str()))
            .collect::<Vec<_>>();

        if selected.is_empty() {
            continue;
        }

        if selected.iter().any(|path| path.len() == 1) {
            projected.insert(key.clone(), value.clone());
            continue;
        }

        let rest = selected.iter().map(|path| path[1..].to_vec()).collect::<Vec<_>>();

        match value {
            Bson::Document(inner) => {
                projected.insert(key.clone(), include(inner, &rest));
            }
            Bson::Array(items) => {
                let items = items
                    .iter()
                    .filter_map(|item| item.as_document().map(|inner| Bson::Document(include(inner, &rest))))
                    .collect::<Vec<_>>();
                projected.insert(key.clone(), items);
            }
            _ => {}
        }
    }

    projected
}

/// Removes the value at `path`, fanning out over arrays of embedded documents.
/// Returns `true` if anything was removed.
pub(crate) fn remove_path(document: &mut Document, path: &[&str]) -> bool {
    let Some((first, rest)) = path.split_first() else {
        return false;
    };

    if rest.is_empty() {
        return document.remove(*first).is_some();
    }

    match document.get_mut(*first) {
        Some(Bson::Document(inner)) => remove_path(inner, rest),
        Some(Bson::Array(items)) => {
            let mut removed = false;
            for item in items.iter_mut() {
                if let Bson::Document(inner) = item {
                    removed |= remove_path(inner, rest);
                }
            }
            removed
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    fn sample() -> Document {
        doc! {
            "_id": "a1",
            "name": "Alice",
            "address": { "city": "Oslo", "zip": "0150" },
            "orders": [{ "sku": "x", "qty": 1 }, { "sku": "y", "qty": 2 }, 7],
            "age": 30,
        }
    }

    #[test]
    fn inclusion_keeps_identity_and_field_order() {
        let projected = project(&sample(), &Projection::include(["age", "name"]), "_id");

        assert_eq!(projected, doc! { "_id": "a1", "name": "Alice", "age": 30 });
    }

    #[test]
    fn inclusion_can_drop_identity() {
        let projection = Projection::Include { fields: vec!["name".to_string()], keep_id: false };

        assert_eq!(project(&sample(), &projection, "_id"), doc! { "name": "Alice" });
    }

    #[test]
    fn nested_inclusion() {
        let projected = project(&sample(), &Projection::include(["address.city", "orders.sku"]), "_id");

        assert_eq!(
            projected,
            doc! {
                "_id": "a1",
                "address": { "city": "Oslo" },
                "orders": [{ "sku": "x" }, { "sku": "y" }],
            }
        );
    }

    #[test]
    fn exclusion_drops_paths() {
        let projected = project(&sample(), &Projection::exclude(["_id", "address.zip", "orders.qty", "age"]), "_id");

        assert_eq!(
            projected,
            doc! {
                "name": "Alice",
                "address": { "city": "Oslo" },
                "orders": [{ "sku": "x" }, { "sku": "y" }, 7],
            }
        );
    }

    #[test]
    fn missing_paths_are_ignored() {
        assert_eq!(
            project(&sample(), &Projection::include(["nope"]), "_id"),
            doc! { "_id": "a1" }
        );
        assert_eq!(project(&sample(), &Projection::exclude(["nope.deeper"]), "_id"), sample());
    }
}
