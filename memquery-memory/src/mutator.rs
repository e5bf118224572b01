//! Write paths: insert, update and remove over a borrowed collection.
//!
//! Update and remove match once against the current state, then re-locate every
//! matched document by identity when writing. Update computes every transformed
//! document before the first write, so a failing stage leaves the collection as it was.

use bson::{Bson, Document};

use memquery_core::{
    document::{Collection, IdentityOptions, display_identity},
    error::{DocumentStoreError, DocumentStoreResult},
    query::Expr,
    update::{Pipeline, Stage},
};

use crate::{
    evaluator::{DocumentEvaluator, Node, values_equal},
    projection::{project, remove_path},
};

/// Prepends `document` to the collection, assigning an identity if it has none.
///
/// # Errors
///
/// Returns [`DocumentStoreError::DocumentAlreadyExists`] if the document carries an
/// identity already present in the collection; the collection is not modified.
pub(crate) fn insert(
    collection: &mut Collection,
    mut document: Document,
    identity: &IdentityOptions,
    name: &str,
) -> DocumentStoreResult<Document> {
    match identity.identity(&document) {
        Some(id) => {
            if position_of(collection, identity, id).is_some() {
                return Err(DocumentStoreError::DocumentAlreadyExists(
                    display_identity(id),
                    name.to_string(),
                ));
            }
        }
        None => {
            let id = loop {
                let candidate = identity.generate();
                if position_of(collection, identity, &candidate).is_none() {
                    break candidate;
                }
            };

            document.insert(identity.field.clone(), id);
        }
    }

    collection.insert(0, document.clone());

    Ok(document)
}

/// Applies `pipeline` to every document matching `filter` and returns how many
/// documents were replaced.
pub(crate) fn update(
    collection: &mut Collection,
    filter: Option<&Expr>,
    pipeline: &Pipeline,
    identity: &IdentityOptions,
) -> DocumentStoreResult<usize> {
    let targets = matched_identities(collection, filter, identity)?;
    let mut replacements = Vec::with_capacity(targets.len());

    for id in &targets {
        if let Some(position) = position_of(collection, identity, id) {
            replacements.push((id, transform(&collection[position], pipeline, identity)?));
        }
    }

    let mut updated = 0;

    for (id, replacement) in replacements {
        if let Some(position) = position_of(collection, identity, id) {
            collection[position] = replacement;
            updated += 1;
        }
    }

    Ok(updated)
}

/// Removes every document matching `filter` and returns how many were removed.
pub(crate) fn remove(
    collection: &mut Collection,
    filter: Option<&Expr>,
    identity: &IdentityOptions,
) -> DocumentStoreResult<usize> {
    let targets = matched_identities(collection, filter, identity)?;
    let mut removed = 0;

    for id in &targets {
        if let Some(position) = position_of(collection, identity, id) {
            collection.remove(position);
            removed += 1;
        }
    }

    Ok(removed)
}

fn matched_identities(
    collection: &Collection,
    filter: Option<&Expr>,
    identity: &IdentityOptions,
) -> DocumentStoreResult<Vec<Bson>> {
    DocumentEvaluator::filter_positions(collection, filter)?
        .into_iter()
        .map(|position| {
            identity.identity(&collection[position]).cloned().ok_or_else(|| {
                DocumentStoreError::InvalidDocument(format!(
                    "matched document at position {position} has no {}",
                    identity.field
                ))
            })
        })
        .collect()
}

fn position_of(collection: &Collection, identity: &IdentityOptions, id: &Bson) -> Option<usize> {
    collection
        .iter()
        .position(|document| identity.identity(document).is_some_and(|other| values_equal(other, id)))
}

/// Runs every stage against a copy of `document`. The identity survives: it is
/// restored if a stage drops it, and changing it is an error.
fn transform(document: &Document, pipeline: &Pipeline, identity: &IdentityOptions) -> DocumentStoreResult<Document> {
    let mut current = document.clone();

    for stage in pipeline.stages() {
        current = apply_stage(current, stage, &identity.field)?;
    }

    match (identity.identity(document), identity.identity(&current).cloned()) {
        (Some(original), None) => {
            let mut restored = Document::new();
            restored.insert(identity.field.clone(), original.clone());
            for (key, value) in current {
                restored.insert(key, value);
            }
            current = restored;
        }
        (Some(original), Some(changed)) if !values_equal(original, &changed) => {
            return Err(DocumentStoreError::InvalidUpdate(format!(
                "update would change {} from {} to {}",
                identity.field,
                display_identity(original),
                display_identity(&changed)
            )));
        }
        _ => {}
    }

    Ok(current)
}

fn apply_stage(mut document: Document, stage: &Stage, id_field: &str) -> DocumentStoreResult<Document> {
    match stage {
        Stage::Set(fields) => {
            let source = document.clone();

            for (path, expr) in fields {
                let segments = path.split('.').collect::<Vec<_>>();
                match evaluate(expr, &source)? {
                    Some(value) => set_path(&mut document, &segments, value)?,
                    None => {
                        remove_path(&mut document, &segments);
                    }
                }
            }

            Ok(document)
        }
        Stage::Unset(paths) => {
            for path in paths {
                remove_path(&mut document, &path.split('.').collect::<Vec<_>>());
            }

            Ok(document)
        }
        Stage::Project(projection) => Ok(project(&document, projection, id_field)),
        Stage::ReplaceWith(expr) => match evaluate(expr, &document)? {
            Some(Bson::Document(replacement)) => Ok(replacement),
            Some(other) => Err(DocumentStoreError::InvalidUpdate(format!(
                "replacement must be a document, got {other}"
            ))),
            None => Err(DocumentStoreError::InvalidUpdate(format!(
                "replacement {expr} resolved to a missing field"
            ))),
        },
        Stage::Inc(fields) => {
            for (path, by) in fields {
                let current = Node::Document(&document).resolve(path).first().map(|value| (*value).clone());
                let next = increment(path, current.as_ref(), by)?;
                set_path(&mut document, &path.split('.').collect::<Vec<_>>(), next)?;
            }

            Ok(document)
        }
    }
}

/// Evaluates an update expression against `root`. `None` means the expression
/// referenced a missing field.
fn evaluate(expr: &Bson, root: &Document) -> DocumentStoreResult<Option<Bson>> {
    match expr {
        Bson::String(reference) if reference.starts_with("$$") => Err(DocumentStoreError::InvalidUpdate(format!(
            "variables are not supported: {reference}"
        ))),
        Bson::String(reference) if reference.len() > 1 && reference.starts_with('$') => {
            let mut values = Node::Document(root).resolve(&reference[1..]);

            Ok(match values.len() {
                0 => None,
                1 => Some(values.remove(0).clone()),
                _ => Some(Bson::Array(values.into_iter().cloned().collect())),
            })
        }
        Bson::Document(fields) => {
            if let Some(literal) = fields.get("$literal").filter(|_| fields.len() == 1) {
                return Ok(Some(literal.clone()));
            }

            let mut evaluated = Document::new();

            for (key, value) in fields {
                if key.starts_with('$') {
                    return Err(DocumentStoreError::InvalidUpdate(format!(
                        "unsupported expression operator {key}"
                    )));
                }

                if let Some(value) = evaluate(value, root)? {
                    evaluated.insert(key.clone(), value);
                }
            }

            Ok(Some(Bson::Document(evaluated)))
        }
        Bson::Array(items) => {
            let items = items
                .iter()
                .map(|item| Ok(evaluate(item, root)?.unwrap_or(Bson::Null)))
                .collect::<DocumentStoreResult<Vec<_>>>()?;

            Ok(Some(Bson::Array(items)))
        }
        other => Ok(Some(other.clone())),
    }
}

/// Sets the value at `path`, creating missing intermediate documents.
fn set_path(document: &mut Document, path: &[&str], value: Bson) -> DocumentStoreResult<()> {
    let Some((first, rest)) = path.split_first() else {
        return Ok(());
    };

    if rest.is_empty() {
        document.insert(*first, value);
        return Ok(());
    }

    if !document.contains_key(*first) {
        document.insert(*first, Document::new());
    }

    match document.get_mut(*first) {
        Some(Bson::Document(inner)) => set_path(inner, rest, value),
        _ => Err(DocumentStoreError::InvalidUpdate(format!(
            "cannot set {}: {first} is not a document",
            path.join(".")
        ))),
    }
}

fn increment(path: &str, current: Option<&Bson>, by: &Bson) -> DocumentStoreResult<Bson> {
    let overflow = || DocumentStoreError::InvalidUpdate(format!("increment of {path} overflows"));

    match (current, by) {
        (None | Some(Bson::Null), _) => Ok(by.clone()),
        (Some(Bson::Int32(value)), Bson::Int32(by)) => Ok(value
            .checked_add(*by)
            .map(Bson::Int32)
            .unwrap_or_else(|| Bson::Int64(i64::from(*value) + i64::from(*by)))),
        (Some(current), by) => match (as_i64(current), as_i64(by)) {
            (Some(value), Some(by)) => value.checked_add(by).map(Bson::Int64).ok_or_else(overflow),
            _ => match (as_f64(current), as_f64(by)) {
                (Some(value), Some(by)) => Ok(Bson::Double(value + by)),
                _ => Err(DocumentStoreError::InvalidUpdate(format!(
                    "cannot increment non-numeric field {path}: {current}"
                ))),
            },
        },
    }
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(value) => Some(i64::from(*value)),
        Bson::Int64(value) => Some(*value),
        _ => None,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(value) => Some(f64::from(*value)),
        Bson::Int64(value) => Some(*value as f64),
        Bson::Double(value) => Some(*value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use bson::{bson, doc};
    use memquery_core::{filter::parse_filter, query::Filter};

    use super::*;

    fn collection() -> Collection {
        vec![
            doc! { "_id": "a", "foo": "Hello", "n": 1 },
            doc! { "_id": "b", "foo": "World", "n": 2 },
            doc! { "_id": "c", "foo": "Hello", "n": 3 },
        ]
    }

    fn pipeline(descriptor: Bson) -> Pipeline {
        Pipeline::parse(&descriptor, "_id").unwrap()
    }

    #[test]
    fn insert_assigns_identity_and_prepends() {
        let identity = IdentityOptions::default();
        let mut documents = collection();

        let inserted = insert(&mut documents, doc! { "foo": "new" }, &identity, "items").unwrap();
        let id = inserted.get_str("_id").unwrap();

        assert_eq!(id.len(), 21);
        assert_eq!(documents.len(), 4);
        assert_eq!(documents[0], inserted);
    }

    #[test]
    fn insert_replaces_empty_identity() {
        let identity = IdentityOptions::default();
        let mut documents = Collection::new();

        let inserted = insert(&mut documents, doc! { "_id": "", "foo": 1 }, &identity, "items").unwrap();

        assert!(identity.identity(&inserted).is_some());
        assert_eq!(inserted.keys().next().map(String::as_str), Some("_id"));
    }

    #[test]
    fn duplicate_insert_leaves_collection_untouched() {
        let identity = IdentityOptions::default();
        let mut documents = collection();

        let err = insert(&mut documents, doc! { "_id": "b", "foo": "again" }, &identity, "items").unwrap_err();

        assert!(matches!(err, DocumentStoreError::DocumentAlreadyExists(ref id, ref name) if id == "b" && name == "items"));
        assert_eq!(documents, collection());
    }

    const LOW: i64 = 9_007_199_254_740_992;
    const HIGH: i64 = 9_007_199_254_740_993;

    #[test]
    fn numeric_identities_collide_by_value() {
        let identity = IdentityOptions::default();
        let mut documents = vec![doc! { "_id": 1 }, doc! { "_id": LOW }];

        let err = insert(&mut documents, doc! { "_id": 1.0 }, &identity, "items").unwrap_err();
        assert!(err.is_duplicate());

        let inserted = insert(&mut documents, doc! { "_id": HIGH }, &identity, "items").unwrap();
        assert_eq!(inserted, doc! { "_id": HIGH });
        assert_eq!(documents.len(), 3);

        let err = insert(&mut documents, doc! { "_id": HIGH }, &identity, "items").unwrap_err();
        assert!(err.is_duplicate());
    }

    #[test]
    fn large_identities_are_relocated_exactly() {
        let identity = IdentityOptions::default();
        let mut documents = vec![doc! { "_id": LOW, "n": 0 }, doc! { "_id": HIGH, "n": 0 }];

        let updated = update(&mut documents, Some(&Filter::eq("_id", HIGH)), &Pipeline::new().inc("n", 1), &identity).unwrap();
        assert_eq!(updated, 1);
        assert_eq!(documents, vec![doc! { "_id": LOW, "n": 0 }, doc! { "_id": HIGH, "n": 1 }]);

        let removed = remove(&mut documents, Some(&Filter::eq("_id", HIGH)), &identity).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(documents, vec![doc! { "_id": LOW, "n": 0 }]);
    }

    #[test]
    fn update_replaces_matches_in_place() {
        let identity = IdentityOptions::default();
        let mut documents = collection();
        let filter = Filter::eq("foo", "Hello");

        let updated = update(
            &mut documents,
            Some(&filter),
            &pipeline(bson!({ "$set": { "foo": "updated", "old": "$foo" } })),
            &identity,
        )
        .unwrap();

        assert_eq!(updated, 2);
        assert_eq!(documents[0], doc! { "_id": "a", "foo": "updated", "n": 1, "old": "Hello" });
        assert_eq!(documents[1], collection()[1]);
        assert_eq!(documents[2], doc! { "_id": "c", "foo": "updated", "n": 3, "old": "Hello" });
    }

    #[test]
    fn update_with_no_match_is_zero() {
        let identity = IdentityOptions::default();
        let mut documents = collection();
        let filter = Filter::eq("foo", "nothing");

        let updated = update(&mut documents, Some(&filter), &pipeline(bson!({ "$set": { "x": 1 } })), &identity).unwrap();

        assert_eq!(updated, 0);
        assert_eq!(documents, collection());
    }

    #[test]
    fn stages_run_in_order() {
        let identity = IdentityOptions::default();
        let mut documents = collection();
        let filter = Filter::eq("_id", "b");

        update(
            &mut documents,
            Some(&filter),
            &pipeline(bson!([
                { "$inc": { "n": 10, "hits": 1 } },
                { "$set": { "meta.copy": "$n", "meta.tag": { "$literal": "$raw" } } },
                { "$unset": ["foo"] },
            ])),
            &identity,
        )
        .unwrap();

        assert_eq!(
            documents[1],
            doc! { "_id": "b", "n": 12, "hits": 1, "meta": { "copy": 12, "tag": "$raw" } }
        );
    }

    #[test]
    fn identity_is_restored_after_projection() {
        let identity = IdentityOptions::default();
        let mut documents = collection();

        update(
            &mut documents,
            Some(&Filter::eq("_id", "a")),
            &pipeline(bson!({ "$project": { "_id": 0, "n": 1 } })),
            &identity,
        )
        .unwrap();

        assert_eq!(documents[0], doc! { "_id": "a", "n": 1 });
    }

    #[test]
    fn replace_with_keeps_identity() {
        let identity = IdentityOptions::default();
        let mut documents = vec![doc! { "_id": "a", "inner": { "x": 1 } }];

        update(&mut documents, None, &pipeline(bson!({ "$replaceWith": "$inner" })), &identity).unwrap();

        assert_eq!(documents[0], doc! { "_id": "a", "x": 1 });
    }

    #[test]
    fn failing_transform_writes_nothing() {
        let identity = IdentityOptions::default();
        let mut documents = vec![
            doc! { "_id": "a", "n": 1 },
            doc! { "_id": "b", "n": "two" },
        ];
        let before = documents.clone();

        let err = update(&mut documents, None, &pipeline(bson!({ "$inc": { "n": 1 } })), &identity).unwrap_err();

        assert!(matches!(err, DocumentStoreError::InvalidUpdate(_)));
        assert_eq!(documents, before);
    }

    #[test]
    fn identity_changes_are_rejected() {
        let identity = IdentityOptions::default();
        let mut documents = collection();

        let err = update(&mut documents, None, &pipeline(bson!({ "$set": { "_id": "z" } })), &identity).unwrap_err();

        assert!(matches!(err, DocumentStoreError::InvalidUpdate(_)));
        assert_eq!(documents, collection());
    }

    #[test]
    fn matched_documents_without_identity_fail() {
        let identity = IdentityOptions::default();
        let mut documents = vec![doc! { "_id": "a", "n": 1 }, doc! { "n": 2 }];

        assert!(matches!(
            remove(&mut documents, None, &identity),
            Err(DocumentStoreError::InvalidDocument(_))
        ));
        assert_eq!(documents.len(), 2);
    }

    #[test]
    fn remove_drops_every_match() {
        let identity = IdentityOptions::default();
        let mut documents = collection();
        let filter = parse_filter(&doc! { "foo": "Hello" }).unwrap();

        assert_eq!(remove(&mut documents, Some(&filter), &identity).unwrap(), 2);
        assert_eq!(documents, vec![doc! { "_id": "b", "foo": "World", "n": 2 }]);
        assert_eq!(remove(&mut documents, Some(&filter), &identity).unwrap(), 0);
    }

    #[test]
    fn increments_widen_and_mix() {
        assert_eq!(increment("n", Some(&Bson::Int32(i32::MAX)), &Bson::Int32(1)).unwrap(), Bson::Int64(i64::from(i32::MAX) + 1));
        assert_eq!(increment("n", Some(&Bson::Int64(2)), &Bson::Int32(3)).unwrap(), Bson::Int64(5));
        assert_eq!(increment("n", Some(&Bson::Int32(1)), &Bson::Double(0.5)).unwrap(), Bson::Double(1.5));
        assert!(increment("n", Some(&Bson::Int64(i64::MAX)), &Bson::Int32(1)).is_err());
    }

    #[test]
    fn set_through_a_scalar_fails() {
        let mut document = doc! { "a": 1 };

        assert!(set_path(&mut document, &["a", "b"], Bson::Int32(2)).is_err());
        assert!(set_path(&mut document, &["c", "d"], Bson::Int32(2)).is_ok());
        assert_eq!(document, doc! { "a": 1, "c": { "d": 2 } });
    }
}
