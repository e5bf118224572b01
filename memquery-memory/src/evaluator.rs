//! Query expression evaluation for in-memory document filtering.
//!
//! This module provides the evaluation engine for filter expressions: path resolution
//! over nested documents and arrays, value comparison, and the [`DocumentEvaluator`]
//! visitor that decides whether a document matches.

use std::cmp::Ordering;

use bson::{Bson, DateTime, Document};
use regex::Regex;

use memquery_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp, QueryVisitor},
};

/// Comparable representation of BSON values.
///
/// Integers compare exactly as `i64`; a `Double` compares against an integer by its
/// exact value, so `1`, `1_i64` and `1.0` are equal while `2^53` and `2^53 + 1` are not.
/// Ordered comparisons ([`PartialOrd`]) only hold between values of the same kind;
/// [`Comparable::total_cmp`] orders any two values for sorting.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null value (also used for missing fields)
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (`Int32` and `Int64`)
    Int(i64),
    /// Floating-point value
    Number(f64),
    /// DateTime value
    DateTime(DateTime),
    /// String value
    String(&'a str),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Embedded document, in field order
    Map(Vec<(&'a str, Comparable<'a>)>),
    /// Any other BSON value, compared by exact equality
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Int(i64::from(*value)),
            Bson::Int64(value) => Comparable::Int(*value),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Array(items) => Comparable::Array(items.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::from(doc),
            other => Comparable::Other(other),
        }
    }
}

impl<'a> From<&'a Document> for Comparable<'a> {
    fn from(doc: &'a Document) -> Self {
        Comparable::Map(
            doc.iter()
                .map(|(key, value)| (key.as_str(), Comparable::from(value)))
                .collect(),
        )
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Int(a), Comparable::Int(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::Int(a), Comparable::Number(b)) | (Comparable::Number(b), Comparable::Int(a)) => {
                cmp_int_float(*a, *b) == Some(Ordering::Equal)
            }
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(key, value)| {
                        b.iter()
                            .find(|(other_key, _)| other_key == key)
                            .is_some_and(|(_, other_value)| value == other_value)
                    })
            }
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Int(a), Comparable::Int(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::Int(a), Comparable::Number(b)) => cmp_int_float(*a, *b),
            (Comparable::Number(a), Comparable::Int(b)) => cmp_int_float(*b, *a).map(Ordering::reverse),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl<'a> Comparable<'a> {
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Int(_) | Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::Bool(_) => 5,
            Comparable::DateTime(_) => 6,
            Comparable::Other(_) => 7,
        }
    }

    /// Orders any two values: null < numbers < strings < documents < arrays <
    /// booleans < dates < everything else.
    pub(crate) fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Comparable::Int(a), Comparable::Int(b)) => a.cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.total_cmp(b),
            // NaN sorts above every integer, as `f64::total_cmp` puts it above every float.
            (Comparable::Int(a), Comparable::Number(b)) => cmp_int_float(*a, *b).unwrap_or(Ordering::Less),
            (Comparable::Number(a), Comparable::Int(b)) => {
                cmp_int_float(*b, *a).map_or(Ordering::Greater, Ordering::reverse)
            }
            (Comparable::String(a), Comparable::String(b)) => a.cmp(b),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.cmp(b),
            (Comparable::Array(a), Comparable::Array(b)) => a
                .iter()
                .zip(b.iter())
                .map(|(left, right)| left.total_cmp(right))
                .find(|ordering| ordering.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            (Comparable::Map(a), Comparable::Map(b)) => a
                .iter()
                .zip(b.iter())
                .map(|((left_key, left), (right_key, right))| {
                    left_key.cmp(right_key).then_with(|| left.total_cmp(right))
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            (Comparable::Other(a), Comparable::Other(b)) => a.to_string().cmp(&b.to_string()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Compares an integer with a float by exact value. `None` if the float is NaN.
fn cmp_int_float(int: i64, float: f64) -> Option<Ordering> {
    const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

    if float.is_nan() {
        return None;
    }
    if float >= TWO_POW_63 {
        return Some(Ordering::Less);
    }
    if float < -TWO_POW_63 {
        return Some(Ordering::Greater);
    }

    let whole = float.trunc();

    Some(
        int.cmp(&(whole as i64))
            .then_with(|| 0.0_f64.partial_cmp(&(float - whole)).unwrap_or(Ordering::Equal)),
    )
}

/// Where path resolution starts: a stored document or an array element.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Node<'a> {
    Document(&'a Document),
    Value(&'a Bson),
}

impl<'a> Node<'a> {
    /// Resolves a dot-notation path to every value it reaches.
    ///
    /// Numeric segments index arrays; other segments fan out over the embedded
    /// documents of an array. An empty path is the node itself. No values means the
    /// field is missing.
    pub(crate) fn resolve(self, path: &str) -> Vec<&'a Bson> {
        let mut found = Vec::new();

        match self {
            Node::Value(value) if path.is_empty() => found.push(value),
            Node::Document(_) if path.is_empty() => {}
            Node::Document(doc) => {
                let segments = path.split('.').collect::<Vec<_>>();
                if let Some(value) = doc.get(segments[0]) {
                    descend(value, &segments[1..], &mut found);
                }
            }
            Node::Value(value) => {
                let segments = path.split('.').collect::<Vec<_>>();
                step(value, &segments, &mut found);
            }
        }

        found
    }
}

fn descend<'a>(value: &'a Bson, segments: &[&str], found: &mut Vec<&'a Bson>) {
    if segments.is_empty() {
        found.push(value);
    } else {
        step(value, segments, found);
    }
}

fn step<'a>(value: &'a Bson, segments: &[&str], found: &mut Vec<&'a Bson>) {
    let (segment, rest) = (segments[0], &segments[1..]);

    match value {
        Bson::Document(doc) => {
            if let Some(child) = doc.get(segment) {
                descend(child, rest, found);
            }
        }
        Bson::Array(items) => {
            if let Some(item) = segment.parse::<usize>().ok().and_then(|index| items.get(index)) {
                descend(item, rest, found);
            }

            for item in items {
                if let Some(child) = item.as_document().and_then(|doc| doc.get(segment)) {
                    descend(child, rest, found);
                }
            }
        }
        _ => {}
    }
}

/// Returns the value a document sorts by for `path`.
pub(crate) fn sort_key<'a>(document: &'a Document, path: &str) -> Comparable<'a> {
    let mut values = Node::Document(document).resolve(path);

    match values.len() {
        0 => Comparable::Null,
        1 => Comparable::from(values.remove(0)),
        _ => Comparable::Array(values.into_iter().map(Comparable::from).collect()),
    }
}

/// Returns `true` if the two values are equal under filter semantics.
pub fn values_equal(left: &Bson, right: &Bson) -> bool {
    Comparable::from(left) == Comparable::from(right)
}

/// Evaluates filter expressions against one document or array element.
pub(crate) struct DocumentEvaluator<'a> {
    node: Node<'a>,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { node: Node::Document(document) }
    }

    fn element(value: &'a Bson) -> Self {
        Self { node: Node::Value(value) }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DocumentStoreResult<bool> {
        self.visit_expr(expr)
    }

    /// Returns the positions of the documents matching `expr`, in collection order.
    ///
    /// `None` matches every document.
    pub fn filter_positions(documents: &[Document], expr: Option<&Expr>) -> DocumentStoreResult<Vec<usize>> {
        let Some(expr) = expr.filter(|expr| !expr.is_match_all()) else {
            return Ok((0..documents.len()).collect());
        };

        let mut positions = Vec::new();

        for (position, document) in documents.iter().enumerate() {
            if DocumentEvaluator::new(document).evaluate(expr)? {
                positions.push(position);
            }
        }

        Ok(positions)
    }

    /// Equality with array fan-out: a candidate matches if it equals `value` or is an
    /// array containing it. A missing field equals `null`.
    fn matches_eq(candidates: &[&Bson], value: &Bson) -> bool {
        let expected = Comparable::from(value);

        if candidates.is_empty() {
            return expected == Comparable::Null;
        }

        candidates.iter().any(|candidate| {
            let actual = Comparable::from(*candidate);
            actual == expected
                || matches!(&actual, Comparable::Array(items) if items.iter().any(|item| *item == expected))
        })
    }

    fn matches_ordering(candidates: &[&Bson], value: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
        let expected = Comparable::from(value);

        candidates.iter().any(|candidate| match Comparable::from(*candidate) {
            Comparable::Array(items) => items
                .iter()
                .any(|item| item.partial_cmp(&expected).is_some_and(&accept)),
            actual => actual.partial_cmp(&expected).is_some_and(&accept),
        })
    }
}

impl<'a> QueryVisitor for DocumentEvaluator<'a> {
    type Output = bool;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_nor(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_or(exprs)?)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(!self.node.resolve(field).is_empty() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let candidates = self.node.resolve(field);

        let matched = match op {
            FieldOp::Eq => Self::matches_eq(&candidates, value),
            FieldOp::Ne => !Self::matches_eq(&candidates, value),
            FieldOp::Gt => Self::matches_ordering(&candidates, value, Ordering::is_gt),
            FieldOp::Gte => Self::matches_ordering(&candidates, value, Ordering::is_ge),
            FieldOp::Lt => Self::matches_ordering(&candidates, value, Ordering::is_lt),
            FieldOp::Lte => Self::matches_ordering(&candidates, value, Ordering::is_le),
            FieldOp::In => operand_items(value).iter().any(|item| Self::matches_eq(&candidates, item)),
            FieldOp::Nin => !operand_items(value).iter().any(|item| Self::matches_eq(&candidates, item)),
            FieldOp::All => {
                let items = operand_items(value);
                !items.is_empty() && items.iter().all(|item| Self::matches_eq(&candidates, item))
            }
            FieldOp::Size => {
                let expected = match value {
                    Bson::Int32(len) => usize::try_from(*len).ok(),
                    Bson::Int64(len) => usize::try_from(*len).ok(),
                    _ => None,
                };

                candidates.iter().any(|candidate| {
                    matches!(candidate, Bson::Array(items) if Some(items.len()) == expected)
                })
            }
        };

        Ok(matched)
    }

    fn visit_regex(&mut self, field: &str, regex: &Regex) -> Result<Self::Output, Self::Error> {
        let is_match = |value: &Bson| matches!(value, Bson::String(text) if regex.is_match(text));

        Ok(self.node.resolve(field).into_iter().any(|candidate| match candidate {
            Bson::Array(items) => items.iter().any(&is_match),
            other => is_match(other),
        }))
    }

    fn visit_elem_match(&mut self, field: &str, expr: &Expr) -> Result<Self::Output, Self::Error> {
        for candidate in self.node.resolve(field) {
            let Bson::Array(items) = candidate else {
                continue;
            };

            for item in items {
                if DocumentEvaluator::element(item).evaluate(expr)? {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }
}

fn operand_items(value: &Bson) -> &[Bson] {
    match value {
        Bson::Array(items) => items,
        other => std::slice::from_ref(other),
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use memquery_core::{filter::parse_filter, query::Filter};

    use super::*;

    fn matches(document: &Document, filter: Document) -> bool {
        let expr = parse_filter(&filter).unwrap();
        DocumentEvaluator::new(document).evaluate(&expr).unwrap()
    }

    #[test]
    fn equality_and_missing_fields() {
        let document = doc! { "foo": "Hello", "n": 1, "empty": Bson::Null };

        assert!(matches(&document, doc! { "foo": "Hello" }));
        assert!(!matches(&document, doc! { "foo": "World" }));
        assert!(matches(&document, doc! { "n": 1.0 }));
        assert!(matches(&document, doc! { "missing": Bson::Null }));
        assert!(matches(&document, doc! { "empty": Bson::Null }));
        assert!(!matches(&document, doc! { "missing": { "$ne": Bson::Null } }));
        assert!(matches(&document, doc! { "foo": { "$ne": "World" } }));
    }

    #[test]
    fn large_integers_compare_exactly() {
        let low = 9_007_199_254_740_992_i64;
        let high = 9_007_199_254_740_993_i64;
        let document = doc! { "_id": high };

        assert!(matches(&document, doc! { "_id": high }));
        assert!(!matches(&document, doc! { "_id": low }));
        assert!(matches(&document, doc! { "_id": { "$gt": low } }));
        assert!(matches(&document, doc! { "_id": { "$nin": [low] } }));

        assert!(!values_equal(&Bson::Int64(low), &Bson::Int64(high)));
        assert!(values_equal(&Bson::Int32(1), &Bson::Int64(1)));
        assert!(values_equal(&Bson::Int64(1), &Bson::Double(1.0)));
        assert!(!values_equal(&Bson::Int64(1), &Bson::Double(1.5)));
        assert!(!values_equal(&Bson::Int64(high), &Bson::Double(low as f64)));
    }

    #[test]
    fn mixed_numbers_sort_by_value() {
        let ordering = |a: Bson, b: Bson| Comparable::from(&a).total_cmp(&Comparable::from(&b));

        assert_eq!(ordering(Bson::Int64(2), Bson::Double(1.5)), Ordering::Greater);
        assert_eq!(ordering(Bson::Double(-1.5), Bson::Int32(-1)), Ordering::Less);
        assert_eq!(ordering(Bson::Int64(i64::MAX), Bson::Double(f64::INFINITY)), Ordering::Less);
        assert_eq!(ordering(Bson::Int64(3), Bson::Double(f64::NAN)), Ordering::Less);
        assert_eq!(ordering(Bson::Int32(7), Bson::Double(7.0)), Ordering::Equal);
    }

    #[test]
    fn ordering_only_within_a_kind() {
        let document = doc! { "age": 30, "name": "bob" };

        assert!(matches(&document, doc! { "age": { "$gt": 18, "$lte": 30 } }));
        assert!(!matches(&document, doc! { "age": { "$gt": "18" } }));
        assert!(matches(&document, doc! { "name": { "$lt": "carol" } }));
        assert!(!matches(&document, doc! { "missing": { "$lt": 100 } }));
    }

    #[test]
    fn arrays_match_on_any_element() {
        let document = doc! { "tags": ["red", "blue"], "scores": [70, 82, 95] };

        assert!(matches(&document, doc! { "tags": "red" }));
        assert!(matches(&document, doc! { "tags": ["red", "blue"] }));
        assert!(matches(&document, doc! { "scores": { "$gt": 90 } }));
        assert!(matches(&document, doc! { "tags": { "$in": ["green", "blue"] } }));
        assert!(matches(&document, doc! { "tags": { "$nin": ["green"] } }));
        assert!(matches(&document, doc! { "tags": { "$all": ["blue", "red"] } }));
        assert!(!matches(&document, doc! { "tags": { "$all": ["blue", "green"] } }));
        assert!(matches(&document, doc! { "tags": { "$size": 2 } }));
        assert!(!matches(&document, doc! { "tags": { "$size": 3 } }));
    }

    #[test]
    fn elem_match_requires_one_element_to_satisfy_everything() {
        let document = doc! {
            "scores": [70, 95],
            "items": [{ "sku": "a", "qty": 2 }, { "sku": "b", "qty": 10 }],
        };

        assert!(!matches(&document, doc! { "scores": { "$elemMatch": { "$gte": 80, "$lt": 85 } } }));
        assert!(matches(&document, doc! { "scores": { "$elemMatch": { "$gte": 90 } } }));
        assert!(matches(&document, doc! { "items": { "$elemMatch": { "sku": "b", "qty": { "$gt": 5 } } } }));
        assert!(!matches(&document, doc! { "items": { "$elemMatch": { "sku": "a", "qty": { "$gt": 5 } } } }));
    }

    #[test]
    fn dot_paths_traverse_documents_and_arrays() {
        let document = doc! {
            "address": { "city": "Oslo", "zip": "0150" },
            "orders": [{ "total": 5 }, { "total": 50 }],
        };

        assert!(matches(&document, doc! { "address.city": "Oslo" }));
        assert!(matches(&document, doc! { "orders.total": 50 }));
        assert!(matches(&document, doc! { "orders.1.total": 50 }));
        assert!(!matches(&document, doc! { "orders.0.total": 50 }));
        assert!(matches(&document, doc! { "address.zip": { "$exists": true } }));
        assert!(matches(&document, doc! { "address.street": { "$exists": false } }));
    }

    #[test]
    fn logical_operators() {
        let document = doc! { "a": 1, "b": 2 };

        assert!(matches(&document, doc! { "$or": [{ "a": 5 }, { "b": 2 }] }));
        assert!(!matches(&document, doc! { "$and": [{ "a": 1 }, { "b": 3 }] }));
        assert!(matches(&document, doc! { "$nor": [{ "a": 5 }, { "b": 5 }] }));
        assert!(matches(&document, doc! { "a": { "$not": { "$gt": 3 } } }));
    }

    #[test]
    fn regex_matches_strings_only() {
        let document = doc! { "name": "Alice", "n": 1, "aliases": ["al", "ally"] };

        assert!(matches(&document, doc! { "name": { "$regex": "^ali", "$options": "i" } }));
        assert!(!matches(&document, doc! { "name": { "$regex": "^ali" } }));
        assert!(!matches(&document, doc! { "n": { "$regex": "1" } }));
        assert!(matches(&document, doc! { "aliases": { "$regex": "^ally$" } }));
    }

    #[test]
    fn embedded_documents_compare_by_content() {
        let document = doc! { "point": { "x": 1, "y": 2 } };

        assert!(matches(&document, doc! { "point": { "y": 2, "x": 1 } }));
        assert!(!matches(&document, doc! { "point": { "x": 1 } }));
    }

    #[test]
    fn filter_positions_keep_collection_order() {
        let documents = vec![doc! { "n": 3 }, doc! { "n": 1 }, doc! { "n": 2 }];

        let positions = DocumentEvaluator::filter_positions(&documents, Some(&Filter::gte("n", 2))).unwrap();
        assert_eq!(positions, vec![0, 2]);

        let all = DocumentEvaluator::filter_positions(&documents, None).unwrap();
        assert_eq!(all, vec![0, 1, 2]);
    }

    #[test]
    fn total_order_across_kinds() {
        let values = [
            Bson::Null,
            Bson::Int32(-5),
            Bson::Double(2.5),
            Bson::String("a".to_string()),
            Bson::Document(doc! { "a": 1 }),
            Bson::Array(vec![Bson::Int32(1)]),
            Bson::Boolean(false),
            Bson::DateTime(DateTime::from_millis(0)),
        ];

        for pair in values.windows(2) {
            assert_eq!(
                Comparable::from(&pair[0]).total_cmp(&Comparable::from(&pair[1])),
                Ordering::Less,
                "{} should sort before {}",
                pair[0],
                pair[1]
            );
        }

        assert!(values_equal(&Bson::Int64(2), &Bson::Double(2.0)));
    }
}
