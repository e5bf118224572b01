//! Parsing of filter documents into [`Expr`] trees.
//!
//! The accepted language is the document-store dialect used by protocol servers:
//!
//! - `{ "field": value }` is equality
//! - `{ "field": { "$gt": 1, "$lt": 5 } }` applies every listed operator
//! - `$and`, `$or` and `$nor` take non-empty arrays of filter documents
//! - field paths use dot notation (`"address.city"`)
//!
//! Validation happens entirely at parse time, so evaluation never fails half-way
//! through a collection.

use bson::{Bson, Document};
use regex::RegexBuilder;

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp, as_integer},
};

/// Parses a filter document. An empty document matches every document.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidFilter`] for unknown operators, operands of
/// the wrong type, or invalid regular expressions.
pub fn parse_filter(filter: &Document) -> DocumentStoreResult<Expr> {
    let mut clauses = Vec::with_capacity(filter.len());

    for (key, value) in filter {
        let clause = match key.as_str() {
            "$and" => Expr::And(parse_clauses(key, value)?),
            "$or" => Expr::Or(parse_clauses(key, value)?),
            "$nor" => Expr::Nor(parse_clauses(key, value)?),
            op if op.starts_with('$') => {
                return Err(invalid(format!("unsupported top-level operator {op}")));
            }
            field => parse_field(field, value)?,
        };

        clauses.push(clause);
    }

    Ok(collapse(clauses))
}

fn parse_clauses(op: &str, value: &Bson) -> DocumentStoreResult<Vec<Expr>> {
    let items = match value {
        Bson::Array(items) if !items.is_empty() => items,
        _ => return Err(invalid(format!("{op} requires a non-empty array of filters"))),
    };

    items
        .iter()
        .map(|item| match item {
            Bson::Document(filter) => parse_filter(filter),
            other => Err(invalid(format!("{op} entries must be documents, got {other}"))),
        })
        .collect()
}

fn parse_field(field: &str, value: &Bson) -> DocumentStoreResult<Expr> {
    match value {
        Bson::Document(ops) if is_operator_document(ops) => parse_operators(field, ops),
        other => Ok(Expr::field(field.to_string(), FieldOp::Eq, other.clone())),
    }
}

/// A document with any operator key is read as an operator list, so mixing operator
/// and plain keys is rejected in any key order.
fn is_operator_document(document: &Document) -> bool {
    document.keys().any(|key| key.starts_with('$'))
}

fn parse_operators(field: &str, ops: &Document) -> DocumentStoreResult<Expr> {
    let mut clauses = Vec::with_capacity(ops.len());
    let options = match ops.get("$options") {
        Some(Bson::String(options)) => Some(options.as_str()),
        Some(other) => return Err(invalid(format!("$options must be a string, got {other}"))),
        None => None,
    };

    if options.is_some() && !ops.contains_key("$regex") {
        return Err(invalid(format!("$options without $regex on {field}")));
    }

    for (op, operand) in ops {
        let clause = match op.as_str() {
            "$eq" => comparison(field, FieldOp::Eq, operand),
            "$ne" => comparison(field, FieldOp::Ne, operand),
            "$gt" => comparison(field, FieldOp::Gt, operand),
            "$gte" => comparison(field, FieldOp::Gte, operand),
            "$lt" => comparison(field, FieldOp::Lt, operand),
            "$lte" => comparison(field, FieldOp::Lte, operand),
            "$in" => comparison(field, FieldOp::In, array_operand(op, operand)?),
            "$nin" => comparison(field, FieldOp::Nin, array_operand(op, operand)?),
            "$all" => comparison(field, FieldOp::All, array_operand(op, operand)?),
            "$size" => {
                let len = as_integer(operand)
                    .filter(|len| *len >= 0)
                    .ok_or_else(|| invalid(format!("$size must be a non-negative integer, got {operand}")))?;
                comparison(field, FieldOp::Size, &Bson::Int64(len))
            }
            "$exists" => Expr::Exists(field.to_string(), truthy(operand)),
            "$regex" => regex(field, operand, options)?,
            "$options" => continue,
            "$elemMatch" => match operand {
                Bson::Document(inner) => Expr::ElemMatch {
                    field: field.to_string(),
                    expr: Box::new(parse_element_filter(inner)?),
                },
                other => return Err(invalid(format!("$elemMatch requires a document, got {other}"))),
            },
            "$not" => match operand {
                Bson::Document(inner) if is_operator_document(inner) => parse_operators(field, inner)?.not(),
                Bson::String(pattern) => regex(field, &Bson::String(pattern.clone()), None)?.not(),
                other => return Err(invalid(format!("$not requires an operator document, got {other}"))),
            },
            other if other.starts_with('$') => {
                return Err(invalid(format!("unsupported operator {other} on {field}")));
            }
            other => {
                return Err(invalid(format!(
                    "cannot mix operators and field {other:?} in the condition on {field}"
                )));
            }
        };

        clauses.push(clause);
    }

    Ok(collapse(clauses))
}

/// `$elemMatch` either holds operators that apply to the element itself
/// (`{ "$gte": 80 }`) or a filter over element fields (`{ "qty": { "$gt": 5 } }`).
fn parse_element_filter(inner: &Document) -> DocumentStoreResult<Expr> {
    let logical = ["$and", "$or", "$nor"];

    if is_operator_document(inner) && !inner.keys().any(|key| logical.contains(&key.as_str())) {
        parse_operators("", inner)
    } else {
        parse_filter(inner)
    }
}

fn comparison(field: &str, op: FieldOp, operand: &Bson) -> Expr {
    Expr::field(field.to_string(), op, operand.clone())
}

fn array_operand<'a>(op: &str, operand: &'a Bson) -> DocumentStoreResult<&'a Bson> {
    match operand {
        Bson::Array(_) => Ok(operand),
        other => Err(invalid(format!("{op} requires an array, got {other}"))),
    }
}

fn regex(field: &str, pattern: &Bson, options: Option<&str>) -> DocumentStoreResult<Expr> {
    let Bson::String(pattern) = pattern else {
        return Err(invalid(format!("$regex requires a string pattern, got {pattern}")));
    };

    let mut builder = RegexBuilder::new(pattern);

    for flag in options.unwrap_or_default().chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => return Err(invalid(format!("unsupported regex option {other:?}"))),
        };
    }

    let regex = builder
        .build()
        .map_err(|err| invalid(format!("invalid regex {pattern:?}: {err}")))?;

    Ok(Expr::Regex { field: field.to_string(), regex })
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(flag) => *flag,
        Bson::Int32(value) => *value != 0,
        Bson::Int64(value) => *value != 0,
        Bson::Double(value) => *value != 0.0,
        Bson::Null => false,
        _ => true,
    }
}

fn collapse(mut clauses: Vec<Expr>) -> Expr {
    if clauses.len() == 1 {
        clauses.remove(0)
    } else {
        Expr::And(clauses)
    }
}

fn invalid(message: String) -> DocumentStoreError {
    DocumentStoreError::InvalidFilter(message)
}
