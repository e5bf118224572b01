//! Filter expressions and query descriptors.
//!
//! A query descriptor arrives from the protocol server as a document with the keys
//! `$filter`, `$select`, `$sort`, `$skip`, `$limit`, `$count` and `$inlinecount`
//! (all optional, case-sensitive). [`QueryOptions::from_descriptor`] validates it into a
//! typed [`QueryOptions`]; the fluent [`QueryBuilder`] builds the same value in code.
//!
//! # Query Building
//!
//! ```ignore
//! use memquery_core::query::{Filter, QueryOptions, SortDirection};
//!
//! let query = QueryOptions::builder()
//!     .filter(Filter::eq("status", "active").and(Filter::gte("age", 18)))
//!     .sort("created_at", SortDirection::Desc)
//!     .skip(20)
//!     .limit(10)
//!     .inline_count()
//!     .build();
//! ```
//!
//! # Filter Expression API
//!
//! The [`Filter`] struct provides static constructors for expression nodes:
//!
//! - Comparison: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - Membership: `any_of`, `none_of`, `all`
//! - Arrays: `size`, `elem_match`
//! - Strings: `regex`
//! - Existence: `exists`, `not_exists`
//! - Logical: `and`, `or`, `nor`
//!
//! Filters written as documents (`{ "age": { "$gte": 18 } }`) are parsed by
//! [`crate::filter::parse_filter`] into the same tree.

use bson::{Bson, Document};
use regex::Regex;

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    filter::parse_filter,
};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

/// One sort key: which field to sort by and in which direction.
///
/// Queries carry an ordered list of these; earlier keys take priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    /// The field path to sort by (dot notation for nested fields).
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

impl Sort {
    /// Parses a `$sort` document such as `{ "age": -1, "name": 1 }`.
    ///
    /// Directions may be `1`/`-1` or the strings `"asc"`/`"desc"`.
    pub fn parse_all(spec: &Document) -> DocumentStoreResult<Vec<Sort>> {
        spec.iter()
            .map(|(field, direction)| {
                let direction = match direction {
                    Bson::String(name) if name.eq_ignore_ascii_case("asc") => SortDirection::Asc,
                    Bson::String(name) if name.eq_ignore_ascii_case("desc") => SortDirection::Desc,
                    other => match as_integer(other) {
                        Some(1) => SortDirection::Asc,
                        Some(-1) => SortDirection::Desc,
                        _ => {
                            return Err(DocumentStoreError::InvalidQuery(format!(
                                "sort direction for {field} must be 1 or -1, got {other}"
                            )));
                        }
                    },
                };

                Ok(Sort { field: field.clone(), direction })
            })
            .collect()
    }
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    /// Equal to. Missing fields equal `null`; array fields match if any element is equal.
    Eq,
    /// Not equal to (exact negation of `Eq`).
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// Field equals any of the values in the operand array.
    In,
    /// Field equals none of the values in the operand array.
    Nin,
    /// Array field contains every value in the operand array.
    All,
    /// Array field has exactly the given number of elements.
    Size,
}

/// A filter expression for matching documents.
///
/// Expressions can be combined using logical operators (`And`, `Or`, `Nor`, `Not`)
/// to build arbitrarily nested predicates. Field names are paths in dot notation.
///
/// An empty `And` matches every document.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOR of multiple expressions (none may match).
    Nor(Vec<Expr>),
    /// Logical NOT of an expression (inverts the result).
    Not(Box<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// The field path to compare.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Bson,
    },
    /// String field matches a regular expression.
    Regex {
        /// The field path to test.
        field: String,
        /// The compiled pattern.
        regex: Regex,
    },
    /// Array field has at least one element matching the nested expression.
    ///
    /// The nested expression is evaluated with the element as its root; an empty
    /// field path inside it refers to the element itself.
    ElemMatch {
        /// The array field path.
        field: String,
        /// The expression applied to each element.
        expr: Box<Expr>,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// Parses a filter document into an expression.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidFilter`] if the document is malformed.
    pub fn parse(filter: &Document) -> DocumentStoreResult<Self> {
        parse_filter(filter)
    }

    /// Combines this expression with another using logical AND.
    ///
    /// If this expression is already an AND, the other expression is appended
    /// to the list. Otherwise, a new AND expression is created.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    ///
    /// If this expression is already an OR, the other expression is appended
    /// to the list. Otherwise, a new OR expression is created.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression (logical NOT).
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Returns `true` if this expression matches every document.
    pub fn is_match_all(&self) -> bool {
        matches!(self, Expr::And(list) if list.is_empty())
    }
}

/// Helper struct for constructing filter expressions.
///
/// All methods accept field names and values as `Into<String>` and `Into<Bson>` for ergonomics.
///
/// # Example
///
/// ```ignore
/// use memquery_core::query::Filter;
///
/// let expr = Filter::eq("name", "Alice")
///     .and(Filter::gt("age", 18));
/// ```
pub struct Filter;

impl Filter {
    /// Matches documents where the field equals the value.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    /// Matches documents where the field does not equal the value.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    /// Matches documents where the field is greater than the value.
    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    /// Matches documents where the field is greater than or equal to the value.
    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    /// Matches documents where the field is less than the value.
    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    /// Matches documents where the field is less than or equal to the value.
    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    /// Matches documents where the field equals any of the values.
    pub fn any_of<V: Into<Bson>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Expr {
        Expr::field(field.into(), FieldOp::In, collect_array(values))
    }

    /// Matches documents where the field equals none of the values.
    pub fn none_of<V: Into<Bson>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Expr {
        Expr::field(field.into(), FieldOp::Nin, collect_array(values))
    }

    /// Matches documents where the array field contains every one of the values.
    pub fn all<V: Into<Bson>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Expr {
        Expr::field(field.into(), FieldOp::All, collect_array(values))
    }

    /// Matches documents where the array field has exactly `len` elements.
    pub fn size(field: impl Into<String>, len: usize) -> Expr {
        Expr::field(field.into(), FieldOp::Size, Bson::Int64(len as i64))
    }

    /// Matches documents where the field exists.
    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    /// Matches documents where the field does not exist.
    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    /// Matches documents where the string field matches `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidFilter`] if the pattern does not compile.
    pub fn regex(field: impl Into<String>, pattern: &str) -> DocumentStoreResult<Expr> {
        let regex = Regex::new(pattern)
            .map_err(|err| DocumentStoreError::InvalidFilter(format!("invalid regex {pattern:?}: {err}")))?;

        Ok(Expr::Regex { field: field.into(), regex })
    }

    /// Matches documents where at least one element of the array field matches `expr`.
    pub fn elem_match(field: impl Into<String>, expr: Expr) -> Expr {
        Expr::ElemMatch { field: field.into(), expr: Box::new(expr) }
    }

    /// Combines expressions such that all must match.
    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    /// Combines expressions such that any can match.
    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    /// Combines expressions such that none may match.
    pub fn nor(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Nor(exprs.into_iter().collect())
    }
}

fn collect_array<V: Into<Bson>>(values: impl IntoIterator<Item = V>) -> Bson {
    Bson::Array(values.into_iter().map(Into::into).collect())
}

/// A field projection: which fields appear in result documents.
///
/// Inclusion and exclusion cannot be mixed, except that the identity field may be
/// excluded from an inclusion projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Keep only the listed paths (and the identity field when `keep_id` is set).
    Include {
        /// Paths to keep.
        fields: Vec<String>,
        /// Whether the identity field is kept.
        keep_id: bool,
    },
    /// Drop the listed paths and keep everything else.
    Exclude {
        /// Paths to drop.
        fields: Vec<String>,
    },
}

impl Projection {
    /// Creates an inclusion projection that also keeps the identity field.
    pub fn include<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Projection::Include {
            fields: fields.into_iter().map(Into::into).collect(),
            keep_id: true,
        }
    }

    /// Creates an exclusion projection.
    pub fn exclude<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Projection::Exclude {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses a projection document such as `{ "foo": 1, "_id": 0 }`.
    ///
    /// Returns `Ok(None)` for an empty document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidQuery`] for non-boolean/non-numeric flags or
    /// when inclusions and exclusions are mixed.
    pub fn parse(spec: &Document, id_field: &str) -> DocumentStoreResult<Option<Self>> {
        let mut included = Vec::new();
        let mut excluded = Vec::new();
        let mut id_flag = None;

        for (field, flag) in spec {
            let keep = match flag {
                Bson::Boolean(value) => *value,
                Bson::Int32(value) => *value != 0,
                Bson::Int64(value) => *value != 0,
                Bson::Double(value) => *value != 0.0,
                other => {
                    return Err(DocumentStoreError::InvalidQuery(format!(
                        "projection flag for {field} must be a boolean or number, got {other}"
                    )));
                }
            };

            if field == id_field {
                id_flag = Some(keep);
            } else if keep {
                included.push(field.clone());
            } else {
                excluded.push(field.clone());
            }
        }

        if !included.is_empty() && !excluded.is_empty() {
            return Err(DocumentStoreError::InvalidQuery(
                "projection cannot mix inclusion and exclusion".to_string(),
            ));
        }

        if !included.is_empty() || (excluded.is_empty() && id_flag == Some(true)) {
            return Ok(Some(Projection::Include {
                fields: included,
                keep_id: id_flag.unwrap_or(true),
            }));
        }

        if id_flag == Some(false) {
            excluded.push(id_field.to_string());
        }

        Ok((!excluded.is_empty()).then_some(Projection::Exclude { fields: excluded }))
    }
}

/// Which shape a query result takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultMode {
    /// Return the paginated documents.
    #[default]
    Values,
    /// Return only the number of matched documents.
    Count,
    /// Return the paginated documents together with the number of matched documents.
    InlineCount,
}

/// A validated query: filter, projection, ordering, pagination and result mode.
///
/// Use [`QueryBuilder`] for ergonomic construction or [`QueryOptions::from_descriptor`]
/// for descriptors received from the protocol server.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Filter expression; `None` matches every document.
    pub filter: Option<Expr>,
    /// Field projection applied to returned documents.
    pub projection: Option<Projection>,
    /// Sort keys in priority order.
    pub sort: Vec<Sort>,
    /// Number of matched documents to skip.
    pub skip: Option<usize>,
    /// Maximum number of documents to return after skipping.
    pub limit: Option<usize>,
    /// Result shape.
    pub mode: ResultMode,
}

impl QueryOptions {
    /// Creates a query matching every document with no projection or pagination.
    pub fn new() -> Self {
        QueryOptions::default()
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Validates a protocol query descriptor.
    ///
    /// Recognized keys are `$filter`, `$select`, `$sort`, `$skip`, `$limit`, `$count`
    /// and `$inlinecount`; a `null` value counts as absent and other keys are ignored.
    /// When both `$count` and `$inlinecount` are set, count mode wins.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidFilter`] for a malformed `$filter` and
    /// [`DocumentStoreError::InvalidQuery`] for any other malformed part.
    pub fn from_descriptor(descriptor: &Document, id_field: &str) -> DocumentStoreResult<Self> {
        let mut options = QueryOptions::new();
        let mut count = false;
        let mut inline_count = false;

        for (key, value) in descriptor {
            if matches!(value, Bson::Null) {
                continue;
            }

            match key.as_str() {
                "$filter" => {
                    let filter = value.as_document().ok_or_else(|| {
                        DocumentStoreError::InvalidFilter(format!("$filter must be a document, got {value}"))
                    })?;

                    if !filter.is_empty() {
                        options.filter = Some(parse_filter(filter)?);
                    }
                }
                "$select" => {
                    let spec = value.as_document().ok_or_else(|| {
                        DocumentStoreError::InvalidQuery(format!("$select must be a document, got {value}"))
                    })?;

                    options.projection = Projection::parse(spec, id_field)?;
                }
                "$sort" => {
                    let spec = value.as_document().ok_or_else(|| {
                        DocumentStoreError::InvalidQuery(format!("$sort must be a document, got {value}"))
                    })?;

                    options.sort = Sort::parse_all(spec)?;
                }
                "$skip" => options.skip = Some(as_count(key, value)?),
                "$limit" => options.limit = Some(as_count(key, value)?),
                "$count" => count = as_flag(key, value)?,
                "$inlinecount" => inline_count = as_flag(key, value)?,
                _ => {}
            }
        }

        options.mode = match (count, inline_count) {
            (true, _) => ResultMode::Count,
            (false, true) => ResultMode::InlineCount,
            (false, false) => ResultMode::Values,
        };

        Ok(options)
    }
}

/// Reads an integral BSON number.
pub(crate) fn as_integer(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(value) => Some(i64::from(*value)),
        Bson::Int64(value) => Some(*value),
        Bson::Double(value) if value.is_finite() && value.fract() == 0.0 => Some(*value as i64),
        _ => None,
    }
}

fn as_count(key: &str, value: &Bson) -> DocumentStoreResult<usize> {
    as_integer(value)
        .and_then(|count| usize::try_from(count).ok())
        .ok_or_else(|| {
            DocumentStoreError::InvalidQuery(format!("{key} must be a non-negative integer, got {value}"))
        })
}

fn as_flag(key: &str, value: &Bson) -> DocumentStoreResult<bool> {
    match value {
        Bson::Boolean(flag) => Ok(*flag),
        Bson::Int32(flag) => Ok(*flag != 0),
        Bson::Int64(flag) => Ok(*flag != 0),
        Bson::Double(flag) => Ok(*flag != 0.0),
        Bson::String(flag) => match flag.to_ascii_lowercase().as_str() {
            "allpages" | "true" => Ok(true),
            "none" | "false" | "" => Ok(false),
            _ => Err(DocumentStoreError::InvalidQuery(format!("unrecognized {key} value {flag:?}"))),
        },
        other => Err(DocumentStoreError::InvalidQuery(format!("{key} must be a boolean, got {other}"))),
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: QueryOptions,
}

impl QueryBuilder {
    /// Creates a new query builder.
    pub fn new() -> Self {
        QueryBuilder { query: QueryOptions::default() }
    }

    /// Sets the filter expression for this query.
    pub fn filter(mut self, filter: Expr) -> Self {
        self.query.filter = Some(filter);
        self
    }

    /// Sets the projection applied to returned documents.
    pub fn select(mut self, projection: Projection) -> Self {
        self.query.projection = Some(projection);
        self
    }

    /// Appends a sort key. Keys added first take priority.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort.push(Sort { field: field.into(), direction });
        self
    }

    /// Sets the number of matched documents to skip.
    pub fn skip(mut self, skip: usize) -> Self {
        self.query.skip = Some(skip);
        self
    }

    /// Sets the maximum number of documents to return.
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Returns only the number of matched documents.
    pub fn count(mut self) -> Self {
        self.query.mode = ResultMode::Count;
        self
    }

    /// Returns the page together with the number of matched documents.
    pub fn inline_count(mut self) -> Self {
        self.query.mode = ResultMode::InlineCount;
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> QueryOptions {
        self.query
    }
}

/// Walks a filter expression tree.
///
/// The matcher in `memquery-memory` implements this to evaluate expressions against
/// documents; other implementations can translate expressions for other engines.
pub trait QueryVisitor {
    type Output;
    type Error: Into<DocumentStoreError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_nor(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_regex(&mut self, field: &str, regex: &Regex) -> Result<Self::Output, Self::Error>;
    fn visit_elem_match(&mut self, field: &str, expr: &Expr) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Nor(exprs) => self.visit_nor(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, *op, value),
            Expr::Regex { field, regex } => self.visit_regex(field, regex),
            Expr::ElemMatch { field, expr } => self.visit_elem_match(field, expr),
        }
    }
}
