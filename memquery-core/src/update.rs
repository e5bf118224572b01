//! Transform pipelines applied by update operations.
//!
//! An update descriptor is one stage document or an array of them. A stage document
//! may hold several stages, applied in key order:
//!
//! ```ignore
//! use bson::bson;
//! use memquery_core::update::Pipeline;
//!
//! let pipeline = Pipeline::parse(
//!     &bson!([
//!         { "$set": { "status": "archived", "previous": "$status" } },
//!         { "$unset": ["draft"], "$inc": { "revision": 1 } },
//!     ]),
//!     "_id",
//! )?;
//! ```
//!
//! Supported stages are `$set`/`$addFields`, `$unset`, `$project`, `$replaceWith`,
//! `$replaceRoot` and `$inc`. Values in `$set` and `$replaceWith` are expressions:
//! strings starting with `$` reference fields of the document as it was before the
//! stage, and `{ "$literal": value }` escapes a value verbatim.

use bson::{Bson, Document};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::Projection,
};

/// One transform stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Set each path to the evaluated expression, creating intermediate documents.
    Set(Vec<(String, Bson)>),
    /// Remove each path.
    Unset(Vec<String>),
    /// Reshape the document with a projection.
    Project(Projection),
    /// Replace the whole document with the evaluated expression.
    ReplaceWith(Bson),
    /// Add a number to each path; missing fields start at zero.
    Inc(Vec<(String, Bson)>),
}

/// An ordered, non-empty list of stages.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Creates an empty pipeline for fluent construction.
    pub fn new() -> Self {
        Pipeline::default()
    }

    /// Returns the stages in application order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Returns `true` if the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Appends a `$set` of a single path to a literal value.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        let literal = Bson::Document(bson::doc! { "$literal": value.into() });
        self.stages.push(Stage::Set(vec![(field.into(), literal)]));
        self
    }

    /// Appends a `$unset` of the given paths.
    pub fn unset<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.stages.push(Stage::Unset(fields.into_iter().map(Into::into).collect()));
        self
    }

    /// Appends an `$inc` of a single path.
    pub fn inc(mut self, field: impl Into<String>, by: impl Into<Bson>) -> Self {
        self.stages.push(Stage::Inc(vec![(field.into(), by.into())]));
        self
    }

    /// Appends an arbitrary stage.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Parses an update descriptor: a stage document or an array of stage documents.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidUpdate`] for an empty pipeline, unknown
    /// stages, or stage arguments of the wrong shape.
    pub fn parse(descriptor: &Bson, id_field: &str) -> DocumentStoreResult<Self> {
        let mut pipeline = Pipeline::new();

        match descriptor {
            Bson::Document(stages) => pipeline.push_stages(stages, id_field)?,
            Bson::Array(items) => {
                for item in items {
                    match item {
                        Bson::Document(stages) => pipeline.push_stages(stages, id_field)?,
                        other => return Err(invalid(format!("pipeline entries must be documents, got {other}"))),
                    }
                }
            }
            other => return Err(invalid(format!("update must be a document or an array, got {other}"))),
        }

        if pipeline.is_empty() {
            return Err(invalid("update pipeline is empty".to_string()));
        }

        Ok(pipeline)
    }

    fn push_stages(&mut self, stages: &Document, id_field: &str) -> DocumentStoreResult<()> {
        for (name, argument) in stages {
            let stage = match name.as_str() {
                "$set" | "$addFields" => Stage::Set(field_values(name, argument)?),
                "$unset" => Stage::Unset(unset_fields(argument)?),
                "$project" => {
                    let spec = argument
                        .as_document()
                        .ok_or_else(|| invalid(format!("$project requires a document, got {argument}")))?;
                    let projection = Projection::parse(spec, id_field)
                        .map_err(|err| invalid(err.to_string()))?
                        .ok_or_else(|| invalid("$project requires at least one field".to_string()))?;
                    Stage::Project(projection)
                }
                "$replaceWith" => Stage::ReplaceWith(argument.clone()),
                "$replaceRoot" => {
                    let new_root = argument
                        .as_document()
                        .and_then(|spec| spec.get("newRoot"))
                        .ok_or_else(|| invalid("$replaceRoot requires a newRoot".to_string()))?;
                    Stage::ReplaceWith(new_root.clone())
                }
                "$inc" => {
                    let increments = field_values(name, argument)?;
                    if let Some((field, value)) = increments
                        .iter()
                        .find(|(_, value)| !matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)))
                    {
                        return Err(invalid(format!("$inc of {field} requires a number, got {value}")));
                    }
                    Stage::Inc(increments)
                }
                other => return Err(invalid(format!("unsupported update stage {other:?}"))),
            };

            self.stages.push(stage);
        }

        Ok(())
    }
}

fn field_values(stage: &str, argument: &Bson) -> DocumentStoreResult<Vec<(String, Bson)>> {
    let fields = argument
        .as_document()
        .ok_or_else(|| invalid(format!("{stage} requires a document, got {argument}")))?;

    if fields.is_empty() {
        return Err(invalid(format!("{stage} requires at least one field")));
    }

    fields
        .iter()
        .map(|(field, value)| {
            check_path(field)?;
            Ok((field.clone(), value.clone()))
        })
        .collect()
}

fn unset_fields(argument: &Bson) -> DocumentStoreResult<Vec<String>> {
    let fields = match argument {
        Bson::String(field) => vec![field.clone()],
        Bson::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| match item {
                Bson::String(field) => Ok(field.clone()),
                other => Err(invalid(format!("$unset entries must be strings, got {other}"))),
            })
            .collect::<DocumentStoreResult<Vec<_>>>()?,
        other => return Err(invalid(format!("$unset requires a field name or a list of them, got {other}"))),
    };

    for field in &fields {
        check_path(field)?;
    }

    Ok(fields)
}

fn check_path(path: &str) -> DocumentStoreResult<()> {
    if path.is_empty() || path.starts_with('$') || path.split('.').any(str::is_empty) {
        return Err(invalid(format!("invalid field path {path:?}")));
    }

    Ok(())
}

fn invalid(message: String) -> DocumentStoreError {
    DocumentStoreError::InvalidUpdate(message)
}
