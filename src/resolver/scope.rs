//! Scope chains and name resolution
//!
//! Names resolve against a chain of nested scopes: the current stage's
//! output locals (for having/order_by), the input source's fields (with
//! sibling joins searched one level for unqualified names), and finally
//! the model's named queries. Nearest scope wins; an unqualified name
//! exposed by more than one sibling join is ambiguous.

use crate::ast::query::QueryDef;
use crate::diagnostics::SourceRange;
use crate::model::structdef::{FieldDef, StructDef};
use crate::model::types::TypeDesc;
use crate::model::Model;

use super::error::ResolveError;

/// One scope frame, innermost last in the chain
#[derive(Debug, Clone, Copy)]
pub enum Frame<'a> {
    /// Output fields of the stage under construction
    Stage(&'a StructDef),
    /// Fields of an input source (join paths resolve through here)
    Source(&'a StructDef),
    /// Model-level named queries
    Model(&'a Model),
}

/// What a name resolved to
#[derive(Debug, Clone)]
pub enum Resolved<'a> {
    /// A field of the input source; `path` is the full join path, last
    /// segment the field name
    InputField {
        path: Vec<String>,
        field: &'a FieldDef,
        ty: TypeDesc,
    },
    /// An output field of the current stage
    StageField { name: String, ty: TypeDesc },
    /// A model-level named query
    Query(&'a QueryDef),
}

impl Resolved<'_> {
    pub fn type_desc(&self) -> Option<TypeDesc> {
        match self {
            Resolved::InputField { ty, .. } | Resolved::StageField { ty, .. } => Some(*ty),
            Resolved::Query(_) => None,
        }
    }
}

/// The scope chain a resolution runs against
#[derive(Debug, Clone, Default)]
pub struct Scope<'a> {
    frames: Vec<Frame<'a>>,
}

impl<'a> Scope<'a> {
    pub fn new() -> Self {
        Scope { frames: vec![] }
    }

    /// A scope over a single input source
    pub fn of_source(source: &'a StructDef) -> Self {
        Scope {
            frames: vec![Frame::Source(source)],
        }
    }

    /// Push a nearer (inner) frame, e.g. stage output locals.
    pub fn with_inner(mut self, frame: Frame<'a>) -> Self {
        self.frames.push(frame);
        self
    }

    /// Resolve a dotted path against the chain, innermost frame first.
    pub fn resolve(&self, path: &[String], range: SourceRange) -> Result<Resolved<'a>, ResolveError> {
        let head = match path.first() {
            Some(h) => h,
            None => {
                return Err(ResolveError::NameNotFound {
                    name: String::new(),
                    range,
                })
            }
        };

        for frame in self.frames.iter().rev() {
            match frame {
                Frame::Stage(output) => {
                    // Stage locals are flat; only single-segment names match
                    if path.len() == 1 {
                        if let Some(field) = output.get_field(head) {
                            return Ok(Resolved::StageField {
                                name: head.clone(),
                                ty: field.type_desc(),
                            });
                        }
                    }
                }
                Frame::Source(source) => {
                    match resolve_in_source(source, path, range)? {
                        Some(resolved) => return Ok(resolved),
                        None => continue,
                    }
                }
                Frame::Model(model) => {
                    if path.len() == 1 {
                        if let Some(query) = model.get_query(head) {
                            return Ok(Resolved::Query(query));
                        }
                    }
                }
            }
        }

        Err(ResolveError::NameNotFound {
            name: path.join("."),
            range,
        })
    }
}

/// Resolve a path within one source: direct fields first, then each
/// sibling join's fields one level deep for unqualified names.
fn resolve_in_source<'a>(
    source: &'a StructDef,
    path: &[String],
    range: SourceRange,
) -> Result<Option<Resolved<'a>>, ResolveError> {
    let head = &path[0];

    if let Some(field) = source.get_field(head) {
        return descend(field, path, &[], range).map(Some);
    }

    // Unqualified name exposed through a join? Exactly one join may expose it.
    let exposing: Vec<(&str, &FieldDef)> = source
        .joins()
        .filter_map(|j| j.source.get_field(head).map(|f| (j.name.as_str(), f)))
        .collect();

    match exposing.as_slice() {
        [] => Ok(None),
        [(join_name, field)] => descend(field, path, &[join_name.to_string()], range).map(Some),
        _ => Err(ResolveError::AmbiguousName {
            name: head.clone(),
            candidates: exposing.iter().map(|(n, _)| n.to_string()).collect(),
            range,
        }),
    }
}

/// Walk the remaining path segments through join fields, accumulating the
/// normalized full path.
fn descend<'a>(
    field: &'a FieldDef,
    path: &[String],
    prefix: &[String],
    range: SourceRange,
) -> Result<Resolved<'a>, ResolveError> {
    let mut full_path: Vec<String> = prefix.to_vec();
    full_path.push(path[0].clone());
    let rest = &path[1..];

    if rest.is_empty() {
        return Ok(Resolved::InputField {
            ty: field.type_desc(),
            path: full_path,
            field,
        });
    }

    match field {
        FieldDef::Join(join) => {
            let next = &rest[0];
            match join.source.get_field(next) {
                Some(inner) => descend(inner, rest, &full_path, range),
                None => Err(ResolveError::NameNotFound {
                    name: path.join("."),
                    range,
                }),
            }
        }
        // Only joins can be dotted into
        _ => Err(ResolveError::NameNotFound {
            name: path.join("."),
            range,
        }),
    }
}
