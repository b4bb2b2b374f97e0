//! The resolved model: sources, composites, and named queries
//!
//! A `Model` is the output of a successful struct/join build. It is
//! immutable once translation succeeds; structs are shared via `Arc` so
//! later references reuse the same value.

pub mod arena;
pub mod composite;
pub mod expr;
pub mod structdef;
pub mod types;

pub use arena::{SourceArena, SourceId, SourceSlot};
pub use composite::{CompositeBranch, CompositeSource};
pub use expr::{AggFunc, BinaryOp, ExprIr, LiteralValue, OrderDirection, UnaryOp};
pub use structdef::{
    ExprField, FieldDef, JoinField, JoinKind, RepeatedField, StructBase, StructDef, TurtleField,
};
pub use types::{DataType, EvalSpace, ExpressionType, TypeDesc};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::ast::query::QueryDef;

/// A named model entry: either a plain struct or a composite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SourceEntry {
    Struct(Arc<StructDef>),
    Composite(Arc<CompositeSource>),
}

impl SourceEntry {
    pub fn name(&self) -> &str {
        match self {
            SourceEntry::Struct(s) => &s.name,
            SourceEntry::Composite(c) => &c.name,
        }
    }

    pub fn dialect(&self) -> &str {
        match self {
            SourceEntry::Struct(s) => &s.dialect,
            SourceEntry::Composite(c) => &c.dialect,
        }
    }
}

/// Named collection of sources plus exported query definitions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub sources: Vec<SourceEntry>,
    /// Model-level named queries, kept as AST for refinement lookup
    pub queries: Vec<QueryDef>,
    /// Sources whose build failed; their diagnostics are already reported
    #[serde(default)]
    pub failed_sources: Vec<String>,
}

impl Model {
    pub fn new() -> Self {
        Model::default()
    }

    pub fn get_source(&self, name: &str) -> Option<&SourceEntry> {
        self.sources.iter().find(|s| s.name() == name)
    }

    pub fn get_struct(&self, name: &str) -> Option<&Arc<StructDef>> {
        match self.get_source(name) {
            Some(SourceEntry::Struct(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_composite(&self, name: &str) -> Option<&Arc<CompositeSource>> {
        match self.get_source(name) {
            Some(SourceEntry::Composite(c)) => Some(c),
            _ => None,
        }
    }

    pub fn get_query(&self, name: &str) -> Option<&QueryDef> {
        self.queries.iter().find(|q| q.name == name)
    }

    pub fn is_failed_source(&self, name: &str) -> bool {
        self.failed_sources.iter().any(|n| n == name)
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }
}
